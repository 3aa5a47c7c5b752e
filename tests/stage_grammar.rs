// Stage grammar properties: index sets must be a permutation of {1..N},
// and option values resolve through the global -> stage -> algorithm chain.

use flowmap::algos;
use flowmap::error::MapError;
use flowmap::map_opt::parse_stage_args;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_any_permutation_of_contiguous_stages_parses() {
    let permutations = [
        vec!["stage1", "stage2", "stage3"],
        vec!["stage3", "stage1", "stage2"],
        vec!["stage2", "stage3", "stage1"],
    ];
    for perm in &permutations {
        let mut cli = Vec::new();
        for stage in perm {
            cli.push(*stage);
            cli.push("exact");
        }
        let resolved = parse_stage_args(&args(&cli)).unwrap();
        assert_eq!(resolved.algo_opts.len(), 3, "{perm:?}");
        for (opt, stage_tok) in resolved.algo_opts.iter().zip(perm) {
            let expected: i32 = stage_tok["stage".len()..].parse().unwrap();
            assert_eq!(opt.stage, expected);
        }
    }
}

#[test]
fn test_skipped_and_repeated_indices_rejected() {
    // {1, 3} skips a value
    assert!(matches!(
        parse_stage_args(&args(&["stage1", "exact", "stage3", "exact"])),
        Err(MapError::CommandLineArgument(_))
    ));
    // {1, 1} repeats a value
    assert!(matches!(
        parse_stage_args(&args(&["stage1", "exact", "stage1", "exact"])),
        Err(MapError::CommandLineArgument(_))
    ));
    // {2} never reaches 1
    assert!(matches!(
        parse_stage_args(&args(&["stage2", "exact"])),
        Err(MapError::CommandLineArgument(_))
    ));
}

#[test]
fn test_option_inheritance_chain() {
    let resolved = parse_stage_args(&args(&[
        "-T", "10", // global
        "stage1", "exact", // inherits the global threshold
        "stage2", "-T", "25", // stage override
        "exact", "ungapped", "-T", "40", // algorithm override
    ]))
    .unwrap();

    assert_eq!(resolved.algo_opts[0].score_threshold(), 10);
    assert_eq!(resolved.algo_opts[1].score_threshold(), 25);
    assert_eq!(resolved.algo_opts[2].score_threshold(), 40);

    // unset everywhere resolves to the built-in default
    assert_eq!(
        resolved.algo_opts[0].pen_mismatch(),
        flowmap::defaults::PEN_MISMATCH
    );
}

#[test]
fn test_algorithm_ids_stamped() {
    let resolved =
        parse_stage_args(&args(&["stage1", "exact", "ungapped"])).unwrap();
    assert_eq!(resolved.algo_opts[0].algo_id, algos::ALGO_EXACT);
    assert_eq!(resolved.algo_opts[1].algo_id, algos::ALGO_UNGAPPED);
    // the global node stays a placeholder
    assert_eq!(resolved.global.algo_id, 0);
    assert_eq!(resolved.global.stage, 0);
}
