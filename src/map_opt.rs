// Option nodes and the stage-grammar resolver.
//
// A run is configured by a three-level chain of option nodes: one global
// node, one per stage, one per algorithm. Unset settings inherit from the
// enclosing level; the resolver realizes that by cloning the enclosing node
// and re-applying only the options present in the narrower window
// (`try_update_from`), so the algorithm level beats the stage level beats
// the global level.
//
// Grammar: [global-opts] stage<N> [stage-opts] <algo> [algo-opts]
//          [<algo> [algo-opts] ...] [stage<M> ...]

use std::path::PathBuf;

use clap::Parser;

use crate::algos;
use crate::defaults;
use crate::error::{MapError, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "map", no_binary_name = true, disable_version_flag = true)]
pub struct MapOpt {
    // ===== Inheritable mapping options (global -> stage -> algorithm) =====
    /// Score for a matching base
    #[arg(short = 'A', long, value_name = "INT")]
    pub score_match: Option<i32>,

    /// Penalty for a mismatching base
    #[arg(short = 'M', long, value_name = "INT")]
    pub pen_mismatch: Option<i32>,

    /// Penalty for opening a gap
    #[arg(short = 'O', long, value_name = "INT")]
    pub pen_gap_open: Option<i32>,

    /// Penalty for extending a gap
    #[arg(short = 'E', long, value_name = "INT")]
    pub pen_gap_extend: Option<i32>,

    /// Minimum score for a candidate to be accepted
    #[arg(short = 'T', long, value_name = "INT")]
    pub score_threshold: Option<i32>,

    /// Reads shorter than this are not submitted to the placement scans
    #[arg(short = 'g', long, value_name = "INT")]
    pub min_seed_length: Option<i32>,

    /// Maximum mismatches tolerated by the ungapped scan
    #[arg(short = 'm', long, value_name = "INT")]
    pub max_mismatches: Option<i32>,

    /// Maximum candidate placements kept per read and algorithm
    #[arg(short = 'c', long, value_name = "INT")]
    pub max_hits: Option<i32>,

    /// Accumulate candidates across all stages instead of stopping at the
    /// first stage that accepts an alignment
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub keep_all: Option<bool>,

    // ===== Global-only options =====
    /// Reference FASTA file (gzip allowed)
    #[arg(short = 'f', long = "fn-fasta", value_name = "FILE")]
    pub fn_fasta: Option<PathBuf>,

    /// Input read file(s), read back to back (may repeat)
    #[arg(short = 'r', long = "fn-reads", value_name = "FILE")]
    pub fn_reads: Vec<String>,

    /// Input read format: fastq, sff, sam or bam
    #[arg(short = 'i', long = "reads-format", value_name = "FORMAT")]
    pub reads_format: Option<String>,

    /// Output SAM file (default: stdout)
    #[arg(short = 'o', long = "fn-sam", value_name = "FILE")]
    pub fn_sam: Option<PathBuf>,

    /// Number of worker threads (default: all available cores)
    #[arg(short = 'n', long, value_name = "INT")]
    pub num_threads: Option<usize>,

    /// Number of reads pulled from the source per batch
    #[arg(short = 'b', long, value_name = "INT")]
    pub reads_per_batch: Option<usize>,

    /// Read group line or fragment such as 'ID:foo\tSM:bar' (may repeat;
    /// fragments are joined with tabs)
    #[arg(short = 'R', long = "sam-rg", value_name = "STR")]
    pub sam_rg: Vec<String>,

    /// Emit flow-space auxiliary tags (FZ, XZ) for flow-space reads
    #[arg(short = 'Y', long)]
    pub sam_flowspace_tags: bool,

    /// Flow order known out of band (conflicts with an FO read-group tag)
    #[arg(short = 'x', long, value_name = "STR")]
    pub flow_order: Option<String>,

    /// Key sequence known out of band (conflicts with a KS read-group tag)
    #[arg(short = 'k', long, value_name = "STR")]
    pub key_seq: Option<String>,

    /// Verbosity: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, value_name = "INT")]
    pub verbosity: Option<i32>,

    // ===== Stamped during resolution, never parsed =====
    /// Algorithm id; 0 marks a global or stage placeholder node
    #[arg(skip)]
    pub algo_id: u32,

    /// Stage index; 0 marks the global node
    #[arg(skip)]
    pub stage: i32,
}

impl MapOpt {
    /// Fill every unset inheritable setting with its built-in default.
    /// Applied to the global node only; stage and algorithm nodes inherit
    /// through cloning instead.
    pub fn finalize_global(&mut self) {
        self.score_match.get_or_insert(defaults::SCORE_MATCH);
        self.pen_mismatch.get_or_insert(defaults::PEN_MISMATCH);
        self.pen_gap_open.get_or_insert(defaults::PEN_GAP_OPEN);
        self.pen_gap_extend.get_or_insert(defaults::PEN_GAP_EXTEND);
        self.score_threshold.get_or_insert(defaults::SCORE_THRESHOLD);
        self.min_seed_length.get_or_insert(defaults::MIN_SEED_LENGTH);
        self.max_mismatches.get_or_insert(defaults::MAX_MISMATCHES);
        self.max_hits.get_or_insert(defaults::MAX_HITS);
        self.keep_all.get_or_insert(false);
        self.verbosity.get_or_insert(defaults::VERBOSITY);
    }

    pub fn score_match(&self) -> i32 {
        self.score_match.unwrap_or(defaults::SCORE_MATCH)
    }

    pub fn pen_mismatch(&self) -> i32 {
        self.pen_mismatch.unwrap_or(defaults::PEN_MISMATCH)
    }

    pub fn pen_gap_open(&self) -> i32 {
        self.pen_gap_open.unwrap_or(defaults::PEN_GAP_OPEN)
    }

    pub fn pen_gap_extend(&self) -> i32 {
        self.pen_gap_extend.unwrap_or(defaults::PEN_GAP_EXTEND)
    }

    pub fn score_threshold(&self) -> i32 {
        self.score_threshold.unwrap_or(defaults::SCORE_THRESHOLD)
    }

    pub fn min_seed_length(&self) -> i32 {
        self.min_seed_length.unwrap_or(defaults::MIN_SEED_LENGTH)
    }

    pub fn max_mismatches(&self) -> i32 {
        self.max_mismatches.unwrap_or(defaults::MAX_MISMATCHES)
    }

    pub fn max_hits(&self) -> i32 {
        self.max_hits.unwrap_or(defaults::MAX_HITS)
    }

    pub fn keep_all(&self) -> bool {
        self.keep_all.unwrap_or(false)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn reads_per_batch(&self) -> usize {
        self.reads_per_batch.unwrap_or(defaults::READS_PER_BATCH)
    }

    pub fn verbosity(&self) -> i32 {
        self.verbosity.unwrap_or(defaults::VERBOSITY)
    }

    /// Validate the global node before any work starts.
    pub fn check(&self) -> Result<()> {
        if self.fn_fasta.is_none() {
            return Err(MapError::CommandLineArgument(
                "a reference FASTA must be specified (-f)".to_string(),
            ));
        }
        if self.fn_reads.is_empty() {
            return Err(MapError::CommandLineArgument(
                "input read files must be specified (-r)".to_string(),
            ));
        }
        if self.reads_per_batch() == 0 {
            return Err(MapError::CommandLineArgument(
                "the batch size must be positive (-b)".to_string(),
            ));
        }
        if self.score_match() <= 0 {
            return Err(MapError::CommandLineArgument(
                "the match score must be positive (-A)".to_string(),
            ));
        }
        if self.pen_mismatch() < 0 || self.pen_gap_open() < 0 || self.pen_gap_extend() < 0 {
            return Err(MapError::CommandLineArgument(
                "penalties must be non-negative (-M, -O, -E)".to_string(),
            ));
        }
        Ok(())
    }
}

/// The outcome of resolving a full argument list: the finalized global node
/// plus one resolved node per (stage, algorithm), in command-line order.
#[derive(Debug)]
pub struct ResolvedOpts {
    pub global: MapOpt,
    pub algo_opts: Vec<MapOpt>,
}

fn is_stage_token(token: &str) -> bool {
    token.starts_with("stage")
}

fn stage_number(token: &str) -> Result<i32> {
    token["stage".len()..]
        .parse::<i32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            MapError::CommandLineArgument(format!("could not identify the stage: {token}"))
        })
}

fn clap_error(e: clap::Error) -> MapError {
    MapError::CommandLineArgument(e.to_string())
}

/// Resolve a stage-structured argument list into option nodes.
///
/// Everything before the first `stage<N>` token is the global segment. Each
/// stage segment owns the tokens up to the next stage token; within it, the
/// window before the first recognized algorithm name holds stage-level
/// options, and each algorithm name opens a window running to the next name
/// or the segment end. Unknown names are not stage boundaries; they are
/// ordinary tokens of the current window.
pub fn parse_stage_args(args: &[String]) -> Result<ResolvedOpts> {
    let first_stage = args
        .iter()
        .position(|a| is_stage_token(a))
        .unwrap_or(args.len());

    let mut global = MapOpt::try_parse_from(&args[..first_stage]).map_err(clap_error)?;
    global.finalize_global();

    let mut algo_opts: Vec<MapOpt> = Vec::new();
    let mut stages_used: Vec<i32> = Vec::new();

    let mut i = first_stage;
    while i < args.len() {
        // the segment runs to the next stage token, if any
        let j = args[i + 1..]
            .iter()
            .position(|a| is_stage_token(a))
            .map(|p| i + 1 + p)
            .unwrap_or(args.len());

        let cur_stage = stage_number(&args[i])?;
        if stages_used.contains(&cur_stage) {
            return Err(MapError::CommandLineArgument(
                "cannot specify the same stage twice".to_string(),
            ));
        }
        stages_used.push(cur_stage);

        // stage-level options end at the first recognized algorithm name
        let mut k = i + 1;
        while k < j && algos::name_to_id(&args[k]).is_none() {
            k += 1;
        }
        if k == j {
            return Err(MapError::CommandLineArgument(
                "a stage was specified with no algorithms".to_string(),
            ));
        }

        let mut stage_opt = global.clone();
        stage_opt
            .try_update_from(&args[i + 1..k])
            .map_err(clap_error)?;
        stage_opt.stage = cur_stage;

        while k < j {
            let Some(algo_id) = algos::name_to_id(&args[k]) else {
                // k always sits on a recognized name here
                return Err(MapError::OutOfRange("bug encountered".to_string()));
            };

            let mut l = k + 1;
            while l < j && algos::name_to_id(&args[l]).is_none() {
                l += 1;
            }

            let mut algo_opt = stage_opt.clone();
            algo_opt
                .try_update_from(&args[k + 1..l])
                .map_err(clap_error)?;
            algo_opt.stage = cur_stage;
            algo_opt.algo_id = algo_id;

            if algo_opts
                .iter()
                .any(|o| o.algo_id == algo_id && o.stage == cur_stage)
            {
                return Err(MapError::CommandLineArgument(
                    "algorithm specified twice for the same stage".to_string(),
                ));
            }
            algo_opts.push(algo_opt);

            k = l;
        }

        i = j;
    }

    if algo_opts.is_empty() {
        return Err(MapError::CommandLineArgument(
            "at least one stage with an algorithm must be specified".to_string(),
        ));
    }

    // the stage index set must be exactly {1..N}
    stages_used.sort_unstable();
    for (idx, stage) in stages_used.iter().enumerate() {
        if *stage != idx as i32 + 1 {
            return Err(MapError::CommandLineArgument(
                "a stage was missing".to_string(),
            ));
        }
    }

    Ok(ResolvedOpts { global, algo_opts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_stage_resolves() {
        let resolved = parse_stage_args(&args(&["-A", "2", "stage1", "exact"])).unwrap();
        assert_eq!(resolved.algo_opts.len(), 1);
        let algo = &resolved.algo_opts[0];
        assert_eq!(algo.stage, 1);
        assert_eq!(algo.algo_id, algos::ALGO_EXACT);
        assert_eq!(algo.score_match(), 2);
    }

    #[test]
    fn test_stage_permutation_accepted() {
        let resolved = parse_stage_args(&args(&[
            "stage2", "ungapped", "stage1", "exact",
        ]))
        .unwrap();
        assert_eq!(resolved.algo_opts.len(), 2);
        assert_eq!(resolved.algo_opts[0].stage, 2);
        assert_eq!(resolved.algo_opts[1].stage, 1);
    }

    #[test]
    fn test_missing_stage_rejected() {
        // {1, 3} skips a value
        let err = parse_stage_args(&args(&["stage1", "exact", "stage3", "ungapped"]))
            .unwrap_err();
        assert!(matches!(err, MapError::CommandLineArgument(_)));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err =
            parse_stage_args(&args(&["stage1", "exact", "stage1", "ungapped"])).unwrap_err();
        assert!(matches!(err, MapError::CommandLineArgument(_)));
    }

    #[test]
    fn test_stage_with_no_algorithms_rejected() {
        let err = parse_stage_args(&args(&["stage1", "-T", "20"])).unwrap_err();
        assert!(matches!(err, MapError::CommandLineArgument(_)));
    }

    #[test]
    fn test_bad_stage_suffix_rejected() {
        for bad in ["stage", "stage0", "stagex", "stage-1"] {
            let err = parse_stage_args(&args(&[bad, "exact"])).unwrap_err();
            assert!(matches!(err, MapError::CommandLineArgument(_)), "{bad}");
        }
    }

    #[test]
    fn test_duplicate_algorithm_in_stage_rejected() {
        let err = parse_stage_args(&args(&["stage1", "exact", "exact"])).unwrap_err();
        assert!(matches!(err, MapError::CommandLineArgument(_)));
    }

    #[test]
    fn test_three_level_inheritance() {
        let resolved = parse_stage_args(&args(&[
            "-A", "2", "-M", "7", "-T", "11", // global
            "stage1", "-T", "21", // stage level
            "exact", // inherits stage T, global A and M
            "ungapped", "-M", "9", // algorithm level wins for M
        ]))
        .unwrap();

        let exact = &resolved.algo_opts[0];
        assert_eq!(exact.score_match(), 2); // global
        assert_eq!(exact.pen_mismatch(), 7); // global
        assert_eq!(exact.score_threshold(), 21); // stage beats global

        let ungapped = &resolved.algo_opts[1];
        assert_eq!(ungapped.pen_mismatch(), 9); // algorithm beats stage/global
        assert_eq!(ungapped.score_threshold(), 21); // stage
        assert_eq!(ungapped.score_match(), 2); // global
    }

    #[test]
    fn test_unset_everywhere_yields_default() {
        let resolved = parse_stage_args(&args(&["stage1", "exact"])).unwrap();
        assert_eq!(
            resolved.algo_opts[0].score_threshold(),
            crate::defaults::SCORE_THRESHOLD
        );
    }

    #[test]
    fn test_stage_stamp_matches_enclosing_stage() {
        let resolved = parse_stage_args(&args(&[
            "stage1", "exact", "stage2", "-T", "30", "ungapped", "exact",
        ]))
        .unwrap();
        assert_eq!(resolved.algo_opts.len(), 3);
        assert_eq!(resolved.algo_opts[0].stage, 1);
        assert_eq!(resolved.algo_opts[1].stage, 2);
        assert_eq!(resolved.algo_opts[2].stage, 2);
        // both stage-2 algorithms see the stage-level threshold
        assert_eq!(resolved.algo_opts[1].score_threshold(), 30);
        assert_eq!(resolved.algo_opts[2].score_threshold(), 30);
    }

    #[test]
    fn test_global_parse_failure_is_command_line_error() {
        let err = parse_stage_args(&args(&["--no-such-option", "stage1", "exact"])).unwrap_err();
        assert!(matches!(err, MapError::CommandLineArgument(_)));
    }

    #[test]
    fn test_check_requires_inputs() {
        let mut opt = MapOpt::try_parse_from(Vec::<String>::new()).unwrap();
        opt.finalize_global();
        assert!(opt.check().is_err());
    }
}
