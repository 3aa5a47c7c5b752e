// Entry point for the `map` command.
//
// Orchestrates one run: resolve the stage-structured options, load the
// reference, settle the read group, emit the SAM header, register the
// algorithms and hand off to the pipeline driver.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::algos;
use crate::driver::{MapDriver, MapStats};
use crate::error::{MapError, Result};
use crate::map_opt::{self, ResolvedOpts};
use crate::refindex::RefIndex;
use crate::sam::header::{self, RunMeta};
use crate::sam::record::SamContext;
use crate::seq::{self, SeqFormat};

/// Parse the stage grammar and run the pipeline.
pub fn main_map(args: &[String]) -> Result<MapStats> {
    let resolved = map_opt::parse_stage_args(args)?;
    run_resolved(&resolved)
}

pub fn run_resolved(resolved: &ResolvedOpts) -> Result<MapStats> {
    let mut global = resolved.global.clone();
    global.check()?;

    // sanity-cap the worker count
    let max_threads = num_cpus::get() * 2;
    if global.num_threads() > max_threads {
        log::warn!(
            "Thread count {} exceeds recommended maximum {}, capping at {}",
            global.num_threads(),
            max_threads,
            max_threads
        );
        global.num_threads = Some(max_threads);
    }

    let Some(fasta) = global.fn_fasta.as_ref() else {
        return Err(MapError::CommandLineArgument(
            "a reference FASTA must be specified (-f)".to_string(),
        ));
    };
    let reference = RefIndex::from_fasta(fasta)?;

    let format = match global.reads_format.as_deref() {
        Some(name) => SeqFormat::parse(name)?,
        None => SeqFormat::Fastq,
    };
    if format == SeqFormat::Sff && global.flow_order.is_some() {
        // SFF carries its own flow order; an out-of-band one is checked upstream
        return Err(MapError::OutOfRange(
            "a flow order was specified for flow-space input".to_string(),
        ));
    }
    let source = seq::open_source(format, &global.fn_reads)?;

    let meta = RunMeta {
        flow_order: global.flow_order.as_deref(),
        key_seq: global.key_seq.as_deref(),
    };
    let user_rg = header::join_rg_fragments(&global.sam_rg);
    let read_group = header::resolve_read_group(user_rg.as_deref(), &meta)?;

    let mut writer: Box<dyn Write + Send> = match &global.fn_sam {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let argv: Vec<String> = std::env::args().collect();
    header::write_header(&mut writer, &reference, &read_group, &argv)?;

    let ctx = SamContext {
        reference: &reference,
        rg_id: &read_group.id,
        flowspace_tags: global.sam_flowspace_tags,
    };

    let mut driver = MapDriver::new(&reference, &global);
    for opt in &resolved.algo_opts {
        driver.add_algorithm(algos::bundle_for(opt.algo_id)?, opt.clone())?;
    }
    driver.run(source, writer, &ctx)
}
