// Algorithm registry and staged pipeline driver.
//
// Algorithms are capability bundles registered per (stage, algorithm id).
// At run time a fixed-size worker pool pulls serial-numbered read batches
// from the shared source; stages run in order against the reads not yet
// resolved by earlier stages, the best accepted candidate per read is
// synthesized into a record, and a single writer thread reorders finished
// batches by serial so the output preserves input order regardless of the
// worker count.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::bounded;

use crate::defaults;
use crate::error::{MapError, Result};
use crate::map_opt::MapOpt;
use crate::refindex::RefIndex;
use crate::sam::cigar::CigarOp;
use crate::sam::record::{self, SamContext};
use crate::seq::{Read, SequenceSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

/// One candidate placement produced by an algorithm's `map` callback.
///
/// Immutable once consumed by record synthesis, apart from the transient
/// base/quality reversal applied and undone around printing.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub seqid: usize,
    /// 0-based position within the reference sequence
    pub pos: u64,
    pub strand: Strand,
    pub cigar: Vec<CigarOp>,
    pub mapq: u8,
    pub score: i32,
    /// Auxiliary (flow-space) score, reported in the XZ tag
    pub ascore: i32,
    // provenance, stamped by the driver
    pub algo_id: u32,
    pub stage: i32,
}

/// Per-(algorithm, worker) mutable state. Exclusively owned by its worker.
pub trait AlgorithmThreadState: Send {
    /// Map a batch of reads: one candidate list per read, in batch order.
    fn map(
        &mut self,
        batch: &[&Read],
        reference: &RefIndex,
        opt: &MapOpt,
    ) -> Result<Vec<Vec<Alignment>>>;

    /// Runs once at worker shutdown.
    fn cleanup(&mut self) {}
}

/// An algorithm callback bundle. The driver calls `init` once per registered
/// (stage, algorithm) pair and `thread_init` once per worker.
pub trait MapAlgorithm: Send + Sync {
    fn init(&mut self, opt: &MapOpt, reference: &RefIndex) -> Result<()>;
    fn thread_init(&self) -> Result<Box<dyn AlgorithmThreadState>>;
}

struct AlgorithmConfig {
    opt: MapOpt,
    algorithm: Box<dyn MapAlgorithm>,
}

struct Stage {
    index: i32,
    algorithms: Vec<AlgorithmConfig>,
}

/// Counters accumulated over a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapStats {
    pub reads: u64,
    pub mapped: u64,
}

pub struct MapDriver<'a> {
    reference: &'a RefIndex,
    global: &'a MapOpt,
    stages: Vec<Stage>,
}

impl<'a> MapDriver<'a> {
    pub fn new(reference: &'a RefIndex, global: &'a MapOpt) -> Self {
        MapDriver {
            reference,
            global,
            stages: Vec::new(),
        }
    }

    /// Register an algorithm bundle under the stage stamped in its resolved
    /// option node. A node without a stage is a registration bug.
    pub fn add_algorithm(&mut self, algorithm: Box<dyn MapAlgorithm>, opt: MapOpt) -> Result<()> {
        if opt.stage < 1 {
            return Err(MapError::OutOfRange(format!(
                "algorithm {} registered outside any stage",
                opt.algo_id
            )));
        }
        let config = AlgorithmConfig { opt, algorithm };
        match self.stages.iter_mut().find(|s| s.index == config.opt.stage) {
            Some(stage) => stage.algorithms.push(config),
            None => self.stages.push(Stage {
                index: config.opt.stage,
                algorithms: vec![config],
            }),
        }
        Ok(())
    }

    /// Run the pipeline to completion: init every algorithm, spawn the
    /// worker pool, drain the source, join the ordered writer.
    pub fn run(
        &mut self,
        source: Box<dyn SequenceSource>,
        writer: Box<dyn Write + Send>,
        ctx: &SamContext,
    ) -> Result<MapStats> {
        self.stages.sort_by_key(|s| s.index);

        for stage in &mut self.stages {
            for config in &mut stage.algorithms {
                config.algorithm.init(&config.opt, self.reference)?;
            }
        }

        let n_threads = self.global.num_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| MapError::OutOfRange(format!("could not build thread pool: {e}")))?;
        log::info!(
            "Mapping with {} stages over {} worker threads",
            self.stages.len(),
            n_threads
        );

        // shared cursor: the source and its batch serial advance together
        let source = Mutex::new((source, 0u64));
        let failure: Mutex<Option<MapError>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let stats = Mutex::new(MapStats::default());
        let (tx, rx) = bounded::<(u64, Vec<u8>)>(n_threads * 2);

        // single writer: reorders finished batches by pull serial
        let writer_handle = std::thread::spawn(move || -> Result<()> {
            let mut writer = writer;
            let mut pending: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
            let mut next = 0u64;
            for (serial, block) in rx {
                pending.insert(serial, block);
                while let Some(block) = pending.remove(&next) {
                    writer.write_all(&block)?;
                    next += 1;
                }
            }
            if let Some((&serial, _)) = pending.iter().next() {
                return Err(MapError::OutOfRange(format!(
                    "batch {serial} was never preceded by batch {next}"
                )));
            }
            writer.flush()?;
            Ok(())
        });

        let stages = &self.stages;
        let reference = self.reference;
        let global = self.global;
        let batch_cap = global.reads_per_batch();

        pool.broadcast(|_| {
            let tx = tx.clone();
            let mut states = match init_thread_states(stages) {
                Ok(states) => states,
                Err(e) => {
                    record_failure(&failure, &abort, e);
                    return;
                }
            };

            while !abort.load(Ordering::Relaxed) {
                let (serial, mut batch) = {
                    let Ok(mut guard) = source.lock() else {
                        // another worker panicked while holding the source
                        break;
                    };
                    let (src, next_serial) = &mut *guard;
                    match src.read_batch(batch_cap) {
                        Ok(batch) => {
                            let serial = *next_serial;
                            *next_serial += 1;
                            (serial, batch)
                        }
                        Err(e) => {
                            record_failure(&failure, &abort, e);
                            break;
                        }
                    }
                };
                if batch.is_empty() {
                    break;
                }

                match process_batch(stages, reference, global, ctx, &mut states, &mut batch) {
                    Ok((block, mapped)) => {
                        if let Ok(mut s) = stats.lock() {
                            s.reads += batch.len() as u64;
                            s.mapped += mapped;
                        }
                        if tx.send((serial, block)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        record_failure(&failure, &abort, e);
                        break;
                    }
                }
            }

            for stage_states in &mut states {
                for state in stage_states {
                    state.cleanup();
                }
            }
        });

        drop(tx);
        let writer_result = writer_handle
            .join()
            .map_err(|_| MapError::OutOfRange("writer thread panicked".to_string()))?;

        if let Ok(mut failure) = failure.lock() {
            if let Some(e) = failure.take() {
                return Err(e);
            }
        }
        writer_result?;

        let stats = stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default();
        log::info!("Processed {} reads, {} mapped", stats.reads, stats.mapped);
        Ok(stats)
    }
}

fn record_failure(failure: &Mutex<Option<MapError>>, abort: &AtomicBool, e: MapError) {
    log::error!("{e}");
    abort.store(true, Ordering::Relaxed);
    if let Ok(mut slot) = failure.lock() {
        slot.get_or_insert(e);
    }
}

fn init_thread_states(stages: &[Stage]) -> Result<Vec<Vec<Box<dyn AlgorithmThreadState>>>> {
    stages
        .iter()
        .map(|stage| {
            stage
                .algorithms
                .iter()
                .map(|config| config.algorithm.thread_init())
                .collect()
        })
        .collect()
}

/// Map one batch through every stage and synthesize one record block.
/// Returns the encoded block and the number of mapped reads.
fn process_batch(
    stages: &[Stage],
    reference: &RefIndex,
    global: &MapOpt,
    ctx: &SamContext,
    states: &mut [Vec<Box<dyn AlgorithmThreadState>>],
    batch: &mut [Read],
) -> Result<(Vec<u8>, u64)> {
    let n = batch.len();
    let mut candidates: Vec<Vec<Alignment>> = vec![Vec::new(); n];
    let mut pending: Vec<usize> = (0..n).collect();

    for (stage_i, stage) in stages.iter().enumerate() {
        if pending.is_empty() {
            break;
        }
        let sub: Vec<&Read> = pending.iter().map(|&i| &batch[i]).collect();
        for (algo_i, config) in stage.algorithms.iter().enumerate() {
            let lists = states[stage_i][algo_i].map(&sub, reference, &config.opt)?;
            if lists.len() != sub.len() {
                return Err(MapError::OutOfRange(format!(
                    "algorithm {} returned {} candidate lists for {} reads",
                    config.opt.algo_id,
                    lists.len(),
                    sub.len()
                )));
            }
            for (k, mut list) in lists.into_iter().enumerate() {
                // acceptance: drop candidates under the algorithm's own
                // threshold, stamp provenance on the rest
                list.retain(|c| c.score >= config.opt.score_threshold());
                for candidate in &mut list {
                    candidate.stage = stage.index;
                    candidate.algo_id = config.opt.algo_id;
                }
                candidates[pending[k]].extend(list);
            }
        }
        if !global.keep_all() {
            // stop-at-first-accepting-stage: reads with an accepted
            // candidate do not continue into later stages
            pending.retain(|&i| candidates[i].is_empty());
        }
    }

    let mut block = Vec::with_capacity(n * 128);
    let mut mapped = 0u64;
    for (i, read) in batch.iter_mut().enumerate() {
        match pick_best(&candidates[i]) {
            Some(mut best) => {
                best.mapq = mapping_quality(&candidates[i], &best);
                record::print_mapped(&mut block, read, &best, ctx, &[])?;
                mapped += 1;
            }
            None => record::print_unmapped(&mut block, read, ctx)?,
        }
    }
    Ok((block, mapped))
}

/// Candidate ordering: higher score wins; ties go to the earliest stage,
/// then the lowest algorithm id.
fn rank(c: &Alignment) -> (std::cmp::Reverse<i32>, i32, u32) {
    (std::cmp::Reverse(c.score), c.stage, c.algo_id)
}

fn pick_best(candidates: &[Alignment]) -> Option<Alignment> {
    candidates.iter().min_by_key(|c| rank(c)).cloned()
}

/// Scale the score gap between the best candidate and its runner-up.
/// Deliberately simple; repeated equal-scoring placements give 0.
fn mapping_quality(candidates: &[Alignment], best: &Alignment) -> u8 {
    if best.score <= 0 {
        return 0;
    }
    let mut scores: Vec<i32> = candidates.iter().map(|c| c.score).collect();
    scores.sort_unstable_by(|a, b| b.cmp(a));
    let second = scores.get(1).copied().unwrap_or(0).max(0);
    if second >= best.score {
        return 0;
    }
    let frac = f64::from(best.score - second) / f64::from(best.score);
    (frac * f64::from(defaults::MAPQ_MAX)).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::cigar::CigarOpKind;

    fn candidate(score: i32, stage: i32, algo_id: u32) -> Alignment {
        Alignment {
            seqid: 0,
            pos: 10,
            strand: Strand::Forward,
            cigar: vec![CigarOp::new(CigarOpKind::Match, 4)],
            mapq: 0,
            score,
            ascore: 0,
            algo_id,
            stage,
        }
    }

    #[test]
    fn test_pick_best_prefers_score() {
        let best = pick_best(&[candidate(10, 2, 1), candidate(30, 2, 2), candidate(20, 1, 1)])
            .unwrap();
        assert_eq!(best.score, 30);
    }

    #[test]
    fn test_tie_break_earlier_stage_then_lower_algo() {
        let best =
            pick_best(&[candidate(30, 2, 1), candidate(30, 1, 2), candidate(30, 1, 1)]).unwrap();
        assert_eq!(best.stage, 1);
        assert_eq!(best.algo_id, 1);
    }

    #[test]
    fn test_mapping_quality_unique_hit() {
        let cands = vec![candidate(40, 1, 1)];
        assert_eq!(mapping_quality(&cands, &cands[0]), defaults::MAPQ_MAX);
    }

    #[test]
    fn test_mapping_quality_equal_repeat_is_zero() {
        let cands = vec![candidate(40, 1, 1), candidate(40, 1, 2)];
        let best = pick_best(&cands).unwrap();
        assert_eq!(mapping_quality(&cands, &best), 0);
    }

    #[test]
    fn test_mapping_quality_score_gap() {
        let cands = vec![candidate(40, 1, 1), candidate(30, 1, 2)];
        let best = pick_best(&cands).unwrap();
        assert_eq!(mapping_quality(&cands, &best), 15);
    }
}
