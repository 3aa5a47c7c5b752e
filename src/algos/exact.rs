// Exact placement scan: a read is placed wherever its bases occur verbatim
// in the reference, on either strand.

use crate::driver::{AlgorithmThreadState, Alignment, MapAlgorithm, Strand};
use crate::error::Result;
use crate::map_opt::MapOpt;
use crate::refindex::{residue_char_to_code, RefIndex};
use crate::sam::cigar::{CigarOp, CigarOpKind};
use crate::seq::Read;

pub struct ExactAlgorithm;

impl MapAlgorithm for ExactAlgorithm {
    fn init(&mut self, opt: &MapOpt, reference: &RefIndex) -> Result<()> {
        log::debug!(
            "exact: stage {} over {} reference sequences",
            opt.stage,
            reference.num_seqs()
        );
        Ok(())
    }

    fn thread_init(&self) -> Result<Box<dyn AlgorithmThreadState>> {
        Ok(Box::new(ExactThreadState {
            codes: Vec::new(),
        }))
    }
}

struct ExactThreadState {
    /// Scratch residue-code buffer, reused across reads
    codes: Vec<u8>,
}

impl AlgorithmThreadState for ExactThreadState {
    fn map(
        &mut self,
        batch: &[&Read],
        reference: &RefIndex,
        opt: &MapOpt,
    ) -> Result<Vec<Vec<Alignment>>> {
        batch
            .iter()
            .map(|read| self.map_one(read, reference, opt))
            .collect()
    }
}

impl ExactThreadState {
    fn map_one(&mut self, read: &Read, reference: &RefIndex, opt: &MapOpt) -> Result<Vec<Alignment>> {
        let m = read.bases().len();
        if (m as i32) < opt.min_seed_length() {
            return Ok(Vec::new());
        }
        self.codes.clear();
        self.codes
            .extend(read.bases().iter().map(|&b| residue_char_to_code(b)));
        if self.codes.iter().any(|&c| c >= 4) {
            // a read with N can never match exactly
            return Ok(Vec::new());
        }

        let limit = opt.max_hits().max(1) as usize;
        let score = m as i32 * opt.score_match();
        let reverse: Vec<u8> = self.codes.iter().rev().map(|&c| 3 - c).collect();

        let mut hits = Vec::new();
        for seqid in 0..reference.num_seqs() {
            if hits.len() >= limit {
                break;
            }
            let target = reference.seq_codes(seqid)?;
            for (strand, query) in [
                (Strand::Forward, self.codes.as_slice()),
                (Strand::Reverse, reverse.as_slice()),
            ] {
                for pos in find_occurrences(target, query, limit - hits.len()) {
                    hits.push(Alignment {
                        seqid,
                        pos,
                        strand,
                        cigar: vec![CigarOp::new(CigarOpKind::Match, m as u32)],
                        mapq: 0,
                        score,
                        ascore: 0,
                        algo_id: 0,
                        stage: 0,
                    });
                }
                if hits.len() >= limit {
                    break;
                }
            }
        }
        Ok(hits)
    }
}

fn find_occurrences(target: &[u8], query: &[u8], limit: usize) -> Vec<u64> {
    let mut out = Vec::new();
    if query.is_empty() || target.len() < query.len() || limit == 0 {
        return out;
    }
    for start in 0..=(target.len() - query.len()) {
        if target[start..start + query.len()] == *query {
            out.push(start as u64);
            if out.len() >= limit {
                break;
            }
        }
    }
    out
}
