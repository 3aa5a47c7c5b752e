// Ungapped placement scan: slide the read along every reference sequence
// and keep placements within the mismatch budget. Mismatches land in the MD
// tag, not the CIGAR, so every hit carries a single match run.

use crate::driver::{AlgorithmThreadState, Alignment, MapAlgorithm, Strand};
use crate::error::Result;
use crate::map_opt::MapOpt;
use crate::refindex::{residue_char_to_code, RefIndex};
use crate::sam::cigar::{CigarOp, CigarOpKind};
use crate::seq::Read;

pub struct UngappedAlgorithm;

impl MapAlgorithm for UngappedAlgorithm {
    fn init(&mut self, opt: &MapOpt, reference: &RefIndex) -> Result<()> {
        log::debug!(
            "ungapped: stage {}, mismatch budget {}, {} reference sequences",
            opt.stage,
            opt.max_mismatches(),
            reference.num_seqs()
        );
        Ok(())
    }

    fn thread_init(&self) -> Result<Box<dyn AlgorithmThreadState>> {
        Ok(Box::new(UngappedThreadState { codes: Vec::new() }))
    }
}

struct UngappedThreadState {
    codes: Vec<u8>,
}

impl AlgorithmThreadState for UngappedThreadState {
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

impl UngappedThreadState {
    fn map_one(&mut self, read: &Read, reference: &RefIndex, opt: &MapOpt) -> Result<Vec<Alignment>> {
        let m = read.bases().len();
        if (m as i32) < opt.min_seed_length() {
            return Ok(Vec::new());
        }
        self.codes.clear();
        self.codes
            .extend(read.bases().iter().map(|&b| residue_char_to_code(b)));

        let budget = opt.max_mismatches().max(0);
        let reverse: Vec<u8> = self
            .codes
            .iter()
            .rev()
            .map(|&c| if c < 4 { 3 - c } else { c })
            .collect();

        let mut hits = Vec::new();
        for seqid in 0..reference.num_seqs() {
            let target = reference.seq_codes(seqid)?;
            for (strand, query) in [
                (Strand::Forward, self.codes.as_slice()),
                (Strand::Reverse, reverse.as_slice()),
            ] {
                if target.len() < query.len() {
                    continue;
                }
                for start in 0..=(target.len() - query.len()) {
                    let Some(mismatches) =
                        count_mismatches(&target[start..start + query.len()], query, budget)
                    else {
                        continue;
                    };
                    let score = (m as i32 - mismatches) * opt.score_match()
                        - mismatches * opt.pen_mismatch();
                    hits.push(Alignment {
                        seqid,
                        pos: start as u64,
                        strand,
                        cigar: vec![CigarOp::new(CigarOpKind::Match, m as u32)],
                        mapq: 0,
                        score,
                        ascore: 0,
                        algo_id: 0,
                        stage: 0,
                    });
                }
            }
        }

        // keep the best placements; ties resolve by coordinate order
        hits.sort_by_key(|h| (std::cmp::Reverse(h.score), h.seqid, h.pos));
        hits.truncate(opt.max_hits().max(1) as usize);
        Ok(hits)
    }
}

/// Mismatches between equal-length code slices, or None once the budget is
/// exceeded. Any ambiguous residue counts as a mismatch.
fn count_mismatches(target: &[u8], query: &[u8], budget: i32) -> Option<i32> {
    let mut mismatches = 0;
    for (&t, &q) in target.iter().zip(query) {
        if t >= 4 || q >= 4 || t != q {
            mismatches += 1;
            if mismatches > budget {
                return None;
            }
        }
    }
    Some(mismatches)
}
