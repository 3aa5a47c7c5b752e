// Packed binary alignment records and in-place CIGAR/MD mutation.
//
// A record is one contiguous buffer with named regions:
//
//   head: qname (NUL terminated)
//   body: cigar (n_cigar little-endian u32 words)
//   tail: seq (4-bit nt16 codes, two per byte), qual, aux tags
//
// The accounting invariant `data.len() - l_aux == aux_offset` must hold
// before and after every resize; a violation is fatal. Resizing the CIGAR
// region shifts the tail in place instead of rebuilding the record, so
// auxiliary data survives re-alignment untouched unless its value changed.

use crate::error::{MapError, Result};
use crate::sam::cigar::{CigarOp, CigarOpKind};

/// 4-bit base codes in `=ACMGRSVTWYHKDBN` order; `=` (0) matches anything.
pub fn nt16(c: u8) -> u8 {
    match c.to_ascii_uppercase() {
        b'=' => 0,
        b'A' => 1,
        b'C' => 2,
        b'M' => 3,
        b'G' => 4,
        b'R' => 5,
        b'S' => 6,
        b'V' => 7,
        b'T' => 8,
        b'W' => 9,
        b'Y' => 10,
        b'H' => 11,
        b'K' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => 15,
    }
}

#[derive(Debug, Clone)]
pub struct PackedRecord {
    pub seqid: i32,
    /// 0-based leftmost position
    pub pos: i64,
    pub flag: u16,
    pub mapq: u8,
    data: Vec<u8>,
    /// qname length including the trailing NUL
    l_qname: usize,
    n_cigar: usize,
    l_seq: usize,
    l_aux: usize,
}

impl PackedRecord {
    pub fn new(qname: &str, cigar: &[CigarOp], bases: &[u8], quals: &[u8]) -> Result<Self> {
        if quals.len() != bases.len() {
            return Err(MapError::OutOfRange(format!(
                "quality length {} does not match base length {}",
                quals.len(),
                bases.len()
            )));
        }
        let l_qname = qname.len() + 1;
        let l_seq = bases.len();
        let mut data = Vec::with_capacity(l_qname + 4 * cigar.len() + l_seq.div_ceil(2) + l_seq);
        data.extend_from_slice(qname.as_bytes());
        data.push(0);
        for op in cigar {
            data.extend_from_slice(&op.encode().to_le_bytes());
        }
        let mut packed = vec![0u8; l_seq.div_ceil(2)];
        for (i, &base) in bases.iter().enumerate() {
            packed[i / 2] |= nt16(base) << (if i % 2 == 0 { 4 } else { 0 });
        }
        data.extend_from_slice(&packed);
        data.extend_from_slice(quals);
        Ok(PackedRecord {
            seqid: 0,
            pos: 0,
            flag: 0,
            mapq: 0,
            data,
            l_qname,
            n_cigar: cigar.len(),
            l_seq,
            l_aux: 0,
        })
    }

    // region offsets
    fn cigar_offset(&self) -> usize {
        self.l_qname
    }

    fn seq_offset(&self) -> usize {
        self.cigar_offset() + 4 * self.n_cigar
    }

    fn qual_offset(&self) -> usize {
        self.seq_offset() + self.l_seq.div_ceil(2)
    }

    fn aux_offset(&self) -> usize {
        self.qual_offset() + self.l_seq
    }

    pub fn qname(&self) -> &str {
        std::str::from_utf8(&self.data[..self.l_qname.saturating_sub(1)]).unwrap_or("")
    }

    pub fn n_cigar(&self) -> usize {
        self.n_cigar
    }

    pub fn l_seq(&self) -> usize {
        self.l_seq
    }

    pub fn buffer_len(&self) -> usize {
        self.data.len()
    }

    pub fn cigar(&self) -> Result<Vec<CigarOp>> {
        let start = self.cigar_offset();
        (0..self.n_cigar)
            .map(|i| {
                let at = start + 4 * i;
                let word = u32::from_le_bytes([
                    self.data[at],
                    self.data[at + 1],
                    self.data[at + 2],
                    self.data[at + 3],
                ]);
                CigarOp::decode(word)
            })
            .collect()
    }

    fn write_cigar_word(&mut self, index: usize, word: u32) {
        let at = self.cigar_offset() + 4 * index;
        self.data[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// 4-bit code of read base `i`.
    fn seq_nt16(&self, i: usize) -> Result<u8> {
        if i >= self.l_seq {
            return Err(MapError::OutOfRange(
                "alignment walks past the packed read".to_string(),
            ));
        }
        let byte = self.data[self.seq_offset() + i / 2];
        Ok(if i % 2 == 0 { byte >> 4 } else { byte & 0xf })
    }

    fn check_accounting(&self) -> Result<()> {
        if self.data.len() - self.l_aux != self.aux_offset() {
            return Err(MapError::OutOfRange(
                "record buffer accounting mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Resize the CIGAR region in place, shifting the tail regions and
    /// re-validating the accounting invariant.
    fn resize_cigar(&mut self, new_n: usize) -> Result<()> {
        self.check_accounting()?;
        let start = self.cigar_offset();
        let old_bytes = 4 * self.n_cigar;
        let new_bytes = 4 * new_n;
        if new_bytes < old_bytes {
            self.data.drain(start + new_bytes..start + old_bytes);
        } else if new_bytes > old_bytes {
            self.data.splice(
                start + old_bytes..start + old_bytes,
                std::iter::repeat(0u8).take(new_bytes - old_bytes),
            );
        }
        self.n_cigar = new_n;
        self.check_accounting()
    }

    // ----- auxiliary tag region -----

    pub fn aux(&self) -> &[u8] {
        &self.data[self.aux_offset()..]
    }

    /// Byte range of one tag within the aux region, if present.
    fn aux_find(&self, tag: &[u8; 2]) -> Result<Option<(usize, usize)>> {
        let aux = self.aux();
        let mut i = 0;
        while i < aux.len() {
            if i + 3 > aux.len() {
                return Err(MapError::OutOfRange(
                    "truncated auxiliary record".to_string(),
                ));
            }
            let end = aux_value_end(aux, i + 2)?;
            if &aux[i..i + 2] == tag {
                return Ok(Some((i, end)));
            }
            i = end;
        }
        Ok(None)
    }

    pub fn aux_str(&self, tag: &[u8; 2]) -> Result<Option<String>> {
        let Some((start, end)) = self.aux_find(tag)? else {
            return Ok(None);
        };
        let aux = self.aux();
        if aux[start + 2] != b'Z' {
            return Err(MapError::OutOfRange(format!(
                "tag {}{} is not a string",
                tag[0] as char, tag[1] as char
            )));
        }
        // value runs to the NUL terminator
        Ok(Some(
            String::from_utf8_lossy(&aux[start + 3..end - 1]).into_owned(),
        ))
    }

    pub fn aux_i32(&self, tag: &[u8; 2]) -> Result<Option<i32>> {
        let Some((start, _)) = self.aux_find(tag)? else {
            return Ok(None);
        };
        let aux = self.aux();
        let at = start + 3;
        let value = match aux[start + 2] {
            b'c' => i32::from(aux[at] as i8),
            b'C' => i32::from(aux[at]),
            b's' => i32::from(i16::from_le_bytes([aux[at], aux[at + 1]])),
            b'S' => i32::from(u16::from_le_bytes([aux[at], aux[at + 1]])),
            b'i' | b'I' => {
                i32::from_le_bytes([aux[at], aux[at + 1], aux[at + 2], aux[at + 3]])
            }
            other => {
                return Err(MapError::OutOfRange(format!(
                    "tag {}{} has non-integer type {}",
                    tag[0] as char,
                    tag[1] as char,
                    other as char
                )));
            }
        };
        Ok(Some(value))
    }

    pub fn aux_delete(&mut self, tag: &[u8; 2]) -> Result<bool> {
        let Some((start, end)) = self.aux_find(tag)? else {
            return Ok(false);
        };
        let base = self.aux_offset();
        self.data.drain(base + start..base + end);
        self.l_aux -= end - start;
        Ok(true)
    }

    pub fn aux_append_str(&mut self, tag: &[u8; 2], value: &str) {
        self.data.extend_from_slice(tag);
        self.data.push(b'Z');
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.l_aux += 3 + value.len() + 1;
    }

    pub fn aux_append_i32(&mut self, tag: &[u8; 2], value: i32) {
        self.data.extend_from_slice(tag);
        self.data.push(b'i');
        self.data.extend_from_slice(&value.to_le_bytes());
        self.l_aux += 3 + 4;
    }

    /// Re-derive the CIGAR and MD/NM tags from a character-level alignment:
    /// parallel reference and read strings using `-` for gaps, excluding any
    /// soft-clipped edges (those are preserved from the existing CIGAR).
    ///
    /// MD and NM are rewritten only when their value actually changed, so
    /// untouched records keep their auxiliary bytes bit-for-bit.
    pub fn update_cigar_and_md(&mut self, ref_aln: &[u8], read_aln: &[u8]) -> Result<()> {
        if ref_aln.len() != read_aln.len() || ref_aln.is_empty() {
            return Err(MapError::OutOfRange(
                "reference and read alignment strings differ in length".to_string(),
            ));
        }
        self.check_accounting()?;

        let old_cigar = self.cigar()?;
        let lead_clip = old_cigar
            .first()
            .filter(|op| op.kind == CigarOpKind::SoftClip)
            .copied();
        let trail_clip = if old_cigar.len() > 1 {
            old_cigar
                .last()
                .filter(|op| op.kind == CigarOpKind::SoftClip)
                .copied()
        } else {
            None
        };

        // count maximal runs of a uniform edit type
        let mut runs = 1usize;
        let mut last = column_kind(ref_aln[0], read_aln[0]);
        for i in 1..ref_aln.len() {
            let cur = column_kind(ref_aln[i], read_aln[i]);
            if cur != last {
                runs += 1;
            }
            last = cur;
        }

        let new_n =
            runs + usize::from(lead_clip.is_some()) + usize::from(trail_clip.is_some());
        self.resize_cigar(new_n)?;

        // rewrite: clips keep their original slots, interior ops are the
        // coalesced runs of the character alignment
        let mut index = 0;
        if let Some(op) = lead_clip {
            self.write_cigar_word(index, op.encode());
            index += 1;
        }
        let mut run_len = 1u32;
        let mut last = column_kind(ref_aln[0], read_aln[0]);
        for i in 1..ref_aln.len() {
            let cur = column_kind(ref_aln[i], read_aln[i]);
            if cur == last {
                run_len += 1;
            } else {
                self.write_cigar_word(index, CigarOp::new(last, run_len).encode());
                index += 1;
                run_len = 1;
            }
            last = cur;
        }
        self.write_cigar_word(index, CigarOp::new(last, run_len).encode());
        index += 1;
        if let Some(op) = trail_clip {
            self.write_cigar_word(index, op.encode());
        }

        // MD diffs against the reference string with gaps (and hard-clip
        // markers) removed
        let ref_chars: Vec<u8> = ref_aln
            .iter()
            .copied()
            .filter(|&c| c != b'-' && c.to_ascii_uppercase() != b'H')
            .collect();
        let (md, nm) = self.compute_md(&ref_chars)?;

        match self.aux_str(b"MD")? {
            Some(old) if old == md => {}
            Some(_) => {
                self.aux_delete(b"MD")?;
                self.aux_append_str(b"MD", &md);
            }
            None => self.aux_append_str(b"MD", &md),
        }
        match self.aux_i32(b"NM")? {
            Some(old) if old == nm => {}
            Some(_) => {
                self.aux_delete(b"NM")?;
                self.aux_append_i32(b"NM", nm);
            }
            None => self.aux_append_i32(b"NM", nm),
        }

        self.check_accounting()
    }

    /// Walk the record's CIGAR against the packed bases, diffing with 4-bit
    /// codes: equal non-N codes match, `=` matches anything, N never does.
    fn compute_md(&self, ref_chars: &[u8]) -> Result<(String, i32)> {
        let cigar = self.cigar()?;
        let mut md = String::with_capacity(32);
        let mut nm = 0i32;
        let mut run = 0u32;
        let mut x = 0usize; // reference cursor
        let mut y = 0usize; // read cursor
        for op in cigar {
            match op.kind {
                CigarOpKind::Match => {
                    for _ in 0..op.len {
                        let Some(&ref_char) = ref_chars.get(x) else {
                            return Err(MapError::OutOfRange(
                                "alignment walks past the reference string".to_string(),
                            ));
                        };
                        let c1 = self.seq_nt16(y)?;
                        let c2 = nt16(ref_char);
                        if (c1 == c2 && c1 != 15 && c2 != 15) || c1 == 0 {
                            run += 1;
                        } else {
                            md.push_str(&run.to_string());
                            md.push(ref_char as char);
                            run = 0;
                            nm += 1;
                        }
                        x += 1;
                        y += 1;
                    }
                }
                CigarOpKind::Insertion => {
                    y += op.len as usize;
                    nm += op.len as i32;
                }
                CigarOpKind::SoftClip => {
                    y += op.len as usize;
                }
                CigarOpKind::Deletion => {
                    md.push_str(&run.to_string());
                    md.push('^');
                    for _ in 0..op.len {
                        let Some(&ref_char) = ref_chars.get(x) else {
                            return Err(MapError::OutOfRange(
                                "alignment walks past the reference string".to_string(),
                            ));
                        };
                        md.push(ref_char as char);
                        x += 1;
                    }
                    run = 0;
                    nm += op.len as i32;
                }
                CigarOpKind::RefSkip => {
                    x += op.len as usize;
                }
                CigarOpKind::HardClip | CigarOpKind::Pad => {}
            }
        }
        md.push_str(&run.to_string());
        Ok((md, nm))
    }
}

/// Classify one alignment column; match and mismatch collapse to Match for
/// CIGAR purposes.
fn column_kind(ref_char: u8, read_char: u8) -> CigarOpKind {
    if ref_char == b'-' {
        CigarOpKind::Insertion
    } else if read_char == b'-' {
        CigarOpKind::Deletion
    } else {
        CigarOpKind::Match
    }
}

/// Index just past one aux value; `at` sits on the type byte.
fn aux_value_end(aux: &[u8], at: usize) -> Result<usize> {
    fn bad() -> MapError {
        MapError::OutOfRange("truncated auxiliary record".to_string())
    }
    let after = |n: usize| {
        let end = at + 1 + n;
        if end <= aux.len() { Ok(end) } else { Err(bad()) }
    };
    match aux.get(at).copied().ok_or_else(bad)? {
        b'A' | b'c' | b'C' => after(1),
        b's' | b'S' => after(2),
        b'i' | b'I' | b'f' => after(4),
        b'Z' | b'H' => {
            let mut end = at + 1;
            while end < aux.len() && aux[end] != 0 {
                end += 1;
            }
            if end >= aux.len() {
                return Err(bad());
            }
            Ok(end + 1)
        }
        b'B' => {
            let elem = match aux.get(at + 1).copied().ok_or_else(bad)? {
                b'c' | b'C' => 1,
                b's' | b'S' => 2,
                b'i' | b'I' | b'f' => 4,
                _ => return Err(bad()),
            };
            if at + 6 > aux.len() {
                return Err(bad());
            }
            let count = u32::from_le_bytes([aux[at + 2], aux[at + 3], aux[at + 4], aux[at + 5]])
                as usize;
            let end = at + 6 + elem * count;
            if end <= aux.len() { Ok(end) } else { Err(bad()) }
        }
        _ => Err(MapError::OutOfRange(
            "auxiliary value type not understood".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_op(len: u32) -> CigarOp {
        CigarOp::new(CigarOpKind::Match, len)
    }

    #[test]
    fn test_new_record_layout() {
        let rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        assert_eq!(rec.qname(), "r1");
        assert_eq!(rec.n_cigar(), 1);
        assert_eq!(rec.cigar().unwrap(), vec![match_op(4)]);
        assert_eq!(rec.l_seq(), 4);
        assert!(rec.aux().is_empty());
    }

    #[test]
    fn test_cigar_grows_on_insertion() {
        let mut rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        rec.aux_append_str(b"XT", "probe");
        let before_aux = rec.aux().to_vec();

        // ref AC-T vs read ACGT: two matches, an insertion, a match
        rec.update_cigar_and_md(b"AC-T", b"ACGT").unwrap();
        assert_eq!(
            rec.cigar().unwrap(),
            vec![
                match_op(2),
                CigarOp::new(CigarOpKind::Insertion, 1),
                match_op(1),
            ]
        );
        assert_eq!(rec.aux_str(b"XT").unwrap().as_deref(), Some("probe"));
        assert_eq!(rec.aux_str(b"MD").unwrap().as_deref(), Some("3"));
        assert_eq!(rec.aux_i32(b"NM").unwrap(), Some(1));
        // the untouched tag survived the shift bit-for-bit
        assert_eq!(&rec.aux()[..before_aux.len()], before_aux.as_slice());
    }

    #[test]
    fn test_cigar_shrinks_on_all_match() {
        let initial = vec![
            match_op(1),
            CigarOp::new(CigarOpKind::Insertion, 1),
            match_op(1),
            CigarOp::new(CigarOpKind::Deletion, 1),
            match_op(1),
        ];
        let mut rec = PackedRecord::new("r1", &initial, b"ACGT", b"IIII").unwrap();
        let before_len = rec.buffer_len();
        rec.update_cigar_and_md(b"ACGT", b"ACGT").unwrap();
        assert_eq!(rec.cigar().unwrap(), vec![match_op(4)]);
        assert!(rec.buffer_len() < before_len);
        assert_eq!(rec.aux_str(b"MD").unwrap().as_deref(), Some("4"));
        assert_eq!(rec.aux_i32(b"NM").unwrap(), Some(0));
    }

    #[test]
    fn test_soft_clips_preserved_in_original_slots() {
        let initial = vec![
            CigarOp::new(CigarOpKind::SoftClip, 2),
            match_op(4),
            CigarOp::new(CigarOpKind::SoftClip, 1),
        ];
        let mut rec = PackedRecord::new("r1", &initial, b"NNACGTC", b"IIIIIII").unwrap();
        // interior re-aligns to 2 matches, a deletion, 2 matches
        rec.update_cigar_and_md(b"ACTGT", b"AC-GT").unwrap();
        assert_eq!(
            rec.cigar().unwrap(),
            vec![
                CigarOp::new(CigarOpKind::SoftClip, 2),
                match_op(2),
                CigarOp::new(CigarOpKind::Deletion, 1),
                match_op(2),
                CigarOp::new(CigarOpKind::SoftClip, 1),
            ]
        );
        assert_eq!(rec.aux_str(b"MD").unwrap().as_deref(), Some("2^T2"));
        assert_eq!(rec.aux_i32(b"NM").unwrap(), Some(1));
    }

    #[test]
    fn test_md_mismatch_against_reference_string() {
        let mut rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        rec.update_cigar_and_md(b"ACTT", b"ACGT").unwrap();
        assert_eq!(rec.cigar().unwrap(), vec![match_op(4)]);
        assert_eq!(rec.aux_str(b"MD").unwrap().as_deref(), Some("2T1"));
        assert_eq!(rec.aux_i32(b"NM").unwrap(), Some(1));
    }

    #[test]
    fn test_unchanged_md_and_nm_leave_aux_untouched() {
        let mut rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        rec.update_cigar_and_md(b"ACGT", b"ACGT").unwrap();
        let aux_before = rec.aux().to_vec();
        rec.update_cigar_and_md(b"ACGT", b"ACGT").unwrap();
        assert_eq!(rec.aux(), aux_before.as_slice());
    }

    #[test]
    fn test_nt16_any_code_matches_anything() {
        // '=' in the read matches any reference base; N against N does not
        let mut rec = PackedRecord::new("r1", &[match_op(2)], b"=N", b"II").unwrap();
        rec.update_cigar_and_md(b"GN", b"=N").unwrap();
        assert_eq!(rec.aux_str(b"MD").unwrap().as_deref(), Some("1N0"));
        assert_eq!(rec.aux_i32(b"NM").unwrap(), Some(1));
    }

    #[test]
    fn test_mismatched_alignment_strings_rejected() {
        let mut rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        assert!(rec.update_cigar_and_md(b"ACG", b"ACGT").is_err());
        assert!(rec.update_cigar_and_md(b"", b"").is_err());
    }

    #[test]
    fn test_accounting_mismatch_is_fatal() {
        let mut rec = PackedRecord::new("r1", &[match_op(4)], b"ACGT", b"IIII").unwrap();
        rec.l_aux = 7; // corrupt the accounting on purpose
        assert!(rec.update_cigar_and_md(b"ACGT", b"ACGT").is_err());
    }
}
