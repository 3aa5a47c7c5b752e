// Reference index: sequence names/lengths/offsets over one flat residue
// array, plus IUPAC ambiguity annotations and sub-sequence extraction by
// absolute coordinate.
//
// The binary index formats used by the search engines are external to this
// crate; here the reference is loaded from FASTA into memory once and shared
// read-only across worker threads.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bio::io::fasta;
use flate2::read::MultiGzDecoder;

use crate::error::{MapError, Result};

/// Residue codes: 0-3 plain A/C/G/T, 4 N, 5.. the remaining IUPAC codes.
pub const RESIDUE_CHARS: [char; 15] = [
    'A', 'C', 'G', 'T', 'N', 'M', 'R', 'W', 'S', 'Y', 'K', 'V', 'H', 'D', 'B',
];

/// Convert a base character to its residue code. Unknown characters map to N.
pub fn residue_char_to_code(c: u8) -> u8 {
    match c.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        b'N' => 4,
        b'M' => 5,
        b'R' => 6,
        b'W' => 7,
        b'S' => 8,
        b'Y' => 9,
        b'K' => 10,
        b'V' => 11,
        b'H' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => 4,
    }
}

pub fn residue_code_to_char(code: u8) -> char {
    RESIDUE_CHARS
        .get(code as usize)
        .copied()
        .unwrap_or('N')
}

/// Per-sequence annotation: name plus placement in the flat residue array.
#[derive(Debug, Clone)]
pub struct RefAnn {
    pub name: String,
    /// Offset of this sequence in the concatenated residue array
    pub offset: u64,
    pub length: u64,
}

/// One ambiguous reference base, by absolute coordinate.
///
/// The flat residue array stores such bases as N; the recorded IUPAC code is
/// overlaid on top of extracted sub-sequences before any diffing.
#[derive(Debug, Clone, Copy)]
pub struct AmbBase {
    pub pos: u64,
    pub code: u8,
}

#[derive(Debug)]
pub struct RefIndex {
    anns: Vec<RefAnn>,
    /// Concatenated residue codes (0-4), all sequences back to back
    seq: Vec<u8>,
    /// Ambiguous bases sorted by absolute position
    ambs: Vec<AmbBase>,
}

impl RefIndex {
    /// Load a reference from FASTA (gzip detected by extension).
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut anns = Vec::new();
        let mut seq = Vec::new();
        let mut ambs = Vec::new();

        for record in fasta::Reader::new(reader).records() {
            let record = record.map_err(|e| {
                MapError::OutOfRange(format!("could not read reference FASTA: {e}"))
            })?;
            let offset = seq.len() as u64;
            for (i, &base) in record.seq().iter().enumerate() {
                let code = residue_char_to_code(base);
                if code >= 4 {
                    ambs.push(AmbBase {
                        pos: offset + i as u64,
                        code,
                    });
                    seq.push(4);
                } else {
                    seq.push(code);
                }
            }
            anns.push(RefAnn {
                name: record.id().to_string(),
                offset,
                length: record.seq().len() as u64,
            });
        }

        if anns.is_empty() {
            return Err(MapError::OutOfRange(
                "reference FASTA contains no sequences".to_string(),
            ));
        }

        log::info!(
            "Loaded reference: {} sequences, {} bp, {} ambiguous bases",
            anns.len(),
            seq.len(),
            ambs.len()
        );

        Ok(RefIndex { anns, seq, ambs })
    }

    /// Build directly from in-memory (name, bases) pairs. Used by tests and
    /// by collaborators that bring their own reference representation.
    pub fn from_sequences<S: AsRef<str>, B: AsRef<[u8]>>(seqs: &[(S, B)]) -> Self {
        let mut anns = Vec::new();
        let mut seq = Vec::new();
        let mut ambs = Vec::new();
        for (name, bases) in seqs {
            let offset = seq.len() as u64;
            for (i, &base) in bases.as_ref().iter().enumerate() {
                let code = residue_char_to_code(base);
                if code >= 4 {
                    ambs.push(AmbBase {
                        pos: offset + i as u64,
                        code,
                    });
                    seq.push(4);
                } else {
                    seq.push(code);
                }
            }
            anns.push(RefAnn {
                name: name.as_ref().to_string(),
                offset,
                length: bases.as_ref().len() as u64,
            });
        }
        RefIndex { anns, seq, ambs }
    }

    pub fn num_seqs(&self) -> usize {
        self.anns.len()
    }

    pub fn total_len(&self) -> u64 {
        self.seq.len() as u64
    }

    pub fn anns(&self) -> &[RefAnn] {
        &self.anns
    }

    pub fn ann(&self, seqid: usize) -> Result<&RefAnn> {
        self.anns
            .get(seqid)
            .ok_or_else(|| MapError::OutOfRange(format!("unknown reference id {seqid}")))
    }

    /// Residue codes of one whole reference sequence.
    pub fn seq_codes(&self, seqid: usize) -> Result<&[u8]> {
        let ann = self.ann(seqid)?;
        Ok(&self.seq[ann.offset as usize..(ann.offset + ann.length) as usize])
    }

    /// Extract `len` residue codes starting at an absolute coordinate.
    ///
    /// Reading past the end of the reference means the caller produced a
    /// CIGAR that walks off the sequence, which is an invariant violation.
    pub fn subseq(&self, start: u64, len: u64) -> Result<&[u8]> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| MapError::OutOfRange("reference span overflows".to_string()))?;
        if end > self.seq.len() as u64 {
            return Err(MapError::OutOfRange(format!(
                "reference span {start}..{end} exceeds total length {}",
                self.seq.len()
            )));
        }
        Ok(&self.seq[start as usize..end as usize])
    }

    /// Copy a sub-sequence and overlay recorded IUPAC codes on top of it.
    pub fn subseq_with_ambiguities(&self, start: u64, len: u64) -> Result<Vec<u8>> {
        let mut out = self.subseq(start, len)?.to_vec();
        let lo = self.ambs.partition_point(|a| a.pos < start);
        for amb in &self.ambs[lo..] {
            if amb.pos >= start + len {
                break;
            }
            out[(amb.pos - start) as usize] = amb.code;
        }
        Ok(out)
    }
}
