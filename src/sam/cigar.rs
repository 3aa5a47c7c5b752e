// CIGAR operations as explicit {kind, run length} records.
//
// The packed on-disk form is `len << 4 | op`; encode/decode are total so the
// bit packing never leaks into algorithm logic.

use crate::error::{MapError, Result};

/// The seven CIGAR operator kinds, in SAM code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    Match,
    Insertion,
    Deletion,
    RefSkip,
    SoftClip,
    HardClip,
    Pad,
}

/// Single-letter codes indexed by operator code, as printed in text records.
pub const CIGAR_OP_CHARS: [char; 7] = ['M', 'I', 'D', 'N', 'S', 'H', 'P'];

impl CigarOpKind {
    pub fn code(self) -> u32 {
        match self {
            CigarOpKind::Match => 0,
            CigarOpKind::Insertion => 1,
            CigarOpKind::Deletion => 2,
            CigarOpKind::RefSkip => 3,
            CigarOpKind::SoftClip => 4,
            CigarOpKind::HardClip => 5,
            CigarOpKind::Pad => 6,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(CigarOpKind::Match),
            1 => Ok(CigarOpKind::Insertion),
            2 => Ok(CigarOpKind::Deletion),
            3 => Ok(CigarOpKind::RefSkip),
            4 => Ok(CigarOpKind::SoftClip),
            5 => Ok(CigarOpKind::HardClip),
            6 => Ok(CigarOpKind::Pad),
            _ => Err(MapError::OutOfRange(format!(
                "could not understand the cigar operator code {code}"
            ))),
        }
    }

    pub fn to_char(self) -> char {
        CIGAR_OP_CHARS[self.code() as usize]
    }

    /// Operators that advance the reference cursor (M, D, N).
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::Deletion | CigarOpKind::RefSkip
        )
    }

    /// Operators that advance the read cursor (M, I, S).
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::Insertion | CigarOpKind::SoftClip
        )
    }
}

/// One CIGAR operation: operator kind plus run length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarOpKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        CigarOp { kind, len }
    }

    /// Pack into the `len << 4 | op` word used by binary records.
    pub fn encode(self) -> u32 {
        (self.len << 4) | self.kind.code()
    }

    pub fn decode(word: u32) -> Result<Self> {
        Ok(CigarOp {
            kind: CigarOpKind::from_code(word & 0xf)?,
            len: word >> 4,
        })
    }
}

/// Render a CIGAR in run-length text form; `*` stands for no alignment.
pub fn cigar_string(ops: &[CigarOp]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    let mut s = String::with_capacity(ops.len() * 4);
    for op in ops {
        s.push_str(&op.len.to_string());
        s.push(op.kind.to_char());
    }
    s
}

/// Number of reference bases covered by the alignment.
pub fn reference_span(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.kind.consumes_reference())
        .map(|op| op.len as u64)
        .sum()
}

/// Number of read bases consumed by the alignment.
pub fn query_span(ops: &[CigarOp]) -> usize {
    ops.iter()
        .filter(|op| op.kind.consumes_query())
        .map(|op| op.len as usize)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let op = CigarOp::new(CigarOpKind::SoftClip, 17);
        let decoded = CigarOp::decode(op.encode()).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_unknown_operator_code_rejected() {
        assert!(CigarOp::decode((5 << 4) | 9).is_err());
    }

    #[test]
    fn test_cigar_string() {
        let ops = vec![
            CigarOp::new(CigarOpKind::SoftClip, 5),
            CigarOp::new(CigarOpKind::Match, 90),
            CigarOp::new(CigarOpKind::Insertion, 2),
            CigarOp::new(CigarOpKind::Match, 3),
        ];
        assert_eq!(cigar_string(&ops), "5S90M2I3M");
        assert_eq!(cigar_string(&[]), "*");
    }

    #[test]
    fn test_spans() {
        let ops = vec![
            CigarOp::new(CigarOpKind::SoftClip, 5),
            CigarOp::new(CigarOpKind::Match, 90),
            CigarOp::new(CigarOpKind::Deletion, 4),
            CigarOp::new(CigarOpKind::RefSkip, 10),
            CigarOp::new(CigarOpKind::Insertion, 2),
        ];
        assert_eq!(reference_span(&ops), 104);
        assert_eq!(query_span(&ops), 97);
    }
}
