// Built-in mapping algorithms and the fixed name/id table.
//
// Production search engines (BWT backward search, suffix-array lookup,
// vectorized Smith-Waterman) plug in through the same `MapAlgorithm` trait;
// the two in-tree algorithms are deliberately simple reference scans so the
// staged driver can run end to end without an external engine.

pub mod exact;
pub mod ungapped;

use crate::driver::MapAlgorithm;
use crate::error::{MapError, Result};

pub const ALGO_EXACT: u32 = 1;
pub const ALGO_UNGAPPED: u32 = 2;

/// Fixed name -> id lookup. Unknown names are not algorithm tokens.
pub fn name_to_id(name: &str) -> Option<u32> {
    match name {
        "exact" => Some(ALGO_EXACT),
        "ungapped" => Some(ALGO_UNGAPPED),
        _ => None,
    }
}

/// Fixed id -> name lookup; an unknown id is an invariant violation.
pub fn id_to_name(id: u32) -> Result<&'static str> {
    match id {
        ALGO_EXACT => Ok("exact"),
        ALGO_UNGAPPED => Ok("ungapped"),
        _ => Err(MapError::OutOfRange(format!("unknown algorithm id {id}"))),
    }
}

/// Construct the callback bundle for an algorithm id. An unknown id fails
/// here, at registration time, never at run time.
pub fn bundle_for(id: u32) -> Result<Box<dyn MapAlgorithm>> {
    match id {
        ALGO_EXACT => Ok(Box::new(exact::ExactAlgorithm)),
        ALGO_UNGAPPED => Ok(Box::new(ungapped::UngappedAlgorithm)),
        _ => Err(MapError::OutOfRange(format!("unknown algorithm id {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_table_roundtrip() {
        for name in ["exact", "ungapped"] {
            let id = name_to_id(name).unwrap();
            assert_eq!(id_to_name(id).unwrap(), name);
        }
        assert!(name_to_id("stage1").is_none());
        assert!(name_to_id("map9").is_none());
    }

    #[test]
    fn test_unknown_id_rejected_at_registration() {
        assert!(bundle_for(99).is_err());
        assert!(id_to_name(0).is_err());
    }
}
