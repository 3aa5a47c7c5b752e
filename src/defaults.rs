// src/defaults.rs

// Scoring Constants
pub const SCORE_MATCH: i32 = 1;
pub const PEN_MISMATCH: i32 = 3;
pub const PEN_GAP_OPEN: i32 = 5;
pub const PEN_GAP_EXTEND: i32 = 2;
pub const SCORE_THRESHOLD: i32 = 8;

// Algorithmic Constants
pub const MIN_SEED_LENGTH: i32 = 32;
pub const MAX_MISMATCHES: i32 = 3;
pub const MAX_HITS: i32 = 10;

// Batch Constants
pub const READS_PER_BATCH: usize = 512;

// Other Constants
pub const VERBOSITY: i32 = 3;
pub const MAPQ_MAX: u8 = 60;
