pub mod cigar;
pub mod header;
pub mod packed;
pub mod record;

/// Program identity stamped into the header and into every record's PG tag.
pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SAM_VERSION: &str = "1.0";
