pub mod algos; // Built-in mapping algorithms and the name/id table
pub mod defaults;
pub mod driver; // Algorithm registry and staged pipeline driver
pub mod error;
pub mod map; // Entry point for the `map` command
pub mod map_opt; // Option nodes and the stage-grammar resolver
pub mod refindex; // Reference names/lengths/offsets and ambiguity annotations
pub mod sam; // Record synthesis: text encoder, packed mutator, header manager
pub mod seq; // Typed reads and batched sequence sources
