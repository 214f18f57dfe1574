//! Bankscope - banked-memory code analysis in Rust
//!
//! Records what an emulated CPU executes, reads and writes, keyed by
//! physical bank rather than CPU address:
//! - Commodore 64 (6510 port banking)
//! - Amstrad CPC 464 / 6128 (gate array RAM configurations, upper ROM select)
//! - ZX Spectrum 48K / 128K ($7FFD paging)
//! - Labels, comments, data formatting with undo, JSON import/export

pub mod analysis;
pub mod analysis_log;
pub mod config;
pub mod cpu;
pub mod debugger;
pub mod listing;
pub mod machine;
pub mod trace;
