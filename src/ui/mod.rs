//! ui
//!
//! Terminal output for the `bl` binary.
//!
//! # Modules
//!
//! - [`output`] - Output formatting and display
//!
//! # Design
//!
//! All output goes through this module so quiet mode and `--json` are
//! honored the same way by every command.

pub mod output;
