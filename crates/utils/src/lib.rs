//! Shared utilities for audiograb
//!
//! Small building blocks used across the workspace: atomic file writes and
//! copies, retry with exponential backoff, and tracing initialisation.

pub mod atomic_file;
pub mod retry;
pub mod tracing;

pub use atomic_file::*;
pub use retry::*;
