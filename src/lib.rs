//! ChaseBot Library
//!
//! Single-instrument target-position strategies (momentum z-score, anchored reversion
//! ladder) executed through a cancel/replace order chase engine.

pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod persistence;
pub mod session;
pub mod signal;
pub mod strategy;
pub mod types;
pub mod venue;
