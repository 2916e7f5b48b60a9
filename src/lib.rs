//! Oracle Reporter Library
//!
//! Validator-side price reporter for round-based commit/reveal oracles

pub mod chain;
pub mod config;
pub mod oracle;
pub mod reporter;
pub mod types;

#[cfg(feature = "api")]
pub mod api;
