//! Core engine: resource model, bundles, policy dispatch, the runner.

pub mod bundle;
pub mod context;
pub mod error;
pub mod parser;
pub mod policy;
pub mod provider;
pub mod runner;
pub mod types;
