//! Converge: declarative server configuration.
//!
//! Resources declare desired state; policies pick a provider for each one;
//! providers register idempotent changes against a transport. A run either
//! simulates (probes only) or converges the target for real.

pub mod changes;
pub mod cli;
pub mod core;
pub mod journal;
pub mod resources;
pub mod transport;
