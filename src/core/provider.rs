//! Provider contract: the strategy that converges one resource.

use super::context::Context;
use super::error::Result;
use super::types::Resource;
use std::fmt;

/// Converges a single resource. Providers borrow their resource and keep
/// no state between runs.
pub trait Provider: fmt::Debug {
    /// Provider name shown in reports and errors (e.g. "Directory").
    fn name(&self) -> &'static str;

    /// Probe the target through `ctx`, register changes, and report whether
    /// anything changed (or would change, when simulating).
    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool>;
}

/// Builds the provider bound to a policy for a given resource.
pub type ProviderFactory = for<'a> fn(&'a Resource) -> Box<dyn Provider + 'a>;
