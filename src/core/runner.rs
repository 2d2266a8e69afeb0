//! Runner: the convergence loop.
//!
//! Construction validates every resource, orders the bundle, and resolves
//! each resource's provider, so malformed declarations and dispatch errors
//! surface before anything touches the target. A run then converges the
//! resources one at a time in that order and stops at the first failure.

use super::bundle::ResourceBundle;
use super::context::{ChangeRecord, Context, FileSource};
use super::error::{Error, Result};
use super::policy::{Policy, Registry};
use super::types::{Resource, ResourceId};
use crate::journal::eventlog::{Journal, RunEvent};
use crate::journal::hasher;
use crate::transport::Transport;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Verdict for one converged resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReport {
    pub id: ResourceId,
    pub provider: &'static str,
    pub changed: bool,
    pub changes: Vec<ChangeRecord>,
}

/// Per-resource verdicts in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub simulate: bool,
    pub resources: Vec<ResourceReport>,
}

impl RunReport {
    /// Whether any resource changed (or would change).
    pub fn changed(&self) -> bool {
        self.resources.iter().any(|r| r.changed)
    }

    pub fn changed_resources(&self) -> Vec<&ResourceId> {
        self.resources
            .iter()
            .filter(|r| r.changed)
            .map(|r| &r.id)
            .collect()
    }

    pub fn unchanged_count(&self) -> usize {
        self.resources.iter().filter(|r| !r.changed).count()
    }
}

/// One resource paired with the policy that handles it.
#[derive(Debug, Clone, Copy)]
struct Step<'a> {
    resource: &'a Resource,
    policy: &'a Policy,
}

pub struct Runner<'a> {
    name: String,
    steps: Vec<Step<'a>>,
    transport: &'a dyn Transport,
    files: &'a dyn FileSource,
    journal: Option<Journal>,
}

impl std::fmt::Debug for Runner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl<'a> Runner<'a> {
    pub fn new(
        bundle: &'a ResourceBundle,
        registry: &'a Registry,
        transport: &'a dyn Transport,
        files: &'a dyn FileSource,
    ) -> Result<Self> {
        for resource in bundle {
            registry.validate(resource)?;
        }
        let steps = bundle
            .execution_order()?
            .into_iter()
            .map(|resource| {
                Ok(Step {
                    resource,
                    policy: registry.resolve(resource)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: String::from("bundle"),
            steps,
            transport,
            files,
            journal: None,
        })
    }

    /// Name recorded in the journal.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append run events to a JSONL journal.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(Journal::new(path));
        self
    }

    /// Execution order with the provider chosen for each resource.
    pub fn plan(&self) -> impl Iterator<Item = (&'a Resource, &'static str)> + '_ {
        self.steps.iter().map(|s| (s.resource, s.policy.provider))
    }

    /// Digest of the execution order and chosen providers. Two runs with the
    /// same plan hash converged the same resources the same way.
    pub fn plan_hash(&self) -> String {
        let entries: Vec<String> = self
            .plan()
            .map(|(resource, provider)| format!("{}={}", resource.id().to_ref(), provider))
            .collect();
        let refs: Vec<&str> = entries.iter().map(String::as_str).collect();
        hasher::composite_hash(&refs)
    }

    fn record(&self, event: RunEvent) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.append(event) {
                warn!(path = %journal.path().display(), error = %e, "journal write failed");
            }
        }
    }

    /// Converge every resource in order.
    ///
    /// A real run in which no resource changed returns
    /// [`Error::NothingChanged`]. A simulate run never mutates the target
    /// and always returns its report.
    pub fn run(&self, simulate: bool) -> Result<RunReport> {
        let started = Instant::now();
        info!(bundle = %self.name, simulate, resources = self.steps.len(), "run started");
        self.record(RunEvent::RunStarted {
            bundle: self.name.clone(),
            simulate,
            resources: self.steps.len(),
            plan_hash: self.plan_hash(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        let mut report = RunReport {
            simulate,
            resources: Vec::with_capacity(self.steps.len()),
        };

        for step in &self.steps {
            match self.converge(step, simulate) {
                Ok(resource_report) => report.resources.push(resource_report),
                Err(e) => {
                    self.record(RunEvent::RunCompleted {
                        changed: report.changed_resources().len(),
                        unchanged: report.unchanged_count(),
                        failed: 1,
                        total_seconds: started.elapsed().as_secs_f64(),
                    });
                    return Err(e);
                }
            }
        }

        let changed = report.changed_resources().len();
        self.record(RunEvent::RunCompleted {
            changed,
            unchanged: report.unchanged_count(),
            failed: 0,
            total_seconds: started.elapsed().as_secs_f64(),
        });
        info!(
            bundle = %self.name,
            simulate,
            changed,
            unchanged = report.unchanged_count(),
            "run completed"
        );

        if !simulate && changed == 0 {
            return Err(Error::NothingChanged);
        }
        Ok(report)
    }

    fn converge(&self, step: &Step<'a>, simulate: bool) -> Result<ResourceReport> {
        let id = step.resource.id();
        let provider = (step.policy.factory)(step.resource);
        let resource = id.to_string();

        debug!(resource = %id, provider = provider.name(), "converging");
        self.record(RunEvent::ResourceStarted {
            resource: resource.clone(),
            provider: provider.name().to_string(),
        });

        let started = Instant::now();
        let mut ctx = Context::new(self.transport, self.files, simulate);
        let outcome = provider.apply(&mut ctx);
        let changes = ctx.into_changes();
        for change in &changes {
            self.record(RunEvent::ChangeApplied {
                resource: resource.clone(),
                change: change.description.clone(),
                changed: change.changed,
            });
        }

        match outcome {
            Ok(changed) => {
                info!(resource = %id, provider = provider.name(), changed, simulate, "resource converged");
                self.record(RunEvent::ResourceConverged {
                    resource,
                    changed,
                    duration_seconds: started.elapsed().as_secs_f64(),
                });
                Ok(ResourceReport {
                    id: id.clone(),
                    provider: provider.name(),
                    changed,
                    changes,
                })
            }
            Err(e) => {
                let err = e.in_resource(id, provider.name());
                error!(resource = %id, provider = provider.name(), error = %err, "resource failed");
                self.record(RunEvent::ResourceFailed {
                    resource,
                    provider: provider.name().to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
