//! Policy registry: resource type schemas and provider dispatch.
//!
//! Each resource type tag maps to a [`ResourceSchema`] and an ordered list
//! of [`Policy`] entries. Dispatch filters the type's policies down to those
//! whose name matches the resource's declared (or default) policy and whose
//! predicate accepts the resource's attributes; exactly one must remain.
//!
//! The builtin registry is populated once per process and never mutated
//! afterwards.

use super::error::{Error, Result};
use super::provider::ProviderFactory;
use super::types::{Resource, ValueKind};
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// One attribute a resource type accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub kind: ValueKind,
    pub required: bool,
}

impl AttributeSchema {
    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }
}

/// Shape of a resource type: accepted attributes and default policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    pub kind: &'static str,
    pub description: &'static str,
    pub default_policy: &'static str,
    /// Names are filesystem paths and must be absolute.
    pub path_name: bool,
    pub attributes: Vec<AttributeSchema>,
}

impl ResourceSchema {
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A named predicate bound to a provider factory.
#[derive(Clone, Copy)]
pub struct Policy {
    pub name: &'static str,
    pub provider: &'static str,
    pub applies: fn(&Resource) -> bool,
    pub factory: ProviderFactory,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

fn always(_: &Resource) -> bool {
    true
}

impl Policy {
    /// A policy that accepts every resource carrying its name.
    pub fn new(name: &'static str, provider: &'static str, factory: ProviderFactory) -> Self {
        Self {
            name,
            provider,
            applies: always,
            factory,
        }
    }

    /// Narrow the policy with an attribute predicate.
    pub fn when(mut self, predicate: fn(&Resource) -> bool) -> Self {
        self.applies = predicate;
        self
    }

    /// Whether this policy handles `resource` under `policy_name`.
    pub fn matches(&self, policy_name: &str, resource: &Resource) -> bool {
        self.name == policy_name && (self.applies)(resource)
    }
}

#[derive(Debug, Clone)]
struct TypeEntry {
    schema: ResourceSchema,
    policies: Vec<Policy>,
}

/// Type tag → schema and ordered policies.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: IndexMap<&'static str, TypeEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry of builtin resource types.
    pub fn builtin() -> &'static Registry {
        static BUILTIN: OnceLock<Registry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut registry = Registry::new();
            crate::resources::register_builtins(&mut registry);
            registry
        })
    }

    /// Register (or replace) a resource type together with its policies.
    pub fn register<I>(&mut self, schema: ResourceSchema, policies: I)
    where
        I: IntoIterator<Item = Policy>,
    {
        self.types.insert(
            schema.kind,
            TypeEntry {
                schema,
                policies: policies.into_iter().collect(),
            },
        );
    }

    /// Register (or replace) a resource type with no policies yet.
    pub fn register_type(&mut self, schema: ResourceSchema) {
        self.register(schema, []);
    }

    /// Append a policy to an already registered type.
    pub fn register_policy(&mut self, kind: &str, policy: Policy) -> Result<()> {
        let entry = self.types.get_mut(kind).ok_or_else(|| {
            Error::InvalidProvider(format!(
                "policy '{}' registered for unknown resource type '{}'",
                policy.name, kind
            ))
        })?;
        entry.policies.push(policy);
        Ok(())
    }

    pub fn schema(&self, kind: &str) -> Option<&ResourceSchema> {
        self.types.get(kind).map(|e| &e.schema)
    }

    pub fn policies(&self, kind: &str) -> &[Policy] {
        self.types
            .get(kind)
            .map(|e| e.policies.as_slice())
            .unwrap_or(&[])
    }

    /// Registered schemas in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.types.values().map(|e| &e.schema)
    }

    /// The policy name a resource runs under.
    pub fn effective_policy<'r>(&'r self, resource: &'r Resource) -> Option<&'r str> {
        resource
            .policy()
            .or_else(|| self.schema(resource.kind()).map(|s| s.default_policy))
    }

    /// Check a resource against its type's schema.
    pub fn validate(&self, resource: &Resource) -> Result<()> {
        let invalid = |message: String| Error::InvalidResource {
            resource: resource.id().clone(),
            message,
        };

        let schema = self
            .schema(resource.kind())
            .ok_or_else(|| invalid(format!("unknown resource type '{}'", resource.kind())))?;

        if resource.name().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if schema.path_name && !Path::new(resource.name()).is_absolute() {
            return Err(invalid("name must be an absolute path".to_string()));
        }

        for (name, value) in resource.attributes() {
            let attr = schema
                .attribute(name)
                .ok_or_else(|| invalid(format!("unknown attribute '{}'", name)))?;
            if !value.conforms_to(attr.kind) {
                return Err(invalid(format!(
                    "attribute '{}' must be a {}, got '{}'",
                    name,
                    attr.kind,
                    value.as_string()
                )));
            }
        }

        if let Some(missing) = schema
            .attributes
            .iter()
            .find(|a| a.required && !resource.attributes().contains_key(a.name))
        {
            return Err(invalid(format!(
                "missing required attribute '{}'",
                missing.name
            )));
        }

        if let Some(policy) = resource.policy() {
            let policies = self.policies(resource.kind());
            if !policies.iter().any(|p| p.name == policy) {
                let mut known: Vec<&str> = policies.iter().map(|p| p.name).collect();
                known.dedup();
                return Err(invalid(format!(
                    "unknown policy '{}' (expected one of: {})",
                    policy,
                    known.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Select the single policy that handles `resource`.
    pub fn resolve(&self, resource: &Resource) -> Result<&Policy> {
        let policy_name = self.effective_policy(resource).unwrap_or_default();
        let matching: Vec<&Policy> = self
            .policies(resource.kind())
            .iter()
            .filter(|p| p.matches(policy_name, resource))
            .collect();

        match matching.as_slice() {
            [] => Err(Error::NoProvider {
                resource: resource.id().clone(),
                policy: policy_name.to_string(),
            }),
            [one] => Ok(*one),
            many => Err(Error::AmbiguousProvider {
                resource: resource.id().clone(),
                providers: many.iter().map(|p| p.provider).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::provider::Provider;

    #[derive(Debug)]
    struct Noop;

    impl Provider for Noop {
        fn name(&self) -> &'static str {
            "Noop"
        }

        fn apply(&self, _ctx: &mut Context<'_>) -> Result<bool> {
            Ok(false)
        }
    }

    fn noop<'a>(_: &'a Resource) -> Box<dyn Provider + 'a> {
        Box::new(Noop)
    }

    fn is_git(r: &Resource) -> bool {
        r.attr("scm").as_string("") == "git"
    }

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_type(ResourceSchema {
            kind: "thing",
            description: "test type",
            default_policy: "apply",
            path_name: false,
            attributes: vec![
                AttributeSchema::optional("mode", ValueKind::Mode),
                AttributeSchema::optional("scm", ValueKind::Str),
                AttributeSchema::required("source", ValueKind::Str),
            ],
        });
        reg.register_policy("thing", Policy::new("apply", "Apply", noop))
            .unwrap();
        reg.register_policy("thing", Policy::new("sync", "GitSync", noop).when(is_git))
            .unwrap();
        reg
    }

    fn thing() -> Resource {
        Resource::new("thing", "t1").with_attr("source", "/a")
    }

    #[test]
    fn test_policy_resolve_default() {
        let reg = registry();
        assert_eq!(reg.resolve(&thing()).unwrap().provider, "Apply");
    }

    #[test]
    fn test_policy_resolve_predicate() {
        let reg = registry();
        let git = thing().with_policy("sync").with_attr("scm", "git");
        assert_eq!(reg.resolve(&git).unwrap().provider, "GitSync");

        let svn = thing().with_policy("sync").with_attr("scm", "svn");
        assert!(matches!(
            reg.resolve(&svn),
            Err(Error::NoProvider { ref policy, .. }) if policy == "sync"
        ));
    }

    #[test]
    fn test_policy_ambiguous() {
        let mut reg = registry();
        reg.register_policy("thing", Policy::new("apply", "Other", noop))
            .unwrap();
        match reg.resolve(&thing()) {
            Err(Error::AmbiguousProvider { providers, .. }) => {
                assert_eq!(providers, vec!["Apply", "Other"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_policy_unknown_type_registration() {
        let mut reg = Registry::new();
        assert!(matches!(
            reg.register_policy("ghost", Policy::new("apply", "Apply", noop)),
            Err(Error::InvalidProvider(_))
        ));
        assert!(reg.resolve(&Resource::new("ghost", "x")).is_err());
    }

    #[test]
    fn test_validate_schema_violations() {
        let reg = registry();
        assert!(reg.validate(&thing()).is_ok());

        let cases = [
            (Resource::new("ghost", "x"), "unknown resource type"),
            (thing().with_attr("colour", "red"), "unknown attribute 'colour'"),
            (thing().with_attr("mode", "rwx"), "attribute 'mode' must be a mode"),
            (Resource::new("thing", "t2"), "missing required attribute 'source'"),
            (thing().with_policy("explode"), "unknown policy 'explode'"),
            (Resource::new("thing", "").with_attr("source", "/a"), "name must not be empty"),
        ];
        for (resource, expected) in cases {
            match reg.validate(&resource) {
                Err(Error::InvalidResource { message, .. }) => {
                    assert!(message.contains(expected), "{message} !~ {expected}")
                }
                other => panic!("expected InvalidResource for {resource}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_builtin_registry_types() {
        let reg = Registry::builtin();
        let kinds: Vec<&str> = reg.schemas().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["directory", "service", "patch", "checkout"]);
        assert!(std::ptr::eq(reg, Registry::builtin()));
    }

    #[test]
    fn test_builtin_path_types_require_absolute_names() {
        let reg = Registry::builtin();
        let relative = [
            Resource::new("directory", "srv/app"),
            Resource::new("patch", "etc/app.conf")
                .with_attr("source", "/etc/app.conf.orig")
                .with_attr("patch", "app.patch"),
            Resource::new("checkout", "./code").with_attr("scm", "mounted"),
        ];
        for r in &relative {
            let err = reg.validate(r).unwrap_err();
            assert!(
                err.to_string().contains("name must be an absolute path"),
                "{r}: {err}"
            );
        }
        assert!(reg.validate(&Resource::new("directory", "/srv/app")).is_ok());
        assert!(reg.validate(&Resource::new("service", "nginx")).is_ok());
    }
}
