//! Resource declarations: identity, attribute values, dependency edges.
//!
//! A [`Resource`] is built once (builder style) and never mutated after it
//! is added to a bundle. Providers read attributes through [`Attr`], which
//! resolves a declared value or a caller-supplied default exactly once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// ============================================================================
// Identity
// ============================================================================

/// Identity of a resource: a type tag plus a name unique within that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse a `type:name` reference as written in bundle documents.
    pub fn parse_ref(reference: &str) -> Option<Self> {
        let (kind, name) = reference.split_once(':')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }

    /// Render as a `type:name` reference.
    pub fn to_ref(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

// ============================================================================
// Attribute values
// ============================================================================

/// A declared attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

/// The shape an attribute value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Str,
    /// File mode: an octal string ("0755") or an integer.
    Mode,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Str => write!(f, "string"),
            Self::Mode => write!(f, "mode"),
            Self::List => write!(f, "list"),
        }
    }
}

impl Value {
    /// Whether this value can be read as `kind`.
    pub fn conforms_to(&self, kind: ValueKind) -> bool {
        match kind {
            ValueKind::Bool => matches!(self, Self::Bool(_)),
            ValueKind::Str => matches!(self, Self::Str(_) | Self::Int(_)),
            ValueKind::Mode => self.as_mode().is_some(),
            ValueKind::List => matches!(self, Self::List(_) | Self::Str(_)),
        }
    }

    /// String coercion: strings as-is, integers and booleans rendered.
    pub fn as_string(&self) -> Cow<'_, str> {
        match self {
            Self::Str(s) => Cow::Borrowed(s),
            Self::Int(i) => Cow::Owned(i.to_string()),
            Self::Bool(b) => Cow::Owned(b.to_string()),
            Self::List(items) => Cow::Owned(items.join(" ")),
        }
    }

    /// Permission bits. Both strings and integers are read as octal digits,
    /// so an unquoted YAML `mode: 0755` (parsed as decimal 755) still means
    /// `rwxr-xr-x`.
    pub fn as_mode(&self) -> Option<u32> {
        let digits = match self {
            Self::Str(s) => Cow::Borrowed(s.strip_prefix("0o").unwrap_or(s)),
            Self::Int(i) if *i >= 0 => Cow::Owned(i.to_string()),
            _ => return None,
        };
        u32::from_str_radix(&digits, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Reader for one attribute: the declared value, or a default chosen by the
/// caller at read time.
#[derive(Debug, Clone, Copy)]
pub struct Attr<'a> {
    name: &'a str,
    value: Option<&'a Value>,
}

impl<'a> Attr<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&'a Value> {
        self.value
    }

    /// The value as a string, or `default` when unset.
    pub fn as_string(&self, default: &'a str) -> Cow<'a, str> {
        self.value
            .map(Value::as_string)
            .unwrap_or(Cow::Borrowed(default))
    }

    /// The value as a string, `None` when unset or empty.
    pub fn as_opt_string(&self) -> Option<String> {
        let s = self.as_string("");
        (!s.is_empty()).then(|| s.into_owned())
    }

    pub fn as_bool(&self, default: bool) -> bool {
        match self.value {
            Some(Value::Bool(b)) => *b,
            Some(Value::Str(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
            Some(Value::Int(i)) => *i != 0,
            _ => default,
        }
    }

    pub fn as_mode(&self) -> Option<u32> {
        self.value.and_then(Value::as_mode)
    }

    /// List values; a single string is a one-element list.
    pub fn as_list(&self) -> Vec<String> {
        match self.value {
            Some(Value::List(items)) => items.clone(),
            Some(Value::Str(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A typed declaration of desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    id: ResourceId,
    policy: Option<String>,
    attributes: IndexMap<String, Value>,
    depends_on: Vec<ResourceId>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            policy: None,
            attributes: IndexMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Select a policy by name (e.g. "remove" on a directory).
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, dependency: ResourceId) -> Self {
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
        self
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// The declared policy name, if any. The registry falls back to the
    /// type's default policy when this is `None`.
    pub fn policy(&self) -> Option<&str> {
        self.policy.as_deref()
    }

    pub fn attr<'a>(&'a self, name: &'a str) -> Attr<'a> {
        Attr {
            name,
            value: self.attributes.get(name),
        }
    }

    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    pub fn dependencies(&self) -> &[ResourceId] {
        &self.depends_on
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

// ============================================================================
// Tests
// ============================================================================
