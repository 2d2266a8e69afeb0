//! Bundle document parsing, validation and serialization.
//!
//! A bundle document is YAML:
//! - `version` must be "1.0"
//! - `name` must not be empty
//! - `files` maps file ids to inline `content` or a `path` relative to the
//!   document, plus optional `labels`
//! - `resources` is an ordered list; each entry has `type`, `name`, optional
//!   `policy` and `depends_on` (`type:name` references), and any other keys
//!   are the resource's attributes

use super::bundle::ResourceBundle;
use super::context::{FileHandle, StaticFiles};
use super::error::{Error, Result};
use super::policy::Registry;
use super::types::{Resource, ResourceId, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Source content referenced by resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// One resource entry as written in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub attrs: IndexMap<String, Value>,
}

impl ResourceDecl {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.kind, &self.name)
    }

    /// Build the immutable resource this entry declares.
    pub fn to_resource(&self) -> Result<Resource> {
        let mut resource = Resource::new(&self.kind, &self.name);
        if let Some(ref policy) = self.policy {
            resource = resource.with_policy(policy);
        }
        for (key, value) in &self.attrs {
            resource = resource.with_attr(key, value.clone());
        }
        for dep in &self.depends_on {
            let id = ResourceId::parse_ref(dep).ok_or_else(|| {
                Error::Parse(format!(
                    "{}: dependency '{}' is not a type:name reference",
                    self.id(),
                    dep
                ))
            })?;
            resource = resource.depends_on(id);
        }
        Ok(resource)
    }
}

impl From<&Resource> for ResourceDecl {
    fn from(resource: &Resource) -> Self {
        Self {
            kind: resource.kind().to_string(),
            name: resource.name().to_string(),
            policy: resource.policy().map(str::to_string),
            depends_on: resource.dependencies().iter().map(ResourceId::to_ref).collect(),
            attrs: resource.attributes().clone(),
        }
    }
}

/// A parsed bundle document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDocument {
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub files: IndexMap<String, FileDecl>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

impl BundleDocument {
    /// Describe an existing bundle, e.g. to hand it to a packaging step.
    pub fn from_bundle(name: impl Into<String>, bundle: &ResourceBundle) -> Self {
        Self {
            version: "1.0".to_string(),
            name: name.into(),
            files: IndexMap::new(),
            resources: bundle.iter().map(ResourceDecl::from).collect(),
        }
    }

    /// Materialize the declared resources, in order.
    pub fn to_bundle(&self) -> Result<ResourceBundle> {
        ResourceBundle::try_collect(self.resources.iter().map(ResourceDecl::to_resource))
    }

    /// File handles for the declared files; relative paths resolve against
    /// `base_dir`.
    pub fn file_source(&self, base_dir: &Path) -> StaticFiles {
        let mut files = StaticFiles::new();
        for (id, decl) in &self.files {
            let handle = match (&decl.content, &decl.path) {
                (Some(content), _) => FileHandle::inline(id, content.as_bytes()),
                (None, Some(path)) => FileHandle::on_disk(id, base_dir.join(path)),
                (None, None) => FileHandle::inline(id, Vec::new()),
            };
            files.insert(handle.with_labels(decl.labels.iter().cloned()));
        }
        files
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| Error::Parse(format!("YAML serialize error: {}", e)))
    }
}

/// Parse a bundle document from a string.
pub fn parse_document(yaml: &str) -> Result<BundleDocument> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse(format!("YAML parse error: {}", e)))
}

/// Parse a bundle document from disk.
pub fn parse_document_file(path: &Path) -> Result<BundleDocument> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("failed to read {}: {}", path.display(), e)))?;
    parse_document(&content)
}

/// Validate a parsed document against `registry`. Returns every problem
/// found (empty = valid).
pub fn validate_document(doc: &BundleDocument, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if doc.version != "1.0" {
        errors.push(ValidationError::new(format!(
            "version must be \"1.0\", got \"{}\"",
            doc.version
        )));
    }
    if doc.name.is_empty() {
        errors.push(ValidationError::new("name must not be empty"));
    }

    for (id, file) in &doc.files {
        match (&file.path, &file.content) {
            (Some(_), Some(_)) => errors.push(ValidationError::new(format!(
                "file '{}' declares both path and content",
                id
            ))),
            (None, None) => errors.push(ValidationError::new(format!(
                "file '{}' declares neither path nor content",
                id
            ))),
            _ => {}
        }
    }

    let declared: HashSet<ResourceId> = doc.resources.iter().map(ResourceDecl::id).collect();
    let mut seen = HashSet::new();
    for decl in &doc.resources {
        let id = decl.id();
        if !seen.insert(id.clone()) {
            errors.push(ValidationError::new(format!("duplicate resource {}", id)));
        }

        for dep in &decl.depends_on {
            match ResourceId::parse_ref(dep) {
                None => errors.push(ValidationError::new(format!(
                    "resource {} has malformed dependency '{}' (expected type:name)",
                    id, dep
                ))),
                Some(dep_id) if dep_id == id => errors.push(ValidationError::new(format!(
                    "resource {} depends on itself",
                    id
                ))),
                Some(dep_id) if !declared.contains(&dep_id) => {
                    errors.push(ValidationError::new(format!(
                        "resource {} depends on unknown resource {}",
                        id, dep_id
                    )))
                }
                Some(_) => {}
            }
        }

        if let Ok(resource) = decl.to_resource() {
            if let Err(e) = registry.validate(&resource) {
                errors.push(ValidationError::new(e.to_string()));
            } else if let Err(e) = registry.resolve(&resource) {
                errors.push(ValidationError::new(e.to_string()));
            }
        }

        if decl.kind == "patch" {
            if let Some(patch) = decl.attrs.get("patch") {
                let patch = patch.as_string();
                if !doc.files.contains_key(&*patch) {
                    errors.push(ValidationError::new(format!(
                        "resource {} references undeclared file '{}'",
                        id, patch
                    )));
                }
            }
        }
    }

    // Cycles only make sense to report once references are sound.
    if errors.is_empty() {
        if let Err(e) = doc.to_bundle().and_then(|b| b.execution_order().map(|_| ())) {
            errors.push(ValidationError::new(e.to_string()));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::FileSource;

    const DOC: &str = r#"
version: "1.0"
name: web
files:
  nginx.patch:
    path: patches/nginx.patch
    labels: [secret]
  motd:
    content: "hello\n"
resources:
  - type: directory
    name: /srv/app
    mode: "0755"
    owner: www
    parents: true
  - type: service
    name: nginx
    policy: restart
    pidfile: /run/nginx.pid
    start: /usr/sbin/nginx
    depends_on: ["directory:/srv/app"]
  - type: patch
    name: /etc/nginx/nginx.conf
    source: /etc/nginx/nginx.conf.dist
    patch: nginx.patch
    mode: 644
"#;

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_parser_valid_document() {
        let doc = parse_document(DOC).unwrap();
        assert_eq!(doc.name, "web");
        assert_eq!(doc.resources.len(), 3);
        let errors = validate_document(&doc, Registry::builtin());
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_parser_attributes_flattened() {
        let doc = parse_document(DOC).unwrap();
        let dir = doc.resources[0].to_resource().unwrap();
        assert_eq!(dir.attr("mode").as_mode(), Some(0o755));
        assert!(dir.attr("parents").as_bool(false));
        assert_eq!(dir.attr("owner").as_string(""), "www");
        assert!(dir.attr("type").value().is_none());

        let patch = doc.resources[2].to_resource().unwrap();
        assert_eq!(patch.attr("mode").as_mode(), Some(0o644));

        let svc = doc.resources[1].to_resource().unwrap();
        assert_eq!(svc.policy(), Some("restart"));
        assert_eq!(svc.dependencies(), &[ResourceId::new("directory", "/srv/app")]);
    }

    #[test]
    fn test_parser_to_bundle_keeps_order() {
        let bundle = parse_document(DOC).unwrap().to_bundle().unwrap();
        let names: Vec<&str> = bundle.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["/srv/app", "nginx", "/etc/nginx/nginx.conf"]);
    }

    #[test]
    fn test_parser_bad_version_and_name() {
        let doc = parse_document("version: \"2.0\"\nname: \"\"\n").unwrap();
        let errors = validate_document(&doc, Registry::builtin());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("version")));
        assert!(msgs.iter().any(|m| m.contains("name must not be empty")));
    }

    #[test]
    fn test_parser_reference_errors() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  - type: directory
    name: /a
    depends_on: ["/b", "directory:/a", "directory:/zzz"]
  - type: directory
    name: /a
  - type: patch
    name: /etc/x
    source: /etc/x.orig
    patch: missing.patch
"#;
        let errors = validate_document(&parse_document(yaml).unwrap(), Registry::builtin());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("malformed dependency '/b'")));
        assert!(msgs.iter().any(|m| m.contains("depends on itself")));
        assert!(msgs.iter().any(|m| m.contains("unknown resource directory[/zzz]")));
        assert!(msgs.iter().any(|m| m.contains("duplicate resource directory[/a]")));
        assert!(msgs.iter().any(|m| m.contains("undeclared file 'missing.patch'")));
    }

    #[test]
    fn test_parser_schema_and_dispatch_errors() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  - type: directory
    name: /a
    colour: red
  - type: checkout
    name: /srv/app
    scm: git
  - type: teapot
    name: earl-grey
"#;
        let errors = validate_document(&parse_document(yaml).unwrap(), Registry::builtin());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("unknown attribute 'colour'")));
        assert!(msgs.iter().any(|m| m.contains("no provider for checkout[/srv/app]")));
        assert!(msgs.iter().any(|m| m.contains("unknown resource type 'teapot'")));
    }

    #[test]
    fn test_parser_cycle_reported() {
        let yaml = r#"
version: "1.0"
name: t
resources:
  - type: directory
    name: /a
    depends_on: ["directory:/b"]
  - type: directory
    name: /b
    depends_on: ["directory:/a"]
"#;
        let errors = validate_document(&parse_document(yaml).unwrap(), Registry::builtin());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("dependency cycle"));
    }

    #[test]
    fn test_parser_file_declarations() {
        let yaml = r#"
version: "1.0"
name: t
files:
  both: {path: a, content: b}
  neither: {}
"#;
        let errors = validate_document(&parse_document(yaml).unwrap(), Registry::builtin());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("'both' declares both")));
        assert!(msgs.iter().any(|m| m.contains("'neither' declares neither")));
    }

    #[test]
    fn test_parser_file_source_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("patches")).unwrap();
        std::fs::write(dir.path().join("patches/nginx.patch"), "--- a\n").unwrap();
        let doc = parse_document(DOC).unwrap();
        let files = doc.file_source(dir.path());

        let patch = files.get_file("nginx.patch").unwrap();
        assert!(patch.is_secret());
        assert_eq!(patch.read().unwrap(), b"--- a\n");
        assert_eq!(files.get_file("motd").unwrap().read().unwrap(), b"hello\n");
    }

    #[test]
    fn test_parser_document_from_bundle_reparses() {
        let bundle = parse_document(DOC).unwrap().to_bundle().unwrap();
        let yaml = BundleDocument::from_bundle("web", &bundle).to_yaml().unwrap();
        assert!(yaml.contains("type: directory"));
        assert!(yaml.contains("directory:/srv/app"));
        let again = parse_document(&yaml).unwrap().to_bundle().unwrap();
        assert_eq!(
            again.iter().cloned().collect::<Vec<_>>(),
            bundle.iter().cloned().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_parser_syntax_error() {
        assert!(matches!(parse_document("version: [unclosed"), Err(Error::Parse(_))));
    }
}
