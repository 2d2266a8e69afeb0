//! CLI subcommands: init, validate, plan, apply, providers.

use crate::core::bundle::ResourceBundle;
use crate::core::context::StaticFiles;
use crate::core::parser::{self, BundleDocument};
use crate::core::policy::Registry;
use crate::core::runner::{RunReport, Runner};
use crate::transport::local::LocalTransport;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter bundle document
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a bundle document without touching the host
    Validate {
        /// Path to the bundle document
        #[arg(short, long, default_value = "bundle.yaml")]
        file: PathBuf,
    },

    /// Simulate a run and show which resources would change
    Plan {
        /// Path to the bundle document
        #[arg(short, long, default_value = "bundle.yaml")]
        file: PathBuf,
    },

    /// Converge the local host to the declared state
    Apply {
        /// Path to the bundle document
        #[arg(short, long, default_value = "bundle.yaml")]
        file: PathBuf,

        /// Probe only; report what would change
        #[arg(long)]
        simulate: bool,

        /// Append run events to this JSONL file
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// List resource types, their policies and providers
    Providers,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file } => cmd_plan(&file),
        Commands::Apply {
            file,
            simulate,
            journal,
        } => cmd_apply(&file, simulate, journal.as_deref()),
        Commands::Providers => cmd_providers(),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-host
files: {}
resources:
  - type: directory
    name: /tmp/converge-demo
    mode: "0755"
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let bundle_path = path.join("bundle.yaml");
    if bundle_path.exists() {
        return Err(format!("{} already exists", bundle_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&bundle_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", bundle_path.display(), e))?;

    println!("Initialized bundle at {}", bundle_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let doc = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_document(&doc, Registry::builtin());

    if errors.is_empty() {
        println!(
            "OK: {} ({} resources, {} files)",
            doc.name,
            doc.resources.len(),
            doc.files.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// A validated document with its materialized bundle and file source.
struct Loaded {
    doc: BundleDocument,
    bundle: ResourceBundle,
    files: StaticFiles,
}

fn load(file: &Path) -> Result<Loaded, String> {
    let doc = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_document(&doc, Registry::builtin());
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }
    let bundle = doc.to_bundle().map_err(|e| e.to_string())?;
    let files = doc.file_source(file.parent().unwrap_or(Path::new(".")));
    Ok(Loaded { doc, bundle, files })
}

fn print_report(report: &RunReport) {
    for r in &report.resources {
        let symbol = if r.changed { "+" } else { " " };
        println!("  {} {} ({})", symbol, r.id, r.provider);
    }
}

fn cmd_plan(file: &Path) -> Result<(), String> {
    let loaded = load(file)?;
    let transport = LocalTransport::new();
    let runner = Runner::new(&loaded.bundle, Registry::builtin(), &transport, &loaded.files)
        .map_err(|e| e.to_string())?
        .with_name(&loaded.doc.name);

    println!("Planning: {} ({} resources)", loaded.doc.name, loaded.bundle.len());
    println!();
    let report = runner.run(true).map_err(|e| e.to_string())?;
    print_report(&report);

    println!();
    println!(
        "Plan: {} to change, {} unchanged.",
        report.changed_resources().len(),
        report.unchanged_count()
    );
    Ok(())
}

fn cmd_apply(file: &Path, simulate: bool, journal: Option<&Path>) -> Result<(), String> {
    let loaded = load(file)?;
    let transport = LocalTransport::new();
    let mut runner = Runner::new(&loaded.bundle, Registry::builtin(), &transport, &loaded.files)
        .map_err(|e| e.to_string())?
        .with_name(&loaded.doc.name);
    if let Some(path) = journal {
        runner = runner.with_journal(path);
    }

    match runner.run(simulate) {
        Ok(report) => {
            print_report(&report);
            println!();
            if simulate {
                println!(
                    "Simulated: {} would change, {} unchanged.",
                    report.changed_resources().len(),
                    report.unchanged_count()
                );
            } else {
                println!(
                    "Apply complete: {} converged, {} unchanged.",
                    report.changed_resources().len(),
                    report.unchanged_count()
                );
            }
            Ok(())
        }
        Err(e) if e.is_nothing_changed() => {
            println!("Nothing changed.");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn cmd_providers() -> Result<(), String> {
    let registry = Registry::builtin();
    for schema in registry.schemas() {
        println!("{}: {}", schema.kind, schema.description);
        for policy in registry.policies(schema.kind) {
            let default = if policy.name == schema.default_policy {
                " (default)"
            } else {
                ""
            };
            println!("  {} -> {}{}", policy.name, policy.provider, default);
        }
    }
    Ok(())
}
