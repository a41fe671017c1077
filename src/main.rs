use anyhow::{Context, Result};
use clap::Parser;
use receipe_editor::{
    config::CONFIG_FILE, export_receipe, import_named, storage::read_chain, EditorConfig,
    ValidatedTree, ValidationSeverity,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Inspect a receipe file: outline, validation and normalised re-export
#[derive(Parser, Debug)]
#[command(name = "receipe_editor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Receipe in wire format (`<name>.skll.json`)
    file: PathBuf,

    /// Extra type catalog to register (repeatable)
    #[arg(long = "catalog")]
    catalogs: Vec<PathBuf>,

    /// Print a validation report
    #[arg(long)]
    validate: bool,

    /// Configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();
    let (config, config_error) = EditorConfig::load_or_default(&args.config);

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(e) = config_error {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
    }

    if let Err(e) = run(&args, config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args, mut config: EditorConfig) -> Result<()> {
    config.catalogs.extend(args.catalogs.iter().cloned());
    let registry = config.build_registry();

    let name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.strip_suffix(".skll.json").unwrap_or(n).to_string())
        .unwrap_or_else(|| "Untitled".to_string());

    let chain = read_chain(&args.file)?;
    let tree = import_named(&registry, &name, &chain)
        .with_context(|| format!("Failed to import {}", args.file.display()))?;

    println!("{}", tree.name());
    for (depth, id) in tree.walk() {
        let view = tree.view(id)?;
        let line = if view.description.is_empty() {
            view.title.clone()
        } else {
            format!("{}: {}", view.title, view.description)
        };
        println!("{}{}", "  ".repeat(depth + 1), line);
    }

    if args.validate {
        let result = tree.validate();
        println!();
        if result.issues.is_empty() {
            println!("✓ All checks passed");
        }
        for issue in &result.issues {
            let tag = match issue.severity {
                ValidationSeverity::Error => "error",
                ValidationSeverity::Warning => "warning",
                ValidationSeverity::Info => "info",
            };
            println!("{}: {}", tag, issue.message);
        }
    }

    println!();
    let export = export_receipe(&tree)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&export).context("Failed to format receipe")?
    );

    Ok(())
}
