//! nbstore CLI entry point.
//!
//! Inspects and operates on notebooks through the same storage layer an
//! editor would use, so unsaved edits recorded by a crashed session are
//! visible here too.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;

use notebook_storage::config::load_config;
use notebook_storage::export::export_notebook;
use notebook_storage::interpreter::PythonCommand;
use notebook_storage::{
    DocumentRegistry, ExportFormat, NotebookEdit, NotebookResource, StorageContext,
};

#[derive(Parser, Debug)]
#[command(name = "nbstore")]
#[command(about = "Notebook storage and unsaved-edit recovery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: <config dir>/nbstore/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print unsaved contents recorded for a notebook, if any
    Recover {
        path: PathBuf,
    },

    /// Clear every output and execution count, then save
    ClearOutputs {
        path: PathBuf,
    },

    /// Export a notebook, including any unsaved edits
    Export {
        path: PathBuf,

        /// Output format (ipynb, python)
        #[arg(long, default_value = "ipynb")]
        format: String,

        /// Write here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = load_config(cli.config.as_deref());
    let interpreter = Arc::new(match &config.python {
        Some(program) => PythonCommand::new(program),
        None => PythonCommand::default(),
    });
    let registry = DocumentRegistry::new(StorageContext::from_config(config, interpreter));

    match cli.command {
        Commands::Recover { path } => {
            let resource = NotebookResource::file(absolute(path)?);
            match registry
                .context()
                .recovery
                .peek_contents(&resource)
                .await
            {
                Some(contents) => println!("{}", contents),
                None => info!("No unsaved contents for {}", resource),
            }
        }
        Commands::ClearOutputs { path } => {
            let resource = NotebookResource::file(absolute(path)?);
            let handle = registry
                .open(resource.clone(), None)
                .await
                .with_context(|| format!("Failed to open {}", resource))?;
            handle.apply(NotebookEdit::ClearAllOutputs).await?;
            handle.save().await?;
            // The runtime stops at exit; make sure the stale snapshot is gone first
            handle.flush_backup().await?;
            info!("Cleared outputs in {}", resource);
        }
        Commands::Export {
            path,
            format,
            output,
        } => {
            let format: ExportFormat = format.parse()?;
            let resource = NotebookResource::file(absolute(path)?);
            let handle = registry
                .open(resource.clone(), None)
                .await
                .with_context(|| format!("Failed to open {}", resource))?;
            let text = export_notebook(&handle, format).await?;
            match output {
                Some(out) => {
                    std::fs::write(&out, text)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                    info!("Exported {} as {} to {}", resource, format, out.display());
                }
                None => println!("{}", text),
            }
        }
    }

    Ok(())
}

/// Storage keys embed the path, so relative paths must be resolved first.
fn absolute(path: PathBuf) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}
