//! Command-line surface: add, run, status, cancel.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sluice_core::config;
use sluice_core::engine::{CancelOutcome, Engine};
use sluice_core::manifest::{JobId, ManifestStore};

use crate::http_source::HttpSource;

#[derive(Debug, Parser)]
#[command(name = "sluice")]
#[command(about = "sluice: chunked remote-media transfer engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue a new transfer. Use `run` to execute queued transfers.
    Add {
        /// Source locator (HTTP/HTTPS URL).
        locator: String,

        /// Artifact filename on the archive volume; derived from the locator
        /// when omitted.
        #[arg(long)]
        name: Option<String>,

        /// Per-job cap on concurrent part fetches.
        #[arg(long)]
        workers: Option<i64>,
    },

    /// Run all queued and interrupted transfers to completion.
    Run,

    /// Show all jobs, or one job in part-level detail.
    Status {
        /// Job identifier.
        id: Option<JobId>,
    },

    /// Cancel a job and discard its scratch state.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Forget a finished job (its archive artifact is kept).
    Remove {
        /// Job identifier.
        id: JobId,
    },
}

pub async fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_or_init()?;
    tracing::debug!("loaded config: {:?}", cfg);

    let store = ManifestStore::open_default().await?;
    let engine = Engine::new(cfg.clone(), store.clone(), Arc::new(HttpSource::new()?));

    match cli.command {
        Command::Add {
            locator,
            name,
            workers,
        } => {
            let target = name.unwrap_or_else(|| derive_name(&locator));
            let id = store
                .add_job(&locator, &target, cfg.part_size as i64, workers)
                .await?;
            println!("queued job {id}: {locator} -> {target}");
        }
        Command::Run => {
            let resumed = engine.recover().await?;
            tracing::info!(jobs = resumed, "processing");
            while engine.active_jobs() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            print_job_table(&engine).await?;
        }
        Command::Status { id: Some(id) } => {
            let status = engine.status(id).await?;
            let total = status
                .bytes_total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".into());
            println!(
                "job {}: {} [{}] {}/{} bytes",
                status.id,
                status.target_name,
                status.state.as_str(),
                status.bytes_done,
                total
            );
            if let Some(error) = &status.error {
                println!("  error: {error}");
            }
            for part in &status.parts {
                println!(
                    "  part {:>5} [{:>9}] {}/{} bytes",
                    part.index,
                    part.state.as_str(),
                    part.bytes_done,
                    part.length
                );
            }
        }
        Command::Status { id: None } => print_job_table(&engine).await?,
        Command::Cancel { id } => match engine.cancel(id).await? {
            CancelOutcome::Cancelled => println!("job {id} cancelled"),
            CancelOutcome::NoOp => println!("job {id} already finished; nothing to do"),
        },
        Command::Remove { id } => {
            engine.remove(id).await?;
            println!("job {id} removed");
        }
    }

    Ok(())
}

async fn print_job_table(engine: &Engine) -> Result<()> {
    let jobs = engine.list_jobs().await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    println!("{:>5}  {:<12}  {:>14}  {}", "id", "state", "size", "target");
    for job in jobs {
        let size = job
            .total_size
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".into());
        println!(
            "{:>5}  {:<12}  {:>14}  {}",
            job.id,
            job.state.as_str(),
            size,
            job.target_name
        );
    }
    Ok(())
}

/// Derive an artifact name from the locator's last path segment.
fn derive_name(locator: &str) -> String {
    let tail = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    if tail.is_empty() {
        "download.bin".to_string()
    } else {
        tail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn derive_name_from_url() {
        assert_eq!(
            derive_name("https://host/media/show.s01e01.mkv"),
            "show.s01e01.mkv"
        );
        assert_eq!(derive_name("https://host/file.bin?token=abc"), "file.bin");
        assert_eq!(derive_name("https://host/dir/"), "dir");
        assert_eq!(derive_name("https://host/"), "host");
    }

    #[test]
    fn derive_name_fallback() {
        assert_eq!(derive_name(""), "download.bin");
        assert_eq!(derive_name("///"), "download.bin");
    }
}
