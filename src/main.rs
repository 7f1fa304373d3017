mod cli;
mod error;
mod setup;

use crate::cli::{Cli, Command, SelectionArgs};
use crate::error::{ErrorKind, Result};
use bucketfs_cache::ListingCache;
use bucketfs_config::{Config, StorageKind};
use bucketfs_migrate::{Catalog, MigrateEvent, MigrateOptions, Mode, Selection, Summary, Window, migrate};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.silent);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(silent: bool) {
    let default = if silent { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Copy { source, target } => {
            let job = Job::new(&config, source, target, Mode::Copy, false);
            job.run(&Selection::new(), true).await
        },
        Command::Move {
            source,
            target,
            yes,
            selection,
            dry_run,
        } => {
            let job = Job::new(&config, source, target, Mode::Move, dry_run);
            job.run(&selection_from(&selection)?, yes).await
        },
        Command::FlushCache { storage } => {
            config.storage(&storage).or_raise(|| ErrorKind::Storage(storage.clone()))?;
            let cache = ListingCache::new(storage.as_str(), setup::store(&config).await);
            cache.flush_all().await;
            tracing::info!(storage = %storage, "Flushed listing cache");
            Ok(ExitCode::SUCCESS)
        },
        Command::Check { storage } => {
            let driver = setup::open(&config, &storage, setup::store(&config).await, false).await?;
            driver.test_connection().await.or_raise(|| ErrorKind::Unreachable(storage.clone()))?;
            tracing::info!(storage = %storage, "Storage is reachable");
            Ok(ExitCode::SUCCESS)
        },
    }
}

fn selection_from(args: &SelectionArgs) -> Result<Selection> {
    let mut selection = Selection::new();
    if let Some(filter) = &args.filter {
        selection = selection.include(filter.as_str());
    }
    if let Some(exclude) = &args.exclude {
        selection = selection.exclude(exclude);
    }
    if let Some(limit) = &args.limit {
        let window: Window = limit.parse::<Window>().or_raise(|| ErrorKind::Limit)?;
        selection = selection.window(window);
    }
    Ok(selection)
}

struct Job<'a> {
    config: &'a Config,
    source: String,
    target: String,
    mode: Mode,
    dry_run: bool,
}

impl<'a> Job<'a> {
    fn new(config: &'a Config, source: String, target: String, mode: Mode, dry_run: bool) -> Self {
        Self {
            config,
            source,
            target,
            mode,
            dry_run,
        }
    }

    fn verb(&self) -> &'static str {
        match self.mode {
            Mode::Copy => "copy",
            Mode::Move => "move",
        }
    }

    async fn run(&self, selection: &Selection, confirmed: bool) -> Result<ExitCode> {
        let target = self.config.storage(&self.target).or_raise(|| ErrorKind::Storage(self.target.clone()))?;
        if target.kind != StorageKind::S3 {
            exn::bail!(ErrorKind::TargetNotS3(self.target.clone()));
        }
        let path = self.config.catalog.as_deref().ok_or_raise(|| ErrorKind::CatalogMissing)?;
        let mut catalog = Catalog::connect(path).await.or_raise(|| ErrorKind::Catalog)?;
        if self.dry_run {
            catalog = catalog.read_only();
        }

        let files = catalog.select(&self.source, selection).await.or_raise(|| ErrorKind::Catalog)?;
        if files.is_empty() {
            tracing::info!(storage = %self.source, "No files found, nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
        tracing::info!(
            files = files.len(),
            source = %self.source,
            target = %self.target,
            dry_run = self.dry_run,
            "About to {} files",
            self.verb()
        );
        if !confirmed && !confirm("Shall I continue?").await? {
            tracing::info!("Aborted");
            return Ok(ExitCode::SUCCESS);
        }

        let store = setup::store(self.config).await;
        let source = setup::open(self.config, &self.source, store.clone(), self.dry_run).await?;
        let target = setup::open(self.config, &self.target, store, self.dry_run).await?;
        let options = MigrateOptions::new(self.mode);

        let mut summary = Summary::default();
        let stream = migrate(&source, &target, &catalog, files, &options);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(MigrateEvent::Started | MigrateEvent::DiscoveryComplete(_)) => {},
                Ok(MigrateEvent::Transferred(identifier)) => {
                    tracing::info!(identifier = %identifier, "{}", if self.mode == Mode::Copy { "Copied" } else { "Moved" });
                },
                Ok(MigrateEvent::Missing(identifier)) => {
                    tracing::warn!(identifier = %identifier, "Missing file");
                },
                Ok(MigrateEvent::Complete(done)) => summary = done,
                Err(err) => tracing::error!(error = ?err, "File failed"),
            }
        }
        catalog.close().await;

        tracing::info!(
            transferred = summary.transferred,
            failed = summary.failed,
            missing = summary.missing.len(),
            "Finished {}",
            self.verb()
        );
        if let Some(log) = &summary.missing_log {
            tracing::warn!(
                "Found {} missing files. A log file has been written at {}",
                summary.missing.len(),
                log.display()
            );
        }
        if summary.failed > 0 {
            exn::bail!(ErrorKind::Migration(summary.failed));
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Ask a yes/no question on the terminal; an empty answer means yes.
async fn confirm(question: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{question} [Y/n] ").as_bytes()).await.or_raise(|| ErrorKind::Prompt)?;
    stdout.flush().await.or_raise(|| ErrorKind::Prompt)?;
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut answer).await.or_raise(|| ErrorKind::Prompt)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
