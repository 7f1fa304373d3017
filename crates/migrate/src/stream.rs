use crate::catalog::{Catalog, CatalogFile};
use crate::error::{ErrorKind, Result};
use crate::missing::write_missing_log;
use async_stream::stream;
use bucketfs_driver::Driver;
use bucketfs_storage::path::{basename, parent_folder};
use exn::ResultExt;
use futures::Stream;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Add each file to the target; the source and the catalog stay as they
    /// are.
    #[default]
    Copy,
    /// Upload each file to the same identifier on the target, point its
    /// catalog row at the target, then delete the source.
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateOptions {
    pub mode: Mode,
    /// Where the missing files log is written.
    pub log_dir: PathBuf,
}
impl MigrateOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            log_dir: std::env::temp_dir(),
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub transferred: u64,
    pub failed: u64,
    /// Catalogued identifiers the source storage does not have.
    pub missing: Vec<String>,
    /// Log listing [`missing`](Self::missing), when there were any and it
    /// could be written.
    pub missing_log: Option<PathBuf>,
}

/// Progress events emitted by [`migrate`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete), exactly once, with the
///    number of files to process.
/// 3. [`Transferred`](Self::Transferred) or [`Missing`](Self::Missing), once
///    per file that did not fail.
/// 4. [`Complete`](Self::Complete), exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateEvent {
    Started,
    DiscoveryComplete(u64),
    Transferred(String),
    Missing(String),
    Complete(Summary),
}

enum Outcome {
    Transferred(String),
    Missing(String),
}

/// Streams [`MigrateEvent`]s while copying or moving `files` from `source`
/// to `target`.
///
/// Files are processed one at a time, in order. A file that fails is yielded
/// as an `Err` item and the stream carries on with the next one. On a move,
/// the source file is only deleted once the upload and the catalog update
/// both succeeded.
pub fn migrate<'a>(
    source: &'a Driver,
    target: &'a Driver,
    catalog: &'a Catalog,
    files: Vec<CatalogFile>,
    options: &'a MigrateOptions,
) -> impl Stream<Item = Result<MigrateEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(MigrateEvent::Started);
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield Ok(MigrateEvent::DiscoveryComplete(u64::try_from(files.len()).unwrap_or(0)));
        tracing::info!(
            source = %source.scope(),
            target = %target.scope(),
            mode = ?options.mode,
            files = files.len(),
            "Starting migration"
        );

        let mut summary = Summary::default();
        let mut folders = HashSet::new();
        for file in files {
            match migrate_file(source, target, catalog, &file, options.mode, &mut folders).await {
                Ok(Outcome::Transferred(identifier)) => {
                    summary.transferred += 1;
                    yield Ok(MigrateEvent::Transferred(identifier));
                },
                Ok(Outcome::Missing(identifier)) => {
                    summary.missing.push(identifier.clone());
                    yield Ok(MigrateEvent::Missing(identifier));
                },
                Err(err) => {
                    summary.failed += 1;
                    yield Err(err);
                },
            }
        }

        if options.mode == Mode::Copy {
            target.flush_cache().await;
        }
        if !summary.missing.is_empty() {
            match write_missing_log(&options.log_dir, &summary.missing).await {
                Ok(path) => {
                    tracing::warn!(count = summary.missing.len(), log = %path.display(), "Source files were missing");
                    summary.missing_log = Some(path);
                },
                Err(err) => {
                    yield Err(err);
                },
            }
        }
        tracing::info!(transferred = summary.transferred, failed = summary.failed, "Migration finished");
        yield Ok(MigrateEvent::Complete(summary));
    })
}

async fn migrate_file(
    source: &Driver,
    target: &Driver,
    catalog: &Catalog,
    file: &CatalogFile,
    mode: Mode,
    folders: &mut HashSet<String>,
) -> Result<Outcome> {
    let identifier = file.identifier.as_str();
    if !source.file_exists(identifier).await.or_raise(|| ErrorKind::Source)? {
        tracing::warn!(storage = %source.scope(), identifier, "Catalogued file is missing from source");
        return Ok(Outcome::Missing(identifier.to_string()));
    }

    let folder = parent_folder(identifier);
    if !folders.contains(&folder) {
        target.ensure_folder(&folder).await.or_raise(|| ErrorKind::Target)?;
        folders.insert(folder.clone());
    }

    let data = source.get_file_contents(identifier).await.or_raise(|| ErrorKind::Source)?;
    match mode {
        Mode::Copy => {
            target.add_file(&data, &folder, basename(identifier)).await.or_raise(|| ErrorKind::Target)?;
        },
        Mode::Move => {
            target.upload_file(identifier, &data).await.or_raise(|| ErrorKind::Target)?;
            catalog.reassign(file.uid, target.scope()).await?;
            source.delete_file(identifier).await.or_raise(|| ErrorKind::Source)?;
        },
    }
    Ok(Outcome::Transferred(identifier.to_string()))
}
