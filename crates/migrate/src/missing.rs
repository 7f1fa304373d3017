use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};

/// Write one identifier per line to a new `missing-files-*.log` in `dir` and
/// keep it for the operator.
pub(crate) async fn write_missing_log(dir: &Path, identifiers: &[String]) -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("missing-files-")
        .suffix(".log")
        .tempfile_in(dir)
        .or_raise(|| ErrorKind::MissingLog)?;
    let (_, path) = file.keep().or_raise(|| ErrorKind::MissingLog)?;
    let mut contents = identifiers.join("\n");
    contents.push('\n');
    tokio::fs::write(&path, contents).await.or_raise(|| ErrorKind::MissingLog)?;
    Ok(path)
}
