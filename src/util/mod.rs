mod docker;

pub use docker::DockerCommand;

use anyhow::Result;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub fn ask_for_confirm(msg: &str) -> Result<bool> {
    println!("{} (Yes/No)", msg);
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(["y", "yes"].contains(&buf.trim().to_lowercase().as_str()))
}

/// Write `content` to the first of `candidates` that does not exist yet.
///
/// The content is written to a temporary file in `dir` and linked into
/// place, a candidate path either holds the full content or is absent.
/// Every candidate must live in `dir`. Returns `None` when all candidates
/// already exist.
pub fn persist_new<I>(dir: &Path, content: &[u8], candidates: I) -> io::Result<Option<PathBuf>>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    for path in candidates {
        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok(Some(path)),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => tmp = err.file,
            Err(err) => return Err(err.error),
        }
    }
    Ok(None)
}

/// Copy the files of `from` into `to`, skipping top level entries named in
/// `exclude`.
pub fn copy_dir_excluding(from: &Path, to: &Path, exclude: &[&str]) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|excluded| name == *excluded) {
            continue;
        }
        let target = to.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_excluding(&entry.path(), &target, &[])?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
