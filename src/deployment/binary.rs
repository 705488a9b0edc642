//! Locate contract binaries to deploy.

use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cells bigger than this do not fit in a block.
pub const MAX_BINARY_SIZE: u64 = 500 * 1024;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("target {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("target {} is neither a file nor a directory", .0.display())]
    Unsupported(PathBuf),
    #[error("no contract binary found in {}", .0.display())]
    NoBinaries(PathBuf),
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// File name of the binary.
    pub name: String,
}

impl BinaryArtifact {
    fn from_path(path: PathBuf) -> Result<Self, DiscoveryError> {
        let size = fs::metadata(&path)
            .map_err(|source| DiscoveryError::Io {
                path: path.clone(),
                source,
            })?
            .len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(BinaryArtifact { path, size, name })
    }

    pub fn read(&self) -> Result<Vec<u8>, DiscoveryError> {
        fs::read(&self.path).map_err(|source| DiscoveryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Split of discovered artifacts into the deployable and the skipped ones.
#[derive(Debug, Default)]
pub struct Classified {
    pub deployable: Vec<BinaryArtifact>,
    /// Skipped artifacts with the reason.
    pub skipped: Vec<(BinaryArtifact, String)>,
}

pub fn is_binary(content: &[u8]) -> bool {
    content.iter().any(|b| *b > 127)
}

fn is_binary_file(path: &Path) -> Result<bool, DiscoveryError> {
    let content = fs::read(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(is_binary(&content))
}

/// Binaries at `target`: the file itself, or the binary files directly inside
/// the directory ordered by name.
pub fn discover(target: &Path) -> Result<Vec<BinaryArtifact>, DiscoveryError> {
    if !target.exists() {
        return Err(DiscoveryError::NotFound(target.to_path_buf()));
    }
    if target.is_file() {
        if !is_binary_file(target)? {
            warn!(
                "{} looks like a text file, deploying it anyway",
                target.display()
            );
        }
        return Ok(vec![BinaryArtifact::from_path(target.to_path_buf())?]);
    }
    if !target.is_dir() {
        return Err(DiscoveryError::Unsupported(target.to_path_buf()));
    }

    let io_err = |source| DiscoveryError::Io {
        path: target.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(target).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && is_binary_file(&path)? {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(DiscoveryError::NoBinaries(target.to_path_buf()));
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    paths.into_iter().map(BinaryArtifact::from_path).collect()
}

/// Drop artifacts over [`MAX_BINARY_SIZE`], each one is logged.
pub fn classify(artifacts: Vec<BinaryArtifact>) -> Classified {
    let mut classified = Classified::default();
    for artifact in artifacts {
        if artifact.size > MAX_BINARY_SIZE {
            let reason = format!(
                "{} is too large ({} bytes, limit {} bytes), skipped",
                artifact.name, artifact.size, MAX_BINARY_SIZE
            );
            warn!("{}", reason);
            classified.skipped.push((artifact, reason));
        } else {
            classified.deployable.push(artifact);
        }
    }
    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elf(size: usize) -> Vec<u8> {
        let mut content = vec![0x7f, b'E', b'L', b'F', 0xff];
        content.resize(size, 0);
        content
    }

    #[test]
    fn test_discover_directory_skips_text_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b-contract"), elf(64)).unwrap();
        fs::write(dir.path().join("a-contract"), elf(32)).unwrap();
        fs::write(dir.path().join("README.md"), "# notes").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c-contract"), elf(8)).unwrap();

        let artifacts = discover(dir.path()).unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a-contract", "b-contract"]);
        assert_eq!(artifacts[0].size, 32);
    }

    #[test]
    fn test_discover_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = discover(&missing).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
        assert!(err.to_string().contains("missing"));

        fs::write(dir.path().join("notes.txt"), "plain text").unwrap();
        assert!(matches!(
            discover(dir.path()),
            Err(DiscoveryError::NoBinaries(_))
        ));
    }

    #[test]
    fn test_explicit_text_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.lua");
        fs::write(&path, "print('hi')").unwrap();
        let artifacts = discover(&path).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "script.lua");
    }

    #[test]
    fn test_classify_by_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small"), elf(400 * 1024)).unwrap();
        fs::write(dir.path().join("big"), elf(600 * 1024)).unwrap();
        let classified = classify(discover(dir.path()).unwrap());
        assert_eq!(classified.deployable.len(), 1);
        assert_eq!(classified.deployable[0].name, "small");
        assert_eq!(classified.skipped.len(), 1);
        let (artifact, reason) = &classified.skipped[0];
        assert_eq!(artifact.name, "big");
        assert!(reason.contains("big"));
        assert!(reason.contains("614400"));
        assert!(reason.contains("too large"));
    }
}
