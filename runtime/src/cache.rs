//! Content-addressed artifact cache.
//!
//! Artifacts live in one flat directory, named `{entry}_{key}.{ext}`. The
//! file name is the index: a lookup is an existence check and there is no
//! manifest, locking or eviction. Artifacts only ever appear through an atomic
//! rename from a scratch location in the same directory, so a reader that sees
//! the canonical path sees a complete file.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use snafu::ResultExt;

use crate::backend::BackendKind;
use crate::error::{CacheWriteSnafu, Result};

/// Hex SHA-256 over the entry name and the exact (post-processed) source bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(entry: &str, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entry.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the toolchain produces for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    SharedLibrary,
    Executable,
}

impl ArtifactKind {
    /// File extension, without the dot.
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            ArtifactKind::SharedLibrary => Some("so"),
            ArtifactKind::Executable => None,
        }
    }
}

/// Deterministic file locations for one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Generated source, kept for debugging.
    pub source: PathBuf,
    pub artifact: PathBuf,
    /// Interface header, for backends that emit one.
    pub header: PathBuf,
}

impl ArtifactPaths {
    fn new(dir: &Path, entry: &str, key: &CacheKey, kind: ArtifactKind) -> Self {
        let stem = format!("{entry}_{key}");
        let artifact = match kind.extension() {
            Some(ext) => dir.join(format!("{stem}.{ext}")),
            None => dir.join(&stem),
        };
        Self { source: dir.join(format!("{stem}.c")), artifact, header: dir.join(format!("{stem}.h")) }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub key: CacheKey,
    pub paths: ArtifactPaths,
    /// Set when the artifact is already on disk.
    pub existing: Option<PathBuf>,
}

impl Resolution {
    pub fn is_hit(&self) -> bool {
        self.existing.is_some()
    }
}

/// A prepared artifact: where it is and what to call in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub key: CacheKey,
    pub path: PathBuf,
    pub backend: BackendKind,
    /// Symbol actually exported by the artifact.
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(CacheWriteSnafu { path: dir.clone() })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn resolve(&self, entry: &str, source: &str, kind: ArtifactKind) -> Resolution {
        let key = CacheKey::new(entry, source);
        let paths = ArtifactPaths::new(&self.dir, entry, &key, kind);
        let existing = paths.artifact.is_file().then(|| paths.artifact.clone());
        tracing::debug!(kernel.entry = %entry, cache.key = %key, cache.hit = existing.is_some(), "resolved artifact");
        Resolution { key, paths, existing }
    }

    /// Write the generated source next to its artifact.
    pub fn write_source(&self, paths: &ArtifactPaths, source: &str) -> Result<()> {
        let path = &paths.source;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir).context(CacheWriteSnafu { path: path.clone() })?;
        file.write_all(source.as_bytes()).context(CacheWriteSnafu { path: path.clone() })?;
        file.persist(path).map_err(|e| e.error).context(CacheWriteSnafu { path: path.clone() })?;
        Ok(())
    }

    /// Run `build` against a scratch output path, then rename the result to `dest`.
    ///
    /// Nothing appears at `dest` unless `build` succeeds.
    pub fn persist_artifact<F>(&self, dest: &Path, build: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let scratch = tempfile::Builder::new()
            .prefix(".build-")
            .tempdir_in(&self.dir)
            .context(CacheWriteSnafu { path: self.dir.clone() })?;
        let file_name = dest.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("artifact"));
        let output = scratch.path().join(file_name);

        build(&output)?;

        fs::rename(&output, dest).context(CacheWriteSnafu { path: dest.to_path_buf() })?;
        tracing::debug!(path = %dest.display(), "persisted artifact");
        Ok(())
    }
}
