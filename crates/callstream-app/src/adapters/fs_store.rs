//! Local filesystem object store.
//!
//! # Design
//! - Input keys are `/`-separated paths relative to `input_root`; output keys
//!   are relative to `output_root`.
//! - Downloads copy into a scratch directory under a UUID-suffixed name so
//!   concurrent downloads of the same key never collide.
//! - Uploads write a sibling temp file and rename it into place.
//! - Metadata checksums are streamed through SHA-256 on the blocking pool.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use callstream_config::StoreSettings;
use callstream_core::{BackendError, BackendErrorKind, BackendResult, ObjectMetadata, ObjectStore};
use chrono::{DateTime, Utc};
use tracing::debug;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{AppError, AppResult};

/// Object store rooted in two local directories.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    input_root: PathBuf,
    output_root: PathBuf,
    scratch_dir: PathBuf,
}

impl FsObjectStore {
    /// Store over `input_root` and `output_root`, downloading into `scratch_dir`.
    ///
    /// The output and scratch directories are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> AppResult<Self> {
        let store = Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            scratch_dir: scratch_dir.into(),
        };
        for dir in [&store.output_root, &store.scratch_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|err| AppError::io("fs_store.create_dir", Some(dir.clone()), err))?;
        }
        Ok(store)
    }

    /// Store described by the configuration; scratch defaults to the system temp dir.
    ///
    /// # Errors
    ///
    /// See [`FsObjectStore::new`].
    pub fn from_settings(settings: &StoreSettings) -> AppResult<Self> {
        let scratch = settings
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("callstream"));
        Self::new(&settings.input_root, &settings.output_root, scratch)
    }

    fn resolve(root: &Path, key: &str, operation: &'static str) -> BackendResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(BackendError::new(
                BackendErrorKind::InvalidRequest,
                operation,
                format!("key escapes the store root: {key}"),
            ));
        }
        Ok(root.join(relative))
    }
}

fn io_error(operation: &'static str, path: &Path, err: &io::Error) -> BackendError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => BackendErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => BackendErrorKind::PermissionDenied,
        io::ErrorKind::InvalidInput => BackendErrorKind::InvalidRequest,
        _ => BackendErrorKind::Transient,
    };
    BackendError::new(kind, operation, format!("{}: {err}", path.display()))
}

fn content_type(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "au" => "audio/basic",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Size and hex SHA-256 of the file at `path`, read in a streaming fashion.
///
/// Blocking; call it from `spawn_blocking`.
pub(crate) fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((size, format!("{:x}", hasher.finalize())))
}

fn collect_keys(root: &Path) -> io::Result<Vec<String>> {
    let mut keys = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let key: Vec<String> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            keys.push(key.join("/"));
        }
    }
    Ok(keys)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let root = self.input_root.clone();
        let listed = tokio::task::spawn_blocking(move || collect_keys(&root))
            .await
            .map_err(|err| BackendError::transient("fs_store.list", err.to_string()))?
            .map_err(|err| io_error("fs_store.list", &self.input_root, &err))?;
        let mut keys: Vec<String> = listed
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str) -> BackendResult<PathBuf> {
        let source = Self::resolve(&self.input_root, key, "fs_store.download")?;
        let name = key.rsplit('/').next().unwrap_or(key);
        let target = self.scratch_dir.join(format!("{}-{name}", Uuid::new_v4()));
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|err| io_error("fs_store.download", &source, &err))?;
        debug!(key, local = %target.display(), "downloaded object");
        Ok(target)
    }

    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> BackendResult<String> {
        let target = Self::resolve(&self.output_root, key, "fs_store.upload")?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error("fs_store.upload", parent, &err))?;
        }
        let staging = target.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, &data)
            .await
            .map_err(|err| io_error("fs_store.upload", &staging, &err))?;
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error("fs_store.upload", &target, &err));
        }
        debug!(key, bytes = data.len(), content_type, "uploaded object");
        Ok(format!("file://{}", target.display()))
    }

    async fn delete_local(&self, path: &Path) -> BackendResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("fs_store.delete_local", path, &err)),
        }
    }

    async fn get_metadata(&self, key: &str) -> BackendResult<ObjectMetadata> {
        let path = Self::resolve(&self.input_root, key, "fs_store.get_metadata")?;
        let info = tokio::fs::metadata(&path)
            .await
            .map_err(|err| io_error("fs_store.get_metadata", &path, &err))?;
        let hashed = path.clone();
        let (_, checksum) = tokio::task::spawn_blocking(move || hash_file(&hashed))
            .await
            .map_err(|err| BackendError::transient("fs_store.get_metadata", err.to_string()))?
            .map_err(|err| io_error("fs_store.get_metadata", &path, &err))?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            size_bytes: info.len(),
            content_type: content_type(key).to_string(),
            created: info.created().ok().map(DateTime::<Utc>::from),
            updated: info.modified().ok().map(DateTime::<Utc>::from),
            checksum: Some(checksum),
        })
    }

    fn uri_for(&self, key: &str) -> String {
        format!(
            "file://{}",
            self.input_root.join(key.trim_start_matches('/')).display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(root: &TempDir) -> AppResult<FsObjectStore> {
        FsObjectStore::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("scratch"),
        )
    }

    #[tokio::test]
    async fn lists_nested_keys_with_prefix() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let calls = root.path().join("in/calls/2024");
        std::fs::create_dir_all(&calls)?;
        std::fs::write(calls.join("merged_b.wav"), b"b")?;
        std::fs::write(calls.join("merged_a.wav"), b"a")?;
        std::fs::write(root.path().join("in/readme.txt"), b"x")?;
        let store = store(&root)?;

        assert_eq!(
            store.list("calls/").await?,
            vec!["calls/2024/merged_a.wav", "calls/2024/merged_b.wav"]
        );
        assert_eq!(store.list("").await?.len(), 3);

        std::fs::create_dir_all(root.path().join("in/calls/empty"))?;
        assert_eq!(store.list("calls/").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn download_metadata_and_cleanup() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        std::fs::create_dir_all(root.path().join("in"))?;
        std::fs::write(root.path().join("in/merged_a.wav"), b"abc")?;
        let store = store(&root)?;

        let first = store.download("merged_a.wav").await?;
        let second = store.download("merged_a.wav").await?;
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first)?, b"abc");

        let metadata = store.get_metadata("merged_a.wav").await?;
        assert_eq!(metadata.size_bytes, 3);
        assert_eq!(metadata.content_type, "audio/wav");
        assert_eq!(
            metadata.checksum.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );

        store.delete_local(&first).await?;
        store.delete_local(&first).await?;
        assert!(!first.exists());

        let missing = store.download("merged_none.wav").await.err();
        assert_eq!(missing.map(|err| err.kind()), Some(BackendErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn upload_writes_atomically_under_output_root() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = store(&root)?;

        let uri = store
            .upload(b"{}".to_vec(), "processed/processed_a.json", "application/json")
            .await?;
        let written = root.path().join("out/processed/processed_a.json");
        assert_eq!(uri, format!("file://{}", written.display()));
        assert_eq!(std::fs::read(&written)?, b"{}");
        assert_eq!(std::fs::read_dir(root.path().join("out/processed"))?.count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = store(&root)?;
        let err = store.upload(Vec::new(), "../escape.json", "application/json").await.err();
        assert_eq!(err.map(|err| err.kind()), Some(BackendErrorKind::InvalidRequest));
        Ok(())
    }

    #[test]
    fn uri_and_content_type() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let store = store(&root)?;
        assert_eq!(
            store.uri_for("calls/a.wav"),
            format!("file://{}", root.path().join("in/calls/a.wav").display())
        );
        assert_eq!(content_type("x.MP3"), "audio/mpeg");
        assert_eq!(content_type("noext"), "application/octet-stream");
        Ok(())
    }
}
