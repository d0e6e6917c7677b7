//! # Disk Cache Layout

use crate::errors::{EyeballError, Result};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, remove_file};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// Where cached resources live.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Directory name under `~/.cache`.
    #[config(default = "\"eyeballer\".to_string()")]
    pub root_cache_key: String,

    /// Absolute root override; takes precedence over `root_cache_key`.
    #[config(default = "None")]
    pub root_dir: Option<PathBuf>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// The base cache directory; not created.
    pub fn base_cache_dir(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root_dir {
            return Ok(root.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            EyeballError::InvalidConfig(
                "no home directory; set the cache `root_dir` explicitly".to_string(),
            )
        })?;
        Ok(home.join(".cache").join(&self.root_cache_key))
    }

    /// Map a resource key to a cache path; nothing is created.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(path, |acc, s| acc.join(s)))
    }

    /// Map a resource key to a cache path, creating its parent directory.
    pub fn ensure_resource_parent_dir(
        &self,
        resource_key: &[String],
    ) -> Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Read-through fetch of a URL into the cache.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource: &[String],
    ) -> Result<PathBuf> {
        let cache_file_path = self.ensure_resource_parent_dir(resource)?;
        try_cache_download_to_path(url, cache_file_path)
    }
}

/// Download `url` to `cache_file_path` unless it already exists.
///
/// Returns the cache path.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
) -> Result<PathBuf> {
    if cache_file_path.exists() {
        tracing::debug!(path = %cache_file_path.display(), "cache hit");
        return Ok(cache_file_path);
    }

    let file_name = cache_file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| url.to_string());

    tracing::info!(url, "downloading pretrained weights");
    let bytes = download_bytes(url, &file_name)?;

    let mut output_file = File::create(&cache_file_path)?;
    if let Err(err) = output_file.write_all(&bytes) {
        remove_file(&cache_file_path)?;
        return Err(err.into());
    }

    Ok(cache_file_path)
}

/// Fetch `url` into memory.
///
/// The burn downloader panics on network and HTTP failures; those are
/// reported here as [`EyeballError::Pretrained`].
fn download_bytes(
    url: &str,
    file_name: &str,
) -> Result<Vec<u8>> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        downloader::download_file_as_bytes(url, file_name)
    }))
    .map_err(|payload| {
        let detail = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("download failed");
        EyeballError::Pretrained {
            name: file_name.to_string(),
            reason: format!(
                "unable to download {url}: {detail}; check network access or pass --weights"
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCacheConfig::new().with_root_dir(Some(dir.path().to_path_buf()));

        let key = vec!["weights".to_string(), "a.pth".to_string()];
        let path = cache.resource_to_path(&key).unwrap();
        assert_eq!(path, dir.path().join("weights").join("a.pth"));
        assert!(!path.parent().unwrap().exists());

        cache.ensure_resource_parent_dir(&key).unwrap();
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn test_existing_file_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.pth");
        std::fs::write(&path, b"weights").unwrap();

        let result = try_cache_download_to_path("http://invalid.invalid/cached.pth", path.clone())
            .unwrap();
        assert_eq!(result, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    }

    #[test]
    fn test_unreachable_download_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.pth");

        let err = try_cache_download_to_path("http://127.0.0.1:9/missing.pth", path.clone())
            .unwrap_err();
        match err {
            EyeballError::Pretrained { name, reason } => {
                assert_eq!(name, "missing.pth");
                assert!(reason.contains("127.0.0.1:9"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }
}
