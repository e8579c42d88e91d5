// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Opaque blob storage for uploaded file bytes.
//!
//! The core only needs `put`/`get`/`exists` keyed by a generated reference;
//! the filesystem implementation below is the default backend.

use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Content store keyed by a generated opaque reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning a fresh unique reference.
    async fn put(&self, extension: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch bytes by reference; `None` when the blob is missing.
    async fn get(&self, blob_ref: &str) -> Result<Option<Vec<u8>>>;

    /// Whether a reference resolves to stored bytes.
    async fn exists(&self, blob_ref: &str) -> Result<bool>;
}

/// Filesystem-backed blob store rooted at a data directory.
///
/// References are `{uuid}.{extension}` so they never collide and keep
/// enough shape for a download filename.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`; the directory is created lazily on
    /// first `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference to a path, rejecting anything that could escape
    /// the root.
    fn resolve(&self, blob_ref: &str) -> Result<PathBuf> {
        if blob_ref.is_empty()
            || blob_ref.contains('/')
            || blob_ref.contains('\\')
            || blob_ref.contains("..")
        {
            return Err(Error::InvalidInput("malformed blob reference".into()));
        }
        Ok(self.root.join(blob_ref))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, extension: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let blob_ref = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::write(self.root.join(&blob_ref), bytes).await?;
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool> {
        let path = self.resolve(blob_ref)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}
