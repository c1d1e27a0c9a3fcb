//! Object store backed by a local directory.
//!
//! # Design
//! - Object data lives in `<root>/objects/<id>`, the attribute record in
//!   `<root>/meta/<id>.json`.
//! - Identifiers are percent-escaped into file names.
//! - Writes go to a temporary file renamed into place once complete.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use copytool_core::{
    AttributeMap, BackendError, BackendResult, DataHandle, ObjectId, ObjectStore,
    StorageFamily, TransferRequest,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{LocalError, LocalResult};

const CHUNK_LEN: usize = 1024 * 1024;
const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";

/// Attribute record stored next to each object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Attribute map supplied at write time.
    pub attrs: AttributeMap,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Storage family requested by the writer.
    #[serde(default)]
    pub family: Option<StorageFamily>,
    /// Named placement requested by the writer.
    #[serde(default)]
    pub layout_name: Option<String>,
    /// Alternate name requested by the writer.
    #[serde(default)]
    pub alias: Option<String>,
    /// Bytes stored.
    pub size: u64,
}

/// Directory-backed [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

fn escape_id(id: &ObjectId) -> String {
    let mut name = String::with_capacity(id.as_str().len());
    for (index, byte) in id.as_str().bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric()
            || matches!(byte, b'_' | b':' | b'-')
            || (byte == b'.' && index > 0);
        if plain {
            name.push(char::from(byte));
        } else {
            let _ = write!(name, "%{byte:02X}");
        }
    }
    name
}

fn require_data(request: &TransferRequest) -> BackendResult<Arc<dyn DataHandle>> {
    request
        .data
        .clone()
        .ok_or_else(|| BackendError::InvalidRequest {
            operation: request.op.as_str(),
            reason: "request carries no data handle",
        })
}

fn not_found(request: &TransferRequest) -> BackendError {
    BackendError::NotFound {
        operation: request.op.as_str(),
        object_id: request.object_id.to_string(),
    }
}

impl LocalObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::Io`] when the store directories cannot be created.
    pub async fn open(root: &Path) -> LocalResult<Self> {
        for dir in [OBJECTS_DIR, META_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|source| LocalError::io("create_dir", path, source))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(escape_id(id))
    }

    fn meta_path(&self, id: &ObjectId) -> PathBuf {
        self.root
            .join(META_DIR)
            .join(format!("{}.json", escape_id(id)))
    }

    fn staging_path(&self, id: &ObjectId, suffix: &str) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!(".{}.{suffix}", escape_id(id)))
    }

    /// Whether an object with identifier `id` exists.
    pub async fn contains(&self, id: &ObjectId) -> bool {
        fs::try_exists(self.data_path(id)).await.unwrap_or(false)
    }

    /// Read the attribute record of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::Io`] when the record cannot be read and
    /// [`LocalError::Metadata`] when it cannot be decoded.
    pub async fn read_meta(&self, id: &ObjectId) -> LocalResult<ObjectMeta> {
        let path = self.meta_path(id);
        let raw = fs::read(&path)
            .await
            .map_err(|source| LocalError::io("read_meta", path.clone(), source))?;
        serde_json::from_slice(&raw).map_err(|source| LocalError::Metadata { path, source })
    }

    async fn write_meta(&self, id: &ObjectId, meta: &ObjectMeta) -> LocalResult<()> {
        let path = self.meta_path(id);
        let staging = self.staging_path(id, "meta");
        let raw = serde_json::to_vec_pretty(meta).map_err(|source| LocalError::Metadata {
            path: path.clone(),
            source,
        })?;
        fs::write(&staging, raw)
            .await
            .map_err(|source| LocalError::io("write_meta", staging.clone(), source))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|source| LocalError::io("rename", path, source))
    }

    async fn copy_in(&self, id: &ObjectId, source: &dyn DataHandle) -> LocalResult<u64> {
        let staging = self.staging_path(id, "data");
        let mut file = fs::File::create(&staging)
            .await
            .map_err(|err| LocalError::io("create", staging.clone(), err))?;
        let mut buf = vec![0; CHUNK_LEN];
        let mut offset = 0_u64;
        loop {
            let read = source
                .read_at(offset, &mut buf)
                .await
                .map_err(|err| LocalError::io("read_source", staging.clone(), err))?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read])
                .await
                .map_err(|err| LocalError::io("write", staging.clone(), err))?;
            offset += read as u64;
        }
        file.sync_all()
            .await
            .map_err(|err| LocalError::io("sync", staging.clone(), err))?;
        let path = self.data_path(id);
        fs::rename(&staging, &path)
            .await
            .map_err(|err| LocalError::io("rename", path, err))?;
        Ok(offset)
    }

    async fn copy_out(&self, id: &ObjectId, destination: &dyn DataHandle) -> LocalResult<u64> {
        let path = self.data_path(id);
        let mut file = fs::File::open(&path)
            .await
            .map_err(|err| LocalError::io("open", path.clone(), err))?;
        let mut buf = vec![0; CHUNK_LEN];
        let mut offset = 0_u64;
        loop {
            let read = file
                .read(&mut buf)
                .await
                .map_err(|err| LocalError::io("read", path.clone(), err))?;
            if read == 0 {
                break;
            }
            let mut written = 0;
            while written < read {
                let count = destination
                    .write_at(offset + written as u64, &buf[written..read])
                    .await
                    .map_err(|err| LocalError::io("write_destination", path.clone(), err))?;
                if count == 0 {
                    return Err(LocalError::io(
                        "write_destination",
                        path,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                written += count;
            }
            offset += read as u64;
        }
        Ok(offset)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, request: &TransferRequest) -> BackendResult<()> {
        let id = &request.object_id;
        let source = require_data(request)?;
        if !request.overwrite && self.contains(id).await {
            return Err(BackendError::AlreadyExists {
                object_id: id.to_string(),
            });
        }
        let size = self
            .copy_in(id, source.as_ref())
            .await
            .map_err(|err| err.into_backend("put"))?;
        let meta = ObjectMeta {
            attrs: request.attrs.clone(),
            tags: request.tags.clone(),
            family: request.family,
            layout_name: request.layout_name.clone(),
            alias: request.alias.clone(),
            size,
        };
        self.write_meta(id, &meta)
            .await
            .map_err(|err| err.into_backend("put"))?;
        debug!(object_id = %id, size, "object stored");
        Ok(())
    }

    async fn get(&self, request: &TransferRequest) -> BackendResult<()> {
        let id = &request.object_id;
        let destination = require_data(request)?;
        match self.copy_out(id, destination.as_ref()).await {
            Ok(size) => {
                debug!(object_id = %id, size, "object retrieved");
                Ok(())
            }
            Err(err) if err.is_not_found() => Err(not_found(request)),
            Err(err) => Err(err.into_backend("get")),
        }
    }

    async fn get_metadata(&self, request: &TransferRequest) -> BackendResult<AttributeMap> {
        match self.read_meta(&request.object_id).await {
            Ok(meta) => Ok(meta.attrs),
            Err(err) if err.is_not_found() => Err(not_found(request)),
            Err(err) => Err(err.into_backend("get_metadata")),
        }
    }

    async fn delete(&self, request: &TransferRequest) -> BackendResult<()> {
        let id = &request.object_id;
        let path = self.data_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(not_found(request));
            }
            Err(err) => return Err(LocalError::io("remove", path, err).into_backend("delete")),
        }
        let meta = self.meta_path(id);
        if let Err(err) = fs::remove_file(&meta).await
            && err.kind() != io::ErrorKind::NotFound
        {
            return Err(LocalError::io("remove", meta, err).into_backend("delete"));
        }
        debug!(object_id = %id, "object deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::LocalFile;
    use copytool_core::TransferOp;

    async fn source_file(dir: &Path, contents: &[u8]) -> anyhow::Result<Arc<dyn DataHandle>> {
        let path = dir.join("source");
        fs::write(&path, contents).await?;
        Ok(Arc::new(LocalFile::open(&path)?))
    }

    fn request(op: TransferOp, id: &str, data: Option<Arc<dyn DataHandle>>) -> TransferRequest {
        let mut request = TransferRequest::new(op, ObjectId::from(id));
        request.data = data;
        request
    }

    #[test]
    fn identifiers_escape_separators_and_leading_dots() {
        assert_eq!(
            escape_id(&ObjectId::from("lustre:0x1:0x2:0x0")),
            "lustre:0x1:0x2:0x0"
        );
        assert_eq!(escape_id(&ObjectId::from("a/b c")), "a%2Fb%20c");
        assert_eq!(escape_id(&ObjectId::from("..")), "%2E.");
    }

    #[tokio::test]
    async fn put_get_and_delete_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::open(&dir.path().join("store")).await?;
        let source = source_file(dir.path(), b"archived bytes").await?;

        let mut put = request(TransferOp::Put, "fs:0x1:0x2:0x0", Some(source));
        put.attrs.set("program", "copytool");
        put.tags = vec!["cold".into()];
        put.overwrite = true;
        store.put(&put).await?;

        let meta = store.read_meta(&put.object_id).await?;
        assert_eq!(meta.size, 14);
        assert_eq!(meta.tags, vec!["cold".to_string()]);

        let attrs = store
            .get_metadata(&request(TransferOp::GetMetadata, "fs:0x1:0x2:0x0", None))
            .await?;
        assert_eq!(attrs.get("program"), Some("copytool"));

        let target_path = dir.path().join("restored");
        let target: Arc<dyn DataHandle> = Arc::new(LocalFile::create(&target_path)?);
        store
            .get(&request(TransferOp::Get, "fs:0x1:0x2:0x0", Some(target)))
            .await?;
        assert_eq!(fs::read(&target_path).await?, b"archived bytes");

        store
            .delete(&request(TransferOp::Delete, "fs:0x1:0x2:0x0", None))
            .await?;
        assert!(!store.contains(&put.object_id).await);
        Ok(())
    }

    #[tokio::test]
    async fn put_without_overwrite_refuses_existing_objects() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::open(dir.path()).await?;
        let source = source_file(dir.path(), b"one").await?;
        let mut put = request(TransferOp::Put, "obj", Some(source));
        store.put(&put).await?;
        put.overwrite = false;
        let err = store.put(&put).await.err();
        assert!(matches!(err, Some(BackendError::AlreadyExists { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::open(dir.path()).await?;
        let err = store
            .delete(&request(TransferOp::Delete, "absent", None))
            .await
            .err();
        assert!(matches!(err, Some(BackendError::NotFound { .. })));
        let err = store
            .get_metadata(&request(TransferOp::GetMetadata, "absent", None))
            .await
            .err();
        assert!(matches!(err, Some(BackendError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn put_requires_a_data_handle() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::open(dir.path()).await?;
        let err = store.put(&request(TransferOp::Put, "obj", None)).await.err();
        assert!(matches!(err, Some(BackendError::InvalidRequest { .. })));
        Ok(())
    }
}
