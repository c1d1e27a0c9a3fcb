//! Collaborator traits implemented by coordinator and object store adapters.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BackendResult, CoordinatorError, CoordinatorResult};
use crate::layout::LayoutDescriptor;
use crate::model::{
    ActionItem, AttributeMap, Extent, FileId, LeaseHandle, LeaseRequest, Received,
    TransferRequest,
};

/// Local file handed out by the coordinator for the duration of a lease.
#[async_trait]
pub trait DataHandle: Debug + Send + Sync {
    /// Current byte length of the file.
    async fn size(&self) -> io::Result<u64>;

    /// Current placement of the file, `None` when the platform cannot report it.
    async fn layout(&self) -> io::Result<Option<LayoutDescriptor>>;

    /// Read into `buf` starting at `offset`, returning the number of bytes read.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data` at `offset`, returning the number of bytes written.
    async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Create an extended attribute; fails with `EEXIST` when it is already set.
    async fn set_attr_create(&self, name: &str, value: &[u8]) -> io::Result<()>;

    /// Read an extended attribute, `None` when it is not set.
    async fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// HSM coordinator the copytool registers with and receives work from.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Name of the filesystem this coordinator serves.
    fn filesystem_name(&self) -> &str;

    /// Subscribe to action batches for the accepted archive ids (empty accepts all).
    async fn register(&self, archive_ids: &[u32]) -> CoordinatorResult<()>;

    /// Release the batch subscription.
    async fn unregister(&self) -> CoordinatorResult<()>;

    /// Attach an external event sink.
    async fn register_event_sink(&self, path: &Path) -> CoordinatorResult<()>;

    /// Detach an external event sink.
    async fn unregister_event_sink(&self, path: &Path) -> CoordinatorResult<()>;

    /// Block until the next batch or a shutdown request.
    async fn receive_batch(&self) -> CoordinatorResult<Received>;

    /// Acquire the lease for `item`.
    async fn begin_lease(
        &self,
        item: &ActionItem,
        request: LeaseRequest,
    ) -> CoordinatorResult<LeaseHandle>;

    /// Local file to read from (archive) or write into (restore).
    async fn leased_data_handle(&self, lease: &LeaseHandle)
    -> CoordinatorResult<Arc<dyn DataHandle>>;

    /// Identity of the file the lease writes into.
    async fn leased_destination(&self, lease: &LeaseHandle) -> CoordinatorResult<FileId>;

    /// Release the lease and report the outcome; `code` is a positive errno or zero.
    async fn end_lease(
        &self,
        lease: LeaseHandle,
        extent: Extent,
        retry: bool,
        code: i32,
    ) -> CoordinatorResult<()>;

    /// Read an extended attribute of the file with identity `fid`.
    async fn read_file_attr(&self, fid: FileId, name: &str) -> CoordinatorResult<Vec<u8>>;

    /// Metadata target index hosting `fid`.
    async fn mdt_index(&self, fid: FileId) -> CoordinatorResult<i32>;

    /// Resolve a path for `fid`; default implementation reports lack of support.
    async fn fid_to_path(&self, fid: FileId) -> CoordinatorResult<PathBuf> {
        let _ = fid;
        Err(CoordinatorError::Unsupported {
            operation: "fid_to_path",
        })
    }
}

/// Backend object store data is archived into.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object from the request's data handle.
    async fn put(&self, request: &TransferRequest) -> BackendResult<()>;

    /// Read an object into the request's data handle.
    async fn get(&self, request: &TransferRequest) -> BackendResult<()>;

    /// Fetch the attribute map stored with an object.
    async fn get_metadata(&self, request: &TransferRequest) -> BackendResult<AttributeMap>;

    /// Delete an object.
    async fn delete(&self, request: &TransferRequest) -> BackendResult<()>;
}
