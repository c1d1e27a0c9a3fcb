//! In-memory collaborators with call recording and failure injection.

use std::collections::{HashMap, VecDeque};
use std::future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use copytool_core::{
    ActionBatch, ActionItem, ActionKind, AttributeMap, BackendError, BackendResult, Coordinator,
    CoordinatorError, CoordinatorResult, DataHandle, Extent, FileId, LayoutDescriptor,
    LeaseHandle, LeaseRequest, ObjectId, ObjectStore, Received, StorageFamily, TransferOp,
    TransferRequest,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure to inject into a mocked collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Timeout-class failure.
    Timeout,
    /// Cancellation (coordinator only; backends report it as a raw code).
    Canceled,
    /// Missing target.
    NotFound,
    /// Raw signed result code.
    Code(i32),
}

impl Failure {
    fn coordinator(self, operation: &'static str) -> CoordinatorError {
        match self {
            Self::Timeout => CoordinatorError::Timeout { operation },
            Self::Canceled => CoordinatorError::Canceled { operation },
            Self::NotFound => CoordinatorError::NotFound {
                operation,
                target: "scripted".into(),
            },
            Self::Code(code) => CoordinatorError::Rejected { operation, code },
        }
    }

    fn backend(self, operation: &'static str, object_id: &ObjectId) -> BackendError {
        match self {
            Self::Timeout => BackendError::Timeout {
                operation,
                object_id: object_id.to_string(),
            },
            Self::NotFound => BackendError::NotFound {
                operation,
                object_id: object_id.to_string(),
            },
            Self::Canceled => BackendError::Rejected {
                operation,
                code: -125,
            },
            Self::Code(code) => BackendError::Rejected { operation, code },
        }
    }
}

/// File held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
    attrs: Mutex<HashMap<String, Vec<u8>>>,
    layout: Mutex<Option<LayoutDescriptor>>,
    fail_set_attr: AtomicBool,
}

impl MemoryFile {
    /// File with the given contents.
    #[must_use]
    pub fn with_data(data: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data.into()),
            ..Self::default()
        })
    }

    /// Report `layout` as the file's current placement.
    pub fn set_layout(&self, layout: LayoutDescriptor) {
        *lock(&self.layout) = Some(layout);
    }

    /// Preset an extended attribute.
    pub fn insert_attr(&self, name: &str, value: &[u8]) {
        lock(&self.attrs).insert(name.to_string(), value.to_vec());
    }

    /// Make attribute creation fail.
    pub fn fail_attribute_writes(&self) {
        self.fail_set_attr.store(true, Ordering::SeqCst);
    }

    /// Current contents.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Current value of an extended attribute.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.attrs).get(name).cloned()
    }
}

#[async_trait]
impl DataHandle for MemoryFile {
    async fn size(&self) -> io::Result<u64> {
        Ok(lock(&self.data).len() as u64)
    }

    async fn layout(&self) -> io::Result<Option<LayoutDescriptor>> {
        Ok(lock(&self.layout).clone())
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = lock(&self.data);
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> io::Result<usize> {
        let mut data = lock(&self.data);
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    async fn set_attr_create(&self, name: &str, value: &[u8]) -> io::Result<()> {
        if self.fail_set_attr.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(95));
        }
        let mut attrs = lock(&self.attrs);
        if attrs.contains_key(name) {
            return Err(io::Error::from_raw_os_error(17));
        }
        attrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(lock(&self.attrs).get(name).cloned())
    }
}

/// Call observed by [`ScriptedCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorCall {
    /// `register`.
    Register(Vec<u32>),
    /// `unregister`.
    Unregister,
    /// `register_event_sink`.
    RegisterSink(PathBuf),
    /// `unregister_event_sink`.
    UnregisterSink(PathBuf),
    /// `begin_lease`.
    BeginLease {
        /// Item cookie.
        cookie: u64,
        /// Lease parameters.
        request: LeaseRequest,
    },
    /// `end_lease`.
    EndLease {
        /// Item cookie.
        cookie: u64,
        /// Extent reported.
        extent: Extent,
        /// Retry flag.
        retry: bool,
        /// Result code.
        code: i32,
    },
    /// `read_file_attr`.
    ReadAttr {
        /// File read.
        fid: FileId,
        /// Attribute name.
        name: String,
    },
    /// `mdt_index`.
    MdtIndex(FileId),
    /// `fid_to_path`.
    FidToPath(FileId),
}

#[derive(Debug, Default)]
struct CoordinatorScript {
    begin_lease: Option<Failure>,
    end_lease: Option<Failure>,
    mdt_index: Option<Failure>,
    fid_to_path: Option<Failure>,
}

/// Coordinator replaying scripted batches and recording every call.
#[derive(Debug)]
pub struct ScriptedCoordinator {
    fs_name: String,
    receives: Mutex<VecDeque<CoordinatorResult<Received>>>,
    hang_when_drained: bool,
    files: Mutex<HashMap<FileId, Arc<MemoryFile>>>,
    leases: Mutex<HashMap<u64, ActionItem>>,
    volatile: Mutex<HashMap<u64, Arc<MemoryFile>>>,
    script: Mutex<CoordinatorScript>,
    calls: Mutex<Vec<CoordinatorCall>>,
    next_token: AtomicU64,
}

impl ScriptedCoordinator {
    /// Coordinator for `fs_name` with nothing scripted; receiving yields shutdown.
    #[must_use]
    pub fn new(fs_name: &str) -> Self {
        Self {
            fs_name: fs_name.to_string(),
            receives: Mutex::new(VecDeque::new()),
            hang_when_drained: false,
            files: Mutex::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            volatile: Mutex::new(HashMap::new()),
            script: Mutex::new(CoordinatorScript::default()),
            calls: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Block forever instead of reporting shutdown once the script is drained.
    #[must_use]
    pub const fn hang_when_drained(mut self) -> Self {
        self.hang_when_drained = true;
        self
    }

    /// Queue a batch.
    pub fn push_batch(&self, batch: ActionBatch) {
        lock(&self.receives).push_back(Ok(Received::Batch(batch)));
    }

    /// Queue a receive failure.
    pub fn push_receive_error(&self, failure: Failure) {
        lock(&self.receives).push_back(Err(failure.coordinator("receive_batch")));
    }

    /// Queue a shutdown request.
    pub fn push_shutdown(&self) {
        lock(&self.receives).push_back(Ok(Received::Shutdown));
    }

    /// Register the file served for `fid`.
    pub fn insert_file(&self, fid: FileId, file: Arc<MemoryFile>) {
        lock(&self.files).insert(fid, file);
    }

    /// Make every `begin_lease` fail.
    pub fn fail_begin_lease(&self, failure: Failure) {
        lock(&self.script).begin_lease = Some(failure);
    }

    /// Make every `end_lease` fail.
    pub fn fail_end_lease(&self, failure: Failure) {
        lock(&self.script).end_lease = Some(failure);
    }

    /// Make every `mdt_index` fail.
    pub fn fail_mdt_index(&self, failure: Failure) {
        lock(&self.script).mdt_index = Some(failure);
    }

    /// Make every `fid_to_path` fail.
    pub fn fail_fid_to_path(&self, failure: Failure) {
        lock(&self.script).fid_to_path = Some(failure);
    }

    /// Calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CoordinatorCall> {
        lock(&self.calls).clone()
    }

    /// `end_lease` calls observed so far.
    #[must_use]
    pub fn end_leases(&self) -> Vec<CoordinatorCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, CoordinatorCall::EndLease { .. }))
            .collect()
    }

    /// Volatile file created for the restore lease of `cookie`.
    #[must_use]
    pub fn restored_file(&self, cookie: u64) -> Option<Arc<MemoryFile>> {
        lock(&self.volatile).get(&cookie).cloned()
    }

    /// Wait until at least `count` leases were released, or `limit` elapsed.
    pub async fn wait_for_end_leases(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.end_leases().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, call: CoordinatorCall) {
        lock(&self.calls).push(call);
    }

    fn file(&self, fid: FileId) -> Arc<MemoryFile> {
        lock(&self.files)
            .entry(fid)
            .or_insert_with(|| Arc::new(MemoryFile::default()))
            .clone()
    }

    fn leased_item(&self, lease: &LeaseHandle) -> CoordinatorResult<ActionItem> {
        lock(&self.leases)
            .get(&lease.token())
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                operation: "lease",
                target: lease.token().to_string(),
            })
    }
}

#[async_trait]
impl Coordinator for ScriptedCoordinator {
    fn filesystem_name(&self) -> &str {
        &self.fs_name
    }

    async fn register(&self, archive_ids: &[u32]) -> CoordinatorResult<()> {
        self.record(CoordinatorCall::Register(archive_ids.to_vec()));
        Ok(())
    }

    async fn unregister(&self) -> CoordinatorResult<()> {
        self.record(CoordinatorCall::Unregister);
        Ok(())
    }

    async fn register_event_sink(&self, path: &Path) -> CoordinatorResult<()> {
        self.record(CoordinatorCall::RegisterSink(path.to_path_buf()));
        Ok(())
    }

    async fn unregister_event_sink(&self, path: &Path) -> CoordinatorResult<()> {
        self.record(CoordinatorCall::UnregisterSink(path.to_path_buf()));
        Ok(())
    }

    async fn receive_batch(&self) -> CoordinatorResult<Received> {
        let next = lock(&self.receives).pop_front();
        match next {
            Some(result) => result,
            None if self.hang_when_drained => future::pending().await,
            None => Ok(Received::Shutdown),
        }
    }

    async fn begin_lease(
        &self,
        item: &ActionItem,
        request: LeaseRequest,
    ) -> CoordinatorResult<LeaseHandle> {
        self.record(CoordinatorCall::BeginLease {
            cookie: item.cookie,
            request,
        });
        if let Some(failure) = lock(&self.script).begin_lease {
            return Err(failure.coordinator("begin_lease"));
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        lock(&self.leases).insert(token, item.clone());
        Ok(LeaseHandle::new(token, item.cookie, item.fid))
    }

    async fn leased_data_handle(
        &self,
        lease: &LeaseHandle,
    ) -> CoordinatorResult<Arc<dyn DataHandle>> {
        let item = self.leased_item(lease)?;
        if item.kind == ActionKind::Restore {
            let file = lock(&self.volatile)
                .entry(item.cookie)
                .or_insert_with(|| Arc::new(MemoryFile::default()))
                .clone();
            return Ok(file);
        }
        Ok(self.file(item.dfid))
    }

    async fn leased_destination(&self, lease: &LeaseHandle) -> CoordinatorResult<FileId> {
        let item = self.leased_item(lease)?;
        Ok(FileId::new(item.fid.seq, item.fid.oid, item.fid.ver + 1))
    }

    async fn end_lease(
        &self,
        lease: LeaseHandle,
        extent: Extent,
        retry: bool,
        code: i32,
    ) -> CoordinatorResult<()> {
        self.record(CoordinatorCall::EndLease {
            cookie: lease.cookie(),
            extent,
            retry,
            code,
        });
        lock(&self.leases).remove(&lease.token());
        match lock(&self.script).end_lease {
            Some(failure) => Err(failure.coordinator("end_lease")),
            None => Ok(()),
        }
    }

    async fn read_file_attr(&self, fid: FileId, name: &str) -> CoordinatorResult<Vec<u8>> {
        self.record(CoordinatorCall::ReadAttr {
            fid,
            name: name.to_string(),
        });
        self.file(fid)
            .attr(name)
            .ok_or_else(|| CoordinatorError::AttributeMissing {
                name: name.to_string(),
            })
    }

    async fn mdt_index(&self, fid: FileId) -> CoordinatorResult<i32> {
        self.record(CoordinatorCall::MdtIndex(fid));
        match lock(&self.script).mdt_index {
            Some(failure) => Err(failure.coordinator("mdt_index")),
            None => Ok(0),
        }
    }

    async fn fid_to_path(&self, fid: FileId) -> CoordinatorResult<PathBuf> {
        self.record(CoordinatorCall::FidToPath(fid));
        match lock(&self.script).fid_to_path {
            Some(failure) => Err(failure.coordinator("fid_to_path")),
            None => Ok(PathBuf::from(format!("/{}/{fid}", self.fs_name))),
        }
    }
}

/// Snapshot of a request received by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Operation.
    pub op: TransferOp,
    /// Target object.
    pub object_id: ObjectId,
    /// Declared size.
    pub size: Option<u64>,
    /// Placement family.
    pub family: Option<StorageFamily>,
    /// Layout name override.
    pub layout_name: Option<String>,
    /// Alias override.
    pub alias: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Attributes.
    pub attrs: AttributeMap,
    /// Overwrite flag.
    pub overwrite: bool,
}

impl From<&TransferRequest> for RecordedRequest {
    fn from(request: &TransferRequest) -> Self {
        Self {
            op: request.op,
            object_id: request.object_id.clone(),
            size: request.size,
            family: request.family,
            layout_name: request.layout_name.clone(),
            alias: request.alias.clone(),
            tags: request.tags.clone(),
            attrs: request.attrs.clone(),
            overwrite: request.overwrite,
        }
    }
}

/// Object stored by [`MemoryObjectStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    /// Object bytes.
    pub data: Vec<u8>,
    /// Attribute map.
    pub attrs: AttributeMap,
}

/// Object store keeping objects in memory and recording every request.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectId, StoredObject>>,
    failures: Mutex<HashMap<TransferOp, Failure>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

const CHUNK: usize = 64 * 1024;

impl MemoryObjectStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request of kind `op` fail.
    pub fn fail(&self, op: TransferOp, failure: Failure) {
        lock(&self.failures).insert(op, failure);
    }

    /// Preload an object.
    pub fn insert(&self, object_id: impl Into<ObjectId>, object: StoredObject) {
        lock(&self.objects).insert(object_id.into(), object);
    }

    /// Stored object, if any.
    #[must_use]
    pub fn object(&self, object_id: &str) -> Option<StoredObject> {
        lock(&self.objects).get(&ObjectId::from(object_id)).cloned()
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Requests of kind `op` received so far.
    #[must_use]
    pub fn requests_for(&self, op: TransferOp) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.op == op)
            .collect()
    }

    fn admit(&self, request: &TransferRequest, operation: &'static str) -> BackendResult<()> {
        lock(&self.requests).push(RecordedRequest::from(request));
        match lock(&self.failures).get(&request.op) {
            Some(failure) => Err(failure.backend(operation, &request.object_id)),
            None => Ok(()),
        }
    }

    fn missing(operation: &'static str, request: &TransferRequest) -> BackendError {
        BackendError::NotFound {
            operation,
            object_id: request.object_id.to_string(),
        }
    }
}

fn data_handle<'a>(
    request: &'a TransferRequest,
    operation: &'static str,
) -> BackendResult<&'a Arc<dyn DataHandle>> {
    request.data.as_ref().ok_or(BackendError::InvalidRequest {
        operation,
        reason: "missing data handle",
    })
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, request: &TransferRequest) -> BackendResult<()> {
        self.admit(request, "put")?;
        let handle = data_handle(request, "put")?;
        if !request.overwrite && lock(&self.objects).contains_key(&request.object_id) {
            return Err(BackendError::AlreadyExists {
                object_id: request.object_id.to_string(),
            });
        }
        let mut data = Vec::new();
        let mut buf = vec![0; CHUNK];
        loop {
            let read = handle
                .read_at(data.len() as u64, &mut buf)
                .await
                .map_err(|source| BackendError::Io {
                    operation: "put",
                    source,
                })?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
        }
        lock(&self.objects).insert(
            request.object_id.clone(),
            StoredObject {
                data,
                attrs: request.attrs.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, request: &TransferRequest) -> BackendResult<()> {
        self.admit(request, "get")?;
        let handle = data_handle(request, "get")?;
        let object = lock(&self.objects)
            .get(&request.object_id)
            .cloned()
            .ok_or_else(|| Self::missing("get", request))?;
        handle
            .write_at(0, &object.data)
            .await
            .map_err(|source| BackendError::Io {
                operation: "get",
                source,
            })?;
        Ok(())
    }

    async fn get_metadata(&self, request: &TransferRequest) -> BackendResult<AttributeMap> {
        self.admit(request, "get_metadata")?;
        lock(&self.objects)
            .get(&request.object_id)
            .map(|object| object.attrs.clone())
            .ok_or_else(|| Self::missing("get_metadata", request))
    }

    async fn delete(&self, request: &TransferRequest) -> BackendResult<()> {
        self.admit(request, "delete")?;
        lock(&self.objects)
            .remove(&request.object_id)
            .map(|_| ())
            .ok_or_else(|| Self::missing("delete", request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_file_reads_and_writes() -> anyhow::Result<()> {
        let file = MemoryFile::with_data(b"hello".to_vec());
        let mut buf = [0; 3];
        assert_eq!(file.read_at(3, &mut buf).await?, 2);
        assert_eq!(&buf[..2], b"lo");
        file.write_at(5, b" world").await?;
        assert_eq!(file.contents(), b"hello world");
        file.set_attr_create("trusted.x", b"1").await?;
        assert!(file.set_attr_create("trusted.x", b"2").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn store_round_trips_objects() -> anyhow::Result<()> {
        let store = MemoryObjectStore::new();
        let source = MemoryFile::with_data(b"payload".to_vec());
        let mut put = TransferRequest::new(TransferOp::Put, ObjectId::from("fs:0x1:0x2:0x0"));
        put.data = Some(source);
        put.overwrite = true;
        store.put(&put).await?;

        let target = Arc::new(MemoryFile::default());
        let mut get = TransferRequest::new(TransferOp::Get, ObjectId::from("fs:0x1:0x2:0x0"));
        get.data = Some(target.clone());
        store.get(&get).await?;
        assert_eq!(target.contents(), b"payload");

        let delete = TransferRequest::new(TransferOp::Delete, ObjectId::from("fs:0x1:0x2:0x0"));
        store.delete(&delete).await?;
        assert!(matches!(
            store.delete(&delete).await,
            Err(BackendError::NotFound { .. })
        ));
        assert_eq!(store.requests().len(), 4);
        Ok(())
    }
}
