//! Coordinator serving a local directory addressed by file identity.
//!
//! # Design
//! - Files live directly under the mount, named by their bare identity
//!   (`0x200000401:0x1:0x0`).
//! - Batches are read from a newline-delimited JSON feed; end of feed is a
//!   shutdown request.
//! - Restores write into `<mount>/.volatile/<fid>`, which a successful lease
//!   release renames over the target file.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use copytool_core::{
    ActionBatch, ActionItem, ActionKind, Coordinator, CoordinatorError, CoordinatorResult,
    DataHandle, Extent, FileId, LeaseHandle, LeaseRequest, OpenFlags, Received,
};
use copytool_events::{EventBus, EventSink, SinkError};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{LocalError, LocalResult};
use crate::file::LocalFile;
use crate::xattr;

const VOLATILE_DIR: &str = ".volatile";

type FeedLines = Lines<BufReader<fs::File>>;

struct Feed {
    lines: FeedLines,
    line: usize,
}

struct LeaseState {
    item: ActionItem,
    data: Option<Arc<LocalFile>>,
    volatile: Option<PathBuf>,
}

/// Lease release recorded by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseReport {
    /// Operation the lease covered.
    pub kind: ActionKind,
    /// Item cookie.
    pub cookie: u64,
    /// File identity.
    pub fid: FileId,
    /// Reported range.
    pub extent: Extent,
    /// Whether the coordinator was asked to resubmit.
    pub retry: bool,
    /// Reported result code.
    pub code: i32,
}

/// Local [`Coordinator`] implementation.
pub struct LocalCoordinator {
    fs_name: String,
    mount: PathBuf,
    feed: tokio::sync::Mutex<Option<Feed>>,
    events: EventBus,
    registered: AtomicBool,
    archive_ids: Mutex<Vec<u32>>,
    next_token: AtomicU64,
    leases: Mutex<HashMap<u64, LeaseState>>,
    reports: Mutex<Vec<LeaseReport>>,
    sinks: tokio::sync::Mutex<HashMap<PathBuf, EventSink>>,
}

fn sink_error(operation: &'static str, err: SinkError) -> CoordinatorError {
    match err {
        SinkError::Open { source, .. } | SinkError::Write { source, .. } => {
            CoordinatorError::Io { operation, source }
        }
        SinkError::Encode { source } => CoordinatorError::Protocol {
            operation,
            reason: source.to_string(),
        },
    }
}

fn unknown_lease(operation: &'static str, lease: &LeaseHandle) -> CoordinatorError {
    CoordinatorError::NotFound {
        operation,
        target: format!("lease {}", lease.token()),
    }
}

impl LocalCoordinator {
    /// Serve `mount`, reading batches from the feed at `feed`.
    ///
    /// The filesystem name is the last component of the mount path.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::InvalidMount`] when `mount` is not a named
    /// directory and [`LocalError::Io`] when either path cannot be opened.
    pub async fn open(mount: &Path, feed: &Path, events: EventBus) -> LocalResult<Self> {
        let mount = fs::canonicalize(mount)
            .await
            .map_err(|source| LocalError::io("canonicalize", mount, source))?;
        let meta = fs::metadata(&mount)
            .await
            .map_err(|source| LocalError::io("stat", mount.clone(), source))?;
        if !meta.is_dir() {
            return Err(LocalError::InvalidMount {
                path: mount,
                reason: "not a directory",
            });
        }
        let Some(fs_name) = mount
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
        else {
            return Err(LocalError::InvalidMount {
                path: mount,
                reason: "mount point has no usable name",
            });
        };
        let file = fs::File::open(feed)
            .await
            .map_err(|source| LocalError::io("open_feed", feed, source))?;
        debug!(mount = %mount.display(), fs_name, "local coordinator opened");
        Ok(Self {
            fs_name,
            mount,
            feed: tokio::sync::Mutex::new(Some(Feed {
                lines: BufReader::new(file).lines(),
                line: 0,
            })),
            events,
            registered: AtomicBool::new(false),
            archive_ids: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            leases: Mutex::new(HashMap::new()),
            reports: Mutex::new(Vec::new()),
            sinks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Mount point served.
    #[must_use]
    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Path of the file with identity `fid`.
    #[must_use]
    pub fn file_path(&self, fid: FileId) -> PathBuf {
        self.mount.join(fid.to_string())
    }

    /// Lease releases recorded so far.
    #[must_use]
    pub fn reports(&self) -> Vec<LeaseReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn accepts(&self, batch: &ActionBatch) -> bool {
        let ids = self
            .archive_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ids.is_empty() || ids.contains(&batch.archive_id)
    }

    fn lease_state<T>(
        &self,
        operation: &'static str,
        lease: &LeaseHandle,
        read: impl FnOnce(&LeaseState) -> CoordinatorResult<T>,
    ) -> CoordinatorResult<T> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        leases
            .get(&lease.token())
            .ok_or_else(|| unknown_lease(operation, lease))
            .and_then(read)
    }

    async fn open_source(&self, item: &ActionItem) -> CoordinatorResult<Arc<LocalFile>> {
        let fid = if item.dfid.is_zero() {
            item.fid
        } else {
            item.dfid
        };
        let path = self.file_path(fid);
        task::spawn_blocking(move || {
            LocalFile::open(&path).map_err(|source| LocalError::io("open", path, source))
        })
        .await
        .map_err(|err| CoordinatorError::Io {
            operation: "begin_lease",
            source: std::io::Error::other(err),
        })?
        .map(Arc::new)
        .map_err(|err| err.into_coordinator("begin_lease"))
    }

    async fn create_volatile(
        &self,
        item: &ActionItem,
    ) -> CoordinatorResult<(Arc<LocalFile>, PathBuf)> {
        let dir = self.mount.join(VOLATILE_DIR);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| LocalError::io("create_dir", dir.clone(), source))
            .map_err(|err| err.into_coordinator("begin_lease"))?;
        let path = dir.join(item.fid.to_string());
        let handle_path = path.clone();
        let file = task::spawn_blocking(move || {
            LocalFile::create(&handle_path)
                .map_err(|source| LocalError::io("create", handle_path, source))
        })
        .await
        .map_err(|err| CoordinatorError::Io {
            operation: "begin_lease",
            source: std::io::Error::other(err),
        })?
        .map_err(|err| err.into_coordinator("begin_lease"))?;
        Ok((Arc::new(file), path))
    }

    async fn settle_volatile(
        &self,
        fid: FileId,
        volatile: &Path,
        keep: bool,
    ) -> CoordinatorResult<()> {
        if keep {
            let target = self.file_path(fid);
            fs::rename(volatile, &target)
                .await
                .map_err(|source| LocalError::io("rename", target, source))
                .map_err(|err| err.into_coordinator("end_lease"))
        } else {
            match fs::remove_file(volatile).await {
                Ok(()) => Ok(()),
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => {
                    Err(LocalError::io("remove", volatile, source).into_coordinator("end_lease"))
                }
            }
        }
    }
}

#[async_trait]
impl Coordinator for LocalCoordinator {
    fn filesystem_name(&self) -> &str {
        &self.fs_name
    }

    async fn register(&self, archive_ids: &[u32]) -> CoordinatorResult<()> {
        *self
            .archive_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = archive_ids.to_vec();
        self.registered.store(true, Ordering::Release);
        info!(fs_name = %self.fs_name, ?archive_ids, "copytool registered");
        Ok(())
    }

    async fn unregister(&self) -> CoordinatorResult<()> {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return Err(CoordinatorError::Protocol {
                operation: "unregister",
                reason: "copytool is not registered".into(),
            });
        }
        self.feed.lock().await.take();
        info!(fs_name = %self.fs_name, "copytool unregistered");
        Ok(())
    }

    async fn register_event_sink(&self, path: &Path) -> CoordinatorResult<()> {
        let sink = EventSink::attach(&self.events, path)
            .await
            .map_err(|err| sink_error("register_event_sink", err))?;
        let previous = self.sinks.lock().await.insert(path.to_path_buf(), sink);
        if let Some(previous) = previous {
            previous.detach().await;
        }
        Ok(())
    }

    async fn unregister_event_sink(&self, path: &Path) -> CoordinatorResult<()> {
        let sink = self.sinks.lock().await.remove(path);
        match sink {
            Some(sink) => {
                sink.detach().await;
                Ok(())
            }
            None => Err(CoordinatorError::NotFound {
                operation: "unregister_event_sink",
                target: path.display().to_string(),
            }),
        }
    }

    async fn receive_batch(&self) -> CoordinatorResult<Received> {
        if !self.registered.load(Ordering::Acquire) {
            return Err(CoordinatorError::Shutdown);
        }
        let mut guard = self.feed.lock().await;
        let Some(feed) = guard.as_mut() else {
            return Ok(Received::Shutdown);
        };
        loop {
            let next = feed.lines.next_line().await.map_err(|source| {
                CoordinatorError::Io {
                    operation: "receive_batch",
                    source,
                }
            })?;
            let Some(line) = next else {
                debug!("batch feed exhausted");
                return Ok(Received::Shutdown);
            };
            feed.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let batch: ActionBatch = serde_json::from_str(&line)
                .map_err(|source| LocalError::Feed {
                    line: feed.line,
                    source,
                })
                .map_err(|err| err.into_coordinator("receive_batch"))?;
            if !self.accepts(&batch) {
                debug!(archive_id = batch.archive_id, "batch for another archive skipped");
                continue;
            }
            return Ok(Received::Batch(batch));
        }
    }

    async fn begin_lease(
        &self,
        item: &ActionItem,
        request: LeaseRequest,
    ) -> CoordinatorResult<LeaseHandle> {
        let (data, volatile) = if request.finalize_only {
            (None, None)
        } else {
            match item.kind {
                ActionKind::Archive => (Some(self.open_source(item).await?), None),
                ActionKind::Restore => {
                    let (file, path) = self.create_volatile(item).await?;
                    (Some(file), Some(path))
                }
                ActionKind::Remove | ActionKind::Cancel | ActionKind::Unknown => (None, None),
            }
        };
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        debug!(
            token,
            cookie = item.cookie,
            fid = %item.fid,
            mdt_index = ?request.mdt_index,
            delay_layout = request.open_flags.contains(OpenFlags::DELAY_LAYOUT_CREATE),
            finalize_only = request.finalize_only,
            "lease granted"
        );
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token,
                LeaseState {
                    item: item.clone(),
                    data,
                    volatile,
                },
            );
        Ok(LeaseHandle::new(token, item.cookie, item.fid))
    }

    async fn leased_data_handle(
        &self,
        lease: &LeaseHandle,
    ) -> CoordinatorResult<Arc<dyn DataHandle>> {
        self.lease_state("leased_data_handle", lease, |state| {
            state
                .data
                .clone()
                .map(|file| file as Arc<dyn DataHandle>)
                .ok_or(CoordinatorError::Unsupported {
                    operation: "leased_data_handle",
                })
        })
    }

    async fn leased_destination(&self, lease: &LeaseHandle) -> CoordinatorResult<FileId> {
        self.lease_state("leased_destination", lease, |state| {
            let fid = state.item.fid;
            Ok(FileId::new(fid.seq, fid.oid, fid.ver.wrapping_add(1)))
        })
    }

    async fn end_lease(
        &self,
        lease: LeaseHandle,
        extent: Extent,
        retry: bool,
        code: i32,
    ) -> CoordinatorResult<()> {
        let state = self
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lease.token())
            .ok_or_else(|| unknown_lease("end_lease", &lease))?;
        // close the handle before the volatile file is moved
        drop(state.data);
        if let Some(volatile) = &state.volatile {
            self.settle_volatile(state.item.fid, volatile, code == 0)
                .await?;
        }
        if code != 0 {
            warn!(
                cookie = lease.cookie(),
                fid = %lease.fid(),
                code,
                retry,
                "lease released with failure"
            );
        } else {
            debug!(cookie = lease.cookie(), fid = %lease.fid(), "lease released");
        }
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LeaseReport {
                kind: state.item.kind,
                cookie: lease.cookie(),
                fid: lease.fid(),
                extent,
                retry,
                code,
            });
        Ok(())
    }

    async fn read_file_attr(&self, fid: FileId, name: &str) -> CoordinatorResult<Vec<u8>> {
        let path = self.file_path(fid);
        let attr = name.to_string();
        let value = task::spawn_blocking(move || {
            let file =
                File::open(&path).map_err(|source| LocalError::io("open", path.clone(), source))?;
            xattr::get(&file, &attr).map_err(|source| LocalError::io("getxattr", path, source))
        })
        .await
        .map_err(|err| CoordinatorError::Io {
            operation: "read_file_attr",
            source: std::io::Error::other(err),
        })?
        .map_err(|err| err.into_coordinator("read_file_attr"))?;
        value.ok_or_else(|| CoordinatorError::AttributeMissing {
            name: name.to_string(),
        })
    }

    async fn mdt_index(&self, fid: FileId) -> CoordinatorResult<i32> {
        let path = self.file_path(fid);
        match fs::try_exists(&path).await {
            Ok(true) => Ok(0),
            Ok(false) => Err(CoordinatorError::NotFound {
                operation: "mdt_index",
                target: fid.to_string(),
            }),
            Err(source) => Err(CoordinatorError::Io {
                operation: "mdt_index",
                source,
            }),
        }
    }

    async fn fid_to_path(&self, fid: FileId) -> CoordinatorResult<PathBuf> {
        let path = self.file_path(fid);
        if fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(CoordinatorError::NotFound {
                operation: "fid_to_path",
                target: fid.to_string(),
            })
        }
    }
}
