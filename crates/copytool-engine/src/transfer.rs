//! Builds and issues object store requests for archive, restore and remove.
//!
//! # Design
//! - One request per call, owned by the call; its attributes and tags are
//!   released when the call returns, whatever the outcome.
//! - Hints are applied in encounter order, so later values win and `tag`
//!   accumulates.
//! - Failures are returned typed; retry and compensation are decided by the
//!   action machine.

use std::sync::Arc;

use copytool_config::Options;
use copytool_core::{
    DataHandle, FileId, HINT_HSM_FUID, HintTable, IdOverrides, LayoutDescriptor, ObjectId,
    ObjectIdResolver, ObjectStore, StorageFamily, TransferOp, TransferRequest, hexrecord,
};
use nix::errno::Errno;
use tracing::{debug, warn};

use crate::error::TransferError;

/// Attribute naming the tool that wrote an object.
pub const PROGRAM_ATTR: &str = "program";
/// Value recorded under [`PROGRAM_ATTR`].
pub const PROGRAM_NAME: &str = "copytool";
/// Attribute holding a layout in the legacy hex record format.
pub const LEGACY_LAYOUT_ATTR: &str = "lov";

const HINT_FAMILY: &str = "family";
const HINT_LAYOUT: &str = "layout";
const HINT_ALIAS: &str = "alias";
const HINT_TAG: &str = "tag";

/// Translates action items into object store requests.
pub struct TransferAdapter {
    store: Arc<dyn ObjectStore>,
    resolver: ObjectIdResolver,
    options: Arc<Options>,
}

impl TransferAdapter {
    /// Adapter issuing requests against `store` for filesystem `fs_name`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, fs_name: &str, options: Arc<Options>) -> Self {
        Self {
            store,
            resolver: ObjectIdResolver::new(fs_name),
            options,
        }
    }

    /// Identifier resolver used for every request.
    #[must_use]
    pub const fn resolver(&self) -> &ObjectIdResolver {
        &self.resolver
    }

    /// Archive `source` as the object for `fid`.
    ///
    /// Records the resolved identifier on `source` under the configured
    /// attribute name before the transfer; failing to do so is only logged.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the layout cannot be recorded, the source
    /// size cannot be read or the store rejects the write.
    pub async fn put(
        &self,
        fid: FileId,
        alternate: Option<&str>,
        source: Arc<dyn DataHandle>,
        layout: Option<&LayoutDescriptor>,
        hints: &HintTable,
    ) -> Result<ObjectId, TransferError> {
        let object_id = self
            .resolver
            .resolve(TransferOp::Put, fid, IdOverrides::alternate(alternate));
        let mut request = TransferRequest::new(TransferOp::Put, object_id.clone());
        request.attrs.set(PROGRAM_ATTR, PROGRAM_NAME);
        if let Some(layout) = layout {
            layout
                .write_attributes(&mut request.attrs)
                .map_err(|source| TransferError::Layout { source })?;
        }

        self.record_object_id(source.as_ref(), &object_id).await;

        let size = source
            .size()
            .await
            .map_err(|source| TransferError::DataHandle {
                operation: "size",
                source,
            })?;
        request.size = Some(size);
        request.family = self.options.default_family;
        apply_put_hints(&mut request, hints);
        request.overwrite = true;
        request.data = Some(source);

        debug!(
            object_id = %object_id,
            size,
            family = request.family.map(StorageFamily::as_str),
            tags = request.tags.len(),
            "issuing PUT"
        );
        self.store
            .put(&request)
            .await
            .map_err(|source| TransferError::Backend {
                op: TransferOp::Put,
                source,
            })?;
        Ok(object_id)
    }

    /// Restore the object for `fid` into `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Backend`] when the store read fails.
    pub async fn get(
        &self,
        fid: FileId,
        alternate: Option<&str>,
        destination: Arc<dyn DataHandle>,
    ) -> Result<ObjectId, TransferError> {
        let object_id = self
            .resolver
            .resolve(TransferOp::Get, fid, IdOverrides::alternate(alternate));
        let mut request = TransferRequest::new(TransferOp::Get, object_id.clone());
        request.data = Some(destination);

        debug!(object_id = %object_id, "issuing GET");
        self.store
            .get(&request)
            .await
            .map_err(|source| TransferError::Backend {
                op: TransferOp::Get,
                source,
            })?;
        Ok(object_id)
    }

    /// Recover the layout stored with the object for `fid`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Backend`] when the metadata cannot be fetched
    /// and [`TransferError::Layout`] when no layout attribute is present or a
    /// component fails to decode.
    pub async fn get_layout(
        &self,
        fid: FileId,
        alternate: Option<&str>,
    ) -> Result<LayoutDescriptor, TransferError> {
        let object_id = self.resolver.resolve(
            TransferOp::GetMetadata,
            fid,
            IdOverrides::alternate(alternate),
        );
        let request = TransferRequest::new(TransferOp::GetMetadata, object_id.clone());

        debug!(object_id = %object_id, "issuing GETMD");
        let attrs = self
            .store
            .get_metadata(&request)
            .await
            .map_err(|source| TransferError::Backend {
                op: TransferOp::GetMetadata,
                source,
            })?;

        if let Some(record) = attrs.get(LEGACY_LAYOUT_ATTR) {
            match hexrecord::decode(record) {
                Ok(bytes) => debug!(
                    object_id = %object_id,
                    len = bytes.len(),
                    "object carries a legacy layout record"
                ),
                Err(err) => debug!(
                    object_id = %object_id,
                    error = %err,
                    "ignoring malformed legacy layout record"
                ),
            }
        }

        LayoutDescriptor::from_attributes(&attrs)
            .map_err(|source| TransferError::Layout { source })
    }

    /// Delete the object for `fid`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Backend`] when the store rejects the delete.
    pub async fn delete(
        &self,
        fid: FileId,
        overrides: IdOverrides<'_>,
    ) -> Result<ObjectId, TransferError> {
        let object_id = self.resolver.resolve(TransferOp::Delete, fid, overrides);
        let request = TransferRequest::new(TransferOp::Delete, object_id.clone());

        debug!(object_id = %object_id, "issuing DEL");
        self.store
            .delete(&request)
            .await
            .map_err(|source| TransferError::Backend {
                op: TransferOp::Delete,
                source,
            })?;
        Ok(object_id)
    }

    async fn record_object_id(&self, source: &dyn DataHandle, object_id: &ObjectId) {
        let name = self.options.fuid_xattr.as_str();
        match source
            .set_attr_create(name, object_id.as_str().as_bytes())
            .await
        {
            Ok(()) => debug!(xattr = name, object_id = %object_id, "recorded object id"),
            Err(err) if err.raw_os_error() == Some(Errno::EEXIST as i32) => {
                debug!(xattr = name, "object id attribute already present");
            }
            Err(err) => warn!(
                xattr = name,
                object_id = %object_id,
                error = %err,
                "failed to record object id on source"
            ),
        }
    }
}

fn apply_put_hints(request: &mut TransferRequest, hints: &HintTable) {
    for hint in hints {
        if hint.value.is_empty() {
            debug!(key = %hint.key, "empty hint ignored");
            continue;
        }
        match hint.key.as_str() {
            HINT_FAMILY => match hint.value.parse::<StorageFamily>() {
                Ok(family) => request.family = Some(family),
                Err(err) => warn!(value = %hint.value, error = %err, "ignoring family hint"),
            },
            HINT_LAYOUT => request.layout_name = Some(hint.value.clone()),
            HINT_ALIAS => request.alias = Some(hint.value.clone()),
            HINT_TAG => request.tags.push(hint.value.clone()),
            HINT_HSM_FUID => {}
            other => warn!(key = other, value = %hint.value, "unknown hint ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytool_core::{
        AttributeMap, BackendError, LayoutComponent, LayoutError, StripePattern,
    };
    use copytool_test_support::fixtures::{self, FS_NAME};
    use copytool_test_support::mocks::{Failure, MemoryFile, MemoryObjectStore, StoredObject};

    fn adapter(store: &Arc<MemoryObjectStore>) -> TransferAdapter {
        TransferAdapter::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            FS_NAME,
            fixtures::options(),
        )
    }

    fn plain_layout() -> LayoutDescriptor {
        LayoutDescriptor::plain(LayoutComponent {
            stripe_count: Some(2),
            stripe_size: 1_048_576,
            pattern: StripePattern::Raid0,
            pool_name: "fast".into(),
            extent: None,
        })
    }

    #[tokio::test]
    async fn put_records_attributes_and_applies_hints() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        let source = MemoryFile::with_data(b"0123456789".to_vec());
        let hints =
            HintTable::parse_str("family=tape,tag=a,layout=simple,alias=fast,tag=b,color=red")?;
        let layout = plain_layout();

        let object_id = adapter(&store)
            .put(
                fixtures::fid(7),
                None,
                source.clone(),
                Some(&layout),
                &hints,
            )
            .await?;

        assert_eq!(object_id.as_str(), "lustre:0x200000401:0x7:0x0");
        let requests = store.requests_for(TransferOp::Put);
        assert_eq!(requests.len(), 1);
        let put = &requests[0];
        assert_eq!(put.size, Some(10));
        assert_eq!(put.family, Some(StorageFamily::Tape));
        assert_eq!(put.layout_name.as_deref(), Some("simple"));
        assert_eq!(put.alias.as_deref(), Some("fast"));
        assert_eq!(put.tags, vec!["a".to_string(), "b".to_string()]);
        assert!(put.overwrite);
        assert_eq!(put.attrs.get(PROGRAM_ATTR), Some(PROGRAM_NAME));
        assert_eq!(LayoutDescriptor::from_attributes(&put.attrs)?, layout);
        assert_eq!(
            source.attr(copytool_core::DEFAULT_FUID_XATTR).as_deref(),
            Some(object_id.as_str().as_bytes())
        );
        Ok(())
    }

    #[tokio::test]
    async fn invalid_family_hint_keeps_default() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        let options = fixtures::options_builder()
            .default_family(Some("disk".into()))
            .build()?;
        let adapter = TransferAdapter::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            FS_NAME,
            options,
        );
        let hints = HintTable::parse_str("family=floppy")?;
        adapter
            .put(
                fixtures::fid(1),
                None,
                MemoryFile::with_data(b"x".to_vec()),
                None,
                &hints,
            )
            .await?;
        let put = &store.requests_for(TransferOp::Put)[0];
        assert_eq!(put.family, Some(StorageFamily::Disk));
        assert_eq!(put.attrs.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn attribute_failure_does_not_block_put() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        let source = MemoryFile::with_data(b"data".to_vec());
        source.fail_attribute_writes();
        adapter(&store)
            .put(
                fixtures::fid(3),
                None,
                source,
                None,
                &HintTable::default(),
            )
            .await?;
        assert!(store.object("lustre:0x200000401:0x3:0x0").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn put_timeout_is_retryable() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail(TransferOp::Put, Failure::Timeout);
        let err = adapter(&store)
            .put(
                fixtures::fid(3),
                None,
                MemoryFile::with_data(b"data".to_vec()),
                None,
                &HintTable::default(),
            )
            .await
            .err();
        assert!(matches!(
            err,
            Some(TransferError::Backend {
                op: TransferOp::Put,
                source: BackendError::Timeout { .. }
            })
        ));
        assert!(err.is_some_and(|err| err.is_retryable()));
    }

    #[tokio::test]
    async fn get_prefers_alternate_identifier() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(
            "legacy-name",
            StoredObject {
                data: b"restored".to_vec(),
                attrs: AttributeMap::new(),
            },
        );
        let destination = Arc::new(MemoryFile::default());
        let object_id = adapter(&store)
            .get(fixtures::fid(9), Some("legacy-name"), destination.clone())
            .await?;
        assert_eq!(object_id.as_str(), "legacy-name");
        assert_eq!(destination.contents(), b"restored");
        Ok(())
    }

    #[tokio::test]
    async fn put_ignores_empty_hint_values() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        let hints =
            HintTable::parse_str("layout=simple,alias=fast,tag=a,layout=,alias=,tag=,family=,")?;

        adapter(&store)
            .put(
                fixtures::fid(7),
                None,
                MemoryFile::with_data(b"abc".to_vec()),
                None,
                &hints,
            )
            .await?;

        let puts = store.requests_for(TransferOp::Put);
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].layout_name.as_deref(), Some("simple"));
        assert_eq!(puts[0].alias.as_deref(), Some("fast"));
        assert_eq!(puts[0].tags, vec!["a".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn put_refuses_a_layout_it_could_not_read_back() {
        let store = Arc::new(MemoryObjectStore::new());
        let layout = LayoutDescriptor::plain(LayoutComponent {
            pool_name: "pool,with,commas".into(),
            ..LayoutComponent::default()
        });

        let result = adapter(&store)
            .put(
                fixtures::fid(7),
                None,
                MemoryFile::with_data(b"abc".to_vec()),
                Some(&layout),
                &HintTable::default(),
            )
            .await;

        assert!(matches!(
            result,
            Err(TransferError::Layout {
                source: LayoutError::InvalidValue {
                    field: "pool_name",
                    ..
                }
            })
        ));
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn get_layout_decodes_stored_attributes() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        let layout = plain_layout();
        let mut attrs = AttributeMap::new();
        attrs.set(PROGRAM_ATTR, PROGRAM_NAME);
        layout.write_attributes(&mut attrs)?;
        attrs.set(LEGACY_LAYOUT_ATTR, hexrecord::encode(b"\x0b\xd0")?);
        store.insert(
            "lustre:0x200000401:0x4:0x0",
            StoredObject {
                data: Vec::new(),
                attrs,
            },
        );
        let recovered = adapter(&store).get_layout(fixtures::fid(4), None).await?;
        assert_eq!(recovered, layout);
        Ok(())
    }

    #[tokio::test]
    async fn get_layout_without_layout_attribute_is_not_found() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut attrs = AttributeMap::new();
        attrs.set(PROGRAM_ATTR, PROGRAM_NAME);
        store.insert(
            "lustre:0x200000401:0x4:0x0",
            StoredObject {
                data: Vec::new(),
                attrs,
            },
        );
        let result = adapter(&store).get_layout(fixtures::fid(4), None).await;
        assert!(matches!(
            result,
            Err(TransferError::Layout {
                source: LayoutError::NotFound
            })
        ));
    }

    #[tokio::test]
    async fn delete_honours_fuid_hint() -> anyhow::Result<()> {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("foo", StoredObject::default());
        let hints = HintTable::parse_str("hsm_fuid=bar,hsm_fuid=foo")?;
        let object_id = adapter(&store)
            .delete(fixtures::fid(5), IdOverrides::hints(&hints))
            .await?;
        assert_eq!(object_id.as_str(), "foo");
        assert!(store.object("foo").is_none());
        Ok(())
    }
}
