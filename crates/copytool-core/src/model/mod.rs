//! Data transfer objects shared by the engine and collaborator adapters.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hints::{HintError, HintTable};
use crate::service::DataHandle;

/// Length sentinel meaning "up to the end of the file".
pub const EXTENT_UNBOUNDED: u64 = u64::MAX;

/// Fixed size of an action record header on the coordinator wire.
pub const ITEM_HEADER_LEN: usize = 72;

/// Fixed size of an action list header, excluding the filesystem name.
pub const BATCH_HEADER_LEN: usize = 32;

const fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Error raised when a file identity cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileIdError {
    /// The text was not a `seq:oid:ver` triple.
    #[error("invalid file identifier")]
    Malformed {
        /// Offending input.
        value: String,
    },
    /// One of the components was not a valid hexadecimal number.
    #[error("invalid file identifier component")]
    Component {
        /// Offending input.
        value: String,
        /// Component name.
        field: &'static str,
    },
}

/// Filesystem-wide identity of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId {
    /// Sequence number.
    pub seq: u64,
    /// Object id within the sequence.
    pub oid: u32,
    /// Version.
    pub ver: u32,
}

impl FileId {
    /// Build an identity from its components.
    #[must_use]
    pub const fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Self { seq, oid, ver }
    }

    /// Bracketed rendering used in log lines.
    #[must_use]
    pub fn bracketed(&self) -> String {
        format!("[{self}]")
    }

    /// Whether every component is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.seq == 0 && self.oid == 0 && self.ver == 0
    }
}

impl Display for FileId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "0x{:x}:0x{:x}:0x{:x}", self.seq, self.oid, self.ver)
    }
}

fn parse_hex<T>(part: &str, value: &str, field: &'static str) -> Result<T, FileIdError>
where
    T: TryFrom<u64>,
{
    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);
    let parsed = u64::from_str_radix(digits, 16).map_err(|_| FileIdError::Component {
        value: value.to_string(),
        field,
    })?;
    T::try_from(parsed).map_err(|_| FileIdError::Component {
        value: value.to_string(),
        field,
    })
}

impl FromStr for FileId {
    type Err = FileIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(value);
        let mut parts = trimmed.split(':');
        let (Some(seq), Some(oid), Some(ver), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(FileIdError::Malformed {
                value: value.to_string(),
            });
        };
        Ok(Self {
            seq: parse_hex(seq, value, "seq")?,
            oid: parse_hex(oid, value, "oid")?,
            ver: parse_hex(ver, value, "ver")?,
        })
    }
}

impl TryFrom<String> for FileId {
    type Error = FileIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileId> for String {
    fn from(value: FileId) -> Self {
        value.to_string()
    }
}

/// Requested HSM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    /// Copy file data into the object store.
    Archive,
    /// Copy object data back into the filesystem.
    Restore,
    /// Delete the archived copy.
    Remove,
    /// Cancel an in-flight request.
    Cancel,
    /// Any action code this tool does not know about.
    #[serde(other)]
    Unknown,
}

impl ActionKind {
    /// Upper-case name used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "ARCHIVE",
            Self::Restore => "RESTORE",
            Self::Remove => "REMOVE",
            Self::Cancel => "CANCEL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Byte range an action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First byte of the range.
    pub offset: u64,
    /// Range length, [`EXTENT_UNBOUNDED`] for "to end of file".
    pub length: u64,
}

impl Extent {
    /// Extent covering the whole file.
    #[must_use]
    pub const fn whole_file() -> Self {
        Self {
            offset: 0,
            length: EXTENT_UNBOUNDED,
        }
    }

    /// Whether the extent runs to the end of the file.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.length == EXTENT_UNBOUNDED
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::whole_file()
    }
}

mod payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

/// One unit of requested work as handed over by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    /// Requested operation.
    #[serde(rename = "action")]
    pub kind: ActionKind,
    /// Identity of the file the action applies to.
    pub fid: FileId,
    /// Identity of the file carrying the data.
    #[serde(default)]
    pub dfid: FileId,
    /// Byte range.
    #[serde(default)]
    pub extent: Extent,
    /// Lease correlation token.
    pub cookie: u64,
    /// Opaque user payload carrying hints.
    #[serde(default, rename = "hints", with = "payload")]
    pub data: Vec<u8>,
}

impl ActionItem {
    /// Parse the user payload into a hint table.
    ///
    /// # Errors
    ///
    /// Returns a [`HintError`] when the payload is not a valid hint list.
    pub fn hints(&self) -> Result<HintTable, HintError> {
        HintTable::parse(&self.data)
    }

    /// Size the record claims on the wire.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        ITEM_HEADER_LEN + self.data.len()
    }

    /// Distance from this record to the next one.
    #[must_use]
    pub const fn record_stride(&self) -> usize {
        align8(self.record_len())
    }
}

/// A list of action items delivered in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBatch {
    /// Filesystem the items belong to.
    pub fs_name: String,
    /// Backend the coordinator routed the batch to.
    #[serde(default)]
    pub archive_id: u32,
    /// Coordinator flags.
    #[serde(default)]
    pub flags: u64,
    /// Byte bound declared by the sender; computed from the items when absent.
    #[serde(default)]
    pub declared_len: Option<usize>,
    /// Action records in wire order.
    pub items: Vec<ActionItem>,
}

impl ActionBatch {
    /// Offset of the first record.
    #[must_use]
    pub const fn header_len(&self) -> usize {
        BATCH_HEADER_LEN + align8(self.fs_name.len() + 1)
    }

    /// Size the batch occupies when every record is laid out back to back.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.items
            .iter()
            .fold(self.header_len(), |acc, item| acc + item.record_stride())
    }

    /// Byte bound every record must stay within.
    #[must_use]
    pub fn byte_bound(&self) -> usize {
        self.declared_len.unwrap_or_else(|| self.encoded_len())
    }
}

/// Outcome of waiting for the next coordinator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A batch of action items.
    Batch(ActionBatch),
    /// The coordinator asked the tool to stop.
    Shutdown,
}

/// Open flags requested when a lease creates a destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);
    /// Do not allocate a layout when the destination is created.
    pub const DELAY_LAYOUT_CREATE: Self = Self(0x0100_0000);

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Parameters for acquiring a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaseRequest {
    /// Metadata target that should host the restored file.
    pub mdt_index: Option<i32>,
    /// Flags for the destination open.
    pub open_flags: OpenFlags,
    /// Only acquire the lease to release it immediately.
    pub finalize_only: bool,
}

impl LeaseRequest {
    /// Lease used solely to report an outcome for an item that never got one.
    #[must_use]
    pub const fn finalize_only() -> Self {
        Self {
            mdt_index: None,
            open_flags: OpenFlags::NONE,
            finalize_only: true,
        }
    }
}

/// Opaque token for a lease granted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseHandle {
    token: u64,
    cookie: u64,
    fid: FileId,
}

impl LeaseHandle {
    /// Build a handle; only coordinator implementations should call this.
    #[must_use]
    pub const fn new(token: u64, cookie: u64, fid: FileId) -> Self {
        Self { token, cookie, fid }
    }

    /// Coordinator-private token.
    #[must_use]
    pub const fn token(&self) -> u64 {
        self.token
    }

    /// Cookie of the item the lease was granted for.
    #[must_use]
    pub const fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Identity of the leased file.
    #[must_use]
    pub const fn fid(&self) -> FileId {
        self.fid
    }
}

/// Backend object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Free-form key/value attributes stored alongside a backend object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, String>);

impl AttributeMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Error raised for an unrecognised storage family name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown storage family")]
pub struct UnknownFamily {
    /// Offending name.
    pub value: String,
}

/// Class of media the backend should place an object on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFamily {
    /// Disk-backed media.
    Disk,
    /// Tape media.
    Tape,
    /// Plain directories.
    Dir,
    /// RADOS pools.
    RadosPool,
}

impl StorageFamily {
    /// Canonical family name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Tape => "tape",
            Self::Dir => "dir",
            Self::RadosPool => "rados_pool",
        }
    }
}

impl Display for StorageFamily {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for StorageFamily {
    type Err = UnknownFamily;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "disk" => Ok(Self::Disk),
            "tape" => Ok(Self::Tape),
            "dir" => Ok(Self::Dir),
            "rados_pool" => Ok(Self::RadosPool),
            other => Err(UnknownFamily {
                value: other.to_string(),
            }),
        }
    }
}

/// Backend transfer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOp {
    /// Write an object.
    Put,
    /// Read an object.
    Get,
    /// Read only the attribute map of an object.
    GetMetadata,
    /// Delete an object.
    Delete,
}

impl TransferOp {
    /// Operation name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::GetMetadata => "GETMD",
            Self::Delete => "DEL",
        }
    }
}

/// A single request issued to the object store.
#[derive(Clone)]
pub struct TransferRequest {
    /// Operation to perform.
    pub op: TransferOp,
    /// Target object.
    pub object_id: ObjectId,
    /// Local file the data is read from or written into.
    pub data: Option<Arc<dyn DataHandle>>,
    /// Object size, PUT only.
    pub size: Option<u64>,
    /// Placement family, PUT only; `None` lets the backend decide.
    pub family: Option<StorageFamily>,
    /// Backend layout name override.
    pub layout_name: Option<String>,
    /// Backend alias override.
    pub alias: Option<String>,
    /// Tags the written object must carry, PUT only.
    pub tags: Vec<String>,
    /// Attributes stored with the object.
    pub attrs: AttributeMap,
    /// Replace an existing object with the same identifier.
    pub overwrite: bool,
}

impl TransferRequest {
    /// Request with every optional field cleared.
    #[must_use]
    pub fn new(op: TransferOp, object_id: ObjectId) -> Self {
        Self {
            op,
            object_id,
            data: None,
            size: None,
            family: None,
            layout_name: None,
            alias: None,
            tags: Vec::new(),
            attrs: AttributeMap::new(),
            overwrite: false,
        }
    }
}

impl Debug for TransferRequest {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransferRequest")
            .field("op", &self.op)
            .field("object_id", &self.object_id)
            .field("has_data", &self.data.is_some())
            .field("size", &self.size)
            .field("family", &self.family)
            .field("layout_name", &self.layout_name)
            .field("alias", &self.alias)
            .field("tags", &self.tags)
            .field("attrs", &self.attrs)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_renders_and_parses_canonical_form() -> anyhow::Result<()> {
        let fid = FileId::new(0x2_0000_0401, 0x1, 0x0);
        assert_eq!(fid.to_string(), "0x200000401:0x1:0x0");
        assert_eq!(fid.bracketed(), "[0x200000401:0x1:0x0]");
        assert_eq!("0x200000401:0x1:0x0".parse::<FileId>()?, fid);
        assert_eq!("[0x200000401:0x1:0x0]".parse::<FileId>()?, fid);
        Ok(())
    }

    #[test]
    fn file_id_rejects_malformed_text() {
        assert!(matches!(
            "0x1:0x2".parse::<FileId>(),
            Err(FileIdError::Malformed { .. })
        ));
        assert!(matches!(
            "0x1:0xzz:0x0".parse::<FileId>(),
            Err(FileIdError::Component { field: "oid", .. })
        ));
        assert!(matches!(
            "0x1:0x100000000:0x0".parse::<FileId>(),
            Err(FileIdError::Component { field: "oid", .. })
        ));
    }

    #[test]
    fn batch_json_uses_wire_names() -> anyhow::Result<()> {
        let batch: ActionBatch = serde_json::from_str(
            r#"{"fs_name":"lustre","archive_id":1,"items":[
                {"action":"ARCHIVE","fid":"0x1:0x2:0x0","cookie":7,"hints":"family=tape"},
                {"action":"MIGRATE","fid":"0x1:0x3:0x0","cookie":8}
            ]}"#,
        )?;
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.items[0].kind, ActionKind::Archive);
        assert_eq!(batch.items[0].data, b"family=tape");
        assert!(batch.items[0].extent.is_unbounded());
        assert_eq!(batch.items[1].kind, ActionKind::Unknown);
        Ok(())
    }

    #[test]
    fn batch_bound_defaults_to_encoded_length() {
        let item = ActionItem {
            kind: ActionKind::Remove,
            fid: FileId::new(1, 2, 0),
            dfid: FileId::default(),
            extent: Extent::whole_file(),
            cookie: 1,
            data: b"abc".to_vec(),
        };
        let batch = ActionBatch {
            fs_name: "fsA".into(),
            archive_id: 0,
            flags: 0,
            declared_len: None,
            items: vec![item.clone(), item],
        };
        assert_eq!(batch.header_len(), BATCH_HEADER_LEN + 8);
        assert_eq!(batch.items[0].record_len(), ITEM_HEADER_LEN + 3);
        assert_eq!(batch.items[0].record_stride(), 80);
        assert_eq!(batch.byte_bound(), BATCH_HEADER_LEN + 8 + 160);
    }

    #[test]
    fn storage_family_names_round_trip() {
        for family in [
            StorageFamily::Disk,
            StorageFamily::Tape,
            StorageFamily::Dir,
            StorageFamily::RadosPool,
        ] {
            assert_eq!(family.as_str().parse::<StorageFamily>(), Ok(family));
        }
        assert!("floppy".parse::<StorageFamily>().is_err());
    }
}
