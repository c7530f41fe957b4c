use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};

/// The backend's metadata side-channel: a flat JSON object.
pub type RawMetadata = Map<String, Value>;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const NAME_FIELD: &str = "name";
const TYPE_FIELD: &str = "type";
const LAST_MODIFIED_FIELD: &str = "lastModified";
const SIZE_FIELD: &str = "size";

/// Descriptive attributes of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    /// Epoch milliseconds.
    pub last_modified: i64,
    pub size: u64,
}

/// Whatever could be read back out of a raw record. Fields written by other
/// producers may be missing or of the wrong type; both read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialMetadata {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub last_modified: Option<i64>,
    pub size: Option<u64>,
}

impl FileMetadata {
    pub fn to_raw(&self) -> RawMetadata {
        let mut raw = Map::new();
        raw.insert(NAME_FIELD.to_string(), Value::from(self.name.clone()));
        raw.insert(TYPE_FIELD.to_string(), Value::from(self.mime_type.clone()));
        raw.insert(LAST_MODIFIED_FIELD.to_string(), Value::from(self.last_modified));
        raw.insert(SIZE_FIELD.to_string(), Value::from(self.size));
        raw
    }

    /// Rebuilds metadata for `key` from a raw record and the content that
    /// accompanied it. The size always reflects the content actually read.
    pub fn from_raw(key: &str, raw: &RawMetadata, content_len: u64) -> Self {
        let partial = PartialMetadata::from_raw(raw);
        Self {
            name: partial
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| key.to_string()),
            mime_type: partial
                .mime_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            last_modified: partial.last_modified.unwrap_or_else(now_millis),
            size: content_len,
        }
    }
}

impl PartialMetadata {
    pub fn from_raw(raw: &RawMetadata) -> Self {
        Self {
            name: raw.get(NAME_FIELD).and_then(Value::as_str).map(str::to_string),
            mime_type: raw.get(TYPE_FIELD).and_then(Value::as_str).map(str::to_string),
            last_modified: raw.get(LAST_MODIFIED_FIELD).and_then(as_integer),
            size: raw
                .get(SIZE_FIELD)
                .and_then(as_integer)
                .and_then(|s| u64::try_from(s).ok()),
        }
    }
}

// Records written by JavaScript producers may carry integral floats.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
