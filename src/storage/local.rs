use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};
use crate::error::{StorageError, StorageResult};
use crate::storage::{BlobBackend, RawMetadata};

const RECORDS_DIR: &str = "records";
const RECORD_SUFFIX: &str = ".blob";
const DIR_SUFFIX: &str = ".d";
/// Hex characters per path component, keeping names well under 255 bytes.
const HEX_CHUNK: usize = 200;

/// Fixed-size record header (8 bytes): magic, then the metadata length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
    meta_len: u32,
}

impl RecordHeader {
    const SIZE: usize = 8;
    const MAGIC: [u8; 4] = *b"BSR1";

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE || buf[0..4] != Self::MAGIC {
            return None;
        }
        Some(Self {
            meta_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&Self::MAGIC);
        buf[4..8].copy_from_slice(&self.meta_len.to_be_bytes());
        buf
    }
}

/// Filesystem backend. Each namespace gets its own directory; every key is
/// one record file holding its metadata and content, so a single rename
/// replaces both at once.
///
/// Keys are hex-encoded into the path, which makes any string storable and
/// keeps distinct keys on distinct files. Long keys are split into
/// `{hex}.d/` directories ending in a `{hex}.blob` file.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            root: root.as_ref().join(namespace),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(record_relative_path(key))
    }
}

fn record_relative_path(key: &str) -> PathBuf {
    let encoded = hex::encode(key.as_bytes());
    let chunks: Vec<&str> = if encoded.is_empty() {
        vec![""]
    } else {
        // Hex is ASCII, so byte chunks are valid str boundaries.
        encoded
            .as_bytes()
            .chunks(HEX_CHUNK)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .collect()
    };

    let (last, dirs) = match chunks.split_last() {
        Some(split) => split,
        None => (&"", &[][..]),
    };
    let mut path: PathBuf = dirs.iter().map(|d| format!("{}{}", d, DIR_SUFFIX)).collect();
    path.push(format!("{}{}", last, RECORD_SUFFIX));
    path
}

fn corrupt(key: &str) -> StorageError {
    error!("corrupt record for key {:?}", key);
    StorageError::unavailable(format!("corrupt record for key {:?}", key))
}

fn encode_record(meta: &RawMetadata, data: &[u8]) -> StorageResult<Vec<u8>> {
    let meta = serde_json::to_vec(meta)?;
    let meta_len = u32::try_from(meta.len()).map_err(StorageError::unavailable)?;

    let mut record = Vec::with_capacity(RecordHeader::SIZE + meta.len() + data.len());
    record.extend_from_slice(&RecordHeader { meta_len }.encode());
    record.extend_from_slice(&meta);
    record.extend_from_slice(data);
    Ok(record)
}

fn decode_record(key: &str, record: Vec<u8>) -> StorageResult<(Bytes, RawMetadata)> {
    let header = RecordHeader::decode(&record).ok_or_else(|| corrupt(key))?;
    let meta_end = RecordHeader::SIZE + header.meta_len as usize;
    if record.len() < meta_end {
        return Err(corrupt(key));
    }

    let meta = serde_json::from_slice(&record[RecordHeader::SIZE..meta_end])?;
    let data = Bytes::from(record).slice(meta_end..);
    Ok((data, meta))
}

/// Writes to a sibling temp file and renames it over `path`, so readers see
/// either the old contents or the new ones.
async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(format!(".tmp-{}", hex::encode(rand::random::<[u8; 4]>())));
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Decodes a record file name back into its hex chunk.
fn record_chunk(name: &str) -> Option<&str> {
    name.strip_suffix(RECORD_SUFFIX)
        .filter(|hex| hex.len() % 2 == 0)
}

#[async_trait::async_trait]
impl BlobBackend for LocalStorage {
    async fn get_metadata(&self, key: &str) -> StorageResult<Option<RawMetadata>> {
        let mut file = match fs::File::open(self.record_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut header_buf = [0u8; RecordHeader::SIZE];
        if let Err(e) = file.read_exact(&mut header_buf).await {
            return Err(match e.kind() {
                ErrorKind::UnexpectedEof => corrupt(key),
                _ => e.into(),
            });
        }
        let header = RecordHeader::decode(&header_buf).ok_or_else(|| corrupt(key))?;

        let mut meta = vec![0u8; header.meta_len as usize];
        if let Err(e) = file.read_exact(&mut meta).await {
            return Err(match e.kind() {
                ErrorKind::UnexpectedEof => corrupt(key),
                _ => e.into(),
            });
        }
        Ok(Some(serde_json::from_slice(&meta)?))
    }

    async fn get_with_metadata(
        &self,
        key: &str,
    ) -> StorageResult<Option<(Bytes, RawMetadata)>> {
        let record = match fs::read(self.record_path(key)).await {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_record(key, record).map(Some)
    }

    async fn set(&self, key: &str, data: Bytes, meta: RawMetadata) -> StorageResult<()> {
        let record = encode_record(&meta, &data)?;
        write_atomic(&self.record_path(key), &record).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let wanted = hex::encode(prefix.unwrap_or_default().as_bytes());
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.join(RECORDS_DIR), String::new())];

        while let Some((dir, encoded)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    debug!("skipping non-utf8 entry in {:?}", dir);
                    continue;
                };

                if entry.file_type().await?.is_dir() {
                    if let Some(chunk) = name.strip_suffix(DIR_SUFFIX) {
                        let next = format!("{}{}", encoded, chunk);
                        // Only descend where the prefix can still match.
                        if next.starts_with(&wanted) || wanted.starts_with(&next) {
                            pending.push((entry.path(), next));
                        }
                    }
                    continue;
                }

                let Some(chunk) = record_chunk(name) else {
                    continue;
                };
                let full = format!("{}{}", encoded, chunk);
                if !full.starts_with(&wanted) {
                    continue;
                }
                match hex::decode(&full).ok().and_then(|raw| String::from_utf8(raw).ok()) {
                    Some(key) => keys.push(key),
                    None => debug!("skipping undecodable record {:?} in {:?}", name, dir),
                }
            }
        }

        Ok(keys)
    }
}
