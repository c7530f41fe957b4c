use tracing::info;
use crate::error::StorageResult;
use crate::storage::{now_millis, BlobBackend, BlobFile, BlobStore};

pub const UPLOADS_ROUTE: &str = "/uploads/";
const DEFAULT_EXTENSION: &str = "jpg";

/// Store name for a deployment context, e.g. `uploads-production`.
pub fn namespace_for(prefix: &str, context: &str) -> String {
    format!("{}-{}", prefix, context)
}

/// Extension of `file_name`, or `jpg` when it has none or when it holds
/// anything besides ASCII letters and digits.
pub fn extension_of(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()) => ext,
        _ => DEFAULT_EXTENSION,
    }
}

/// `{field}/{millis}-{token}.{ext}`
pub fn upload_key(field_name: &str, file_name: &str, now_millis: i64, token: &str) -> String {
    format!("{}/{}-{}.{}", field_name, now_millis, token, extension_of(file_name))
}

pub fn random_token() -> String {
    hex::encode(rand::random::<[u8; 3]>())
}

/// Route serving `key`, each segment percent-encoded.
pub fn public_path(key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}{}", UPLOADS_ROUTE, encoded.join("/"))
}

/// Stores an uploaded file under a fresh key and returns the path it is
/// served from.
pub async fn upload<B: BlobBackend + ?Sized>(
    store: &BlobStore<B>,
    field_name: &str,
    file: &BlobFile,
) -> StorageResult<String> {
    let key = upload_key(field_name, &file.name, now_millis(), &random_token());
    store.set(&key, file).await?;
    info!("stored upload '{}' ({} bytes) as {}", file.name, file.size(), key);
    Ok(public_path(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_extension_defaults_to_jpg() {
        assert_eq!(extension_of("me.png"), "png");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("noext"), "jpg");
        assert_eq!(extension_of("trailing."), "jpg");
        assert_eq!(extension_of(""), "jpg");
        assert_eq!(extension_of("pic.we bp"), "jpg");
        assert_eq!(extension_of("pic.p#g"), "jpg");
        assert_eq!(extension_of("pic.a?b"), "jpg");
        assert_eq!(extension_of("dir.v2/readme"), "jpg");
        assert_eq!(extension_of("clip.MP4"), "MP4");
    }

    #[test]
    fn test_public_path_encodes_segments() {
        assert_eq!(public_path("avatar/1-abc.png"), "/uploads/avatar/1-abc.png");
        assert_eq!(public_path("my docs/a b#1.txt"), "/uploads/my%20docs/a%20b%231.txt");
    }

    #[test]
    fn test_upload_key_layout() {
        assert_eq!(
            upload_key("avatar", "me.png", 1_699_999_999_999, "a1b2c3"),
            "avatar/1699999999999-a1b2c3.png"
        );
    }

    #[test]
    fn test_random_token_shape() {
        let token = random_token();
        assert_eq!(token.len(), 6);
        assert!(token.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_upload_stores_under_returned_path() {
        let store = BlobStore::new(MemoryStorage::new());
        let file = BlobFile::new("cat.gif", "image/gif", 42, "GIF89a");

        let path = upload(&store, "pets", &file).await.unwrap();
        let key = path.strip_prefix(UPLOADS_ROUTE).unwrap();
        assert!(key.starts_with("pets/"));
        assert!(key.ends_with(".gif"));

        let stored = store.get(key).await.unwrap().unwrap();
        assert_eq!(stored.into_file(), file);
    }
}
