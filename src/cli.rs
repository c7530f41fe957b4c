use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use blobstash::config::StashConfig;
use blobstash::storage::now_millis;
use blobstash::{BlobFile, BlobStore, ListEntry, ListOptions};

async fn read_local_file(
    config: &StashConfig,
    path: &str,
    name: Option<String>,
    mime: &str,
) -> Result<BlobFile> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot stat {}", path))?;
    if meta.len() > config.max_upload_size as u64 {
        bail!("{} is {} bytes, over the {} byte upload limit", path, meta.len(), config.max_upload_size);
    }

    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(now_millis);
    let name = name.unwrap_or_else(|| {
        Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string())
    });
    let content = tokio::fs::read(path).await?;

    Ok(BlobFile::new(name, mime, last_modified, content))
}

pub async fn put(
    store: &BlobStore,
    config: &StashConfig,
    key: &str,
    path: &str,
    mime: &str,
    name: Option<String>,
    json: bool,
) -> Result<()> {
    let file = read_local_file(config, path, name, mime).await?;
    let file = store.put(key, file).await?;

    if json {
        println!("{}", serde_json::json!({
            "success": true,
            "key": key,
            "name": file.name,
            "size": file.size(),
        }));
    } else {
        println!("✅ Stored {} ({} bytes) as {}", file.name, file.size(), key);
    }
    Ok(())
}

pub async fn upload(
    store: &BlobStore,
    config: &StashConfig,
    field: &str,
    path: &str,
    mime: &str,
    json: bool,
) -> Result<()> {
    let file = read_local_file(config, path, None, mime).await?;
    let url = blobstash::uploads::upload(store, field, &file).await?;

    if json {
        println!("{}", serde_json::json!({"success": true, "path": url}));
    } else {
        println!("✅ Uploaded {} to {}", file.name, url);
    }
    Ok(())
}

pub async fn get(store: &BlobStore, key: &str, out: Option<&str>, json: bool) -> Result<()> {
    let object = match store.get(key).await? {
        Some(object) => object,
        None => {
            if json {
                println!("{}", serde_json::json!({"error": "not found", "key": key}));
            } else {
                eprintln!("❌ No file stored at {}", key);
            }
            bail!("not found: {}", key);
        }
    };

    match out {
        Some(out) => {
            tokio::fs::write(out, &object.content).await?;
            if json {
                println!("{}", serde_json::json!({
                    "key": key,
                    "metadata": object.metadata,
                    "written_to": out,
                }));
            } else {
                println!("📄 {}", object.metadata.name);
                println!("   Type: {}", object.metadata.mime_type);
                println!("   Size: {} bytes", object.metadata.size);
                println!("   Last modified: {}", object.metadata.last_modified);
                println!("   Written to: {}", out);
            }
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&object.content).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

pub async fn has(store: &BlobStore, key: &str, json: bool) -> Result<()> {
    let exists = store.has(key).await?;
    if json {
        println!("{}", serde_json::json!({"key": key, "exists": exists}));
    } else if exists {
        println!("✅ {} exists", key);
    } else {
        println!("❌ {} does not exist", key);
    }
    Ok(())
}

pub async fn remove(store: &BlobStore, key: &str, json: bool) -> Result<()> {
    store.remove(key).await?;
    if json {
        println!("{}", serde_json::json!({"success": true, "key": key}));
    } else {
        println!("🗑️  Removed {}", key);
    }
    Ok(())
}

fn print_entry(entry: &ListEntry) {
    match (&entry.name, &entry.mime_type, entry.size) {
        (Some(name), Some(mime), Some(size)) => {
            println!("   {}  {} ({}, {} bytes)", entry.key, name, mime, size)
        }
        _ => println!("   {}", entry.key),
    }
}

pub async fn list(store: &BlobStore, options: ListOptions, all: bool, json: bool) -> Result<()> {
    if all {
        let entries = store
            .list_all(options.prefix.as_deref(), options.include_metadata)
            .await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "entries": entries,
                "count": entries.len(),
            }))?);
        } else {
            println!("📋 Stored Files");
            println!("==============");
            if entries.is_empty() {
                println!("   No files found");
            }
            entries.iter().for_each(print_entry);
        }
        return Ok(());
    }

    let page = store.list(&options).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        println!("📋 Stored Files");
        println!("==============");
        if page.entries.is_empty() {
            println!("   No files found");
        }
        page.entries.iter().for_each(print_entry);
        if let Some(cursor) = &page.next_cursor {
            println!("   ... more available, continue with --cursor {}", cursor);
        }
    }
    Ok(())
}
