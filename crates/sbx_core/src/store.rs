//! Persistence of sandbox records and generated sources.
//!
//! The file store keeps everything under the workspace:
//! ```text
//! .sbx/
//! ├── sandboxes/<id>.json   # One SandboxRecord per file
//! └── sources/<tool>.txt    # Latest generated source per tool
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};
use crate::types::{SandboxPatch, SandboxRecord};

/// Durable store the orchestrator treats as the source of truth.
#[async_trait]
pub trait SandboxStore: Send + Sync {
    async fn create(&self, record: &SandboxRecord) -> CoreResult<()>;

    /// Apply a partial update and return the updated record.
    async fn update(&self, id: &str, patch: &SandboxPatch) -> CoreResult<SandboxRecord>;

    async fn get(&self, id: &str) -> CoreResult<SandboxRecord>;

    /// All records, newest first.
    async fn list(&self) -> CoreResult<Vec<SandboxRecord>>;

    async fn save_source(&self, tool_id: &str, source: &str) -> CoreResult<()>;

    async fn latest_source(&self, tool_id: &str) -> CoreResult<String>;
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, SandboxRecord>>,
    sources: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn create(&self, record: &SandboxRecord) -> CoreResult<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(CoreError::Storage(format!("Sandbox {} already exists", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &SandboxPatch) -> CoreResult<SandboxRecord> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| CoreError::SandboxNotFound(id.to_string()))?;
        // Validate on a copy so a rejected patch leaves the record untouched.
        let mut updated = record.clone();
        updated.apply(patch)?;
        *record = updated.clone();
        Ok(updated)
    }

    async fn get(&self, id: &str) -> CoreResult<SandboxRecord> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::SandboxNotFound(id.to_string()))
    }

    async fn list(&self) -> CoreResult<Vec<SandboxRecord>> {
        let mut records: Vec<SandboxRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn save_source(&self, tool_id: &str, source: &str) -> CoreResult<()> {
        self.sources.write().insert(tool_id.to_string(), source.to_string());
        Ok(())
    }

    async fn latest_source(&self, tool_id: &str) -> CoreResult<String> {
        self.sources
            .read()
            .get(tool_id)
            .cloned()
            .ok_or_else(|| CoreError::SourceNotFound(tool_id.to_string()))
    }
}

/// JSON files under `<root>/.sbx`.
pub struct FileStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            root: workspace_root.as_ref().join(".sbx"),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sandboxes_dir(&self) -> PathBuf {
        self.root.join("sandboxes")
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.sandboxes_dir().join(format!("{}.json", file_stem(id)))
    }

    fn source_path(&self, tool_id: &str) -> PathBuf {
        self.root.join("sources").join(format!("{}.txt", file_stem(tool_id)))
    }

    async fn read_record(&self, id: &str) -> CoreResult<SandboxRecord> {
        let content = match fs::read_to_string(self.record_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CoreError::SandboxNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_record(&self, record: &SandboxRecord) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&self.record_path(&record.id), json.as_bytes()).await
    }
}

#[async_trait]
impl SandboxStore for FileStore {
    async fn create(&self, record: &SandboxRecord) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.record_path(&record.id)).await? {
            return Err(CoreError::Storage(format!("Sandbox {} already exists", record.id)));
        }
        self.write_record(record).await?;
        debug!("Created sandbox record {}", record.id);
        Ok(())
    }

    async fn update(&self, id: &str, patch: &SandboxPatch) -> CoreResult<SandboxRecord> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record(id).await?;
        record.apply(patch)?;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> CoreResult<SandboxRecord> {
        self.read_record(id).await
    }

    async fn list(&self) -> CoreResult<Vec<SandboxRecord>> {
        let dir = self.sandboxes_dir();
        tokio::task::spawn_blocking(move || scan_records(&dir))
            .await
            .map_err(|e| CoreError::Storage(format!("Listing records failed: {}", e)))?
    }

    async fn save_source(&self, tool_id: &str, source: &str) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.source_path(tool_id), source.as_bytes()).await
    }

    async fn latest_source(&self, tool_id: &str) -> CoreResult<String> {
        match fs::read_to_string(self.source_path(tool_id)).await {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(CoreError::SourceNotFound(tool_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Read every record file in `dir`, newest first.
fn scan_records(dir: &Path) -> CoreResult<Vec<SandboxRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<SandboxRecord>(&content) {
            Ok(record) => records.push(record),
            Err(e) => debug!("Skipping unreadable record {}: {}", path.display(), e),
        }
    }
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
}

/// Write through a temp file and rename so readers never see half a file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// File-name-safe, injective form of an id: ASCII letters, digits, `-` and
/// `_` pass through, every other byte becomes `%XX`.
fn file_stem(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}
