use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors from the local key-value store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("IO error on {path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Corrupt store {path:?}: {reason}")]
	Corrupt { path: PathBuf, reason: String },
}

/// Device-local storage, one flat JSON object per namespace.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
	async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError>;
	async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError>;
	async fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError>;
}

/// File-based implementation of KeyValueStore
///
/// Each namespace lives in its own document under the data directory, see
/// [`get_namespace_filename`](Self::get_namespace_filename). Writes go to a synced temporary file
/// that is renamed over the previous document, so a crash never leaves a half-written store behind.
pub struct FileKeyValueStore {
	data_dir: PathBuf,
	// serializes read-modify-write cycles
	write_lock: Mutex<()>,
}

impl FileKeyValueStore {
	pub fn new(data_dir: PathBuf) -> Self {
		Self {
			data_dir,
			write_lock: Mutex::new(()),
		}
	}

	/// `account_<namespace>.json` when the namespace is filename-safe, otherwise
	/// `account_<sanitized>.<digest>.json`. Safe names never contain `.`, so the two forms cannot
	/// meet, and the digest keeps namespaces apart that sanitize to the same text.
	fn get_namespace_filename(&self, namespace: &str) -> PathBuf {
		let is_safe = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
		if !namespace.is_empty() && namespace.chars().all(is_safe) {
			return self.data_dir.join(format!("account_{}.json", namespace));
		}

		let sanitized: String = namespace
			.chars()
			.take(MAX_READABLE_NAMESPACE)
			.map(|c| if is_safe(c) { c } else { '_' })
			.collect();
		let digest = Sha256::digest(namespace.as_bytes());
		self.data_dir
			.join(format!("account_{}.{}.json", sanitized, hex::encode(&digest[..16])))
	}

	async fn read_document(&self, path: &PathBuf) -> Result<Map<String, Value>, StorageError> {
		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
			Err(source) => {
				return Err(StorageError::Io {
					path: path.clone(),
					source,
				});
			}
		};

		match serde_json::from_str::<Value>(&content)? {
			Value::Object(map) => Ok(map),
			other => Err(StorageError::Corrupt {
				path: path.clone(),
				reason: format!("expected an object, found {}", other),
			}),
		}
	}

	async fn write_document(&self, path: &PathBuf, document: Map<String, Value>) -> Result<(), StorageError> {
		let io_error = |source| StorageError::Io {
			path: path.clone(),
			source,
		};

		tokio::fs::create_dir_all(&self.data_dir).await.map_err(io_error)?;

		let content = serde_json::to_string_pretty(&Value::Object(document))?;
		let tmp_path = path.with_extension("json.tmp");
		let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_error)?;
		file.write_all(content.as_bytes()).await.map_err(io_error)?;
		// contents must be on disk before the rename can expose them
		file.sync_all().await.map_err(io_error)?;
		drop(file);

		tokio::fs::rename(&tmp_path, path).await.map_err(io_error)?;
		sync_dir(&self.data_dir).await.map_err(io_error)?;

		debug!("Wrote store document {:?}", path);
		Ok(())
	}
}

/// Readable prefix kept from a namespace that needs hashing.
const MAX_READABLE_NAMESPACE: usize = 32;

/// Persist a rename by syncing the directory that holds the entry.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
	tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
	Ok(())
}

#[async_trait::async_trait]
impl KeyValueStore for FileKeyValueStore {
	async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
		let path = self.get_namespace_filename(namespace);
		let mut document = self.read_document(&path).await?;
		Ok(document.remove(key))
	}

	async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.get_namespace_filename(namespace);

		let mut document = self.read_document(&path).await?;
		document.insert(key.to_string(), value);
		self.write_document(&path, document).await
	}

	async fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.get_namespace_filename(namespace);

		let mut document = self.read_document(&path).await?;
		if document.remove(key).is_some() {
			self.write_document(&path, document).await?;
			info!("Removed {} from {:?}", key, path);
		}
		Ok(())
	}
}

/// In-memory implementation of KeyValueStore
#[derive(Default)]
pub struct MemoryKeyValueStore {
	namespaces: Mutex<HashMap<String, Map<String, Value>>>,
}

impl MemoryKeyValueStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKeyValueStore {
	async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
		let namespaces = self.namespaces.lock().await;
		Ok(namespaces.get(namespace).and_then(|doc| doc.get(key)).cloned())
	}

	async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
		let mut namespaces = self.namespaces.lock().await;
		namespaces
			.entry(namespace.to_string())
			.or_default()
			.insert(key.to_string(), value);
		Ok(())
	}

	async fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
		let mut namespaces = self.namespaces.lock().await;
		if let Some(doc) = namespaces.get_mut(namespace) {
			doc.remove(key);
		}
		Ok(())
	}
}
