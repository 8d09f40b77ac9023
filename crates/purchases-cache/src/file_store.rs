//! Directory-backed key-value store.
//!
//! One file per key. File names are a fixed-length digest of the key, so
//! key length never runs into file-name limits. Each file starts with its
//! own key (length-prefixed) followed by the value, which lets prefix
//! listing recover keys. Writes go to a temporary sibling first and are
//! renamed into place.

use purchases_core::{KeyValueStore, StoreError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "entry";
const KEY_LEN_BYTES: usize = 4;

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_seq: AtomicU64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_error(&root.display().to_string(), source))?;
        debug!(root = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_stem(key), ENTRY_EXTENSION))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes = match fs::read(self.path_for(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(key, e)),
        };

        match decode_entry(&bytes) {
            Some((stored_key, value)) if stored_key == key => Ok(Some(value.to_vec())),
            Some((stored_key, _)) => {
                warn!(key, stored_key, "digest collision in file store; treating as absent");
                Ok(None)
            }
            None => Err(io_error(
                key,
                io::Error::new(io::ErrorKind::InvalidData, "corrupt store entry"),
            )),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let target = self.path_for(key);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let staging = self.root.join(format!(".{}.{}.tmp", file_stem(key), seq));

        let write = || -> io::Result<()> {
            let contents = encode_entry(key, value)?;
            let mut file = fs::File::create(&staging)?;
            file.write_all(&contents)?;
            file.sync_all()?;
            fs::rename(&staging, &target)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&staging);
            io_error(key, e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(prefix, e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(prefix, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Removed concurrently.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(prefix, e)),
            };
            let Some((key, _)) = decode_entry(&bytes) else {
                warn!(path = %path.display(), "skipping corrupt store entry");
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

fn file_stem(key: &str) -> String {
    hex::encode(blake3::hash(key.as_bytes()).as_bytes())
}

fn encode_entry(key: &str, value: &[u8]) -> io::Result<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "key too long"))?;
    let mut contents = Vec::with_capacity(KEY_LEN_BYTES + key.len() + value.len());
    contents.extend_from_slice(&key_len.to_be_bytes());
    contents.extend_from_slice(key.as_bytes());
    contents.extend_from_slice(value);
    Ok(contents)
}

fn decode_entry(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let len_bytes: [u8; KEY_LEN_BYTES] = bytes.get(..KEY_LEN_BYTES)?.try_into().ok()?;
    let key_end = KEY_LEN_BYTES.checked_add(u32::from_be_bytes(len_bytes) as usize)?;
    let key = bytes.get(KEY_LEN_BYTES..key_end)?;
    let value = bytes.get(key_end..)?;
    Some((std::str::from_utf8(key).ok()?, value))
}

fn io_error(key: &str, source: io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}
