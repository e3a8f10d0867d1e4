//! Byte-level access to stored chunks.
//!
//! A source knows nothing about points: it maps a [`ChunkId`] to the raw
//! bytes stored under that id's key. Decoding happens in the chunk reader.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use memmap2::Mmap;
use parking_lot::RwLock;

use crate::errors::{CloudError, CloudResult};
use crate::tree::ChunkId;

/// Storage backend consulted when a chunk must be materialized.
///
/// Implementations must be shareable across the cache's fetch threads.
pub trait ChunkSource: Send + Sync {
    /// Location of the index, used to scope cache entries.
    fn path(&self) -> &str;

    /// Raw bytes of one chunk. A missing chunk is
    /// [`CloudError::ChunkNotFound`].
    fn get(&self, id: ChunkId) -> CloudResult<Vec<u8>>;

    /// Raw bytes of a named index file such as the metadata or the id list,
    /// or `None` if the file does not exist.
    fn get_file(&self, name: &str) -> CloudResult<Option<Vec<u8>>>;
}

/// Chunks held in memory, keyed by id.
pub struct MemorySource {
    path: String,
    chunks: RwLock<HashMap<ChunkId, Arc<Vec<u8>>>>,
    files: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(path: impl Into<String>) -> MemorySource {
        MemorySource {
            path: path.into(),
            chunks: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, id: ChunkId, bytes: Vec<u8>) {
        self.chunks.write().insert(id, Arc::new(bytes));
    }

    /// Stores a named index file.
    pub fn put_file(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(name.into(), Arc::new(bytes));
    }

    /// Names of every stored index file.
    pub fn file_names(&self) -> BTreeSet<String> {
        self.files.read().keys().cloned().collect()
    }

    pub fn remove(&self, id: ChunkId) -> bool {
        self.chunks.write().remove(&id).is_some()
    }

    /// Ids of every stored chunk.
    pub fn ids(&self) -> BTreeSet<ChunkId> {
        self.chunks.read().keys().copied().collect()
    }

    /// Number of successful and failed `get` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ChunkSource for MemorySource {
    fn path(&self) -> &str {
        &self.path
    }

    fn get(&self, id: ChunkId) -> CloudResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.chunks
            .read()
            .get(&id)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or(CloudError::ChunkNotFound(id))
    }

    fn get_file(&self, name: &str) -> CloudResult<Option<Vec<u8>>> {
        Ok(self
            .files
            .read()
            .get(name)
            .map(|bytes| bytes.as_ref().clone()))
    }
}

/// Chunks stored as files named by their decimal id inside one directory.
pub struct FsSource {
    dir: PathBuf,
    path: String,
}

impl FsSource {
    pub fn new(dir: impl AsRef<Path>) -> FsSource {
        let dir = dir.as_ref().to_path_buf();
        FsSource {
            path: dir.to_string_lossy().into_owned(),
            dir,
        }
    }

    fn chunk_path(&self, id: ChunkId) -> PathBuf {
        self.dir.join(id.key())
    }

    /// Writes one chunk file, replacing any existing one.
    pub fn put(&self, id: ChunkId, bytes: &[u8]) -> CloudResult<()> {
        std::fs::write(self.chunk_path(id), bytes)?;
        Ok(())
    }

    /// Writes a named index file, replacing any existing one.
    pub fn put_file(&self, name: &str, bytes: &[u8]) -> CloudResult<()> {
        std::fs::write(self.dir.join(name), bytes)?;
        Ok(())
    }

    /// Ids of every chunk file in the directory. Files whose names are not
    /// decimal ids are ignored.
    pub fn ids(&self) -> CloudResult<BTreeSet<ChunkId>> {
        let mut ids = BTreeSet::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                ids.insert(ChunkId::new(id));
            }
        }
        debug!("Found {} chunk files in {}", ids.len(), self.path);
        Ok(ids)
    }
}

impl ChunkSource for FsSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn get(&self, id: ChunkId) -> CloudResult<Vec<u8>> {
        let file = match File::open(self.chunk_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CloudError::ChunkNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };

        if file.metadata()?.len() == 0 {
            return Ok(Vec::new());
        }

        // SAFETY: chunk files are written once and never modified while an
        // index is being read.
        let map = unsafe { Mmap::map(&file)? };
        Ok(map.to_vec())
    }

    fn get_file(&self, name: &str) -> CloudResult<Option<Vec<u8>>> {
        match std::fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new("mem://index");
        source.put(ChunkId::new(9), vec![1, 2, 3]);

        assert_eq!(source.path(), "mem://index");
        assert_eq!(source.get(ChunkId::new(9)).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            source.get(ChunkId::new(10)),
            Err(CloudError::ChunkNotFound(_))
        ));
        assert_eq!(source.reads(), 2);
        assert_eq!(source.ids().len(), 1);
        assert!(source.remove(ChunkId::new(9)));
        assert!(source.ids().is_empty());

        source.put_file("ids.json", b"[9]".to_vec());
        assert_eq!(source.get_file("ids.json").unwrap(), Some(b"[9]".to_vec()));
        assert_eq!(source.get_file("scales.json").unwrap(), None);
        assert_eq!(source.file_names().len(), 1);
        assert_eq!(source.reads(), 2);
    }

    #[test]
    fn test_fs_source() {
        let dir = tempdir().unwrap();
        let source = FsSource::new(dir.path());
        source.put(ChunkId::new(73), &[5u8; 40]).unwrap();
        source.put(ChunkId::new(74), &[]).unwrap();
        source.put_file("metadata.json", b"{}").unwrap();

        assert_eq!(source.get(ChunkId::new(73)).unwrap(), vec![5u8; 40]);
        assert!(source.get(ChunkId::new(74)).unwrap().is_empty());
        assert!(matches!(
            source.get(ChunkId::new(75)),
            Err(CloudError::ChunkNotFound(_))
        ));

        let ids: Vec<ChunkId> = source.ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec![ChunkId::new(73), ChunkId::new(74)]);

        assert_eq!(source.get_file("metadata.json").unwrap(), Some(b"{}".to_vec()));
        assert!(source.get_file("scales.json").unwrap().is_none());
    }
}
