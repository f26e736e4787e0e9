use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{
    validate_blob_path, RandomReadFile, StorageBackend, StoreError, WriteFile,
};

/// Filesystem-backed blob storage rooted at a directory.
///
/// Blob paths are forward-slash keys resolved under the root; writes land in
/// a temp file and become visible atomically on `save`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        validate_blob_path(path)?;
        Ok(self.root.join(path))
    }
}

fn classify(path: &str, err: std::io::Error) -> StoreError {
    match err.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
        std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::WouldBlock => StoreError::Transient {
            path: path.to_string(),
            source: err,
        },
        _ => StoreError::Io {
            path: path.to_string(),
            source: err,
        },
    }
}

impl StorageBackend for FsStorage {
    fn random_read(&self, path: &str) -> Result<Box<dyn RandomReadFile>, StoreError> {
        let full = self.resolve(path)?;
        let file = File::open(&full).map_err(|e| classify(path, e))?;
        Ok(Box::new(FsReadFile {
            file,
            path: path.to_string(),
        }))
    }

    fn write(&self, path: &str) -> Result<Box<dyn WriteFile>, StoreError> {
        let full = self.resolve(path)?;
        let parent = full
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        std::fs::create_dir_all(parent).map_err(|e| classify(path, e))?;

        let suffix = format!("tmp.{}.{}", std::process::id(), unix_time_ms());
        let file_name = full
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let mut tmp = full.clone();
        tmp.set_file_name(format!("{file_name}.{suffix}"));

        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)
            .map_err(|e| classify(path, e))?;

        Ok(Box::new(FsWriteFile {
            file,
            tmp,
            target: full,
            path: path.to_string(),
        }))
    }
}

struct FsReadFile {
    file: File,
    path: String,
}

impl RandomReadFile for FsReadFile {
    fn size(&mut self) -> Result<u64, StoreError> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| classify(&self.path, e))?;
        Ok(meta.len())
    }

    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| classify(&self.path, e))?;
        self.file
            .read_exact(buf)
            .map_err(|e| classify(&self.path, e))
    }
}

struct FsWriteFile {
    file: File,
    tmp: PathBuf,
    target: PathBuf,
    path: String,
}

impl WriteFile for FsWriteFile {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.file
            .write_all(bytes)
            .map_err(|e| classify(&self.path, e))
    }

    fn save(mut self: Box<Self>) -> Result<(), StoreError> {
        self.file.flush().map_err(|e| classify(&self.path, e))?;
        self.file.sync_all().map_err(|e| classify(&self.path, e))?;
        std::fs::rename(&self.tmp, &self.target).map_err(|e| classify(&self.path, e))
    }
}

impl Drop for FsWriteFile {
    fn drop(&mut self) {
        // Abandoned writer: leave the target untouched, discard the temp.
        let _ = std::fs::remove_file(&self.tmp);
    }
}

fn unix_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(test_name: &str) -> anyhow::Result<PathBuf> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "reel-store-{}-{}-{}",
            test_name,
            std::process::id(),
            unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }

    #[test]
    fn write_then_positioned_read() -> anyhow::Result<()> {
        let root = temp_root("write-read")?;
        let storage = FsStorage::new(root.clone());

        let mut writer = storage.write("job/video/frame/0")?;
        writer.write_all(b"hello ")?;
        writer.write_all(b"frames")?;
        writer.save()?;

        let mut reader = storage.random_read("job/video/frame/0")?;
        assert_eq!(reader.size()?, 12);
        let mut buf = [0u8; 6];
        reader.read_exact_at(6, &mut buf)?;
        assert_eq!(&buf, b"frames");

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn unsaved_writes_are_invisible() -> anyhow::Result<()> {
        let root = temp_root("unsaved")?;
        let storage = FsStorage::new(root.clone());

        {
            let mut writer = storage.write("job/blob")?;
            writer.write_all(b"partial")?;
            // dropped without save
        }
        let err = match storage.random_read("job/blob") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, StoreError::NotFound(_)));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[test]
    fn missing_blob_maps_to_not_found() -> anyhow::Result<()> {
        let root = temp_root("missing")?;
        let storage = FsStorage::new(root.clone());
        let err = match storage.random_read("job/absent") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, StoreError::NotFound(_)));
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
