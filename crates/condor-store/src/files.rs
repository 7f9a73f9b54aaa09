use crate::layout::StoreLayout;
use crate::{fsync_dir, write_atomic, StoreError};
use std::fs::{self, File};
use std::io::{self, Read};
use tempfile::NamedTempFile;

/// A file opened for reading out of the content cache.
pub struct StoredFile {
    pub reader: Box<dyn Read + Send>,
    pub size: u64,
}

impl StoredFile {
    pub fn into_bytes(mut self) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::with_capacity(usize::try_from(self.size).unwrap_or(0));
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFile").field("size", &self.size).finish()
    }
}

/// Durable file storage keyed by (channel, channel-relative path).
pub trait ContentStore: Send + Sync {
    fn exists(&self, channel: &str, path: &str) -> Result<bool, StoreError>;

    /// Store `data`, replacing any previous content.
    fn put(&self, channel: &str, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Stream `reader` into the store. Returns the number of bytes written.
    /// The previous content stays visible until the write completes.
    fn put_reader(
        &self,
        channel: &str,
        path: &str,
        reader: &mut dyn Read,
    ) -> Result<u64, StoreError>;

    fn open(&self, channel: &str, path: &str) -> Result<StoredFile, StoreError>;
}

/// Filesystem-backed [`ContentStore`] under `{root}/files/`.
pub struct FileStore {
    layout: StoreLayout,
}

impl FileStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }
}

impl ContentStore for FileStore {
    fn exists(&self, channel: &str, path: &str) -> Result<bool, StoreError> {
        Ok(self.layout.file_path(channel, path)?.is_file())
    }

    fn put(&self, channel: &str, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let dest = self.layout.file_path(channel, path)?;
        write_atomic(&dest, data)?;
        tracing::debug!("stored {channel}/{path} ({} bytes)", data.len());
        Ok(())
    }

    fn put_reader(
        &self,
        channel: &str,
        path: &str,
        reader: &mut dyn Read,
    ) -> Result<u64, StoreError> {
        let dest = self.layout.file_path(channel, path)?;
        let dir = dest
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_owned()))?
            .to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        let written = io::copy(reader, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        tracing::debug!("stored {channel}/{path} ({written} bytes, streamed)");
        Ok(written)
    }

    fn open(&self, channel: &str, path: &str) -> Result<StoredFile, StoreError> {
        let full = self.layout.file_path(channel, path)?;
        let file = match File::open(&full) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::FileNotFound {
                    channel: channel.to_owned(),
                    path: path.to_owned(),
                })
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(StoreError::FileNotFound {
                channel: channel.to_owned(),
                path: path.to_owned(),
            });
        }
        Ok(StoredFile {
            reader: Box::new(file),
            size: meta.len(),
        })
    }
}
