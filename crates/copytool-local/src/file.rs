//! Data handle over a local file.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use copytool_core::{DataHandle, LayoutDescriptor};
use tokio::task;

use crate::xattr;

/// A file on the local mount, shared between the coordinator and a worker.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    file: Arc<File>,
}

impl LocalFile {
    /// Open `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(File::open(path)?),
        })
    }

    /// Create or truncate `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be created.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        })
    }

    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&File) -> io::Result<T> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || op(&file))
            .await
            .map_err(io::Error::other)?
    }
}

#[async_trait]
impl DataHandle for LocalFile {
    async fn size(&self) -> io::Result<u64> {
        self.blocking(|file| file.metadata().map(|meta| meta.len()))
            .await
    }

    async fn layout(&self) -> io::Result<Option<LayoutDescriptor>> {
        Ok(None)
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len();
        let chunk = self
            .blocking(move |file| {
                let mut chunk = vec![0; len];
                let read = file.read_at(&mut chunk, offset)?;
                chunk.truncate(read);
                Ok(chunk)
            })
            .await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let data = data.to_vec();
        self.blocking(move |file| file.write_all_at(&data, offset).map(|()| data.len()))
            .await
    }

    async fn set_attr_create(&self, name: &str, value: &[u8]) -> io::Result<()> {
        let name = name.to_string();
        let value = value.to_vec();
        self.blocking(move |file| xattr::set_create(file, &name, &value))
            .await
    }

    async fn get_attr(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let name = name.to_string();
        self.blocking(move |file| xattr::get(file, &name)).await
    }
}
