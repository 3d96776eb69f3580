use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Source of named asset files.
pub trait FileSystem {
    fn open(&self, name: &str) -> Option<Stream>;
    fn exists(&self, name: &str) -> bool;
}

/// Random-access byte stream over one named asset. Every read maps I/O
/// faults to a fatal error carrying the asset name.
pub struct Stream {
    name: String,
    inner: Box<dyn ReadSeek>,
    size: usize,
}

impl Stream {
    pub fn new(name: &str, mut inner: Box<dyn ReadSeek>) -> std::io::Result<Self> {
        let size = inner.seek(SeekFrom::End(0))? as usize;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            name: name.to_string(),
            inner,
            size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn io_err(&self, source: std::io::Error) -> Error {
        Error::Io {
            name: self.name.clone(),
            source,
        }
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|e| self.io_err(e))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).map_err(|e| self.io_err(e))
    }

    /// Reads `len` bytes into a fresh buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads the whole stream from the current position to the end.
    pub fn read_rest(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner
            .read_to_end(&mut buf)
            .map_err(|e| self.io_err(e))?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.inner.read_u8().map_err(|e| self.io_err(e))
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.inner
            .read_u16::<LittleEndian>()
            .map_err(|e| self.io_err(e))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.inner
            .read_u16::<BigEndian>()
            .map_err(|e| self.io_err(e))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.inner
            .read_u32::<LittleEndian>()
            .map_err(|e| self.io_err(e))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.inner
            .read_u32::<BigEndian>()
            .map_err(|e| self.io_err(e))
    }
}

/// Assets laid out as plain files under one directory.
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSystem for DirFileSystem {
    fn open(&self, name: &str) -> Option<Stream> {
        let file = File::open(self.root.join(name)).ok()?;
        Stream::new(name, Box::new(file)).ok()
    }

    fn exists(&self, name: &str) -> bool {
        self.root.join(name).is_file()
    }
}
