// src/engine/io.rs
//
// I/O for the acquisition stage: Source enum, file picks, raw image sources

use crate::engine::camera::CapturedFrame;
use crate::error::IntakeError;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bytes behind a picked file - in-memory data, a memory-mapped file, or a
/// path that is read only when needed.
#[derive(Clone, Debug)]
pub enum Source {
    /// In-memory image data (e.g. an upload body or a drag-and-drop payload)
    Memory(Arc<Vec<u8>>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Arc<Mmap>),
    /// File path for lazy loading
    Path(PathBuf),
}

impl Source {
    /// Load the actual bytes from the source
    /// Note: For Mapped sources, this copies. Prefer as_bytes() when possible.
    pub fn load(&self) -> std::result::Result<Arc<Vec<u8>>, IntakeError> {
        match self {
            Source::Memory(data) => Ok(data.clone()),
            Source::Mapped(mmap) => Ok(Arc::new(mmap.as_ref().to_vec())),
            Source::Path(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        IntakeError::file_not_found(path.to_string_lossy().to_string())
                    } else {
                        IntakeError::file_read_failed(path.to_string_lossy().to_string(), e)
                    }
                })?;
                Ok(Arc::new(data))
            }
        }
    }

    /// Get the bytes directly - works for both Memory and Mapped sources
    /// Returns None only for Path sources (which need to be loaded first)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Source::Memory(data) => Some(data.as_slice()),
            Source::Mapped(mmap) => Some(mmap.as_ref()),
            Source::Path(_) => None,
        }
    }

    /// Length of the source data. Path sources ask the file system.
    pub fn len(&self) -> u64 {
        match self {
            Source::Memory(data) => data.len() as u64,
            Source::Mapped(mmap) => mmap.len() as u64,
            Source::Path(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory-map a file on disk.
    pub fn map_path(path: impl AsRef<Path>) -> std::result::Result<Self, IntakeError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IntakeError::file_not_found(display.clone())
            } else {
                IntakeError::file_read_failed(display.clone(), e)
            }
        })?;
        let len = file
            .metadata()
            .map_err(|e| IntakeError::file_read_failed(display.clone(), e))?
            .len();
        // Mapping a zero-length file fails on some platforms; report it as empty instead.
        if len == 0 {
            return Err(IntakeError::EmptySource);
        }

        // Safety: the picked file is treated as read-only for the lifetime of the map.
        // A concurrent writer truncating it would be a caller bug.
        let mmap =
            unsafe { Mmap::map(&file).map_err(|e| IntakeError::mmap_failed(display, e))? };
        Ok(Source::Mapped(Arc::new(mmap)))
    }
}

/// A single file chosen through the file picker.
#[derive(Clone, Debug)]
pub struct PickedFile {
    source: Source,
    name: Option<String>,
}

impl PickedFile {
    pub fn from_bytes(bytes: Vec<u8>, name: Option<String>) -> Self {
        Self {
            source: Source::Memory(Arc::new(bytes)),
            name,
        }
    }

    /// Open a file from disk (memory-mapped). The file name becomes the display name.
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, IntakeError> {
        let path = path.as_ref();
        let source = Source::map_path(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        Ok(Self { source, name })
    }

    /// Path source that is read only when decoded.
    pub fn lazy(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        Self {
            source: Source::Path(path),
            name,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Informational "large file" flag for the UI. Never blocks the pipeline.
    pub fn is_large(&self, threshold_bytes: u64) -> bool {
        self.len() > threshold_bytes
    }
}

/// Raw input to the pipeline: a picked file or a captured camera still.
#[derive(Debug)]
pub enum RawImageSource {
    File(PickedFile),
    Frame(CapturedFrame),
}

impl From<PickedFile> for RawImageSource {
    fn from(file: PickedFile) -> Self {
        RawImageSource::File(file)
    }
}

impl From<CapturedFrame> for RawImageSource {
    fn from(frame: CapturedFrame) -> Self {
        RawImageSource::Frame(frame)
    }
}
