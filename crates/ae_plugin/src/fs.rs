//! Directory listing used for plugin discovery
//!
//! [`DirListing`] is a lazy view of one directory: every call to
//! [`DirListing::entries`] starts a fresh pass in filesystem order, so a
//! listing can be walked as many times as needed.
//!
//! File names are split on the last `.`: `libwindow.so` has the name
//! `libwindow` and the extension `so`, `.hidden` has an empty name and the
//! extension `hidden`, `README` has no extension.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    path: PathBuf,
    file_name: String,
    is_dir: bool,
}

impl FsEntry {
    /// Describe a single path without listing a directory
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            file_name,
            is_dir: path.is_dir(),
        }
    }

    fn from_dir_entry(entry: fs::DirEntry) -> Self {
        let path = entry.path();
        // Symlinks and unknown types fall back to following the link
        let is_dir = match entry.file_type() {
            Ok(ft) if !ft.is_symlink() => ft.is_dir(),
            _ => path.is_dir(),
        };

        Self {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir,
        }
    }

    /// File name without its extension
    pub fn name(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((name, _)) => name,
            None => &self.file_name,
        }
    }

    /// File name including the extension
    pub fn name_with_ext(&self) -> &str {
        &self.file_name
    }

    /// Extension after the last `.`, if any
    pub fn extension(&self) -> Option<&str> {
        self.file_name.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Directory path joined with the file name
    pub fn full_path(&self) -> &Path {
        &self.path
    }

    /// Check if the entry is a directory
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Size in bytes, 0 if it cannot be read
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    // ========== Fixed-Buffer Accessors ==========
    //
    // Each writer copies the value plus a NUL terminator into `dest` and
    // returns the bytes written including the terminator, or 0 if `dest` is
    // too small. Nothing is written on failure.

    /// Write [`FsEntry::name`] into `dest`
    pub fn write_name(&self, dest: &mut [u8]) -> usize {
        write_terminated(self.name().as_bytes(), dest)
    }

    /// Write [`FsEntry::name_with_ext`] into `dest`
    pub fn write_name_with_ext(&self, dest: &mut [u8]) -> usize {
        write_terminated(self.file_name.as_bytes(), dest)
    }

    /// Write [`FsEntry::extension`] into `dest`; 0 if there is no extension
    pub fn write_extension(&self, dest: &mut [u8]) -> usize {
        match self.extension() {
            Some(ext) => write_terminated(ext.as_bytes(), dest),
            None => 0,
        }
    }

    /// Write [`FsEntry::full_path`] into `dest`
    pub fn write_full_path(&self, dest: &mut [u8]) -> usize {
        write_terminated(self.path.to_string_lossy().as_bytes(), dest)
    }
}

fn write_terminated(value: &[u8], dest: &mut [u8]) -> usize {
    let needed = value.len() + 1;
    if needed > dest.len() {
        return 0;
    }
    dest[..value.len()].copy_from_slice(value);
    dest[value.len()] = 0;
    needed
}

/// Restartable listing of a directory
#[derive(Debug, Clone)]
pub struct DirListing {
    root: PathBuf,
}

impl DirListing {
    /// Create a listing for `path`; nothing is read until iteration
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    /// Path being listed
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if the listed path is a directory
    pub fn is_dir(&self) -> bool {
        self.root.is_dir()
    }

    /// Start a new pass over the directory
    ///
    /// Entries that cannot be read mid-pass are skipped.
    pub fn entries(&self) -> io::Result<impl Iterator<Item = FsEntry>> {
        let root = self.root.clone();
        let iter = fs::read_dir(&self.root)?;

        Ok(iter.filter_map(move |entry| match entry {
            Ok(entry) => Some(FsEntry::from_dir_entry(entry)),
            Err(e) => {
                log::debug!("Skipping unreadable entry in {}: {}", root.display(), e);
                None
            }
        }))
    }
}
