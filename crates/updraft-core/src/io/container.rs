//! Archive container I/O.
//!
//! The engine works on [`Package`] values; a [`Container`] turns them into
//! bytes and back. [`ZipContainer`] is the shipped implementation: entries are
//! written in package order with fixed timestamps, and the package metadata
//! is always the final entry.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::package::{Package, PackageEntry, PackageMetadata};

/// Name of the container metadata entry.
pub const METADATA_ENTRY: &str = "package.json";

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid package metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Archive has no {METADATA_ENTRY} entry")]
    MissingMetadata,

    #[error("Entry name '{0}' is reserved")]
    ReservedName(String),
}

/// Reads and writes packages in some archive format.
pub trait Container: Send + Sync {
    /// Encode `package`, preserving entry order.
    fn write(&self, package: &Package) -> Result<Vec<u8>, ContainerError>;

    /// Decode a package, preserving entry order.
    fn read(&self, bytes: &[u8]) -> Result<Package, ContainerError>;

    /// Entry names in archive order, including the metadata entry.
    fn entry_names(&self, bytes: &[u8]) -> Result<Vec<String>, ContainerError>;
}

impl<T: Container + ?Sized> Container for std::sync::Arc<T> {
    fn write(&self, package: &Package) -> Result<Vec<u8>, ContainerError> {
        (**self).write(package)
    }
    fn read(&self, bytes: &[u8]) -> Result<Package, ContainerError> {
        (**self).read(bytes)
    }
    fn entry_names(&self, bytes: &[u8]) -> Result<Vec<String>, ContainerError> {
        (**self).entry_names(bytes)
    }
}

/// Zip archives with deflate compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipContainer;

impl ZipContainer {
    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
    }
}

impl Container for ZipContainer {
    fn write(&self, package: &Package) -> Result<Vec<u8>, ContainerError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &package.entries {
            if entry.target_path == METADATA_ENTRY {
                return Err(ContainerError::ReservedName(entry.target_path.clone()));
            }
            writer.start_file(entry.target_path.as_str(), Self::options())?;
            writer.write_all(&entry.content)?;
        }

        writer.start_file(METADATA_ENTRY, Self::options())?;
        writer.write_all(&serde_json::to_vec_pretty(&package.metadata)?)?;

        Ok(writer.finish()?.into_inner())
    }

    fn read(&self, bytes: &[u8]) -> Result<Package, ContainerError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut metadata: Option<PackageMetadata> = None;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)?;

            if name == METADATA_ENTRY {
                metadata = Some(serde_json::from_slice(&content)?);
            } else {
                entries.push(PackageEntry::new(name, Bytes::from(content)));
            }
        }

        let metadata = metadata.ok_or(ContainerError::MissingMetadata)?;
        Ok(Package { metadata, entries })
    }

    fn entry_names(&self, bytes: &[u8]) -> Result<Vec<String>, ContainerError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            names.push(archive.by_index_raw(i)?.name().to_string());
        }
        Ok(names)
    }
}
