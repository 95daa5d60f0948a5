//! Loader for the raw CSV source.
//!
//! Reads the file once, fingerprints the exact bytes it read and parses
//! those same bytes, so a fingerprint always describes the content it is
//! published with.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::{parse_bytes_auto, ParseResult};
use crate::error::{LoadError, LoadResult};
use crate::models::{Fingerprint, RawRecord};

/// SHA-256 hex digest of `bytes`.
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::new(hex::encode(Sha256::digest(bytes)))
}

/// CSV file information
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub row_count: usize,
}

/// Raw bytes of the source together with their fingerprint.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
}

impl SourceSnapshot {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let fingerprint = fingerprint_bytes(&bytes);
        Self { bytes, fingerprint }
    }

    /// Parse the captured bytes into raw records.
    pub fn parse(&self) -> LoadResult<LoadedSource> {
        let ParseResult {
            records,
            encoding,
            delimiter,
            headers,
        } = parse_bytes_auto(&self.bytes)?;

        Ok(LoadedSource {
            info: SourceInfo {
                encoding,
                delimiter,
                row_count: records.len(),
                headers,
            },
            records,
            fingerprint: self.fingerprint.clone(),
        })
    }
}

/// Parsed source rows and the fingerprint of the bytes they came from.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub records: Vec<RawRecord>,
    pub fingerprint: Fingerprint,
    pub info: SourceInfo,
}

/// A row-oriented CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the source file currently exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the raw bytes and fingerprint them.
    pub fn read(&self) -> LoadResult<SourceSnapshot> {
        let bytes = std::fs::read(&self.path).map_err(|e| LoadError::from_io(&self.path, e))?;
        Ok(SourceSnapshot::from_bytes(bytes))
    }

    /// Fingerprint of the current content.
    pub fn fingerprint(&self) -> LoadResult<Fingerprint> {
        self.read().map(|snapshot| snapshot.fingerprint)
    }

    /// Read and parse the source: `(records, fingerprint)` plus metadata.
    pub fn load(&self) -> LoadResult<LoadedSource> {
        self.read()?.parse()
    }
}
