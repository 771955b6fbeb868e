// CLASSIFICATION: COMMUNITY
// Filename: binary.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Build-time byte sources: literal, file-backed, or deliberately absent.
//!
//! A `missing` datum hashes nothing but still reports its nominal length so
//! size-dependent generated expressions stay correct.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::error::SealError;

/// A byte sequence known now, known later by location, or deliberately
/// absent but sized for layout purposes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BinaryData {
    /// A region of a file on the build host.
    File {
        file: PathBuf,
        offset: Option<u64>,
        size: Option<u64>,
    },
    /// Hex-encoded literal.
    Hex { text: String },
    /// UTF-8 literal.
    Utf8 { text: String },
    /// Raw bytes, written programmatically or as a config byte array.
    Raw { bytes: Vec<u8> },
    /// No build-time value; contributes `size` (default 1) to generated
    /// size expressions and nothing to the digest.
    Missing { size: Option<u64> },
}

const READ_CHUNK: usize = 8192;

/// Feed a datum into the running digest and return the byte count that
/// size-dependent generated code must use. For `missing` data the count is
/// the nominal length and the digest is left untouched.
pub fn hash_data(hash: &mut Sha256, data: &BinaryData) -> Result<u64, SealError> {
    match data {
        BinaryData::Missing { size } => Ok(size.unwrap_or(1)),
        BinaryData::File { file, offset, size } => {
            let mut reader = File::open(file)?;
            reader.seek(SeekFrom::Start(offset.unwrap_or(0)))?;
            let mut remaining = size.unwrap_or(u64::MAX);
            let mut buf = [0u8; READ_CHUNK];
            let mut count = 0u64;
            while remaining > 0 {
                let want = remaining.min(READ_CHUNK as u64) as usize;
                let n = reader.read(&mut buf[..want])?;
                if n == 0 {
                    break;
                }
                hash.update(&buf[..n]);
                count += n as u64;
                remaining -= n as u64;
            }
            Ok(count)
        }
        _ => {
            let bytes = resolve_bytes(data)?;
            hash.update(&bytes);
            Ok(bytes.len() as u64)
        }
    }
}

/// Materialize a datum that must have a concrete value, e.g. an enrollment
/// blob. `missing` is rejected here.
pub fn resolve_bytes(data: &BinaryData) -> Result<Vec<u8>, SealError> {
    match data {
        BinaryData::File { file, offset, size } => {
            let mut reader = File::open(file)?;
            reader.seek(SeekFrom::Start(offset.unwrap_or(0)))?;
            let mut bytes = Vec::new();
            match size {
                Some(size) => {
                    reader.take(*size).read_to_end(&mut bytes)?;
                }
                None => {
                    reader.read_to_end(&mut bytes)?;
                }
            }
            Ok(bytes)
        }
        BinaryData::Hex { text } => hex::decode(text.trim())
            .map_err(|e| SealError::Config(format!("invalid hex literal: {e}"))),
        BinaryData::Utf8 { text } => Ok(text.clone().into_bytes()),
        BinaryData::Raw { bytes } => Ok(bytes.clone()),
        BinaryData::Missing { .. } => Err(SealError::MissingData(
            "binary datum declared missing where a value is required".into(),
        )),
    }
}
