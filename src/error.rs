// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Error taxonomy for the sealing pipeline. Every variant is fatal at the
//! point it is raised; the generated firmware code, by contrast, degrades
//! gracefully when a runtime source is absent.

use thiserror::Error;

/// Errors produced while sealing a payload.
#[derive(Debug, Error)]
pub enum SealError {
    /// The resolved configuration is invalid; the build never starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The SMBIOS dump is malformed.
    #[error("smbios parse error: {0}")]
    SmbiosParse(String),

    /// A required field or variable has no override and no source to
    /// resolve it, so the digest cannot be computed deterministically.
    #[error("missing data: {0}")]
    MissingData(String),

    /// Enrollment blobs for one trust-anchor slot disagree on the payload.
    #[error("inconsistent enrollment data: {0}")]
    Consistency(String),

    /// The external toolchain failed; never retried.
    #[error("toolchain failure: {0}")]
    Toolchain(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
