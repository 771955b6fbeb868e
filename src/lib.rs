// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! efiseal: encrypt an EFI binary under a key derived from machine-specific
//! state and generate the pre-boot source that re-derives the key.
//!
//! The build host and the generated firmware code compute the same SHA-256
//! digest over the same ordered byte stream from two different worlds; the
//! word-swapped digest is the AES-256-CBC key for the embedded payload.

/// Byte sources for literals, file regions and deliberately absent data.
pub mod binary;

/// Hash component registry: one build-digest/firmware-codegen pair per kind.
pub mod components;

/// Configuration schema and loading.
pub mod config;

/// Structured C source emission.
pub mod emit;

/// Error taxonomy.
pub mod error;

/// Code generation orchestrator.
pub mod gencode;

/// Build pipeline: codegen, template extraction, make.
pub mod pipeline;

/// Secure-boot trust-anchor enrollment codegen.
pub mod secureboot;

/// SMBIOS dump parsing and field resolution.
pub mod smbios;

pub use config::Config;
pub use error::SealError;
pub use pipeline::build;
