// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Build configuration, loaded from TOML or JSON keyed on the file
//! extension. The hash component list is the heart of it: the digest is
//! computed over the components in exactly the configured order, so the
//! order is part of the key.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::binary::BinaryData;
use crate::error::SealError;
use crate::smbios::SmbiosFieldRef;

/// Resolved build parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the input EFI binary to embed.
    pub input_file: PathBuf,
    /// Path to the output EFI binary to write.
    pub output_file: Option<PathBuf>,
    /// Folder where to build the code. Defaults to a temporary folder that
    /// is removed when the build finishes.
    pub build_folder: Option<PathBuf>,
    /// Skip generating code.
    #[serde(default)]
    pub skip_gen_code: bool,
    /// Skip extracting the boot source template.
    #[serde(default)]
    pub skip_extract: bool,
    /// Skip calling make.
    #[serde(default)]
    pub skip_make: bool,
    /// Data to include in the hash for encryption.
    pub hash_components: Option<Vec<HashComponent>>,
    /// Path to an SMBIOS dump, as produced by `dmidecode --dump-bin`.
    pub smbios: Option<PathBuf>,
    /// Secure boot keys to enroll when the platform accepts them.
    pub enroll_secure_boot: Option<SecureBootEnroll>,
}

/// Which end of the device or file the offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Start,
    End,
}

/// File windows additionally support hashing the whole current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEdge {
    Start,
    End,
    Full,
}

/// A size that is either known at build time or declared missing, in which
/// case only the firmware-side read contributes to the digest.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Known(u64),
    Marker(MissingMarker),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingMarker {
    Missing,
}

impl SizeValue {
    pub fn known(&self) -> Option<u64> {
        match self {
            SizeValue::Known(v) => Some(*v),
            SizeValue::Marker(_) => None,
        }
    }
}

/// One contribution to the composite fingerprint. Every variant carries
/// what is needed to resolve a build-time value and, separately, to locate
/// the equivalent firmware-time source.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum HashComponent {
    /// Fresh random bytes, embedded verbatim; forces a distinct key per
    /// build even when everything else is static.
    Random { length: usize },
    /// An SMBIOS field, read from the configured dump unless overridden.
    Smbios {
        #[serde(rename = "ref")]
        field: SmbiosFieldRef,
        value: Option<String>,
    },
    /// A persisted firmware variable, scoped by name and vendor GUID.
    Efivar {
        name: String,
        guid: String,
        value: Option<BinaryData>,
    },
    /// Device-path text of the partition the boot image was loaded from.
    BootPartitionDevice { value: String },
    /// Device-path text of the disk underlying the boot partition.
    BootDiskDevice { value: String },
    /// File-path text of the loaded boot image.
    BootFile { value: String },
    /// Capacity of a disk, in bytes.
    DiskSize {
        device: Option<String>,
        value: SizeValue,
    },
    /// A byte window read directly from a disk.
    DiskData {
        device: Option<String>,
        edge: Edge,
        offset: u64,
        value: BinaryData,
    },
    /// Size of a file on a device's root filesystem volume.
    FileSize {
        device: Option<String>,
        file: String,
        value: SizeValue,
    },
    /// A byte window read from a file on a device's root filesystem volume.
    FileData {
        device: Option<String>,
        file: String,
        edge: Option<FileEdge>,
        offset: Option<u64>,
        value: BinaryData,
    },
}

/// Pre-signed authenticated update blobs per trust-anchor slot. All blobs
/// of one slot must decode to the same payload; the firmware tries them in
/// the listed order until one is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecureBootEnroll {
    #[serde(default)]
    pub pk: Vec<BinaryData>,
    #[serde(default)]
    pub kek: Vec<BinaryData>,
    #[serde(default)]
    pub db: Vec<BinaryData>,
    #[serde(default)]
    pub dbx: Vec<BinaryData>,
}

impl Config {
    /// Load a configuration file; `.toml` parses as TOML, anything else as
    /// JSON.
    pub fn load(path: &Path) -> Result<Self, SealError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&text).map_err(|e| SealError::Config(e.to_string()))?
        } else {
            serde_json::from_str(&text).map_err(|e| SealError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the build could only fail on later.
    pub fn validate(&self) -> Result<(), SealError> {
        if self.input_file.as_os_str().is_empty() {
            return Err(SealError::Config("input_file must not be empty".into()));
        }
        for component in self.hash_components.iter().flatten() {
            match component {
                HashComponent::Random { length: 0 } => {
                    return Err(SealError::Config(
                        "random component length must be nonzero".into(),
                    ));
                }
                HashComponent::Efivar { guid, name, .. } => {
                    crate::components::parse_guid(guid).map_err(|_| {
                        SealError::Config(format!("invalid GUID `{guid}` for variable `{name}`"))
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Configured component list, or the default: one 32-byte random secret
    /// plus, when an SMBIOS dump is available, the system serial number and
    /// UUID.
    pub fn effective_components(&self) -> Vec<HashComponent> {
        if let Some(components) = &self.hash_components {
            return components.clone();
        }
        let mut components = vec![HashComponent::Random { length: 32 }];
        if self.smbios.is_some() {
            components.push(HashComponent::Smbios {
                field: SmbiosFieldRef::Named("system-serial-number".into()),
                value: None,
            });
            components.push(HashComponent::Smbios {
                field: SmbiosFieldRef::Named("system-uuid".into()),
                value: None,
            });
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_component_list_from_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "input_file": "payload.efi",
                "hash_components": [
                    { "type": "random", "length": 32 },
                    { "type": "smbios", "ref": "system-uuid" },
                    { "type": "disk-data", "edge": "end", "offset": 0,
                      "value": { "type": "missing", "size": 512 } },
                    { "type": "disk-size", "value": "missing" },
                    { "type": "file-size", "file": "\\EFI\\BOOT\\BOOTX64.EFI", "value": 123456 }
                ]
            }"#,
        )
        .expect("parse");
        let components = config.hash_components.as_deref().expect("components");
        assert_eq!(components.len(), 5);
        assert!(matches!(
            components[3],
            HashComponent::DiskSize {
                value: SizeValue::Marker(MissingMarker::Missing),
                ..
            }
        ));
        assert!(matches!(
            components[4],
            HashComponent::FileSize {
                value: SizeValue::Known(123456),
                ..
            }
        ));
    }

    #[test]
    fn default_components_depend_on_smbios_presence() {
        let bare: Config = serde_json::from_str(r#"{ "input_file": "a.efi" }"#).expect("parse");
        assert_eq!(bare.effective_components().len(), 1);
        let with_dump: Config = serde_json::from_str(
            r#"{ "input_file": "a.efi", "smbios": "dump.bin" }"#,
        )
        .expect("parse");
        assert_eq!(with_dump.effective_components().len(), 3);
    }

    #[test]
    fn invalid_guid_is_rejected() {
        let config: Config = serde_json::from_str(
            r#"{
                "input_file": "a.efi",
                "hash_components": [
                    { "type": "efivar", "name": "Boot0000", "guid": "not-a-guid" }
                ]
            }"#,
        )
        .expect("parse");
        assert!(matches!(config.validate(), Err(SealError::Config(_))));
    }
}
