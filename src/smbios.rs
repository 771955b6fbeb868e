// CLASSIFICATION: COMMUNITY
// Filename: smbios.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! SMBIOS dump parsing and field resolution.
//!
//! Accepts the raw binary produced by `dmidecode --dump-bin`: either a
//! 32-bit (`_SM_`) or 64-bit (`_SM3_`) entry point followed by the table
//! stream, or a bare table stream with no entry point at all. Tables are
//! indexed by type (duplicates legal) and by handle (duplicates fatal).

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::SealError;

/// One parsed SMBIOS structure.
#[derive(Debug, Clone)]
pub struct SmbiosTable {
    pub table_type: u8,
    pub handle: u16,
    /// Formatted area, including the four header bytes.
    pub structure: Vec<u8>,
    /// Unformatted string set, referenced 1-based from structure fields.
    pub strings: Vec<String>,
}

/// Parsed snapshot of an SMBIOS dump.
#[derive(Debug, Default)]
pub struct SmbiosTables {
    pub tables: Vec<SmbiosTable>,
    by_type: HashMap<u8, Vec<usize>>,
    by_handle: HashMap<u16, usize>,
}

/// Field width selector. `string` fields resolve through the string set;
/// everything else is a fixed-width read from the formatted area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmbiosFieldKind {
    Byte,
    Word,
    Dword,
    Qword,
    String,
    Uuid,
}

impl SmbiosFieldKind {
    pub fn size(self) -> u8 {
        match self {
            SmbiosFieldKind::Byte | SmbiosFieldKind::String => 1,
            SmbiosFieldKind::Word => 2,
            SmbiosFieldKind::Dword => 4,
            SmbiosFieldKind::Qword => 8,
            SmbiosFieldKind::Uuid => 16,
        }
    }
}

/// Table selector as written in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SmbiosTableRef {
    Number(u8),
    Named(String),
    Handle {
        handle: u16,
    },
    TypeIndex {
        #[serde(rename = "type")]
        table_type: u8,
        index: Option<usize>,
    },
}

/// Field selector as written in the configuration: a well-known name or an
/// explicit table/offset/type triple.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SmbiosFieldRef {
    Named(String),
    Details(SmbiosFieldDetails),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmbiosFieldDetails {
    pub table: SmbiosTableRef,
    pub offset: u8,
    #[serde(rename = "type")]
    pub kind: SmbiosFieldKind,
}

/// Fully resolved table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTableRef {
    Handle(u16),
    TypeIndex { table_type: u8, index: usize },
}

/// Fully resolved field selector.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedFieldRef {
    pub table: ResolvedTableRef,
    pub offset: u8,
    pub kind: SmbiosFieldKind,
}

/// Structure type numbers for the well-known table names.
const TABLE_NAMES: &[(&str, u8)] = &[
    ("Platform Firmware", 0),
    ("System", 1),
    ("Baseboard", 2),
    ("Chassis", 3),
    ("Processor", 4),
    ("Memory Controller", 5),
    ("Memory Module", 6),
    ("Cache", 7),
    ("Port Connector", 8),
    ("System Slots", 9),
    ("Onboard Devices", 10),
    ("OEM Strings", 11),
    ("System Configuration Options", 12),
    ("Firmware Language", 13),
    ("Group Associations", 14),
    ("System Event Log", 15),
    ("Physical Memory Array", 16),
    ("Memory Device", 17),
    ("32-bit Memory Error", 18),
    ("Memory Array Mapped Address", 19),
    ("Memory Device Mapped Address", 20),
    ("Built-in Pointing Device", 21),
    ("Portable Battery", 22),
    ("System Reset", 23),
    ("Hardware Security", 24),
    ("System Power Controls", 25),
    ("Voltage Probe", 26),
    ("Cooling Device", 27),
    ("Temperature Probe", 28),
    ("Electrical Current Probe", 29),
    ("Out-of-band Remote Access", 30),
    ("Boot Integrity Services", 31),
    ("System Boot", 32),
    ("64-bit Memory Error", 33),
    ("Management Device", 34),
    ("Management Device Component", 35),
    ("Management Device Threshold Data", 36),
    ("Memory Channel", 37),
    ("IPMI Device", 38),
    ("Power Supply", 39),
    ("Additional Information", 40),
    ("Onboard Devices Extended Information", 41),
    ("Management Controller Host Interface", 42),
    ("TPM Device", 43),
    ("Processor Additional Information", 44),
    ("Firmware Inventory", 45),
    ("String Property", 46),
];

/// (name, table type, offset, width) for the well-known field names.
const FIELD_NAMES: &[(&str, u8, u8, SmbiosFieldKind)] = &[
    ("bios-vendor", 0, 0x4, SmbiosFieldKind::String),
    ("bios-version", 0, 0x5, SmbiosFieldKind::String),
    ("bios-release-date", 0, 0x8, SmbiosFieldKind::String),
    ("bios-revision", 0, 0x14, SmbiosFieldKind::Word),
    ("system-manufacturer", 1, 0x4, SmbiosFieldKind::String),
    ("system-product-name", 1, 0x5, SmbiosFieldKind::String),
    ("system-version", 1, 0x6, SmbiosFieldKind::String),
    ("system-serial-number", 1, 0x7, SmbiosFieldKind::String),
    ("system-uuid", 1, 0x8, SmbiosFieldKind::Uuid),
    ("system-sku-number", 1, 0x19, SmbiosFieldKind::String),
    ("system-family", 1, 0x1a, SmbiosFieldKind::String),
    ("baseboard-manufacturer", 2, 0x4, SmbiosFieldKind::String),
    ("baseboard-product-name", 2, 0x5, SmbiosFieldKind::String),
    ("baseboard-version", 2, 0x6, SmbiosFieldKind::String),
    ("baseboard-serial-number", 2, 0x7, SmbiosFieldKind::String),
    ("baseboard-asset-tag", 2, 0x8, SmbiosFieldKind::String),
    ("chassis-manufacturer", 3, 0x4, SmbiosFieldKind::String),
    ("chassis-version", 3, 0x6, SmbiosFieldKind::String),
    ("chassis-serial-number", 3, 0x7, SmbiosFieldKind::String),
    ("chassis-asset-tag", 3, 0x8, SmbiosFieldKind::String),
    ("processor-manufacturer", 4, 0x7, SmbiosFieldKind::String),
    ("processor-version", 4, 0x10, SmbiosFieldKind::String),
];

fn parse_err(msg: impl Into<String>) -> SealError {
    SealError::SmbiosParse(msg.into())
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, SealError> {
    let bytes: [u8; 2] = buf
        .get(at..at + 2)
        .ok_or_else(|| parse_err("truncated smbios dump"))?
        .try_into()
        .unwrap();
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, SealError> {
    let bytes: [u8; 4] = buf
        .get(at..at + 4)
        .ok_or_else(|| parse_err("truncated smbios dump"))?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(buf: &[u8], at: usize) -> Result<u64, SealError> {
    let bytes: [u8; 8] = buf
        .get(at..at + 8)
        .ok_or_else(|| parse_err("truncated smbios dump"))?
        .try_into()
        .unwrap();
    Ok(u64::from_le_bytes(bytes))
}

/// Parse an SMBIOS dump into an indexed table collection.
pub fn parse_smbios(buffer: &[u8]) -> Result<SmbiosTables, SealError> {
    let v3 = buffer.get(0..5) == Some(b"_SM3_");
    let v2 = !v3 && buffer.get(0..4) == Some(b"_SM_");
    let mut position = 0usize;
    if v3 || v2 {
        let (max_size, address) = if v3 {
            (u64::from(read_u32(buffer, 0x0c)?), read_u64(buffer, 0x10)?)
        } else {
            (
                u64::from(read_u16(buffer, 0x16)?),
                u64::from(read_u16(buffer, 0x18)?),
            )
        };
        // Both header fields are untrusted; a wrapping sum must fail the
        // size check, not pass it.
        if address.checked_add(max_size) != Some(buffer.len() as u64) {
            return Err(parse_err("unexpected smbios dump size"));
        }
        position = address as usize;
    }

    let mut tables = SmbiosTables::default();
    while position < buffer.len() {
        let length = *buffer
            .get(position + 1)
            .ok_or_else(|| parse_err("truncated structure header"))? as usize;
        if length < 4 {
            return Err(parse_err("structure shorter than its own header"));
        }
        let structure = buffer
            .get(position..position + length)
            .ok_or_else(|| parse_err("structure exceeds dump"))?
            .to_vec();
        position += length;

        let mut strings = Vec::new();
        loop {
            let terminator = buffer[position..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| position + p)
                .ok_or_else(|| parse_err("missing string terminator"))?;
            if terminator == position {
                if strings.is_empty() {
                    // A structure with no strings still ends on two zeros.
                    position += 1;
                    if buffer.get(position).copied() != Some(0) {
                        return Err(parse_err("expected double terminator"));
                    }
                }
                position += 1;
                break;
            }
            strings.push(String::from_utf8_lossy(&buffer[position..terminator]).into_owned());
            position = terminator + 1;
        }

        let table = SmbiosTable {
            table_type: structure[0],
            handle: u16::from_le_bytes([structure[2], structure[3]]),
            structure,
            strings,
        };
        let index = tables.tables.len();
        if tables.by_handle.insert(table.handle, index).is_some() {
            return Err(parse_err(format!(
                "duplicate handle {:#x} in smbios dump",
                table.handle
            )));
        }
        tables.by_type.entry(table.table_type).or_default().push(index);
        tables.tables.push(table);
    }
    Ok(tables)
}

/// Resolve a well-known or explicit table selector. Unknown names are a
/// configuration error.
pub fn resolve_table(table: &SmbiosTableRef) -> Result<ResolvedTableRef, SealError> {
    Ok(match table {
        SmbiosTableRef::Number(table_type) => ResolvedTableRef::TypeIndex {
            table_type: *table_type,
            index: 0,
        },
        SmbiosTableRef::Named(name) => {
            let table_type = TABLE_NAMES
                .iter()
                .find(|(table_name, _)| table_name == name)
                .map(|(_, table_type)| *table_type)
                .ok_or_else(|| SealError::Config(format!("unknown smbios table `{name}`")))?;
            ResolvedTableRef::TypeIndex {
                table_type,
                index: 0,
            }
        }
        SmbiosTableRef::Handle { handle } => ResolvedTableRef::Handle(*handle),
        SmbiosTableRef::TypeIndex { table_type, index } => ResolvedTableRef::TypeIndex {
            table_type: *table_type,
            index: index.unwrap_or(0),
        },
    })
}

/// Resolve a well-known or explicit field selector.
pub fn resolve_field(field: &SmbiosFieldRef) -> Result<ResolvedFieldRef, SealError> {
    match field {
        SmbiosFieldRef::Named(name) => {
            let (_, table_type, offset, kind) = FIELD_NAMES
                .iter()
                .find(|(field_name, _, _, _)| field_name == name)
                .ok_or_else(|| SealError::Config(format!("unknown smbios field `{name}`")))?;
            Ok(ResolvedFieldRef {
                table: ResolvedTableRef::TypeIndex {
                    table_type: *table_type,
                    index: 0,
                },
                offset: *offset,
                kind: *kind,
            })
        }
        SmbiosFieldRef::Details(details) => Ok(ResolvedFieldRef {
            table: resolve_table(&details.table)?,
            offset: details.offset,
            kind: details.kind,
        }),
    }
}

impl SmbiosTables {
    /// Look up a table; a missing table is not an error so optional fields
    /// can degrade silently.
    pub fn table(&self, table: ResolvedTableRef) -> Option<&SmbiosTable> {
        let index = match table {
            ResolvedTableRef::Handle(handle) => *self.by_handle.get(&handle)?,
            ResolvedTableRef::TypeIndex { table_type, index } => {
                *self.by_type.get(&table_type)?.get(index)?
            }
        };
        self.tables.get(index)
    }

    /// Resolve a field reference to concrete bytes. `None` means the table
    /// is absent from this dump; string fields yield the referenced string
    /// without its terminator.
    pub fn field(&self, field: &ResolvedFieldRef) -> Option<Vec<u8>> {
        let table = self.table(field.table)?;
        if field.kind == SmbiosFieldKind::String {
            return Some(table.string_at(field.offset).into_bytes());
        }
        let start = usize::from(field.offset);
        let end = (start + usize::from(field.kind.size())).min(table.structure.len());
        Some(table.structure.get(start..end).unwrap_or(&[]).to_vec())
    }
}

impl SmbiosTable {
    /// Follow a 1-based string index stored at `offset`. Index 0 and
    /// out-of-range references yield an empty string.
    pub fn string_at(&self, offset: u8) -> String {
        let index = self
            .structure
            .get(usize::from(offset))
            .copied()
            .unwrap_or(0) as usize;
        if index == 0 {
            return String::new();
        }
        self.strings.get(index - 1).cloned().unwrap_or_default()
    }
}
