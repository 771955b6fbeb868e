// CLASSIFICATION: COMMUNITY
// Filename: components/mod.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! The dual-execution component registry.
//!
//! Each hash component is a two-sided contract: the build side extends the
//! running SHA-256 digest with the component's bytes, and the firmware side
//! gets code emitted that hashes the equivalent bytes from live state at
//! boot. Any drift between the two sides produces a key that cannot decrypt
//! the payload, so the build-time failure modes are all fatal while the
//! generated code degrades a missing runtime source to "hashes as absent".

pub mod blocks;

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::binary::{hash_data, BinaryData};
use crate::config::{Edge, FileEdge, HashComponent, SizeValue};
use crate::emit::CodeBuilder;
use crate::error::SealError;
use crate::smbios::{ResolvedTableRef, SmbiosFieldKind, SmbiosTables};

/// Shared mutable state threaded through every handler, in configured
/// component order. Both the digest and the emission state are
/// order-sensitive accumulators.
pub struct ComponentCtx<'a> {
    pub hash: &'a mut Sha256,
    pub code: &'a mut CodeBuilder,
    pub smbios: Option<&'a SmbiosTables>,
    pub rng: &'a mut dyn RngCore,
}

/// Encode text the way the firmware sees it: UTF-16LE, no terminator.
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Rewrite each 4-byte big-endian-read word little-endian. The firmware
/// SHA-256 state is an array of native-endian 32-bit words, so host-side
/// digests must be word-swapped before they can be compared against or used
/// as key material there.
pub fn reorder_digest(mut digest: [u8; 32]) -> [u8; 32] {
    for word in digest.chunks_exact_mut(4) {
        word.reverse();
    }
    digest
}

/// A parsed RFC 4122 textual GUID, kept as the EFI field quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// The mixed-endian 16-byte wire form: the first three fields
    /// little-endian, the tail verbatim.
    pub fn wire_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }

    /// `EFI_GUID` initializer literal.
    pub fn c_literal(&self) -> String {
        let d4 = self
            .data4
            .iter()
            .map(|b| format!("0x{b:02x}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{{0x{:08x}, 0x{:04x}, 0x{:04x}, {{{d4}}}}}",
            self.data1, self.data2, self.data3
        )
    }
}

/// Parse canonical `8-4-4-4-12` GUID text.
pub fn parse_guid(text: &str) -> Result<Guid, SealError> {
    let segments: Vec<&str> = text.split('-').collect();
    let lens: Vec<usize> = segments.iter().map(|s| s.len()).collect();
    if lens != [8, 4, 4, 4, 12] {
        return Err(SealError::Config(format!("invalid GUID `{text}`")));
    }
    let decoded = hex::decode(segments.concat())
        .map_err(|_| SealError::Config(format!("invalid GUID `{text}`")))?;
    Ok(Guid {
        data1: u32::from_be_bytes(decoded[0..4].try_into().unwrap()),
        data2: u16::from_be_bytes(decoded[4..6].try_into().unwrap()),
        data3: u16::from_be_bytes(decoded[6..8].try_into().unwrap()),
        data4: decoded[8..16].try_into().unwrap(),
    })
}

/// Run-once ledger key under which an enrollment registers a slot's
/// canonical payload, and under which an `efivar` component later finds it.
pub fn efivar_ledger_key(guid: &Guid, name: &str) -> String {
    format!(
        "efivar:{:08x}-{:04x}-{:04x}-{}:{name}",
        guid.data1,
        guid.data2,
        guid.data3,
        hex::encode(guid.data4)
    )
}

/// Apply one component: extend the build digest and emit the firmware-side
/// equivalent into the current statement block.
pub fn apply(component: &HashComponent, ctx: &mut ComponentCtx) -> Result<(), SealError> {
    match component {
        HashComponent::Random { length } => random(ctx, *length),
        HashComponent::Smbios { field, value } => smbios_field(ctx, field, value.as_deref()),
        HashComponent::Efivar { name, guid, value } => efivar(ctx, name, guid, value.as_ref()),
        HashComponent::BootPartitionDevice { value } => {
            hash_utf16_terminated(ctx, value);
            blocks::boot_partition_device(ctx.code);
            ctx.code.write(
                "sha256_update(hash, (void*)bootPartitionDeviceString, bootPartitionDeviceStringLen + 2);\n",
            );
            Ok(())
        }
        HashComponent::BootDiskDevice { value } => {
            hash_utf16_terminated(ctx, value);
            let var = blocks::device_handle(ctx.code, ctx.rng, None);
            ctx.code.write(format!(
                "if ({var}_devPathString) sha256_update(hash, (void*){var}_devPathString, {var}_devPathStringLen + 2);\n"
            ));
            Ok(())
        }
        HashComponent::BootFile { value } => {
            hash_utf16_terminated(ctx, value);
            blocks::boot_file(ctx.code);
            ctx.code
                .write("sha256_update(hash, (void*)bootFileString, bootFileStringLen + 2);\n");
            Ok(())
        }
        HashComponent::DiskSize { device, value } => disk_size(ctx, device.as_deref(), value),
        HashComponent::DiskData {
            device,
            edge,
            offset,
            value,
        } => disk_data(ctx, device.as_deref(), *edge, *offset, value),
        HashComponent::FileSize {
            device,
            file,
            value,
        } => file_size(ctx, device.as_deref(), file, value),
        HashComponent::FileData {
            device,
            file,
            edge,
            offset,
            value,
        } => file_data(ctx, device.as_deref(), file, *edge, *offset, value),
    }
}

fn random(ctx: &mut ComponentCtx, length: usize) -> Result<(), SealError> {
    let mut secret = vec![0u8; length];
    ctx.rng.fill_bytes(&mut secret);
    ctx.hash.update(&secret);
    let var = ctx.code.embed_binary(secret, None);
    ctx.code
        .write(format!("sha256_update(hash, {var}, {var}_len);\n"));
    Ok(())
}

fn smbios_field(
    ctx: &mut ComponentCtx,
    field: &crate::smbios::SmbiosFieldRef,
    value: Option<&str>,
) -> Result<(), SealError> {
    let field = crate::smbios::resolve_field(field)?;

    // Build side: explicit override, else the byte region from the dump.
    // A missing table degrades to no contribution, matching the firmware
    // side when the table is absent there too.
    let resolved: Option<Vec<u8>> = match value {
        Some(text) if !text.is_empty() => Some(match field.kind {
            SmbiosFieldKind::Uuid => parse_guid(text)?.wire_bytes().to_vec(),
            SmbiosFieldKind::String => text.as_bytes().to_vec(),
            _ => hex::decode(text)
                .map_err(|_| SealError::Config(format!("invalid hex override `{text}`")))?,
        }),
        Some(_) => None,
        None => {
            let tables = ctx.smbios.ok_or_else(|| {
                SealError::MissingData("smbios component configured without a dump".into())
            })?;
            tables.field(&field)
        }
    };
    if let Some(bytes) = resolved {
        ctx.hash.update(&bytes);
        if field.kind == SmbiosFieldKind::String {
            ctx.hash.update(b"\0");
        }
    }

    // Firmware side: a runtime table walk by type+index or by handle.
    ctx.code.include_header("\"smbios.h\"");
    let width = match field.kind {
        SmbiosFieldKind::String => 0,
        kind => kind.size(),
    };
    let call = match field.table {
        ResolvedTableRef::TypeIndex { table_type, index } => format!(
            "status = smbios_hashValue(hash, 0, {table_type}, {index}, {}, {width});\n",
            field.offset
        ),
        ResolvedTableRef::Handle(handle) => format!(
            "status = smbios_hashValue(hash, 1, {}, {}, {}, {width});\n",
            handle & 0xff,
            (handle >> 8) & 0xff,
            field.offset
        ),
    };
    ctx.code.write(call);
    ctx.code.write("CHECK_ERROR(0);\n");
    Ok(())
}

fn efivar(
    ctx: &mut ComponentCtx,
    name: &str,
    guid: &str,
    value: Option<&BinaryData>,
) -> Result<(), SealError> {
    let guid = parse_guid(guid)?;

    // Build side: explicit override, else the canonical payload a prior
    // enrollment registered for this slot. Neither is fatal.
    match value {
        Some(data) => {
            hash_data(ctx.hash, data)?;
        }
        None => {
            let key = efivar_ledger_key(&guid, name);
            let record = ctx.code.once_record(&key).ok_or_else(|| {
                SealError::MissingData(format!(
                    "no value and no enrollment for variable `{name}`"
                ))
            })?;
            ctx.hash.update(&record.bytes);
        }
    }

    // Firmware side: hash whatever is stored right now, or nothing at all
    // when the variable is absent.
    let var = ctx.code.new_var();
    ctx.code.write_to(
        crate::gencode::VARS_BLOCK,
        format!("EFI_GUID {var}_guid = {};\n", guid.c_literal()),
    );
    ctx.code.write(format!(
        "{{\n\
         \tUINTN {var}_size = 0;\n\
         \tEFI_STATUS {var}_status = uefi_call_wrapper(RT->GetVariable, 5, L{name:?}, &{var}_guid, NULL, &{var}_size, NULL);\n\
         \tif ({var}_status == EFI_BUFFER_TOO_SMALL) {{\n\
         \t\tUINT8 *{var}_data = AllocatePool({var}_size);\n\
         \t\tif ({var}_data) {{\n\
         \t\t\t{var}_status = uefi_call_wrapper(RT->GetVariable, 5, L{name:?}, &{var}_guid, NULL, &{var}_size, {var}_data);\n\
         \t\t\tif (!EFI_ERROR({var}_status)) {{\n\
         \t\t\t\tsha256_update(hash, {var}_data, {var}_size);\n\
         \t\t\t}}\n\
         \t\t\tFREE_POOL({var}_data);\n\
         \t\t}}\n\
         \t}}\n\
         }}\n"
    ));
    Ok(())
}

fn hash_utf16_terminated(ctx: &mut ComponentCtx, value: &str) {
    ctx.hash.update(utf16le(value));
    ctx.hash.update(b"\0\0");
}

fn disk_size(
    ctx: &mut ComponentCtx,
    device: Option<&str>,
    value: &SizeValue,
) -> Result<(), SealError> {
    if let Some(size) = value.known() {
        ctx.hash.update(size.to_le_bytes());
    }
    let var = blocks::device_handle(ctx.code, ctx.rng, device);
    ctx.code.write(format!(
        "if ({var}_bio) sha256_update(hash, (void*)&{var}_size, sizeof {var}_size);\n"
    ));
    Ok(())
}

fn disk_data(
    ctx: &mut ComponentCtx,
    device: Option<&str>,
    edge: Edge,
    offset: u64,
    value: &BinaryData,
) -> Result<(), SealError> {
    let size = hash_data(ctx.hash, value)?;
    blocks::disk_sector_var(ctx.code);
    let var = blocks::device_disk_io(ctx.code, ctx.rng, device);
    let start = match edge {
        Edge::Start => offset.to_string(),
        Edge::End => format!("{var}_size - {offset} - {size}"),
    };
    ctx.code.write(format!(
        "if ({var}_dio && {offset} + {size} <= {var}_size) {{\n\
         \tdiskSector = AllocatePool({size});\n\
         \tif (diskSector) {{\n\
         \t\tstatus = uefi_call_wrapper({var}_dio->ReadDisk, 5, {var}_dio, {var}_bio->Media->MediaId, {start}, {size}, diskSector);\n\
         \t\tif (!EFI_ERROR(status)) {{\n\
         \t\t\tsha256_update(hash, diskSector, {size});\n\
         \t\t}}\n\
         \t\tFREE_POOL(diskSector);\n\
         \t}}\n\
         }}\n"
    ));
    Ok(())
}

fn file_size(
    ctx: &mut ComponentCtx,
    device: Option<&str>,
    file: &str,
    value: &SizeValue,
) -> Result<(), SealError> {
    if let Some(size) = value.known() {
        ctx.hash.update(size.to_le_bytes());
    }
    let var = blocks::get_file(ctx.code, ctx.rng, device, file);
    ctx.code.write(format!(
        "if ({var}_fileInfo) sha256_update(hash, (void*)&{var}_fileInfo->FileSize, 8);\n"
    ));
    Ok(())
}

fn file_data(
    ctx: &mut ComponentCtx,
    device: Option<&str>,
    file: &str,
    edge: Option<FileEdge>,
    offset: Option<u64>,
    value: &BinaryData,
) -> Result<(), SealError> {
    let size = hash_data(ctx.hash, value)?;
    blocks::disk_sector_var(ctx.code);
    let var = blocks::get_file(ctx.code, ctx.rng, device, file);
    let edge = edge.unwrap_or(FileEdge::Full);
    let offset = match edge {
        FileEdge::Full => 0,
        _ => offset.unwrap_or(0),
    };
    let start = match edge {
        FileEdge::End => format!("{var}_fileInfo->FileSize - {offset} - {size}"),
        _ => offset.to_string(),
    };
    let window = match edge {
        FileEdge::Full => format!("{var}_fileInfo->FileSize"),
        _ => size.to_string(),
    };
    ctx.code.write(format!(
        "if ({var}_fileInfo) {{\n\
         \tUINT64 size = {window};\n\
         \tif (size + {offset} <= {var}_fileInfo->FileSize) {{\n\
         \t\tdiskSector = AllocatePool(size);\n\
         \t\tif (diskSector) {{\n\
         \t\t\tstatus = uefi_call_wrapper({var}_handle->SetPosition, 2, {var}_handle, {start});\n\
         \t\t\tif (!EFI_ERROR(status)) {{\n\
         \t\t\t\tstatus = uefi_call_wrapper({var}_handle->Read, 3, {var}_handle, &size, diskSector);\n\
         \t\t\t\tif (!EFI_ERROR(status)) {{\n\
         \t\t\t\t\tsha256_update(hash, diskSector, size);\n\
         \t\t\t\t}}\n\
         \t\t\t}}\n\
         \t\t\tFREE_POOL(diskSector);\n\
         \t\t}}\n\
         \t}}\n\
         }}\n"
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gencode;
    use rand::rngs::mock::StepRng;

    fn fixture() -> (Sha256, CodeBuilder, StepRng) {
        let code = gencode::function_scaffold("// test\n");
        (Sha256::new(), code, StepRng::new(0, 1))
    }

    fn apply_all(
        components: &[HashComponent],
        smbios: Option<&SmbiosTables>,
    ) -> ([u8; 32], String) {
        let (mut hash, mut code, mut rng) = fixture();
        for component in components {
            let mut ctx = ComponentCtx {
                hash: &mut hash,
                code: &mut code,
                smbios,
                rng: &mut rng,
            };
            apply(component, &mut ctx).expect("apply");
        }
        let mut out = Vec::new();
        code.finalize(&mut out).expect("finalize");
        (
            hash.finalize().into(),
            String::from_utf8(out).expect("utf8"),
        )
    }

    #[test]
    fn guid_parses_to_mixed_endian_wire_form() {
        let guid = parse_guid("8be4df61-93ca-11d2-aa0d-00e098032b8c").expect("guid");
        assert_eq!(
            guid.wire_bytes(),
            [
                0x61, 0xdf, 0xe4, 0x8b, 0xca, 0x93, 0xd2, 0x11, 0xaa, 0x0d, 0x00, 0xe0, 0x98,
                0x03, 0x2b, 0x8c
            ]
        );
        assert!(guid.c_literal().starts_with("{0x8be4df61, 0x93ca, 0x11d2, {0xaa, 0x0d,"));
        assert!(parse_guid("8be4df61-93ca-11d2").is_err());
    }

    #[test]
    fn ledger_key_distinguishes_guid_tails() {
        // Same first ten hex digits, different node part.
        let a = parse_guid("8be4df61-93ca-11d2-aa0d-00e098032b8c").expect("guid");
        let b = parse_guid("8be4df61-93ca-11d2-aa0d-00e098032b8d").expect("guid");
        assert_ne!(efivar_ledger_key(&a, "PK"), efivar_ledger_key(&b, "PK"));
        assert_ne!(efivar_ledger_key(&a, "PK"), efivar_ledger_key(&a, "KEK"));
    }

    #[test]
    fn reorder_swaps_each_word() {
        let mut input = [0u8; 32];
        input[..4].copy_from_slice(&[1, 2, 3, 4]);
        let output = reorder_digest(input);
        assert_eq!(&output[..4], &[4, 3, 2, 1]);
    }

    #[test]
    fn disk_data_end_edge_offsets_from_device_size() {
        let (_, text) = apply_all(
            &[HashComponent::DiskData {
                device: None,
                edge: Edge::End,
                offset: 0,
                value: BinaryData::Missing { size: Some(512) },
            }],
            None,
        );
        // Device size 1,000,000 at boot makes this start offset 999,488.
        assert!(text.contains("_size - 0 - 512"));
        assert!(text.contains("0 + 512 <="));
    }

    #[test]
    fn missing_disk_data_sizes_code_but_not_digest() {
        let (digest, text) = apply_all(
            &[HashComponent::DiskData {
                device: None,
                edge: Edge::Start,
                offset: 0,
                value: BinaryData::Missing { size: Some(16) },
            }],
            None,
        );
        let (empty_digest, _) = apply_all(
            &[HashComponent::DiskData {
                device: None,
                edge: Edge::Start,
                offset: 0,
                value: BinaryData::Raw { bytes: Vec::new() },
            }],
            None,
        );
        assert_eq!(digest, empty_digest);
        assert!(text.contains("AllocatePool(16)"));
    }

    #[test]
    fn boot_strings_hash_with_double_terminator() {
        let (digest, text) = apply_all(
            &[HashComponent::BootFile {
                value: "\\EFI\\BOOT\\BOOTX64.EFI".into(),
            }],
            None,
        );
        let mut expected = Sha256::new();
        expected.update(utf16le("\\EFI\\BOOT\\BOOTX64.EFI"));
        expected.update(b"\0\0");
        let expected: [u8; 32] = expected.finalize().into();
        assert_eq!(digest, expected);
        assert!(text.contains("bootFileStringLen + 2"));
    }

    #[test]
    fn device_search_is_emitted_once_for_two_consumers() {
        let components = [
            HashComponent::DiskSize {
                device: None,
                value: SizeValue::Known(1000),
            },
            HashComponent::DiskData {
                device: None,
                edge: Edge::Start,
                offset: 0,
                value: BinaryData::Raw { bytes: vec![1, 2] },
            },
        ];
        let (_, text) = apply_all(&components, None);
        assert_eq!(text.matches("LocateHandleBuffer").count(), 1);
        assert_eq!(text.matches("FREE_POOL(blockIOHandles);").count(), 1);
    }

    #[test]
    fn explicit_device_embeds_salted_digest_not_plaintext() {
        let (_, text) = apply_all(
            &[HashComponent::DiskSize {
                device: Some("PciRoot(0x0)/Pci(0x1,0x0)".into()),
                value: SizeValue::Known(1),
            }],
            None,
        );
        assert!(!text.contains("PciRoot"));
        assert!(text.contains("devPathStringHash.hash"));
    }

    #[test]
    fn smbios_handle_selector_splits_bytes() {
        let dump = crate::smbios::tests::structure(1, 0x1234, &[0, 0, 0, 1], &["S"]);
        let tables = crate::smbios::parse_smbios(&dump).expect("parse");
        let (_, text) = apply_all(
            &[HashComponent::Smbios {
                field: crate::smbios::SmbiosFieldRef::Details(crate::smbios::SmbiosFieldDetails {
                    table: crate::smbios::SmbiosTableRef::Handle { handle: 0x1234 },
                    offset: 0x7,
                    kind: SmbiosFieldKind::String,
                }),
                value: None,
            }],
            Some(&tables),
        );
        assert!(text.contains("smbios_hashValue(hash, 1, 52, 18, 7, 0);"));
    }

    #[test]
    fn smbios_uuid_override_hashes_wire_bytes() {
        let (digest, _) = apply_all(
            &[HashComponent::Smbios {
                field: crate::smbios::SmbiosFieldRef::Named("system-uuid".into()),
                value: Some("8be4df61-93ca-11d2-aa0d-00e098032b8c".into()),
            }],
            None,
        );
        let mut expected = Sha256::new();
        expected.update(
            parse_guid("8be4df61-93ca-11d2-aa0d-00e098032b8c")
                .expect("guid")
                .wire_bytes(),
        );
        let expected: [u8; 32] = expected.finalize().into();
        assert_eq!(digest, expected);
    }

    #[test]
    fn efivar_without_value_or_enrollment_is_missing_data() {
        let (mut hash, mut code, mut rng) = fixture();
        let mut ctx = ComponentCtx {
            hash: &mut hash,
            code: &mut code,
            smbios: None,
            rng: &mut rng,
        };
        let component = HashComponent::Efivar {
            name: "SetupMode".into(),
            guid: "8be4df61-93ca-11d2-aa0d-00e098032b8c".into(),
            value: None,
        };
        assert!(matches!(
            apply(&component, &mut ctx),
            Err(SealError::MissingData(_))
        ));
    }
}
