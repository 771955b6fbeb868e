// CLASSIFICATION: COMMUNITY
// Filename: blocks.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Shared fragments of generated boot code.
//!
//! Every helper here is keyed through the builder's run-once ledger, so a
//! protocol lookup or device search is emitted exactly once no matter how
//! many components depend on it. Device matching never embeds a configured
//! device string in cleartext: the generated code compares a salted SHA-256
//! of each candidate's device-path text against a digest precomputed here
//! under a fresh per-build salt.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::components::{reorder_digest, utf16le};
use crate::emit::CodeBuilder;
use crate::gencode::{PREP_BLOCK, VARS_BLOCK};

/// Spliced inside the device enumeration loop; each device lookup appends
/// its own match test here.
const DEVICE_TEST_BLOCK: &str = "blockIOHandlesTestDevice";

/// Scratch pointer shared by every disk and file read.
pub fn disk_sector_var(code: &mut CodeBuilder) {
    code.run_once("diskSector", |code, _| {
        code.write_to(VARS_BLOCK, "UINT8 *diskSector = NULL;\n");
    });
}

/// Declare `GUID_<name>` once, in a block spliced at the top of the
/// function's declarations.
pub fn protocol_guid(code: &mut CodeBuilder, protocol: &str) {
    let key = format!("GUID_{protocol}");
    let line = format!("EFI_GUID GUID_{protocol} = EFI_{protocol}_PROTOCOL_GUID;\n");
    code.run_once(&key, |code, _| {
        code.run_once("guidVars", |code, _| {
            code.new_block_in("guidVars", VARS_BLOCK);
        });
        code.write_to("guidVars", line);
    });
}

/// Resolve the loaded-image protocol on the boot image handle.
pub fn loaded_image(code: &mut CodeBuilder) {
    code.run_once("loadedImage", |code, _| {
        protocol_guid(code, "LOADED_IMAGE");
        code.write_to(VARS_BLOCK, "EFI_LOADED_IMAGE_PROTOCOL *loadedImage = NULL;\n");
        code.write_to(
            PREP_BLOCK,
            "HANDLE_PROTOCOL(image_handle, GUID_LOADED_IMAGE, &loadedImage);\n\
             CHECK_ERROR(!loadedImage);\n",
        );
    });
}

/// Locate the device-path-to-text protocol.
pub fn device_path_to_text(code: &mut CodeBuilder) {
    code.run_once("devicePathToText", |code, _| {
        protocol_guid(code, "DEVICE_PATH_TO_TEXT");
        code.write_to(
            VARS_BLOCK,
            "EFI_DEVICE_PATH_TO_TEXT_PROTOCOL *devicePathToText = NULL;\n",
        );
        code.write_to(
            PREP_BLOCK,
            "status = uefi_call_wrapper(gBS->LocateProtocol, 3, &GUID_DEVICE_PATH_TO_TEXT, NULL, &devicePathToText);\n\
             CHECK_ERROR(!devicePathToText);\n",
        );
    });
}

/// Resolve the boot partition's device-path text.
pub fn boot_partition_device(code: &mut CodeBuilder) {
    code.run_once("bootPartitionDevice", |code, _| {
        loaded_image(code);
        device_path_to_text(code);
        protocol_guid(code, "DEVICE_PATH");
        code.write_to(VARS_BLOCK, "EFI_DEVICE_PATH_PROTOCOL *bootDevice = NULL;\n");
        code.write_to(
            PREP_BLOCK,
            "HANDLE_PROTOCOL(loadedImage->DeviceHandle, GUID_DEVICE_PATH, &bootDevice);\n\
             CHECK_ERROR(!bootDevice);\n\
             CHAR16 *bootPartitionDeviceString = (void *)uefi_call_wrapper(devicePathToText->ConvertDevicePathToText, 3, bootDevice, FALSE, FALSE);\n\
             CHECK_ERROR(!bootPartitionDeviceString);\n\
             UINTN bootPartitionDeviceStringLen = 2 * RtStrLen(bootPartitionDeviceString);\n",
        );
    });
}

/// Resolve the loaded image's file-path text.
pub fn boot_file(code: &mut CodeBuilder) {
    code.run_once("bootFile", |code, _| {
        loaded_image(code);
        device_path_to_text(code);
        code.write_to(
            PREP_BLOCK,
            "CHAR16 *bootFileString = (void *)uefi_call_wrapper(devicePathToText->ConvertDevicePathToText, 3, loadedImage->FilePath, FALSE, FALSE);\n\
             CHECK_ERROR(!bootFileString);\n\
             UINTN bootFileStringLen = 2 * RtStrLen(bootFileString);\n",
        );
    });
}

/// Emit the block-I/O enumeration loop once and return the per-build salt
/// used to digest candidate device paths. Match tests are spliced into the
/// loop via [`DEVICE_TEST_BLOCK`].
fn find_block(code: &mut CodeBuilder, rng: &mut dyn RngCore) -> Vec<u8> {
    code.run_once("findBlock", |code, rec| {
        let mut salt = vec![0u8; 32];
        rng.fill_bytes(&mut salt);
        rec.bytes = salt;
        rec.var = code.embed_binary(rec.bytes.clone(), None);
        protocol_guid(code, "DEVICE_PATH");
        protocol_guid(code, "BLOCK_IO");
        device_path_to_text(code);
        let salt_var = &rec.var;
        code.write(format!(
            "UINTN blockIONbHandles = 0;\n\
             EFI_HANDLE *blockIOHandles = NULL;\n\
             status = uefi_call_wrapper(gBS->LocateHandleBuffer, 5, ByProtocol, &GUID_BLOCK_IO, NULL, &blockIONbHandles, &blockIOHandles);\n\
             CHECK_ERROR(0);\n\
             for (UINTN i = 0; i < blockIONbHandles; i++)\n\
             {{\n\
             \tEFI_BLOCK_IO_PROTOCOL *bio = NULL;\n\
             \tHANDLE_PROTOCOL(blockIOHandles[i], GUID_BLOCK_IO, &bio);\n\
             \tif (EFI_ERROR(status) || !bio || !bio->Media->BlockSize)\n\
             \t\tcontinue;\n\
             \tEFI_DEVICE_PATH_PROTOCOL *devPath = NULL;\n\
             \tHANDLE_PROTOCOL(blockIOHandles[i], GUID_DEVICE_PATH, &devPath);\n\
             \tif (EFI_ERROR(status) || !devPath)\n\
             \t\tcontinue;\n\
             \tCHAR16 *devPathString = (void *)uefi_call_wrapper(devicePathToText->ConvertDevicePathToText, 3, devPath, FALSE, FALSE);\n\
             \tif (!devPathString)\n\
             \t\tcontinue;\n\
             \tUINTN devPathStringLen = 2 * RtStrLen(devPathString);\n\
             \tif (devPathStringLen)\n\
             \t{{\n\
             \t\tsha256_context_t devPathStringHash;\n\
             \t\tsha256_init(&devPathStringHash);\n\
             \t\tsha256_update(&devPathStringHash, {salt_var}, {salt_var}_len);\n\
             \t\tsha256_update(&devPathStringHash, (void*)devPathString, devPathStringLen);\n\
             \t\tsha256_finalize(&devPathStringHash);\n"
        ));
        code.new_block(DEVICE_TEST_BLOCK);
        code.write("\t}\n}\nFREE_POOL(blockIOHandles);\n");
    })
    .bytes
}

/// Emit the search for one device and return the generated variable prefix.
/// With an explicit device string the candidate is matched by salted digest;
/// otherwise the boot partition's own path is used as a structural prefix,
/// skipping logical partitions.
pub fn device_handle(
    code: &mut CodeBuilder,
    rng: &mut dyn RngCore,
    device: Option<&str>,
) -> String {
    let key = format!("deviceHandle:{}", device.unwrap_or(""));
    code.run_once(&key, |code, rec| {
        rec.var = code.new_var();
        let var = rec.var.clone();
        code.write_to(
            VARS_BLOCK,
            format!(
                "EFI_HANDLE {var}_handle = NULL;\n\
                 EFI_BLOCK_IO_PROTOCOL *{var}_bio = NULL;\n\
                 UINT64 {var}_size = 0;\n\
                 CHAR16 *{var}_devPathString = NULL;\n\
                 UINTN {var}_devPathStringLen = 0;\n"
            ),
        );
        let salt = find_block(code, rng);
        let condition = match device {
            Some(device) => {
                let mut digest = Sha256::new();
                digest.update(&salt);
                digest.update(utf16le(device));
                let expected = code.embed_binary(reorder_digest(digest.finalize().into()).to_vec(), None);
                format!("RtCompareMem(devPathStringHash.hash, {expected}, 32) == 0")
            }
            None => {
                boot_partition_device(code);
                "!bio->Media->LogicalPartition && devPathStringLen && \
                 devPathStringLen <= bootPartitionDeviceStringLen && \
                 RtCompareMem(devPathString, bootPartitionDeviceString, devPathStringLen) == 0"
                    .to_string()
            }
        };
        code.write_to(
            DEVICE_TEST_BLOCK,
            format!(
                "if ({condition}) {{\n\
                 {var}_handle = blockIOHandles[i];\n\
                 {var}_bio = bio;\n\
                 {var}_devPathString = devPathString;\n\
                 {var}_devPathStringLen = devPathStringLen;\n\
                 {var}_size = ((bio->Media->LastBlock + 1) * bio->Media->BlockSize);\n\
                 }}\n"
            ),
        );
    })
    .var
}

/// Open the disk-I/O protocol on a matched device.
pub fn device_disk_io(
    code: &mut CodeBuilder,
    rng: &mut dyn RngCore,
    device: Option<&str>,
) -> String {
    let key = format!("deviceDiskIO:{}", device.unwrap_or(""));
    code.run_once(&key, |code, rec| {
        rec.var = device_handle(code, rng, device);
        let var = rec.var.clone();
        protocol_guid(code, "DISK_IO");
        code.write_to(VARS_BLOCK, format!("EFI_DISK_IO_PROTOCOL *{var}_dio = NULL;\n"));
        code.write(format!(
            "if ({var}_handle) {{ HANDLE_PROTOCOL({var}_handle, GUID_DISK_IO, &{var}_dio); }}\n"
        ));
    })
    .var
}

/// Open the root filesystem volume of a matched device, or of the boot
/// device when no device string is configured.
pub fn device_volume(
    code: &mut CodeBuilder,
    rng: &mut dyn RngCore,
    device: Option<&str>,
) -> String {
    let key = format!("deviceVolume:{}", device.unwrap_or(""));
    code.run_once(&key, |code, rec| {
        let handle_expr;
        match device {
            Some(_) => {
                rec.var = device_handle(code, rng, device);
                handle_expr = format!("{}_handle", rec.var);
            }
            None => {
                loaded_image(code);
                rec.var = "efiDevice".to_string();
                handle_expr = "loadedImage->DeviceHandle".to_string();
            }
        }
        let var = rec.var.clone();
        protocol_guid(code, "SIMPLE_FILE_SYSTEM");
        code.write_to(VARS_BLOCK, format!("EFI_FILE_IO_INTERFACE *{var}_fio = NULL;\n"));
        code.write_to(VARS_BLOCK, format!("EFI_FILE_HANDLE {var}_volume = NULL;\n"));
        code.write(format!(
            "if ({handle_expr}) {{\n\
             \tHANDLE_PROTOCOL({handle_expr}, GUID_SIMPLE_FILE_SYSTEM, &{var}_fio);\n\
             \tif ({var}_fio) {{\n\
             \t\tuefi_call_wrapper({var}_fio->OpenVolume, 2, {var}_fio, &{var}_volume);\n\
             \t}}\n\
             }}\n"
        ));
    })
    .var
}

/// Open a file on a device's volume and fetch its file info.
pub fn get_file(
    code: &mut CodeBuilder,
    rng: &mut dyn RngCore,
    device: Option<&str>,
    file: &str,
) -> String {
    let key = format!("file:{}:{file}", device.unwrap_or(""));
    code.run_once(&key, |code, rec| {
        rec.var = code.new_var();
        let var = rec.var.clone();
        let volume = device_volume(code, rng, device);
        code.write_to(VARS_BLOCK, format!("EFI_FILE_HANDLE {var}_handle = NULL;\n"));
        code.write_to(VARS_BLOCK, format!("EFI_FILE_INFO *{var}_fileInfo = NULL;\n"));
        code.write(format!(
            "if ({volume}_volume) {{\n\
             \tuefi_call_wrapper({volume}_volume->Open, 5, {volume}_volume, &{var}_handle, L{file:?}, EFI_FILE_MODE_READ, EFI_FILE_READ_ONLY | EFI_FILE_HIDDEN | EFI_FILE_SYSTEM);\n\
             \tif ({var}_handle) {{\n\
             \t\t{var}_fileInfo = LibFileInfo({var}_handle);\n\
             \t}}\n\
             }}\n"
        ));
    })
    .var
}
