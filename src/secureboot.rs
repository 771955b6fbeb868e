// CLASSIFICATION: COMMUNITY
// Filename: secureboot.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Secure-boot trust-anchor enrollment codegen.
//!
//! Each slot (PK, KEK, db, dbx) takes pre-signed authenticated variable
//! blobs: a 16-byte timestamp header, a little-endian 32-bit envelope
//! length, the envelope, then the unsigned payload. The generated firmware
//! code installs a slot only when its current value differs from the
//! canonical payload, trying the supplied blobs in order and moving on only
//! when the platform rejects one as unauthenticated. PK is enrolled last so
//! the platform stays in setup mode while the other anchors go in.

use crate::binary::{resolve_bytes, BinaryData};
use crate::components::{efivar_ledger_key, parse_guid, Guid};
use crate::config::SecureBootEnroll;
use crate::emit::CodeBuilder;
use crate::error::SealError;
use crate::gencode::{PREP_BLOCK, VARS_BLOCK};

/// Vendor GUID for PK and KEK.
pub const EFI_GLOBAL_VARIABLE_GUID: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";
/// Vendor GUID for db and dbx.
pub const IMAGE_SECURITY_DATABASE_GUID: &str = "d719b2cb-3d3a-4596-a3bc-dad00e67656f";

const ENROLL_ATTRIBUTES: &str = "EFI_VARIABLE_NON_VOLATILE | EFI_VARIABLE_BOOTSERVICE_ACCESS \
                                 | EFI_VARIABLE_RUNTIME_ACCESS | EFI_VARIABLE_TIME_BASED_AUTHENTICATED_WRITE_ACCESS";

/// One parsed authenticated update blob.
struct AuthBlob {
    bytes: Vec<u8>,
    payload_offset: usize,
}

impl AuthBlob {
    fn payload(&self) -> &[u8] {
        &self.bytes[self.payload_offset..]
    }
}

fn parse_auth_blob(slot: &str, bytes: Vec<u8>) -> Result<AuthBlob, SealError> {
    if bytes.len() < 20 {
        return Err(SealError::Config(format!(
            "enrollment blob for {slot} is shorter than its header"
        )));
    }
    let envelope_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
    let payload_offset = 20 + envelope_len;
    if payload_offset > bytes.len() {
        return Err(SealError::Config(format!(
            "enrollment blob for {slot} declares an envelope past its end"
        )));
    }
    Ok(AuthBlob {
        bytes,
        payload_offset,
    })
}

/// Emit enrollment sequences for every configured slot and register each
/// slot's canonical payload for reuse by later `efivar` components.
pub fn emit_enrollments(
    enroll: &SecureBootEnroll,
    code: &mut CodeBuilder,
) -> Result<(), SealError> {
    // PK last: enrolling it first would leave setup mode before the other
    // anchors are installed.
    enroll_slot(code, "db", IMAGE_SECURITY_DATABASE_GUID, &enroll.db)?;
    enroll_slot(code, "dbx", IMAGE_SECURITY_DATABASE_GUID, &enroll.dbx)?;
    enroll_slot(code, "KEK", EFI_GLOBAL_VARIABLE_GUID, &enroll.kek)?;
    enroll_slot(code, "PK", EFI_GLOBAL_VARIABLE_GUID, &enroll.pk)?;
    Ok(())
}

fn enroll_slot(
    code: &mut CodeBuilder,
    name: &str,
    guid_text: &str,
    sources: &[BinaryData],
) -> Result<(), SealError> {
    if sources.is_empty() {
        return Ok(());
    }
    let guid = parse_guid(guid_text)?;
    let blobs = sources
        .iter()
        .map(|source| parse_auth_blob(name, resolve_bytes(source)?))
        .collect::<Result<Vec<_>, _>>()?;

    let canonical = blobs[0].payload().to_vec();
    for blob in &blobs[1..] {
        if blob.payload() != canonical.as_slice() {
            return Err(SealError::Consistency(format!(
                "enrollment blobs for {name} decode to different payloads"
            )));
        }
    }
    log::debug!(
        "enrolling {name}: {} blob(s), payload {} bytes",
        blobs.len(),
        canonical.len()
    );

    // The canonical payload doubles as the build-time value of any later
    // efivar component naming this slot.
    let ledger_key = efivar_ledger_key(&guid, name);
    let payload_for_ledger = canonical.clone();
    code.run_once(&ledger_key, |_, rec| {
        rec.bytes = payload_for_ledger;
    });

    emit_slot_code(code, name, &guid, canonical, blobs);
    Ok(())
}

fn emit_slot_code(
    code: &mut CodeBuilder,
    name: &str,
    guid: &Guid,
    canonical: Vec<u8>,
    blobs: Vec<AuthBlob>,
) {
    let var = code.new_var();
    let widest = blobs.iter().map(|b| b.bytes.len()).max().unwrap_or(0);
    let payload_var = code.embed_binary(canonical, None);
    let blob_vars: Vec<String> = blobs
        .into_iter()
        .map(|blob| code.embed_binary(blob.bytes, None))
        .collect();

    code.write_to(
        VARS_BLOCK,
        format!("EFI_GUID {var}_guid = {};\n", guid.c_literal()),
    );

    let mut text = format!(
        "{{\n\
         \tUINTN {var}_size = 0;\n\
         \tEFI_STATUS {var}_status = uefi_call_wrapper(RT->GetVariable, 5, L{name:?}, &{var}_guid, NULL, &{var}_size, NULL);\n\
         \tBOOLEAN {var}_match = FALSE;\n\
         \tif ({var}_status == EFI_BUFFER_TOO_SMALL && {var}_size == {payload_var}_len) {{\n\
         \t\tUINT8 *{var}_cur = AllocatePool({var}_size);\n\
         \t\tif ({var}_cur) {{\n\
         \t\t\t{var}_status = uefi_call_wrapper(RT->GetVariable, 5, L{name:?}, &{var}_guid, NULL, &{var}_size, {var}_cur);\n\
         \t\t\tif (!EFI_ERROR({var}_status) && RtCompareMem({var}_cur, {payload_var}, {payload_var}_len) == 0) {{\n\
         \t\t\t\t{var}_match = TRUE;\n\
         \t\t\t}}\n\
         \t\t\tFREE_POOL({var}_cur);\n\
         \t\t}}\n\
         \t}}\n\
         \tif (!{var}_match) {{\n\
         \t\tUINT8 *{var}_buf = AllocatePool({widest});\n\
         \t\tif ({var}_buf) {{\n\
         \t\t\t{var}_status = EFI_SECURITY_VIOLATION;\n"
    );
    for blob_var in &blob_vars {
        text.push_str(&format!(
            "\t\t\tif ({var}_status == EFI_SECURITY_VIOLATION) {{\n\
             \t\t\t\tRtCopyMem({var}_buf, {blob_var}, {blob_var}_len);\n\
             \t\t\t\t{var}_status = uefi_call_wrapper(RT->SetVariable, 5, L{name:?}, &{var}_guid, {ENROLL_ATTRIBUTES}, {blob_var}_len, {var}_buf);\n\
             \t\t\t}}\n"
        ));
    }
    text.push_str(&format!(
        "\t\t\tFREE_POOL({var}_buf);\n\
         \t\t}}\n\
         \t}}\n\
         }}\n"
    ));
    code.write_to(PREP_BLOCK, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gencode;

    fn blob(payload: &[u8], envelope: &[u8]) -> BinaryData {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&(envelope.len() as u32).to_le_bytes());
        bytes.extend_from_slice(envelope);
        bytes.extend_from_slice(payload);
        BinaryData::Raw { bytes }
    }

    fn render(code: CodeBuilder) -> String {
        let mut out = Vec::new();
        code.finalize(&mut out).expect("finalize");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn mismatched_payloads_are_inconsistent() {
        let mut code = gencode::function_scaffold("");
        let enroll = SecureBootEnroll {
            pk: vec![blob(b"payload-a", b"sig1"), blob(b"payload-b", b"sig2")],
            ..Default::default()
        };
        assert!(matches!(
            emit_enrollments(&enroll, &mut code),
            Err(SealError::Consistency(_))
        ));
    }

    #[test]
    fn one_attempt_per_blob_in_supplied_order() {
        let mut code = gencode::function_scaffold("");
        let enroll = SecureBootEnroll {
            pk: vec![blob(b"payload", b"first-sig"), blob(b"payload", b"second-signature")],
            ..Default::default()
        };
        emit_enrollments(&enroll, &mut code).expect("emit");
        let text = render(code);
        let set_calls: Vec<usize> = text
            .match_indices("RT->SetVariable")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(set_calls.len(), 2);
        // Buffer sized once for the widest blob: 20 + 16 + 7.
        assert!(text.contains("AllocatePool(43)"));
        // Fall through only on an authentication rejection.
        assert_eq!(text.matches("== EFI_SECURITY_VIOLATION)").count(), 2);
    }

    #[test]
    fn short_blob_is_rejected() {
        let mut code = gencode::function_scaffold("");
        let enroll = SecureBootEnroll {
            db: vec![BinaryData::Raw {
                bytes: vec![0; 10],
            }],
            ..Default::default()
        };
        assert!(matches!(
            emit_enrollments(&enroll, &mut code),
            Err(SealError::Config(_))
        ));
    }

    #[test]
    fn canonical_payload_registers_for_efivar_reuse() {
        let mut code = gencode::function_scaffold("");
        let enroll = SecureBootEnroll {
            kek: vec![blob(b"kek-payload", b"sig")],
            ..Default::default()
        };
        emit_enrollments(&enroll, &mut code).expect("emit");
        let guid = parse_guid(EFI_GLOBAL_VARIABLE_GUID).expect("guid");
        let record = code
            .once_record(&efivar_ledger_key(&guid, "KEK"))
            .expect("registered");
        assert_eq!(record.bytes, b"kek-payload");
    }

    #[test]
    fn pk_is_emitted_after_the_other_slots() {
        let mut code = gencode::function_scaffold("");
        let enroll = SecureBootEnroll {
            pk: vec![blob(b"p", b"s")],
            db: vec![blob(b"d", b"s")],
            ..Default::default()
        };
        emit_enrollments(&enroll, &mut code).expect("emit");
        let text = render(code);
        let db_at = text.find("L\"db\"").expect("db");
        let pk_at = text.find("L\"PK\"").expect("pk");
        assert!(db_at < pk_at);
    }
}
