// CLASSIFICATION: COMMUNITY
// Filename: gencode.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Orchestrates one code generation run: drives the component registry over
//! the configured list against a single digest and a single builder, then
//! turns the digest into the cipher key, streams the encrypted payload into
//! the output, and flushes `gen-code.c` to the build folder.

use aes::cipher::block_padding::{Padding, Pkcs7};
use aes::cipher::{Block, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::components::{self, reorder_digest, ComponentCtx};
use crate::config::Config;
use crate::emit::{ByteSource, CodeBuilder};
use crate::error::SealError;
use crate::secureboot;
use crate::smbios;

/// Declarations block of the generated digest routine.
pub const VARS_BLOCK: &str = "gen_compute_hash_vars";
/// One-time preparation block, run before any component statement.
pub const PREP_BLOCK: &str = "gen_compute_hash_prep";
/// Per-component statement block.
pub const BODY_BLOCK: &str = "gen_compute_hash";

const GENERATED_HEADER: &str = "/*\n * DO NOT EDIT! This file was generated automatically!\n */\n";

/// Builder pre-seeded with the `gen_compute_hash` function skeleton, with
/// the statement block as the default write target.
pub fn function_scaffold(header: &str) -> CodeBuilder {
    let mut code = CodeBuilder::new(header);
    code.include_header("\"gen-code.h\"");
    code.write(
        "EFI_STATUS gen_compute_hash(sha256_context_t *hash, EFI_HANDLE image_handle) {\n\
         EFI_STATUS status = 0;\n",
    );
    code.new_block(VARS_BLOCK);
    code.new_block(PREP_BLOCK);
    code.new_block(BODY_BLOCK);
    code.write("return status;\n}\n");
    code.set_current(BODY_BLOCK);
    code
}

/// Generate `gen-code.c` under `build_folder`. The digest is extended once
/// per component, in configured order; that order is part of the key.
pub fn generate(
    config: &Config,
    build_folder: &Path,
    rng: &mut dyn RngCore,
) -> Result<(), SealError> {
    let mut code = function_scaffold(GENERATED_HEADER);
    let mut hash = Sha256::new();

    let smbios = match &config.smbios {
        Some(path) => Some(smbios::parse_smbios(&std::fs::read(path)?)?),
        None => None,
    };

    // Enrollment first: it lands in the preparation block and registers
    // canonical payloads that efivar components may reference.
    if let Some(enroll) = &config.enroll_secure_boot {
        secureboot::emit_enrollments(enroll, &mut code)?;
    }

    let components_list = config.effective_components();
    log::info!("hashing {} component(s)", components_list.len());
    for component in &components_list {
        let mut ctx = ComponentCtx {
            hash: &mut hash,
            code: &mut code,
            smbios: smbios.as_ref(),
            rng: &mut *rng,
        };
        components::apply(component, &mut ctx)?;
    }

    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut iv);
    code.embed_binary(iv.to_vec(), Some("iv"));

    let key = reorder_digest(hash.finalize().into());
    let payload = File::open(&config.input_file)?;
    let encrypted = CbcEncryptReader::new(payload, &key, &iv);
    code.embed_binary(
        ByteSource::Reader(Box::new(encrypted)),
        Some("enc_payload"),
    );

    let out_path = build_folder.join("gen-code.c");
    let mut out = BufWriter::new(File::create(&out_path)?);
    code.finalize(&mut out)?;
    out.flush()?;
    log::info!("wrote {}", out_path.display());
    Ok(())
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type CipherBlock = Block<Aes256CbcEnc>;

const ENC_CHUNK: usize = 8192;

/// AES-256-CBC + PKCS#7 as a reader adapter, so an arbitrarily large
/// payload streams into the hex embedding one chunk at a time.
struct CbcEncryptReader<R: Read> {
    inner: Option<R>,
    enc: Aes256CbcEnc,
    /// Encrypted bytes ready to serve.
    ready: Vec<u8>,
    pos: usize,
    /// Plaintext shorter than a block, carried to the next refill.
    tail: Vec<u8>,
}

impl<R: Read> CbcEncryptReader<R> {
    fn new(inner: R, key: &[u8; 32], iv: &[u8; 16]) -> Self {
        CbcEncryptReader {
            inner: Some(inner),
            enc: Aes256CbcEnc::new(key.into(), iv.into()),
            ready: Vec::new(),
            pos: 0,
            tail: Vec::new(),
        }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        self.ready.clear();
        self.pos = 0;
        let mut chunk = [0u8; ENC_CHUNK];
        while let Some(inner) = self.inner.as_mut() {
            let n = inner.read(&mut chunk)?;
            if n == 0 {
                // End of plaintext: pad the carried tail into the final
                // block. PKCS#7 always emits it, even for an empty tail.
                let mut block = CipherBlock::default();
                block[..self.tail.len()].copy_from_slice(&self.tail);
                Pkcs7::pad(&mut block, self.tail.len());
                self.enc.encrypt_block_mut(&mut block);
                self.ready.extend_from_slice(&block);
                self.tail.clear();
                self.inner = None;
                return Ok(());
            }
            self.tail.extend_from_slice(&chunk[..n]);
            let full = self.tail.len() / 16 * 16;
            if full == 0 {
                continue;
            }
            self.ready.extend(self.tail.drain(..full));
            for block in self.ready.chunks_exact_mut(16) {
                self.enc
                    .encrypt_block_mut(CipherBlock::from_mut_slice(block));
            }
            return Ok(());
        }
        Ok(())
    }
}

impl<R: Read> Read for CbcEncryptReader<R> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        if self.pos == self.ready.len() {
            if self.inner.is_none() {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = (self.ready.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.ready[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_encrypt(data: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Vec<u8> {
        let mut reader = CbcEncryptReader::new(std::io::Cursor::new(data.to_vec()), key, iv);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        out
    }

    #[test]
    fn streaming_cbc_matches_one_shot() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        for len in [0usize, 1, 15, 16, 17, 4096, 8192 + 5] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let expected = Aes256CbcEnc::new((&key).into(), (&iv).into())
                .encrypt_padded_vec_mut::<Pkcs7>(&data);
            assert_eq!(stream_encrypt(&data, &key, &iv), expected, "len {len}");
        }
    }

    #[test]
    fn scaffold_orders_vars_prep_body() {
        let mut code = function_scaffold("// hdr\n");
        code.write("body;\n");
        code.write_to(PREP_BLOCK, "prep;\n");
        code.write_to(VARS_BLOCK, "vars;\n");
        let mut out = Vec::new();
        code.finalize(&mut out).expect("finalize");
        let text = String::from_utf8(out).expect("utf8");
        let vars_at = text.find("vars;").expect("vars");
        let prep_at = text.find("prep;").expect("prep");
        let body_at = text.find("body;").expect("body");
        assert!(vars_at < prep_at && prep_at < body_at);
        assert!(text.ends_with("return status;\n}\n"));
    }
}
