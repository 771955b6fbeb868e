// CLASSIFICATION: COMMUNITY
// Filename: emit.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-08-29

//! Structured C source emission.
//!
//! A [`CodeBuilder`] holds an arena of named blocks, each an ordered list of
//! fragments. A fragment is literal text, a reference to a nested block, or
//! a byte source that is streamed into a hex array literal during
//! [`CodeBuilder::finalize`]. Blocks stay appendable after they have been
//! referenced, which lets handlers splice declarations into the middle of
//! code that was written long before they ran.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Read, Write};

use crate::error::SealError;

/// Bytes to embed into the generated source, either already in memory or
/// read on demand while the output is flushed.
pub enum ByteSource {
    Bytes(Vec<u8>),
    Reader(Box<dyn Read>),
}

impl ByteSource {
    fn into_reader(self) -> Box<dyn Read> {
        match self {
            ByteSource::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
            ByteSource::Reader(reader) => reader,
        }
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Bytes(bytes)
    }
}

enum Fragment {
    Text(String),
    Block(usize),
    Binary {
        name: String,
        internal: bool,
        source: ByteSource,
    },
}

/// Record populated by a [`CodeBuilder::run_once`] initializer and returned
/// verbatim on every later occurrence of the same key.
#[derive(Debug, Clone, Default)]
pub struct OnceRecord {
    /// Generated variable name, when the initializer declared one.
    pub var: String,
    /// Associated bytes (a salt, a canonical variable payload, ...).
    pub bytes: Vec<u8>,
}

/// Arena-backed builder for the generated C translation unit.
pub struct CodeBuilder {
    arena: Vec<Vec<Fragment>>,
    names: HashMap<String, usize>,
    once: HashMap<String, OnceRecord>,
    var_counter: u32,
    cur: usize,
}

pub const ROOT_BLOCK: &str = "main";
pub const HEADERS_BLOCK: &str = "headers";
pub const GLOBAL_BLOCK: &str = "global";

impl CodeBuilder {
    /// Create a builder with the conventional `main`, `headers` and
    /// `global` blocks. `header` lands at the very top of the output.
    pub fn new(header: &str) -> Self {
        let mut builder = CodeBuilder {
            arena: vec![Vec::new()],
            names: HashMap::from([(ROOT_BLOCK.to_string(), 0)]),
            once: HashMap::new(),
            var_counter: 0,
            cur: 0,
        };
        builder.write(header);
        builder.new_block(HEADERS_BLOCK);
        builder.new_block(GLOBAL_BLOCK);
        builder
    }

    fn lookup(&self, name: &str) -> usize {
        *self
            .names
            .get(name)
            .unwrap_or_else(|| panic!("unknown emission block `{name}`"))
    }

    /// Redirect subsequent writes to the named block.
    pub fn set_current(&mut self, name: &str) {
        self.cur = self.lookup(name);
    }

    /// Append text to the current block.
    pub fn write(&mut self, text: impl Into<String>) {
        let cur = self.cur;
        self.arena[cur].push(Fragment::Text(text.into()));
    }

    /// Append text to the named block.
    pub fn write_to(&mut self, block: &str, text: impl Into<String>) {
        let id = self.lookup(block);
        self.arena[id].push(Fragment::Text(text.into()));
    }

    /// Splice a new empty block at the current end of the current block.
    /// Later writers target it by name no matter what is appended around
    /// the splice point afterwards.
    ///
    /// Panics if a block with this name already exists; block names are
    /// fixed by the code generator, so a collision is a bug.
    pub fn new_block(&mut self, name: &str) {
        let cur = self.cur;
        self.new_block_in_id(name, cur);
    }

    /// Splice a new empty block at the current end of the named block.
    pub fn new_block_in(&mut self, name: &str, at: &str) {
        let at = self.lookup(at);
        self.new_block_in_id(name, at);
    }

    fn new_block_in_id(&mut self, name: &str, at: usize) {
        assert!(
            !self.names.contains_key(name),
            "emission block `{name}` already exists"
        );
        let id = self.arena.len();
        self.arena.push(Vec::new());
        self.names.insert(name.to_string(), id);
        self.arena[at].push(Fragment::Block(id));
    }

    /// Run `f` with the default write target switched to `block`, restoring
    /// the previous target afterwards, also when `f` returns an error.
    pub fn with_block<T>(&mut self, block: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.cur;
        self.cur = self.lookup(block);
        let out = f(self);
        self.cur = saved;
        out
    }

    /// Next generated variable name, unique within this build.
    pub fn new_var(&mut self) -> String {
        let n = self.var_counter;
        self.var_counter += 1;
        format!("var{n}")
    }

    /// Embed a byte source as a C array in the `global` block and return the
    /// variable name. A generated name gets internal linkage (`static`); an
    /// explicit name is exported for the handwritten boot code. The paired
    /// `<name>_len` constant is emitted when the source is drained, so the
    /// source itself is only read during [`finalize`](Self::finalize).
    pub fn embed_binary(&mut self, source: impl Into<ByteSource>, name: Option<&str>) -> String {
        let internal = name.is_none();
        let name = match name {
            Some(name) => name.to_string(),
            None => self.new_var(),
        };
        let id = self.lookup(GLOBAL_BLOCK);
        self.arena[id].push(Fragment::Binary {
            name: name.clone(),
            internal,
            source: source.into(),
        });
        name
    }

    /// Invoke `f` with a fresh record on the first occurrence of `key` and
    /// return the cached record on every later occurrence without invoking
    /// `f` again.
    pub fn run_once(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Self, &mut OnceRecord),
    ) -> OnceRecord {
        if let Some(record) = self.once.get(key) {
            return record.clone();
        }
        let mut record = OnceRecord::default();
        f(self, &mut record);
        self.once.insert(key.to_string(), record.clone());
        record
    }

    /// Look up a previously recorded run-once record without running
    /// anything.
    pub fn once_record(&self, key: &str) -> Option<&OnceRecord> {
        self.once.get(key)
    }

    /// Emit an `#include` into the `headers` block, once per header.
    pub fn include_header(&mut self, header: &str) {
        let line = format!("#include {header}\n");
        self.run_once(header, |builder, _| {
            builder.write_to(HEADERS_BLOCK, line);
        });
    }

    /// Flatten all blocks depth first, left to right, into `out`. The
    /// arena is drained destructively; the builder is consumed, so writing
    /// into a block after finalization cannot be expressed.
    pub fn finalize<W: Write>(mut self, out: &mut W) -> Result<(), SealError> {
        let root = self.lookup(ROOT_BLOCK);
        let mut stack = vec![std::mem::take(&mut self.arena[root]).into_iter()];
        while let Some(top) = stack.last_mut() {
            match top.next() {
                None => {
                    stack.pop();
                }
                Some(Fragment::Text(text)) => out.write_all(text.as_bytes())?,
                Some(Fragment::Block(id)) => {
                    stack.push(std::mem::take(&mut self.arena[id]).into_iter());
                }
                Some(Fragment::Binary {
                    name,
                    internal,
                    source,
                }) => write_hex_array(out, &name, internal, source)?,
            }
        }
        Ok(())
    }
}

const HEX_CHUNK: usize = 8192;

/// Stream `source` into a length-terminated C byte array. Peak memory is
/// one chunk regardless of the source size.
fn write_hex_array<W: Write>(
    out: &mut W,
    name: &str,
    internal: bool,
    source: ByteSource,
) -> Result<(), SealError> {
    let qualifier = if internal { "static " } else { "" };
    write!(out, "{qualifier}uint8_t {name}[] = {{")?;
    let mut reader = source.into_reader();
    let mut buf = [0u8; HEX_CHUNK];
    let mut text = String::with_capacity(HEX_CHUNK * 6);
    let mut count: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        text.clear();
        for &byte in &buf[..n] {
            if count % 16 == 0 {
                text.push('\n');
            } else {
                text.push(' ');
            }
            let _ = write!(text, "0x{byte:02x},");
            count += 1;
        }
        out.write_all(text.as_bytes())?;
    }
    write!(out, "}};\n{qualifier}size_t {name}_len = 0x{count:x};\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(builder: CodeBuilder) -> String {
        let mut out = Vec::new();
        builder.finalize(&mut out).expect("finalize");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn blocks_flatten_in_splice_order() {
        let mut builder = CodeBuilder::new("// head\n");
        builder.write("one\n");
        builder.new_block("middle");
        builder.write("three\n");
        builder.write_to("middle", "two\n");
        assert_eq!(render(builder), "// head\none\ntwo\nthree\n");
    }

    #[test]
    fn run_once_emits_exactly_once() {
        let mut builder = CodeBuilder::new("");
        for _ in 0..3 {
            builder.run_once("guard", |b, _| b.write("guarded\n"));
        }
        assert_eq!(render(builder), "guarded\n");
    }

    #[test]
    fn run_once_returns_cached_record() {
        let mut builder = CodeBuilder::new("");
        let first = builder.run_once("salt", |b, rec| {
            rec.var = b.new_var();
            rec.bytes = vec![1, 2, 3];
        });
        let second = builder.run_once("salt", |_, _| panic!("must not rerun"));
        assert_eq!(first.var, second.var);
        assert_eq!(second.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn include_header_deduplicates() {
        let mut builder = CodeBuilder::new("");
        builder.include_header("\"smbios.h\"");
        builder.include_header("\"smbios.h\"");
        assert_eq!(render(builder), "#include \"smbios.h\"\n");
    }

    #[test]
    fn with_block_restores_target_on_error() {
        let mut builder = CodeBuilder::new("");
        builder.new_block("aside");
        let result: Result<(), SealError> = builder.with_block("aside", |b| {
            b.write("inside\n");
            Err(SealError::Config("boom".into()))
        });
        assert!(result.is_err());
        builder.write("after\n");
        assert_eq!(render(builder), "inside\nafter\n");
    }

    #[test]
    fn hex_array_breaks_every_sixteen_bytes() {
        let mut builder = CodeBuilder::new("");
        let name = builder.embed_binary((0u8..18).collect::<Vec<u8>>(), Some("blob"));
        assert_eq!(name, "blob");
        let text = render(builder);
        assert!(text.starts_with("uint8_t blob[] = {\n0x00, 0x01,"));
        assert!(text.contains("0x0f,\n0x10, 0x11,};"));
        assert!(text.ends_with("size_t blob_len = 0x12;\n"));
    }

    #[test]
    fn generated_names_are_unique_and_static() {
        let mut builder = CodeBuilder::new("");
        let a = builder.embed_binary(vec![1u8], None);
        let b = builder.embed_binary(vec![2u8], None);
        assert_ne!(a, b);
        let text = render(builder);
        assert!(text.contains(&format!("static uint8_t {a}[] = {{")));
        assert!(text.contains(&format!("static size_t {b}_len = 0x1;")));
    }
}
