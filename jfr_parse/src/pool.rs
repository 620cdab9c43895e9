//! Constant pools: checkpoint records interning the data events reference.
//!
//! Checkpoints form a chain: the chunk header points at the last one, and
//! each record's `delta` field is the relative offset of its predecessor.
//! Pool entries merge into the reader's file-wide dictionaries.

use crate::metadata::TypeDescriptor;
use crate::reader::{JfrReader, CHUNK_HEADER_SIZE};
use crate::{ParseError, Result};

/// A class constant: symbol IDs for its name and package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRef {
    pub name: i64,
    pub package: i64,
    pub modifiers: u16,
}

/// A method constant referencing its class and name/signature symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef {
    pub class: i64,
    pub name: i64,
    pub sig: i64,
    pub modifiers: u16,
    pub hidden: bool,
}

/// A stack trace as parallel arrays: method IDs, frame-type tags, and packed
/// `(line << 16) | bytecode_index` locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTrace {
    pub methods: Vec<i64>,
    pub types: Vec<u8>,
    pub locations: Vec<u32>,
    pub truncated: bool,
}

impl JfrReader {
    pub(crate) fn read_constant_pools(&mut self, offset: usize) -> Result<()> {
        let mut offset = offset as i64;
        loop {
            self.buf.set_pos(offset as usize)?;
            let _size = self.buf.varint()?;
            let _type_id = self.buf.varint()?;
            let _timestamp = self.buf.varlong()?;
            let _duration = self.buf.varlong()?;
            let delta = self.buf.varlong()?;
            let _flush = self.buf.varint()?;

            let pool_count = self.buf.varint()?;
            for _ in 0..pool_count {
                let type_id = self.buf.varint()? as i64;
                let descriptor = self
                    .types
                    .get(&type_id)
                    .cloned()
                    .ok_or(ParseError::UnknownPoolType(type_id))?;
                self.read_constants(&descriptor)?;
            }

            if delta == 0 {
                return Ok(());
            }
            offset += delta;
            if offset <= 0 {
                return Ok(());
            }
        }
    }

    fn read_constants(&mut self, descriptor: &TypeDescriptor) -> Result<()> {
        match descriptor.name.as_str() {
            "jdk.types.ChunkHeader" => self.buf.skip(CHUNK_HEADER_SIZE + 3),
            "java.lang.Thread" => self.read_threads(descriptor.fields.len()),
            "java.lang.Class" => self.read_classes(descriptor.fields.len()),
            "java.lang.String" => self.read_string_pool(),
            "jdk.types.Symbol" => self.read_symbols(),
            "jdk.types.Method" => self.read_methods(descriptor.fields.len()),
            "jdk.types.StackTrace" => self.read_stack_traces(),
            _ => {
                if self.is_enum_type(descriptor) {
                    self.read_enum_values(&descriptor.name)
                } else {
                    self.read_other_constants(descriptor)
                }
            }
        }
    }

    fn read_threads(&mut self, field_count: usize) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            let os_name = self.get_string()?;
            let _os_thread_id = self.buf.varint()?;
            let java_name = self.get_string()?;
            let _java_thread_id = self.buf.varlong()?;
            self.skip_fields(field_count.saturating_sub(4))?;
            if let Some(name) = java_name.or(os_name) {
                self.threads.insert(id as i32, name);
            }
        }
        Ok(())
    }

    fn read_classes(&mut self, field_count: usize) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            let _loader = self.buf.varlong()?;
            let name = self.buf.varlong()?;
            let package = self.buf.varlong()?;
            let modifiers = self.buf.varint()?;
            self.skip_fields(field_count.saturating_sub(4))?;
            self.classes.insert(
                id,
                ClassRef {
                    name,
                    package,
                    modifiers: modifiers as u16,
                },
            );
        }
        Ok(())
    }

    fn read_methods(&mut self, field_count: usize) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            let class = self.buf.varlong()?;
            let name = self.buf.varlong()?;
            let sig = self.buf.varlong()?;
            let modifiers = self.buf.varint()?;
            let hidden = if field_count > 4 {
                self.buf.varint()? != 0
            } else {
                false
            };
            self.skip_fields(field_count.saturating_sub(5))?;
            self.methods.insert(
                id,
                MethodRef {
                    class,
                    name,
                    sig,
                    modifiers: modifiers as u16,
                    hidden,
                },
            );
        }
        Ok(())
    }

    fn read_symbols(&mut self) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            let tag = self.buf.u8()?;
            if tag != 3 {
                return Err(ParseError::InvalidSymbolEncoding(tag));
            }
            let len = self.buf.varint()? as usize;
            let bytes = self.buf.bytes(len)?.to_vec();
            self.symbols.insert(id, bytes);
        }
        Ok(())
    }

    fn read_stack_traces(&mut self) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            let truncated = self.buf.varint()? != 0;
            let depth = self.buf.varint()?.max(0) as usize;
            let mut methods = Vec::with_capacity(depth);
            let mut types = Vec::with_capacity(depth);
            let mut locations = Vec::with_capacity(depth);
            for _ in 0..depth {
                methods.push(self.buf.varlong()?);
                let line = self.buf.varint()?;
                let bci = self.buf.varint()?;
                locations.push(((line as u32) << 16) | (bci as u32 & 0xffff));
                types.push(self.buf.varlong()? as u8);
            }
            self.stack_traces.insert(
                id,
                StackTrace {
                    methods,
                    types,
                    locations,
                    truncated,
                },
            );
        }
        Ok(())
    }

    fn read_string_pool(&mut self) -> Result<()> {
        let count = self.buf.varint()?;
        for _ in 0..count {
            let id = self.buf.varlong()?;
            if let Some(value) = self.get_string()? {
                self.string_pool.insert(id, value);
            }
        }
        Ok(())
    }

    fn is_enum_type(&self, descriptor: &TypeDescriptor) -> bool {
        let string_type = self.type_id("java.lang.String");
        descriptor.fields.len() == 1
            && !descriptor.fields[0].constant_pool
            && descriptor.fields[0].type_id == string_type
    }

    fn read_enum_values(&mut self, type_name: &str) -> Result<()> {
        let count = self.buf.varint()?;
        let mut values = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let ordinal = self.buf.varlong()? as i32;
            if let Some(name) = self.get_string()? {
                values.push((ordinal, name));
            }
        }
        self.enums
            .entry(type_name.to_string())
            .or_default()
            .extend(values);
        Ok(())
    }

    /// Skips a pool of some other type by walking its field list: constant
    /// pool references and non-string primitives are varints, the rest are
    /// tagged strings.
    fn read_other_constants(&mut self, descriptor: &TypeDescriptor) -> Result<()> {
        let string_type = self.type_id("java.lang.String");
        let numeric: Vec<bool> = descriptor
            .fields
            .iter()
            .map(|f| f.constant_pool || f.type_id != string_type)
            .collect();

        let count = self.buf.varint()?;
        for _ in 0..count {
            let _id = self.buf.varlong()?;
            for &is_numeric in &numeric {
                if is_numeric {
                    self.buf.varlong()?;
                } else {
                    self.get_string()?;
                }
            }
        }
        Ok(())
    }

    fn skip_fields(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.buf.varlong()?;
        }
        Ok(())
    }
}
