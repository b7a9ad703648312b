// Chunk serializer/deserializer for string.dump/load
// Lua 5.3 precompiled chunk format (lundump.h / ldump.c)

use std::rc::Rc;

use log::debug;
use smol_str::SmolStr;
use thiserror::Error;

use super::{Chunk, LocVar, LuaValue, UpvalueDesc};
use crate::lua_vm::lua_limits::{LUAI_MAXSHORTLEN, MAXCCALLS};
use crate::lua_vm::opcode::Instruction;

pub const LUA_SIGNATURE: &[u8] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x53;
pub const LUAC_FORMAT: u8 = 0;
pub const LUAC_DATA: &[u8] = b"\x19\x93\r\n\x1a\n";
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMFLT: u8 = 3;
const TAG_NUMINT: u8 = 3 | (1 << 4);
const TAG_SHRSTR: u8 = 4;
const TAG_LNGSTR: u8 = 4 | (1 << 4);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("bad binary format (not a precompiled chunk)")]
    BadSignature,
    #[error("bad binary format (version mismatch)")]
    VersionMismatch,
    #[error("bad binary format (format mismatch)")]
    FormatMismatch,
    #[error("bad binary format (corrupted)")]
    Corrupted,
    #[error("bad binary format ({0} size mismatch)")]
    SizeMismatch(&'static str),
    #[error("bad binary format (endianness mismatch)")]
    EndiannessMismatch,
    #[error("bad binary format (float format mismatch)")]
    FloatFormat,
    #[error("truncated precompiled chunk")]
    Truncated,
    #[error("malformed precompiled chunk ({0})")]
    Malformed(String),
}

/// Serializes `chunk` in the Lua 5.3 format with the host's sizes and
/// little-endian byte order. `strip` drops sources, lines and names.
pub fn dump(chunk: &Chunk, strip: bool) -> Vec<u8> {
    let mut w = DumpState {
        buf: Vec::with_capacity(64 + chunk.code.len() * 4),
        strip,
    };
    w.header();
    w.byte(chunk.upvalue_descs.len() as u8);
    w.function(chunk, None);
    debug!(
        "dumped {} ({} bytes, strip={})",
        chunk.source,
        w.buf.len(),
        strip
    );
    w.buf
}

struct DumpState {
    buf: Vec<u8>,
    strip: bool,
}

impl DumpState {
    fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn int(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn size(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn integer(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn number(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn string(&mut self, s: Option<&[u8]>) {
        match s {
            None => self.byte(0),
            Some(bytes) => {
                let size = bytes.len() as u64 + 1;
                if size < 0xFF {
                    self.byte(size as u8);
                } else {
                    self.byte(0xFF);
                    self.size(size);
                }
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    fn header(&mut self) {
        self.buf.extend_from_slice(LUA_SIGNATURE);
        self.byte(LUAC_VERSION);
        self.byte(LUAC_FORMAT);
        self.buf.extend_from_slice(LUAC_DATA);
        self.byte(4); // int
        self.byte(8); // size_t
        self.byte(4); // Instruction
        self.byte(8); // lua_Integer
        self.byte(8); // lua_Number
        self.integer(LUAC_INT);
        self.number(LUAC_NUM);
    }

    fn function(&mut self, f: &Chunk, parent_source: Option<&SmolStr>) {
        if self.strip || parent_source == Some(&f.source) {
            self.string(None);
        } else {
            self.string(Some(f.source.as_bytes()));
        }
        self.int(f.line_defined);
        self.int(f.last_line_defined);
        self.byte(f.param_count);
        self.byte(f.is_vararg as u8);
        self.byte(f.max_stack_size);

        self.int(f.code.len() as u32);
        for inst in &f.code {
            self.int(inst.as_u32());
        }

        self.int(f.constants.len() as u32);
        for k in &f.constants {
            match k {
                LuaValue::Boolean(b) => {
                    self.byte(TAG_BOOLEAN);
                    self.byte(*b as u8);
                }
                LuaValue::Float(n) => {
                    self.byte(TAG_NUMFLT);
                    self.number(*n);
                }
                LuaValue::Integer(i) => {
                    self.byte(TAG_NUMINT);
                    self.integer(*i);
                }
                LuaValue::String(s) => {
                    let tag = if s.len() <= LUAI_MAXSHORTLEN { TAG_SHRSTR } else { TAG_LNGSTR };
                    self.byte(tag);
                    self.string(Some(s.as_bytes()));
                }
                _ => self.byte(TAG_NIL),
            }
        }

        self.int(f.upvalue_descs.len() as u32);
        for up in &f.upvalue_descs {
            self.byte(up.in_stack as u8);
            self.byte(up.index);
        }

        self.int(f.child_protos.len() as u32);
        for child in &f.child_protos {
            self.function(child, Some(&f.source));
        }

        // debug info
        let lines: &[u32] = if self.strip { &[] } else { &f.line_info };
        self.int(lines.len() as u32);
        for &line in lines {
            self.int(line);
        }
        let locals: &[LocVar] = if self.strip { &[] } else { &f.loc_vars };
        self.int(locals.len() as u32);
        for var in locals {
            self.string(Some(var.name.as_bytes()));
            self.int(var.start_pc);
            self.int(var.end_pc);
        }
        let names = if self.strip { 0 } else { f.upvalue_descs.len() };
        self.int(names as u32);
        for up in &f.upvalue_descs[..names] {
            self.string(Some(up.name.as_bytes()));
        }
    }
}

/// Whether `data` starts like a precompiled chunk.
pub fn is_binary_chunk(data: &[u8]) -> bool {
    data.starts_with(LUA_SIGNATURE)
}

/// Parses and validates a precompiled chunk. A stripped main function gets
/// `chunk_name` as its source.
pub fn undump(data: &[u8], chunk_name: &str) -> Result<Chunk, LoadError> {
    let mut s = LoadState {
        data,
        pos: 0,
        big_endian: false,
        int_size: 4,
        size_t_size: 8,
        integer_size: 8,
        number_size: 8,
        depth: 0,
    };
    s.header()?;
    let _upvalue_count = s.byte()?;
    let chunk = s.function(&SmolStr::new(chunk_name))?;
    chunk.validate()?;
    debug!(
        "undumped {} ({} bytes, big_endian={})",
        chunk.source, s.pos, s.big_endian
    );
    Ok(chunk)
}

struct LoadState<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
    int_size: usize,
    size_t_size: usize,
    integer_size: usize,
    number_size: usize,
    /// Nesting of the prototype being read
    depth: usize,
}

impl<'a> LoadState<'a> {
    fn block(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        let end = self.pos.checked_add(n).ok_or(LoadError::Truncated)?;
        if end > self.data.len() {
            return Err(LoadError::Truncated);
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, LoadError> {
        Ok(self.block(1)?[0])
    }

    /// Unsigned value of `width` bytes in the negotiated byte order.
    fn unsigned(&mut self, width: usize) -> Result<u64, LoadError> {
        let big_endian = self.big_endian;
        let bytes = self.block(width)?;
        let mut v: u64 = 0;
        if big_endian {
            for &b in bytes {
                v = (v << 8) | b as u64;
            }
        } else {
            for &b in bytes.iter().rev() {
                v = (v << 8) | b as u64;
            }
        }
        Ok(v)
    }

    fn int(&mut self) -> Result<u32, LoadError> {
        let v = self.unsigned(self.int_size)?;
        u32::try_from(v).map_err(|_| LoadError::Malformed("integer field too large".into()))
    }

    fn count(&mut self) -> Result<usize, LoadError> {
        let n = self.int()? as usize;
        // every counted element takes at least one byte
        if n > self.data.len() - self.pos {
            return Err(LoadError::Truncated);
        }
        Ok(n)
    }

    fn integer(&mut self) -> Result<i64, LoadError> {
        let width = self.integer_size;
        let v = self.unsigned(width)?;
        Ok(if width == 4 { v as u32 as i32 as i64 } else { v as i64 })
    }

    fn number(&mut self) -> Result<f64, LoadError> {
        let v = self.unsigned(self.number_size)?;
        Ok(if self.number_size == 4 {
            f32::from_bits(v as u32) as f64
        } else {
            f64::from_bits(v)
        })
    }

    fn string(&mut self) -> Result<Option<Vec<u8>>, LoadError> {
        let mut size = self.byte()? as u64;
        if size == 0xFF {
            size = self.unsigned(self.size_t_size)?;
        }
        if size == 0 {
            return Ok(None);
        }
        let len = usize::try_from(size - 1).map_err(|_| LoadError::Truncated)?;
        Ok(Some(self.block(len)?.to_vec()))
    }

    fn header(&mut self) -> Result<(), LoadError> {
        if self.block(LUA_SIGNATURE.len()).ok() != Some(LUA_SIGNATURE) {
            return Err(LoadError::BadSignature);
        }
        if self.byte()? != LUAC_VERSION {
            return Err(LoadError::VersionMismatch);
        }
        if self.byte()? != LUAC_FORMAT {
            return Err(LoadError::FormatMismatch);
        }
        if self.block(LUAC_DATA.len())? != LUAC_DATA {
            return Err(LoadError::Corrupted);
        }
        self.int_size = self.size_byte("int", &[4, 8])?;
        self.size_t_size = self.size_byte("size_t", &[4, 8])?;
        self.size_byte("Instruction", &[4])?;
        self.integer_size = self.size_byte("lua_Integer", &[4, 8])?;
        self.number_size = self.size_byte("lua_Number", &[4, 8])?;

        let sentinel_at = self.pos;
        if self.integer()? != LUAC_INT {
            self.pos = sentinel_at;
            self.big_endian = true;
            if self.integer()? != LUAC_INT {
                return Err(LoadError::EndiannessMismatch);
            }
            debug!("undump: chunk is big-endian");
        }
        if self.number()? != LUAC_NUM {
            return Err(LoadError::FloatFormat);
        }
        Ok(())
    }

    fn size_byte(&mut self, what: &'static str, allowed: &[usize]) -> Result<usize, LoadError> {
        let size = self.byte()? as usize;
        if allowed.contains(&size) {
            Ok(size)
        } else {
            Err(LoadError::SizeMismatch(what))
        }
    }

    fn name(&mut self) -> Result<SmolStr, LoadError> {
        Ok(self
            .string()?
            .map(|b| SmolStr::new(String::from_utf8_lossy(&b)))
            .unwrap_or_default())
    }

    fn function(&mut self, parent_source: &SmolStr) -> Result<Chunk, LoadError> {
        let source = match self.string()? {
            Some(bytes) => SmolStr::new(String::from_utf8_lossy(&bytes)),
            None => parent_source.clone(),
        };
        let mut f = Chunk::new(source);
        f.line_defined = self.int()?;
        f.last_line_defined = self.int()?;
        f.param_count = self.byte()?;
        f.is_vararg = self.byte()? != 0;
        f.max_stack_size = self.byte()?;

        let n = self.count()?;
        f.code.reserve(n);
        for _ in 0..n {
            let raw = self.unsigned(4)? as u32;
            f.code.push(Instruction::from_u32(raw));
        }

        let n = self.count()?;
        for _ in 0..n {
            let value = match self.byte()? {
                TAG_NIL => LuaValue::Nil,
                TAG_BOOLEAN => LuaValue::Boolean(self.byte()? != 0),
                TAG_NUMFLT => LuaValue::Float(self.number()?),
                TAG_NUMINT => LuaValue::Integer(self.integer()?),
                TAG_SHRSTR | TAG_LNGSTR => match self.string()? {
                    Some(bytes) => LuaValue::string(bytes),
                    None => return Err(LoadError::Malformed("absent string constant".into())),
                },
                tag => return Err(LoadError::Malformed(format!("bad constant tag {}", tag))),
            };
            f.constants.push(value);
        }

        let n = self.count()?;
        for _ in 0..n {
            let in_stack = self.byte()? != 0;
            let index = self.byte()?;
            f.upvalue_descs.push(UpvalueDesc {
                name: SmolStr::default(),
                in_stack,
                index,
            });
        }

        let n = self.count()?;
        if n > 0 {
            self.depth += 1;
            if self.depth > MAXCCALLS {
                return Err(LoadError::Malformed("functions nested too deeply".into()));
            }
            for _ in 0..n {
                let child = self.function(&f.source)?;
                f.child_protos.push(Rc::new(child));
            }
            self.depth -= 1;
        }

        let n = self.count()?;
        f.line_info.reserve(n);
        for _ in 0..n {
            f.line_info.push(self.int()?);
        }
        let n = self.count()?;
        for _ in 0..n {
            let name = self.name()?;
            let start_pc = self.int()?;
            let end_pc = self.int()?;
            f.loc_vars.push(LocVar {
                name,
                start_pc,
                end_pc,
            });
        }
        let n = self.count()?;
        if n > f.upvalue_descs.len() {
            return Err(LoadError::Malformed("too many upvalue names".into()));
        }
        for i in 0..n {
            f.upvalue_descs[i].name = self.name()?;
        }
        Ok(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::opcode::OpCode;

    fn sample() -> Chunk {
        let mut child = Chunk::new("@sample.lua");
        child.line_defined = 2;
        child.last_line_defined = 4;
        child.code = vec![Instruction::create_abc(OpCode::Return, 0, 1, 0)];
        child.line_info = vec![4];

        let mut main = Chunk::new("@sample.lua");
        main.is_vararg = true;
        main.code = vec![
            Instruction::create_abx(OpCode::LoadK, 0, 0),
            Instruction::create_abx(OpCode::LoadK, 1, 3),
            Instruction::create_abx(OpCode::Closure, 0, 0),
            Instruction::create_abc(OpCode::Return, 0, 1, 0),
        ];
        main.line_info = vec![1, 1, 4, 5];
        main.constants = vec![
            LuaValue::from("short"),
            LuaValue::Integer(-3),
            LuaValue::Float(0.5),
            LuaValue::from("x".repeat(300)),
            LuaValue::Boolean(true),
            LuaValue::Nil,
        ];
        main.upvalue_descs = vec![UpvalueDesc {
            name: "_ENV".into(),
            in_stack: true,
            index: 0,
        }];
        main.loc_vars = vec![LocVar {
            name: "f".into(),
            start_pc: 3,
            end_pc: 4,
        }];
        main.child_protos = vec![Rc::new(child)];
        main
    }

    #[test]
    fn test_header_layout() {
        let bytes = dump(&sample(), false);
        assert_eq!(&bytes[..4], b"\x1bLua");
        assert_eq!(bytes[4], 0x53);
        assert_eq!(bytes[5], 0);
        assert_eq!(&bytes[6..12], LUAC_DATA);
        assert_eq!(&bytes[12..17], &[4, 8, 4, 8, 8]);
        assert_eq!(&bytes[17..25], &0x5678i64.to_le_bytes());
        assert_eq!(&bytes[25..33], &370.5f64.to_le_bytes());
        assert_eq!(bytes[33], 1);
    }

    #[test]
    fn test_round_trip() {
        let original = sample();
        let loaded = undump(&dump(&original, false), "=ignored").unwrap();
        assert_eq!(loaded.source, "@sample.lua");
        assert_eq!(loaded.code, original.code);
        assert_eq!(loaded.line_info, original.line_info);
        assert_eq!(loaded.loc_vars, original.loc_vars);
        assert_eq!(loaded.upvalue_descs, original.upvalue_descs);
        assert_eq!(loaded.constants.len(), 6);
        assert!(loaded.constants[3].raw_equal(&original.constants[3]));
        // the child inherits its parent's source
        assert_eq!(loaded.child_protos[0].source, "@sample.lua");
        assert_eq!(dump(&loaded, false), dump(&original, false));
    }

    #[test]
    fn test_stripped_round_trip() {
        let loaded = undump(&dump(&sample(), true), "=stripped").unwrap();
        assert_eq!(loaded.source, "=stripped");
        assert!(loaded.line_info.is_empty());
        assert!(loaded.loc_vars.is_empty());
        assert_eq!(loaded.upvalue_descs[0].name, "");
    }

    #[test]
    fn test_big_endian_input() {
        let little = dump(&sample(), true);
        // the same chunk with big-endian multi-byte fields
        let mut big = little[..17].to_vec();
        big.extend_from_slice(&LUAC_INT.to_be_bytes());
        big.extend_from_slice(&LUAC_NUM.to_be_bytes());
        big.push(1);
        let mut rest = Vec::new();
        let mut be = BigEndianWriter(&mut rest);
        be.function(&sample());
        big.extend_from_slice(&rest);
        let loaded = undump(&big, "=be").unwrap();
        assert_eq!(loaded.code, sample().code);
    }

    struct BigEndianWriter<'a>(&'a mut Vec<u8>);

    impl BigEndianWriter<'_> {
        fn int(&mut self, v: u32) {
            self.0.extend_from_slice(&v.to_be_bytes());
        }

        fn function(&mut self, f: &Chunk) {
            self.0.push(0);
            self.int(f.line_defined);
            self.int(f.last_line_defined);
            self.0.extend_from_slice(&[f.param_count, f.is_vararg as u8, f.max_stack_size]);
            self.int(f.code.len() as u32);
            for i in &f.code {
                self.int(i.as_u32());
            }
            self.int(f.constants.len() as u32);
            for k in &f.constants {
                match k {
                    LuaValue::Boolean(b) => self.0.extend_from_slice(&[TAG_BOOLEAN, *b as u8]),
                    LuaValue::Float(n) => {
                        self.0.push(TAG_NUMFLT);
                        self.0.extend_from_slice(&n.to_be_bytes());
                    }
                    LuaValue::Integer(i) => {
                        self.0.push(TAG_NUMINT);
                        self.0.extend_from_slice(&i.to_be_bytes());
                    }
                    LuaValue::String(s) if s.len() + 1 < 0xFF => {
                        self.0.extend_from_slice(&[TAG_SHRSTR, s.len() as u8 + 1]);
                        self.0.extend_from_slice(s.as_bytes());
                    }
                    LuaValue::String(s) => {
                        self.0.extend_from_slice(&[TAG_LNGSTR, 0xFF]);
                        self.0.extend_from_slice(&(s.len() as u64 + 1).to_be_bytes());
                        self.0.extend_from_slice(s.as_bytes());
                    }
                    _ => self.0.push(TAG_NIL),
                }
            }
            self.int(f.upvalue_descs.len() as u32);
            for u in &f.upvalue_descs {
                self.0.extend_from_slice(&[u.in_stack as u8, u.index]);
            }
            self.int(f.child_protos.len() as u32);
            for c in &f.child_protos {
                self.function(c);
            }
            self.int(0);
            self.int(0);
            self.int(0);
        }
    }

    #[test]
    fn test_rejects_deep_nesting() {
        let nest = |levels: usize| {
            let mut f = Chunk::new("=deep");
            f.code = vec![Instruction::create_abc(OpCode::Return, 0, 1, 0)];
            for _ in 0..levels {
                let mut parent = Chunk::new("=deep");
                parent.code = vec![Instruction::create_abc(OpCode::Return, 0, 1, 0)];
                parent.child_protos = vec![Rc::new(f)];
                f = parent;
            }
            f
        };
        assert!(undump(&dump(&nest(MAXCCALLS), true), "=ok").is_ok());
        assert!(matches!(
            undump(&dump(&nest(MAXCCALLS + 1), true), "=deep"),
            Err(LoadError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        let bytes = dump(&sample(), false);
        assert_eq!(undump(b"\x1bLux", "=x").unwrap_err(), LoadError::BadSignature);
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 0x54;
        assert_eq!(undump(&wrong_version, "=x").unwrap_err(), LoadError::VersionMismatch);
        let mut wrong_size = bytes.clone();
        wrong_size[14] = 8;
        assert_eq!(
            undump(&wrong_size, "=x").unwrap_err(),
            LoadError::SizeMismatch("Instruction")
        );
        let mut wrong_float = bytes.clone();
        wrong_float[32] ^= 0x40;
        assert_eq!(undump(&wrong_float, "=x").unwrap_err(), LoadError::FloatFormat);
        assert_eq!(
            undump(&bytes[..bytes.len() - 3], "=x").unwrap_err(),
            LoadError::Truncated
        );
    }
}
