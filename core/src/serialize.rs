//! Binary IR serialization/deserialization (.dbtir format).
//!
//! Format (little-endian):
//!   HEADER: magic[4] + version[2] + flags[2] + nb_globals[4]
//!           + nb_labels[4] + tb_count[4]
//!   Per TB: STRING TABLE + TEMP SECTION + OP SECTION
//!
//! The header version is the lowest IR version able to represent
//! every op in the block, so an older consumer can still read blocks
//! that only use the opcodes it knows.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::context::IrBody;
use crate::op::{Op, OpIdx, MAX_OP_ARGS};
use crate::opcode::{Opcode, IR_VERSION};
use crate::temp::{Temp, TempIdx, TempKind};
use crate::types::Type;

const MAGIC: &[u8; 4] = b"DBIR";
const NONE_U32: u32 = 0xFFFF_FFFF;

// -- Write helpers --

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

// -- Read helpers --

fn read_u8(r: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(r: &mut impl Read) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn err(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn u8_to_kind(v: u8) -> io::Result<TempKind> {
    match v {
        0 => Ok(TempKind::Ebb),
        1 => Ok(TempKind::Tb),
        2 => Ok(TempKind::Global),
        3 => Ok(TempKind::Fixed),
        4 => Ok(TempKind::Const),
        _ => Err(err("invalid TempKind")),
    }
}

fn u8_to_type(v: u8) -> io::Result<Type> {
    match v {
        0 => Ok(Type::I32),
        1 => Ok(Type::I64),
        _ => Err(err("invalid Type")),
    }
}

// -- String table --

struct StringTable {
    strings: Vec<&'static str>,
    map: HashMap<&'static str, u32>,
}

impl StringTable {
    fn new() -> Self {
        Self {
            strings: Vec::new(),
            map: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &'static str) -> u32 {
        if let Some(&idx) = self.map.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s);
        self.map.insert(s, idx);
        idx
    }

    fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        write_u32(w, self.strings.len() as u32)?;
        for s in &self.strings {
            let bytes = s.as_bytes();
            write_u16(w, bytes.len() as u16)?;
            w.write_all(bytes)?;
        }
        Ok(())
    }
}

fn read_string_table(r: &mut impl Read) -> io::Result<Vec<&'static str>> {
    let count = read_u32(r)? as usize;
    let mut table = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let len = read_u16(r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        let s = String::from_utf8(buf)
            .map_err(|e| err(&format!("invalid UTF-8: {e}")))?;
        // Temp names are `&'static str`; loaded names live as long as
        // the process. Only debugging tools load IR from disk.
        let leaked: &'static str = Box::leak(s.into_boxed_str());
        table.push(leaked);
    }
    Ok(table)
}

/// Lowest IR version that contains every opcode used by `body`.
pub fn required_version(body: &IrBody) -> u16 {
    body.ops
        .iter()
        .map(|op| op.opc.def().since)
        .max()
        .unwrap_or(1)
        .max(1)
}

/// Serialize one finalized block to the binary .dbtir format.
///
/// Output depends only on the body, so two translations of the same
/// guest bytes under the same context produce identical streams.
pub fn serialize(body: &IrBody, w: &mut impl Write) -> io::Result<()> {
    // -- Header --
    w.write_all(MAGIC)?;
    write_u16(w, required_version(body))?;
    write_u16(w, 0)?; // flags
    write_u32(w, body.nb_globals)?;
    write_u32(w, body.nb_labels)?;
    write_u32(w, 1)?; // tb_count = 1

    // -- Build string table --
    let mut strtab = StringTable::new();
    let name_indices: Vec<u32> = body
        .temps
        .iter()
        .map(|t| t.name.map_or(NONE_U32, |n| strtab.intern(n)))
        .collect();
    strtab.write_to(w)?;

    // -- Temps --
    write_u32(w, body.temps.len() as u32)?;
    for (t, &name) in body.temps.iter().zip(&name_indices) {
        write_u8(w, t.kind as u8)?;
        write_u8(w, t.ty as u8)?;
        w.write_all(&[0u8; 2])?; // padding
        write_u64(w, t.val)?;
        write_u32(w, t.mem_base.map_or(NONE_U32, |b| b.0))?;
        write_i64(w, t.mem_offset)?;
        write_u32(w, name)?;
    }

    // -- Ops --
    write_u32(w, body.ops.len() as u32)?;
    for op in &body.ops {
        write_u8(w, op.opc as u8)?;
        write_u8(w, op.op_type as u8)?;
        write_u8(w, op.nargs)?;
        write_u8(w, 0)?; // padding
        for a in &op.args[..op.nargs as usize] {
            write_u32(w, a.0)?;
        }
    }

    Ok(())
}

/// Deserialize a .dbtir stream into one body per TB.
///
/// Handles concatenated streams (each with its own header). Rejects
/// headers newer than [`IR_VERSION`] and ops newer than the version
/// their header declares.
pub fn deserialize(r: &mut impl Read) -> io::Result<Vec<IrBody>> {
    let mut bodies = Vec::new();
    loop {
        // Try to read magic; EOF here is normal termination.
        let mut magic = [0u8; 4];
        match r.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e),
        }
        if &magic != MAGIC {
            return Err(err("bad magic"));
        }
        let version = read_u16(r)?;
        if version == 0 || version > IR_VERSION {
            return Err(err("unsupported version"));
        }
        let _flags = read_u16(r)?;
        let nb_globals = read_u32(r)?;
        let nb_labels = read_u32(r)?;
        let tb_count = read_u32(r)? as usize;

        for _ in 0..tb_count {
            let body = deserialize_one_tb(r, version, nb_globals, nb_labels)?;
            bodies.push(body);
        }
    }
    Ok(bodies)
}

fn deserialize_one_tb(
    r: &mut impl Read,
    version: u16,
    nb_globals: u32,
    nb_labels: u32,
) -> io::Result<IrBody> {
    // -- String table --
    let strtab = read_string_table(r)?;

    // -- Temps --
    let temp_count = read_u32(r)? as usize;
    if (nb_globals as usize) > temp_count {
        return Err(err("more globals than temps"));
    }
    let mut temps = Vec::with_capacity(temp_count.min(4096));
    for i in 0..temp_count {
        let kind = u8_to_kind(read_u8(r)?)?;
        let ty = u8_to_type(read_u8(r)?)?;
        let mut pad = [0u8; 2];
        r.read_exact(&mut pad)?;
        let val = read_u64(r)?;
        let mem_base = match read_u32(r)? {
            NONE_U32 => None,
            b => Some(TempIdx(b)),
        };
        let mem_offset = read_i64(r)?;
        let name = match read_u32(r)? {
            NONE_U32 => None,
            n => Some(
                *strtab
                    .get(n as usize)
                    .ok_or_else(|| err("name index out of range"))?,
            ),
        };

        temps.push(Temp {
            idx: TempIdx(i as u32),
            ty,
            kind,
            val,
            mem_base,
            mem_offset,
            name,
        });
    }

    // -- Ops --
    let op_count = read_u32(r)? as usize;
    let mut ops = Vec::with_capacity(op_count.min(1 << 16));
    for i in 0..op_count {
        let opc = Opcode::from_u8(read_u8(r)?)
            .ok_or_else(|| err("invalid Opcode"))?;
        if !opc.available_in(version) {
            return Err(err("opcode newer than stream version"));
        }
        let op_type = u8_to_type(read_u8(r)?)?;
        let nargs = read_u8(r)?;
        let _pad = read_u8(r)?;
        if nargs != opc.def().nb_args() || nargs as usize > MAX_OP_ARGS {
            return Err(err("argument count mismatch"));
        }
        let mut args = [TempIdx(0); MAX_OP_ARGS];
        for slot in args.iter_mut().take(nargs as usize) {
            *slot = TempIdx(read_u32(r)?);
        }
        let mut op = Op::new(OpIdx(i as u32), opc, op_type);
        op.nargs = nargs;
        op.args = args;
        ops.push(op);
    }

    Ok(IrBody {
        temps,
        ops,
        nb_globals,
        nb_labels,
    })
}
