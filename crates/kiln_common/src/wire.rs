//! Primitive readers and writers for the persisted wire formats.
//!
//! The cache entry directory and isolated instance blobs are fixed binary
//! layouts shared with existing on-disk caches: little-endian integers,
//! 16-byte guids, and UTF-16 strings prefixed by their code-unit count.

use std::io::{self, Read, Write};

use crate::guid::Guid;

/// Writes a little-endian `u32`.
pub fn write_u32(w: &mut impl Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Reads a little-endian `u32`.
pub fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Writes a little-endian `u64`.
pub fn write_u64(w: &mut impl Write, value: u64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Reads a little-endian `u64`.
pub fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Writes a guid as its raw 16 bytes.
pub fn write_guid(w: &mut impl Write, guid: Guid) -> io::Result<()> {
    w.write_all(guid.as_bytes())
}

/// Reads a 16-byte guid.
pub fn read_guid(r: &mut impl Read) -> io::Result<Guid> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf)?;
    Ok(Guid::from_bytes(buf))
}

/// Writes a string as a `u32` UTF-16 code-unit count followed by the
/// little-endian code units.
pub fn write_utf16(w: &mut impl Write, s: &str) -> io::Result<()> {
    let units: Vec<u16> = s.encode_utf16().collect();
    write_u32(w, units.len() as u32)?;
    for unit in units {
        w.write_all(&unit.to_le_bytes())?;
    }
    Ok(())
}

/// Reads a length-prefixed UTF-16 string.
///
/// Unpaired surrogates are rejected as `InvalidData`.
pub fn read_utf16(r: &mut impl Read) -> io::Result<String> {
    let count = read_u32(r)? as usize;
    let mut raw = vec![0u8; count * 2];
    r.read_exact(&mut raw)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
