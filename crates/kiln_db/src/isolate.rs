//! Isolated-instance blob codec.
//!
//! An isolated instance is a self-contained serialization of an instance's
//! object graph and data streams, written into build cache entries and
//! rehydrated on cache hits. The layout is little-endian: a has-object byte,
//! then (if present) the UTF-16 type tag and the length-prefixed object
//! payload, then a stream count followed by UTF-16 name, u64 stamp and
//! length-prefixed bytes per stream. This layout is persisted on disk; keep
//! it stable.

use std::io::{Read, Write};
use std::sync::Arc;

use kiln_common::{wire, Guid};

use crate::asset::AssetCodecs;
use crate::database::{InstanceHandle, ObjectDatabase};
use crate::error::DbError;

/// A parsed isolated-instance blob, not yet attached to a database.
pub struct IsolatedPayload {
    /// Type tag and encoded object graph, if the instance carried an object.
    pub object: Option<(String, Vec<u8>)>,

    /// Data streams as (name, stamp, bytes).
    pub data: Vec<(String, u64, Vec<u8>)>,
}

/// Serializes an instance into an isolated blob.
pub fn write_isolated(instance: &InstanceHandle, w: &mut impl Write) -> Result<(), DbError> {
    match instance.object() {
        Some(object) => {
            w.write_all(&[1])?;
            wire::write_utf16(w, object.type_tag().as_str())?;
            let bytes = object.encode()?;
            wire::write_u32(w, bytes.len() as u32)?;
            w.write_all(&bytes)?;
        }
        None => w.write_all(&[0])?,
    }

    let names = instance.data_names();
    wire::write_u32(w, names.len() as u32)?;
    for name in names {
        let bytes = instance.read_data(&name).unwrap_or_default();
        let stamp = instance.data_stamp(&name).unwrap_or(0);
        wire::write_utf16(w, &name)?;
        wire::write_u64(w, stamp)?;
        wire::write_u32(w, bytes.len() as u32)?;
        w.write_all(&bytes)?;
    }
    Ok(())
}

/// Parses one isolated blob without touching any database.
pub fn parse_isolated(r: &mut impl Read) -> Result<IsolatedPayload, DbError> {
    let mut has_object = [0u8; 1];
    r.read_exact(&mut has_object)?;

    let object = if has_object[0] != 0 {
        let tag = wire::read_utf16(r)?;
        let len = wire::read_u32(r)? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        Some((tag, bytes))
    } else {
        None
    };

    let count = wire::read_u32(r)? as usize;
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let name = wire::read_utf16(r)?;
        let stamp = wire::read_u64(r)?;
        let len = wire::read_u32(r)? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        data.push((name, stamp, bytes));
    }

    Ok(IsolatedPayload { object, data })
}

/// Creates and commits an instance from a parsed payload.
pub fn instantiate_isolated(
    db: &dyn ObjectDatabase,
    codecs: &AssetCodecs,
    path: &str,
    guid: Guid,
    payload: &IsolatedPayload,
) -> Result<InstanceHandle, DbError> {
    let instance = db.create_instance(path, guid)?;
    if let Some((tag, bytes)) = &payload.object {
        let object = codecs.decode(tag, bytes)?;
        instance.set_object(object)?;
    }
    for (name, _stamp, bytes) in &payload.data {
        instance.write_data(name, bytes)?;
    }
    instance.commit();
    Ok(instance)
}

/// Reads one isolated blob and materializes it as a committed instance.
pub fn read_isolated(
    db: &dyn ObjectDatabase,
    codecs: &AssetCodecs,
    path: &str,
    guid: Guid,
    r: &mut impl Read,
) -> Result<InstanceHandle, DbError> {
    let payload = parse_isolated(r)?;
    instantiate_isolated(db, codecs, path, guid, &payload)
}
