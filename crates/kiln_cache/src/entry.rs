//! Cache entry encoding.
//!
//! An entry starts with a directory (instance count, then guid and UTF-16
//! path per instance) followed by each instance's isolated blob in the same
//! order. The layout is persisted on disk; keep it stable.

use std::io::{Read, Write};

use kiln_common::wire;
use kiln_db::{
    instantiate_isolated, parse_isolated, write_isolated, AssetCodecs, InstanceHandle,
    ObjectDatabase,
};

use crate::error::CacheError;

/// Writes the committed output instances of one node as a cache entry.
pub fn write_entry(w: &mut impl Write, instances: &[InstanceHandle]) -> Result<(), CacheError> {
    wire::write_u32(w, instances.len() as u32)?;
    for instance in instances {
        wire::write_guid(w, instance.guid())?;
        wire::write_utf16(w, &instance.path())?;
    }
    for instance in instances {
        write_isolated(instance, w)?;
    }
    Ok(())
}

/// Rehydrates a cache entry into the output database.
///
/// With `reuse` set, instances whose guid is already committed in `db` are
/// returned as-is instead of being recreated; the blob is still consumed to
/// keep the reader positioned.
pub fn read_entry(
    r: &mut impl Read,
    db: &dyn ObjectDatabase,
    codecs: &AssetCodecs,
    reuse: bool,
) -> Result<Vec<InstanceHandle>, CacheError> {
    let count = wire::read_u32(r)? as usize;
    let mut directory = Vec::with_capacity(count);
    for _ in 0..count {
        let guid = wire::read_guid(r)?;
        let path = wire::read_utf16(r)?;
        directory.push((guid, path));
    }

    let mut instances = Vec::with_capacity(count);
    for (guid, path) in directory {
        let payload = parse_isolated(r)?;
        if reuse {
            if let Some(existing) = db.instance(guid) {
                instances.push(existing);
                continue;
            }
        }
        instances.push(instantiate_isolated(db, codecs, &path, guid, &payload)?);
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::{AssetTypeTag, Guid};
    use kiln_db::{encode_asset, Asset, DbError, MemoryDatabase};
    use serde::{Deserialize, Serialize};
    use std::any::Any;
    use std::io::Cursor;
    use std::sync::Arc;

    const NOTE_TAG: AssetTypeTag = AssetTypeTag::new("tests.Note");

    #[derive(Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Asset for Note {
        fn type_tag(&self) -> AssetTypeTag {
            NOTE_TAG
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn encode(&self) -> Result<Vec<u8>, DbError> {
            encode_asset(self)
        }
    }

    fn codecs() -> AssetCodecs {
        let mut c = AssetCodecs::new();
        c.register::<Note>(NOTE_TAG);
        c
    }

    fn committed(db: &MemoryDatabase, path: &str, guid: Guid, text: &str) -> InstanceHandle {
        let inst = db.create_instance(path, guid).unwrap();
        inst.set_object(Arc::new(Note {
            text: text.to_string(),
        }))
        .unwrap();
        inst.commit();
        inst
    }

    #[test]
    fn entry_roundtrip() {
        let source = MemoryDatabase::new();
        let a = committed(&source, "out/a", Guid::from_u128(1), "A");
        let b = committed(&source, "out/b", Guid::from_u128(2), "B");

        let mut entry = Vec::new();
        write_entry(&mut entry, &[a, b]).unwrap();

        let target = MemoryDatabase::new();
        let back = read_entry(&mut Cursor::new(&entry), &target, &codecs(), false).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back[0].path(), "out/a");
        assert_eq!(back[1].guid(), Guid::from_u128(2));
        assert_eq!(target.committed_count(), 2);
    }

    #[test]
    fn reuse_keeps_existing_instances() {
        let source = MemoryDatabase::new();
        let a = committed(&source, "out/a", Guid::from_u128(1), "A");

        let mut entry = Vec::new();
        write_entry(&mut entry, &[a]).unwrap();

        let target = MemoryDatabase::new();
        let existing = committed(&target, "out/a", Guid::from_u128(1), "already here");

        let back = read_entry(&mut Cursor::new(&entry), &target, &codecs(), true).unwrap();
        assert!(Arc::ptr_eq(&back[0], &existing));

        let note = back[0].object().unwrap();
        let note = note.as_any().downcast_ref::<Note>().unwrap();
        assert_eq!(note.text, "already here");
    }

    #[test]
    fn exact_wire_layout() {
        let source = MemoryDatabase::new();
        let guid = Guid::from_u128(0xff);
        let inst = source.create_instance("a", guid).unwrap();
        inst.commit();

        let mut entry = Vec::new();
        write_entry(&mut entry, &[inst]).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&[1, 0, 0, 0]); // instance count
        expected.extend_from_slice(guid.as_bytes()); // guid
        expected.extend_from_slice(&[1, 0, 0, 0, b'a', 0]); // path "a" in utf-16
        expected.push(0); // no object
        expected.extend_from_slice(&[0, 0, 0, 0]); // no data streams
        assert_eq!(entry, expected);
    }

    #[test]
    fn truncated_entry_errors() {
        let source = MemoryDatabase::new();
        let a = committed(&source, "out/a", Guid::from_u128(1), "A");

        let mut entry = Vec::new();
        write_entry(&mut entry, &[a]).unwrap();
        entry.truncate(entry.len() - 3);

        let target = MemoryDatabase::new();
        assert!(read_entry(&mut Cursor::new(&entry), &target, &codecs(), false).is_err());
    }

    #[test]
    fn empty_entry() {
        let mut entry = Vec::new();
        write_entry(&mut entry, &[]).unwrap();

        let target = MemoryDatabase::new();
        let back = read_entry(&mut Cursor::new(&entry), &target, &codecs(), false).unwrap();
        assert!(back.is_empty());
    }
}
