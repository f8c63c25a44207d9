//! The typed source/output object model and the decoder registry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use kiln_common::AssetTypeTag;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DbError;

/// A typed object graph stored in the database and consumed by pipelines.
///
/// Assets are immutable once read; pipelines downcast through
/// [`as_any`](Asset::as_any) at the registry boundary. [`encode`](Asset::encode)
/// produces the serialized payload used when an instance is isolated into a
/// cache entry; implementations typically delegate to [`encode_asset`].
pub trait Asset: Any + Send + Sync {
    /// The stable tag identifying this asset's type.
    fn type_tag(&self) -> AssetTypeTag;

    /// Upcast for downcasting at the pipeline boundary.
    fn as_any(&self) -> &dyn Any;

    /// Serializes the object graph to bytes.
    fn encode(&self) -> Result<Vec<u8>, DbError>;
}

/// Encodes a serde-serializable asset with bincode.
pub fn encode_asset<T: Serialize>(value: &T) -> Result<Vec<u8>, DbError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        DbError::Encode {
            reason: e.to_string(),
        }
    })
}

fn decode_asset<T: Asset + DeserializeOwned>(bytes: &[u8]) -> Result<Arc<dyn Asset>, DbError> {
    let (value, _) = bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
        .map_err(|e| DbError::Decode {
            reason: e.to_string(),
        })?;
    Ok(Arc::new(value))
}

type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Asset>, DbError>;

/// Registry of asset decoders, keyed by type tag.
///
/// Rehydrating an isolated instance from the build cache requires turning the
/// serialized payload back into a typed object; every asset type that can
/// appear in a cached output instance must be registered here at startup.
#[derive(Default)]
pub struct AssetCodecs {
    decoders: HashMap<AssetTypeTag, DecodeFn>,
}

impl AssetCodecs {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the decoder for asset type `T` under `tag`.
    pub fn register<T: Asset + DeserializeOwned>(&mut self, tag: AssetTypeTag) {
        self.decoders.insert(tag, decode_asset::<T>);
    }

    /// Decodes a payload produced by [`Asset::encode`] for the given tag.
    pub fn decode(&self, tag_name: &str, bytes: &[u8]) -> Result<Arc<dyn Asset>, DbError> {
        let decoder = self
            .decoders
            .iter()
            .find(|(tag, _)| tag.as_str() == tag_name)
            .map(|(_, f)| *f)
            .ok_or_else(|| DbError::UnknownAssetType {
                tag: tag_name.to_string(),
            })?;
        decoder(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const NOTE_TAG: AssetTypeTag = AssetTypeTag::new("tests.Note");

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
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

    #[test]
    fn encode_decode_roundtrip() {
        let mut codecs = AssetCodecs::new();
        codecs.register::<Note>(NOTE_TAG);

        let note = Note {
            text: "hello".to_string(),
        };
        let bytes = note.encode().unwrap();
        let back = codecs.decode(NOTE_TAG.as_str(), &bytes).unwrap();
        let back = back.as_any().downcast_ref::<Note>().unwrap();
        assert_eq!(back, &note);
    }

    #[test]
    fn unknown_tag_errors() {
        let codecs = AssetCodecs::new();
        assert!(matches!(
            codecs.decode("tests.Missing", b""),
            Err(DbError::UnknownAssetType { .. })
        ));
    }

    #[test]
    fn corrupt_payload_errors() {
        let mut codecs = AssetCodecs::new();
        codecs.register::<Note>(NOTE_TAG);
        assert!(matches!(
            codecs.decode(NOTE_TAG.as_str(), &[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(DbError::Decode { .. })
        ));
    }
}
