//! Content hashing for incremental rebuild decisions.
//!
//! All hashes here are deliberately non-cryptographic 32-bit values combined
//! by wrapping addition. The persisted hash records and cache keys depend on
//! these exact semantics; changing the algorithm or the accumulation is a
//! compatibility break with existing hash stores and caches, not a fix.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::Xxh32;

/// A stable tag identifying an asset's runtime type.
///
/// Tags key the pipeline registry: every source asset type is consumed by
/// exactly one registered pipeline. Using an explicit tag keeps lookups free
/// of reflection and stable across compilations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AssetTypeTag(&'static str);

impl AssetTypeTag {
    /// Creates a tag from a static name, conventionally `"module.TypeName"`.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the tag's name.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for AssetTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Error raised while hashing an object graph or a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The object graph could not be serialized for hashing.
    #[error("failed to encode object for hashing: {reason}")]
    Encode {
        /// Description of the encoding failure.
        reason: String,
    },

    /// An I/O error occurred while reading the stream being hashed.
    ///
    /// Callers must treat this as "fully dirty", never as a silent skip.
    #[error("failed to read stream for hashing: {0}")]
    Io(#[from] std::io::Error),
}

/// Deterministic 32-bit content hashing over byte streams and object graphs.
pub struct ContentHasher;

/// Read buffer size for stream hashing. The digest is independent of this.
const CHUNK_SIZE: usize = 4096;

impl ContentHasher {
    /// Hashes a byte slice with XXH32, seed 0.
    pub fn hash_bytes(data: &[u8]) -> u32 {
        xxhash_rust::xxh32::xxh32(data, 0)
    }

    /// Hashes a byte stream in chunks.
    ///
    /// The result equals [`hash_bytes`](Self::hash_bytes) over the full
    /// contents regardless of how the reader delivers them.
    pub fn hash_reader(mut reader: impl Read) -> Result<u32, HashError> {
        let mut hasher = Xxh32::new(0);
        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.digest())
    }

    /// Hashes an in-memory object graph.
    ///
    /// Deterministic across processes and runs: the object is encoded with
    /// bincode and the encoding hashed. Object graphs must use ordered
    /// containers for any map-like state, otherwise the encoding (and the
    /// hash) would depend on iteration order.
    pub fn hash_object<T: Serialize + ?Sized>(value: &T) -> Result<u32, HashError> {
        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(
            |e| HashError::Encode {
                reason: e.to_string(),
            },
        )?;
        Ok(Self::hash_bytes(&bytes))
    }
}

/// The composite dependency hash of a node and its Use-flagged descendants.
///
/// Each field is a wrapping-additive accumulator: a node's composite hash is
/// the per-field sum over the node itself and every transitively Use-flagged
/// descendant, each counted once. The four fields are compared individually
/// against the persisted record; their wrapping sum keys the build cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct CompositeHash {
    /// Accumulated pipeline version hashes.
    pub pipeline_hash: u32,

    /// Accumulated source object graph hashes.
    pub source_asset_hash: u32,

    /// Accumulated hashes of instance data streams.
    pub source_data_hash: u32,

    /// Accumulated hashes of declared external files.
    pub files_hash: u32,
}

impl CompositeHash {
    /// Folds another hash into this one, field by field, with wrapping adds.
    pub fn accumulate(&mut self, other: &CompositeHash) {
        self.pipeline_hash = self.pipeline_hash.wrapping_add(other.pipeline_hash);
        self.source_asset_hash = self.source_asset_hash.wrapping_add(other.source_asset_hash);
        self.source_data_hash = self.source_data_hash.wrapping_add(other.source_data_hash);
        self.files_hash = self.files_hash.wrapping_add(other.files_hash);
    }

    /// The wrapping sum of all four fields, used as the cache key.
    pub fn combined(&self) -> u32 {
        self.pipeline_hash
            .wrapping_add(self.source_asset_hash)
            .wrapping_add(self.source_data_hash)
            .wrapping_add(self.files_hash)
    }
}

impl fmt::Display for CompositeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}/{:08x}/{:08x}/{:08x}",
            self.pipeline_hash, self.source_asset_hash, self.source_data_hash, self.files_hash
        )
    }
}
