//! Error types for object database operations.

use kiln_common::Guid;

/// Errors raised by database, instance, and isolation operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// An I/O error occurred while reading or writing instance data.
    #[error("database I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An object graph could not be encoded.
    #[error("failed to encode object: {reason}")]
    Encode {
        /// Description of the encoding failure.
        reason: String,
    },

    /// An object payload could not be decoded.
    #[error("failed to decode object: {reason}")]
    Decode {
        /// Description of the decoding failure.
        reason: String,
    },

    /// A nil or otherwise unusable guid was supplied.
    #[error("invalid guid {guid}")]
    InvalidGuid {
        /// The offending guid.
        guid: Guid,
    },

    /// No instance exists for the given guid.
    #[error("no such instance {guid}")]
    NoSuchInstance {
        /// The requested guid.
        guid: Guid,
    },

    /// No decoder is registered for an asset type tag.
    #[error("no asset decoder registered for type {tag}")]
    UnknownAssetType {
        /// The unregistered tag name.
        tag: String,
    },

    /// An existing instance could not be displaced for a new one.
    #[error("unable to replace existing instance {guid} at {path}")]
    ReplaceFailed {
        /// The guid being recreated.
        guid: Guid,
        /// The path of the existing instance.
        path: String,
    },
}
