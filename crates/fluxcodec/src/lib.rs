//! # FluxCodec
//!
//! Payload encodings for fluxrpc, selected at runtime by mime type.
//!
//! ## Architecture
//!
//! Calls carry dynamically typed [`Value`]s. A [`Codec`] turns values into
//! message bodies and back, conforming decoded data to the declared
//! [`TypeDesc`]. The [`CodecRegistry`] is the single lookup point from the mime
//! type named in composite metadata to its codec.

mod codec;
mod error;
mod hash;
mod registry;
mod value;

pub use codec::BinaryCodec;
pub use codec::CborCodec;
pub use codec::Codec;
pub use codec::JsonCodec;
pub use codec::TextCodec;
pub use error::Error;
pub use error::Result;
pub use hash::generate_cache_key;
pub use hash::hash_value;
pub use registry::CodecRegistry;
pub use registry::RegistryBuilder;
pub use value::TypeDesc;
pub use value::Value;
pub use value::MAX_RECURSION_DEPTH;
