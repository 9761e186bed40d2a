
//! Low-level OpenEXR container core.
//!
//! This crate implements the metadata and chunk layer of the OpenEXR file
//! format: typed attribute lists with binary-safe serialization, per-part
//! headers, chunk offset tables, and the per-chunk encode/decode pipeline
//! for scanline and tiled storage.
//!
//! It deliberately stops below the image abstraction: callers address
//! individual chunks (scanline blocks or tiles) and provide their own
//! per-channel buffers with arbitrary strides. Multiple threads may decode
//! or encode chunks of the same open context concurrently; the crate itself
//! spawns no threads.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::all,
)]

#![forbid(unsafe_code)]

#[macro_use]
extern crate smallvec;

pub mod error;
pub mod math;
pub mod io;
pub mod meta;
pub mod compression;
pub mod block;
pub mod context;

/// Export of the most commonly used types.
pub mod prelude {

    // contexts are the main entry points
    pub use crate::context::{ReadContext, WriteContext, PartDefinition};

    // metadata types needed to define and inspect parts
    pub use crate::meta::{MetaData, Requirements};
    pub use crate::meta::header::{Header, AttributeList, Attribute};
    pub use crate::meta::attribute::{
        Text, AttributeValue, ChannelList, ChannelDescription, SampleType,
        IntegerBounds, TileDescription, LevelMode, LineOrder,
        OpaqueValue, OpaqueTypeHandler,
    };

    // chunk addressing
    pub use crate::block::{BlockIndex, ChannelGeometry};
    pub use crate::block::chunk::TileCoordinates;
    pub use crate::compression::Compression;

    pub use crate::error::{Error, Result, UnitResult};
    pub use crate::math::Vec2;

    // re-export external stuff
    pub use half::f16;
}
