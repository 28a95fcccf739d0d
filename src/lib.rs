//! LoRA adapter key conversion between naming conventions
//!
//! `loramap` translates LoRA adapter state dicts between the three key
//! naming conventions in circulation: the structured omi convention, the
//! dotted diffusers convention, and the flattened legacy diffusers
//! convention derived from it. Model-specific code describes its module
//! tree once as a flat list of [`KeySet`] nodes; [`convert`] then rewrites
//! any state dict into the requested convention, including the chunk
//! reordering of up-projection weights whose split order differs across
//! the omi boundary.
//!
//! Loading and saving checkpoint containers is a caller concern; this crate
//! only transforms in-memory key/tensor mappings.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod convention;
pub mod convert;
pub mod error;
pub mod keyset;
pub mod tensor;

// Re-exports
pub use convention::Convention;
pub use convert::{
    convert, convert_to_diffusers, convert_to_legacy_diffusers, convert_to_omi, StateDict,
    UP_PROJECTION_SUFFIX,
};
pub use error::{Error, Result};
pub use keyset::{
    combine, map_prefix_range, map_prefix_range_bounded, KeySet, KeySetBuilder, LastFilter,
    REPEAT_BOUND,
};
pub use tensor::TensorValue;
