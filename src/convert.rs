//! The conversion engine
//!
//! [`convert`] rewrites a LoRA state dict from whatever convention each key
//! is found in into a single target convention. It is a stateless batch
//! transform over the cross product of key-set nodes and input keys: the
//! node list and input dict are read-only, every call allocates a fresh
//! output, and the result does not depend on input iteration order.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::convention::Convention;
use crate::error::Result;
use crate::keyset::{KeySet, LastFilter};
use crate::tensor::TensorValue;

/// Mapping from parameter key to tensor value
pub type StateDict<T> = HashMap<String, T>;

/// Local name suffix of a LoRA up-projection weight.
///
/// Tensors with this suffix carry their two first-axis chunks in opposite
/// order under the omi convention, so nodes flagged with
/// [`swap_chunks`](KeySet::swap_chunks) reorder them whenever a conversion
/// crosses the omi boundary.
pub const UP_PROJECTION_SUFFIX: &str = ".lora_up.weight";

/// Converts a state dict into the target convention.
///
/// Each key is matched per node in [`Convention::DETECTION_ORDER`] and
/// re-emitted under the node's target prefix. Keys no node matches are
/// dropped silently, and when two nodes produce the same output key the
/// later node in list order wins; both policies match the checkpoints this
/// crate interoperates with and are pinned by regression tests. The scan is
/// O(|nodes| x |keys|), which is fine at model-tree sizes even with
/// range-expanded node lists.
pub fn convert<T: TensorValue>(
    input: &StateDict<T>,
    key_sets: &[KeySet],
    target: Convention,
) -> Result<StateDict<T>> {
    debug!(
        to = target.as_str(),
        key_sets = key_sets.len(),
        keys = input.len(),
        "converting LoRA state dict"
    );

    let mut output = StateDict::new();

    for key_set in key_sets {
        for (key, tensor) in input {
            let Some((source, matched)) = key_set.match_source(key) else {
                continue;
            };

            if key_set.last_filter() != LastFilter::Unconstrained {
                // A missing look-ahead prefix can never match, so the
                // element counts as last.
                let is_last = match key_set.next_prefix(source) {
                    Some(next_prefix) => !input.keys().any(|k| k.starts_with(next_prefix)),
                    None => true,
                };
                if !key_set.last_filter().accepts(is_last) {
                    continue;
                }
            }

            let name = &key[matched.len()..];
            let out_key = format!("{}{}", key_set.prefix(target), name);

            let crosses_omi = source == Convention::Omi || target == Convention::Omi;
            let value = if key_set.swap_chunks()
                && crosses_omi
                && name.ends_with(UP_PROJECTION_SUFFIX)
            {
                trace!(key = key.as_str(), source = source.as_str(), "swapping up-projection chunks");
                tensor.swap_halves()?
            } else {
                tensor.clone()
            };

            trace!(
                key = key.as_str(),
                out_key = out_key.as_str(),
                source = source.as_str(),
                "emitting key"
            );
            output.insert(out_key, value);
        }
    }

    Ok(output)
}

/// Converts a state dict into the omi convention.
pub fn convert_to_omi<T: TensorValue>(
    input: &StateDict<T>,
    key_sets: &[KeySet],
) -> Result<StateDict<T>> {
    convert(input, key_sets, Convention::Omi)
}

/// Converts a state dict into the diffusers convention.
pub fn convert_to_diffusers<T: TensorValue>(
    input: &StateDict<T>,
    key_sets: &[KeySet],
) -> Result<StateDict<T>> {
    convert(input, key_sets, Convention::Diffusers)
}

/// Converts a state dict into the legacy diffusers convention.
pub fn convert_to_legacy_diffusers<T: TensorValue>(
    input: &StateDict<T>,
    key_sets: &[KeySet],
) -> Result<StateDict<T>> {
    convert(input, key_sets, Convention::LegacyDiffusers)
}
