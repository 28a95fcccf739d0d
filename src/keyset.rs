//! Key-set nodes describing prefix correspondences between conventions
//!
//! A [`KeySet`] ties one position in a model's module tree to its key prefix
//! under each supported convention. Model-specific code builds a flat list of
//! these nodes once per model family, composing children from parents and
//! expanding repeated blocks with [`map_prefix_range`]. All composition and
//! inheritance is resolved while building; a finished node holds plain
//! strings and keeps no reference to its parent.

use serde::{Deserialize, Serialize};

use crate::convention::Convention;

/// Upper bound on the number of elements expanded for a repeated block.
///
/// The true repetition count of a model is unknown when its key-set list is
/// built, so [`map_prefix_range`] expands this many candidate nodes. Nodes
/// beyond the real count never match a key and are harmless; raising the
/// bound is always safe and only costs time and memory.
pub const REPEAT_BOUND: usize = 100;

/// Joins two key path segments, skipping empty sides.
pub fn combine(left: &str, right: &str) -> String {
    if left.is_empty() {
        right.to_string()
    } else if right.is_empty() {
        left.to_string()
    } else {
        format!("{left}.{right}")
    }
}

/// Derives the legacy diffusers spelling of a diffusers prefix.
fn flatten(prefix: &str) -> String {
    prefix.replace('.', "_")
}

/// Position constraint for a node that is part of a bounded repetition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastFilter {
    /// Match elements regardless of their position
    #[default]
    Unconstrained,
    /// Match only the final element of the repetition
    RequireLast,
    /// Match every element except the final one
    RequireNotLast,
}

impl LastFilter {
    pub(crate) fn accepts(self, is_last: bool) -> bool {
        match self {
            LastFilter::Unconstrained => true,
            LastFilter::RequireLast => is_last,
            LastFilter::RequireNotLast => !is_last,
        }
    }
}

/// One correspondence point between the three conventions.
///
/// Holds the fully composed prefix for each convention, the chunk-swap flag
/// for up-projection weights, an optional position constraint and the
/// look-ahead prefixes used to detect the final element of a repetition.
/// The legacy diffusers prefix is always derived from the diffusers prefix
/// and never set independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    omi_prefix: String,
    diffusers_prefix: String,
    legacy_diffusers_prefix: String,
    swap_chunks: bool,
    last_filter: LastFilter,
    next_omi_prefix: Option<String>,
    next_diffusers_prefix: Option<String>,
    next_legacy_diffusers_prefix: Option<String>,
}

impl KeySet {
    /// Starts building a node from its omi and diffusers segments.
    ///
    /// Without further builder calls this produces a root node whose
    /// prefixes are the segments themselves.
    pub fn new(omi: impl Into<String>, diffusers: impl Into<String>) -> KeySetBuilder<'static> {
        KeySetBuilder {
            omi: omi.into(),
            diffusers: diffusers.into(),
            parent: None,
            swap_chunks: false,
            last_filter: LastFilter::Unconstrained,
            next: None,
        }
    }

    /// Prefix of this node under the given convention
    pub fn prefix(&self, convention: Convention) -> &str {
        match convention {
            Convention::Omi => &self.omi_prefix,
            Convention::Diffusers => &self.diffusers_prefix,
            Convention::LegacyDiffusers => &self.legacy_diffusers_prefix,
        }
    }

    /// Look-ahead prefix of the following repetition element, if any
    pub fn next_prefix(&self, convention: Convention) -> Option<&str> {
        match convention {
            Convention::Omi => self.next_omi_prefix.as_deref(),
            Convention::Diffusers => self.next_diffusers_prefix.as_deref(),
            Convention::LegacyDiffusers => self.next_legacy_diffusers_prefix.as_deref(),
        }
    }

    /// Whether up-projection weights under this node need their chunks
    /// reordered when a conversion crosses the omi boundary
    pub fn swap_chunks(&self) -> bool {
        self.swap_chunks
    }

    /// Position constraint applied during conversion
    pub fn last_filter(&self) -> LastFilter {
        self.last_filter
    }

    /// Detects which convention a key belongs to under this node.
    ///
    /// Prefixes are probed in [`Convention::DETECTION_ORDER`]; the first
    /// match wins and is returned together with the matched prefix.
    pub fn match_source(&self, key: &str) -> Option<(Convention, &str)> {
        Convention::DETECTION_ORDER.into_iter().find_map(|convention| {
            let prefix = self.prefix(convention);
            key.starts_with(prefix).then_some((convention, prefix))
        })
    }
}

/// Builder resolving prefix composition and look-ahead inheritance.
///
/// Created through [`KeySet::new`]. The parent is only borrowed while
/// building; [`build`](KeySetBuilder::build) copies everything it needs.
#[derive(Debug)]
pub struct KeySetBuilder<'a> {
    omi: String,
    diffusers: String,
    parent: Option<&'a KeySet>,
    swap_chunks: bool,
    last_filter: LastFilter,
    next: Option<(String, String)>,
}

impl<'a> KeySetBuilder<'a> {
    /// Composes this node's prefixes under the given parent and inherits
    /// its look-ahead prefixes where no explicit ones are set.
    pub fn parent<'b>(self, parent: &'b KeySet) -> KeySetBuilder<'b> {
        KeySetBuilder {
            omi: self.omi,
            diffusers: self.diffusers,
            parent: Some(parent),
            swap_chunks: self.swap_chunks,
            last_filter: self.last_filter,
            next: self.next,
        }
    }

    /// Marks tensors under this node for conditional chunk reordering
    pub fn swap_chunks(mut self, swap: bool) -> Self {
        self.swap_chunks = swap;
        self
    }

    /// Sets the position constraint for this node
    pub fn last_filter(mut self, filter: LastFilter) -> Self {
        self.last_filter = filter;
        self
    }

    /// Sets explicit look-ahead segments for the following repetition element
    pub fn next_segments(
        mut self,
        next_omi: impl Into<String>,
        next_diffusers: impl Into<String>,
    ) -> Self {
        self.next = Some((next_omi.into(), next_diffusers.into()));
        self
    }

    /// Resolves all composition and inheritance into a finished node.
    pub fn build(self) -> KeySet {
        let (omi_prefix, diffusers_prefix) = match self.parent {
            Some(parent) => (
                combine(&parent.omi_prefix, &self.omi),
                combine(&parent.diffusers_prefix, &self.diffusers),
            ),
            None => (self.omi, self.diffusers),
        };
        let legacy_diffusers_prefix = flatten(&diffusers_prefix);

        let (next_omi_prefix, next_diffusers_prefix, next_legacy_diffusers_prefix) =
            match (self.next, self.parent) {
                (Some((omi_segment, diffusers_segment)), parent) => {
                    let next_omi = match parent.and_then(|p| p.next_omi_prefix.as_deref()) {
                        Some(base) => combine(base, &omi_segment),
                        None => omi_segment,
                    };
                    let next_diffusers =
                        match parent.and_then(|p| p.next_diffusers_prefix.as_deref()) {
                            Some(base) => combine(base, &diffusers_segment),
                            None => diffusers_segment,
                        };
                    let next_legacy = flatten(&next_diffusers);
                    (Some(next_omi), Some(next_diffusers), Some(next_legacy))
                }
                // The diffusers look-ahead inherits the parent's own prefix
                // rather than the parent's next: a non-repeating parent has a
                // single diffusers identity to probe against.
                (None, Some(parent)) => (
                    parent.next_omi_prefix.clone(),
                    Some(parent.diffusers_prefix.clone()),
                    parent.next_legacy_diffusers_prefix.clone(),
                ),
                (None, None) => (None, None, None),
            };

        KeySet {
            omi_prefix,
            diffusers_prefix,
            legacy_diffusers_prefix,
            swap_chunks: self.swap_chunks,
            last_filter: self.last_filter,
            next_omi_prefix,
            next_diffusers_prefix,
            next_legacy_diffusers_prefix,
        }
    }
}

/// Expands a repeated sub-structure into [`REPEAT_BOUND`] candidate nodes.
///
/// Element `i` becomes a child of `parent` with local segments
/// `"{segment}.{i}"` and explicit look-ahead segments `"{segment}.{i+1}"`,
/// so the conversion engine can probe whether a following element exists.
pub fn map_prefix_range(omi_segment: &str, diffusers_segment: &str, parent: &KeySet) -> Vec<KeySet> {
    map_prefix_range_bounded(omi_segment, diffusers_segment, parent, REPEAT_BOUND)
}

/// Same as [`map_prefix_range`] with an explicit element bound.
pub fn map_prefix_range_bounded(
    omi_segment: &str,
    diffusers_segment: &str,
    parent: &KeySet,
    bound: usize,
) -> Vec<KeySet> {
    (0..bound)
        .map(|i| {
            KeySet::new(
                format!("{omi_segment}.{i}"),
                format!("{diffusers_segment}.{i}"),
            )
            .parent(parent)
            .next_segments(
                format!("{omi_segment}.{}", i + 1),
                format!("{diffusers_segment}.{}", i + 1),
            )
            .build()
        })
        .collect()
}
