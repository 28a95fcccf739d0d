//! Naming conventions for LoRA adapter state dict keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A key naming convention for LoRA adapter state dicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// Structured hierarchical convention used by OMI checkpoints
    Omi,
    /// Dotted hierarchical convention used by diffusers
    Diffusers,
    /// Flattened underscore convention derived from the diffusers one
    LegacyDiffusers,
}

impl Convention {
    /// Priority order used when detecting which convention a key belongs to.
    ///
    /// Legacy diffusers is a lossy flattening of diffusers and can collide
    /// with dotted prefixes in pathological cases, so it is probed last.
    pub const DETECTION_ORDER: [Convention; 3] = [
        Convention::Omi,
        Convention::Diffusers,
        Convention::LegacyDiffusers,
    ];

    /// String form used in configs and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Convention::Omi => "omi",
            Convention::Diffusers => "diffusers",
            Convention::LegacyDiffusers => "legacy_diffusers",
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Convention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "omi" => Ok(Convention::Omi),
            "diffusers" => Ok(Convention::Diffusers),
            "legacy_diffusers" => Ok(Convention::LegacyDiffusers),
            other => Err(Error::unknown_convention(other)),
        }
    }
}
