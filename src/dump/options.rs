//! Dump configuration
//!
//! Options can be built in code or read from TOML:
//!
//! ```toml
//! leaf-types = ["dict"]
//! preview-limit = 40
//! skip-well-known = true
//! ```

use std::collections::BTreeSet;

use serde::Deserialize;

use super::error::DumpError;
use super::escape::PREVIEW_LIMIT;

/// How far a single-object dump expands into the object's referents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecurseMode {
    /// Only the object itself; referents appear as identities in `refs`
    None,
    /// Also the referents a population walk cannot reach: leaves, and
    /// untracked containers together with what they reach in turn
    #[default]
    Unreachable,
    /// Also every direct referent, without expanding further
    Children,
}

impl RecurseMode {
    /// Mode for a numeric recursion depth: 0, 1, or 2 and above
    pub fn from_depth(depth: u32) -> Self {
        match depth {
            0 => RecurseMode::None,
            1 => RecurseMode::Unreachable,
            _ => RecurseMode::Children,
        }
    }

    pub fn depth(self) -> u32 {
        match self {
            RecurseMode::None => 0,
            RecurseMode::Unreachable => 1,
            RecurseMode::Children => 2,
        }
    }
}

/// Settings shared by all dumps of one dumper
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DumpOptions {
    /// Type names always treated as leaves, whatever the host says
    pub leaf_types: BTreeSet<String>,
    /// Code points (or bytes) of names and values shown in a record
    pub preview_limit: usize,
    /// Whether a bulk dump records the host's well-known objects first
    /// and then skips them
    pub skip_well_known: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            leaf_types: BTreeSet::new(),
            preview_limit: PREVIEW_LIMIT,
            skip_well_known: true,
        }
    }
}

impl DumpOptions {
    /// Read options from TOML text; missing keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self, DumpError> {
        Ok(toml::from_str(text)?)
    }

    pub fn with_leaf_type<S: Into<String>>(mut self, type_name: S) -> Self {
        self.leaf_types.insert(type_name.into());
        self
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn without_well_known(mut self) -> Self {
        self.skip_well_known = false;
        self
    }
}
