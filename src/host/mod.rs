//! Capability interface onto the host runtime's object graph
//!
//! Everything that needs native access to object memory (identities,
//! allocation layout, the collector's referent walk) goes through
//! [`Host`]. The sizer, serializer and dumper only ever see objects
//! through this trait, which keeps them testable against the
//! [`synthetic`] heap.

use std::borrow::Cow;

use thiserror::Error;

pub mod synthetic;

/// Failures reported by a host while introspecting a single object
///
/// None of these are fatal to a dump: the scanner substitutes a
/// fallback and carries on with the next object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("object of type {0} does not support this introspection")]
    Unsupported(String),
    #[error("size hook failed: {0}")]
    SizeHook(String),
    #[error("referent walk failed: {0}")]
    Traverse(String),
    #[error("object {0:#x} is no longer live")]
    Dead(u64),
}

/// Generic size information the host associates with an object's
/// type and allocation.
///
/// The generic content size is `basic_size + item_size * item_count`.
/// `has_gc_header` marks objects that carry collector bookkeeping in
/// front of the object proper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    pub basic_size: usize,
    pub item_size: usize,
    pub item_count: usize,
    pub has_gc_header: bool,
}

impl Layout {
    /// A fixed size object carrying a collector header
    pub fn fixed(basic_size: usize) -> Self {
        Layout {
            basic_size,
            item_size: 0,
            item_count: 0,
            has_gc_header: true,
        }
    }

    /// A variable size object with `item_count` inline items
    pub fn variable(basic_size: usize, item_size: usize, item_count: usize) -> Self {
        Layout {
            basic_size,
            item_size,
            item_count,
            has_gc_header: true,
        }
    }

    /// The same layout for an object the collector does not track
    pub fn without_gc_header(self) -> Self {
        Layout {
            has_gc_header: false,
            ..self
        }
    }

    /// Bytes of the fixed part plus inline items, excluding any header
    pub fn content_size(&self) -> usize {
        self.basic_size
            .saturating_add(self.item_size.saturating_mul(self.item_count))
    }
}

/// How an object takes part in referent walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Traversal {
    /// No referent walk facility: scalars, strings, code objects,
    /// static builtin types.
    Leaf,
    /// Holds references but is not part of the live object population,
    /// so a bulk walk only reaches it through its referrers.
    Untracked,
    /// Holds references and appears in the live object population.
    Tracked,
}

/// Short leaf value previewed in a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    Int(i128),
    /// An execution frame, previewed by the name of its code
    Frame(String),
}

/// The optional, descriptive parts of a record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDetails {
    /// Name of a named entity (module, function, class)
    pub name: Option<String>,
    /// Length of a sized container or string
    pub len: Option<usize>,
    pub value: Option<ScalarValue>,
}

/// Native introspection of a host runtime
///
/// Implementations must not allocate objects in the host heap that a
/// later call could observe: the scanner runs while the graph it
/// measures is live.
pub trait Host {
    /// Handle onto a live host object
    type Object: Clone;

    /// A process-stable integer naming the object while it is alive.
    /// Identities may be recycled once the object dies.
    fn identity_of(&self, obj: &Self::Object) -> u64;

    fn type_name_of<'a>(&'a self, obj: &'a Self::Object) -> Cow<'a, str>;

    /// Generic per-type / per-allocation size information
    fn layout_of(&self, obj: &Self::Object) -> Layout;

    /// The object's own report of its content size, when it has a hook
    /// for that. Returns `None` when there is no hook.
    fn self_reported_size(&self, _obj: &Self::Object) -> Option<Result<i64, HostError>> {
        None
    }

    /// The objects `obj` directly references, in the host's native order
    fn direct_referents_of(&self, obj: &Self::Object) -> Result<Vec<Self::Object>, HostError>;

    fn traversal_of(&self, obj: &Self::Object) -> Traversal;

    fn describe(&self, _obj: &Self::Object) -> ObjectDetails {
        ObjectDetails::default()
    }

    /// Every object in the live population tracked by the collector
    fn live_objects(&self) -> Box<dyn Iterator<Item = Self::Object> + '_>;

    /// Ubiquitous shared objects (none, booleans, cached small integers,
    /// interned strings, builtin types) a bulk dump records only once.
    fn well_known_objects(&self) -> Vec<Self::Object> {
        vec![]
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn test_layout_content_size() {
        assert_eq!(Layout::fixed(16).content_size(), 16);
        assert_eq!(Layout::variable(24, 8, 3).content_size(), 48);
        assert!(!Layout::fixed(16).without_gc_header().has_gc_header);
    }

    #[test]
    pub fn test_layout_saturates() {
        let layout = Layout::variable(usize::MAX - 1, 8, 8);
        assert_eq!(layout.content_size(), usize::MAX);
    }
}
