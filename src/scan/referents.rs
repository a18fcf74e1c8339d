//! Direct referents of an object
//!
//! Only direct children are returned; nothing here recurses. Objects
//! the host cannot walk are treated as having no referents.

use std::collections::BTreeSet;

use tracing::debug;

use crate::host::{Host, HostError, Traversal};

/// Classify `obj`, forcing any of `leaf_types` to [`Traversal::Leaf`]
pub fn classify<H: Host>(host: &H, obj: &H::Object, leaf_types: &BTreeSet<String>) -> Traversal {
    if !leaf_types.is_empty() && leaf_types.contains(&*host.type_name_of(obj)) {
        Traversal::Leaf
    } else {
        host.traversal_of(obj)
    }
}

/// Referents of an object already classified as `traversal`
///
/// Leaves report no referents without consulting the host walk.
pub fn try_referents_of<H: Host>(
    host: &H,
    obj: &H::Object,
    traversal: Traversal,
) -> Result<Vec<H::Object>, HostError> {
    match traversal {
        Traversal::Leaf => Ok(vec![]),
        Traversal::Untracked | Traversal::Tracked => host.direct_referents_of(obj),
    }
}

/// The objects `obj` directly references, in the host's order
///
/// A failed walk is logged and reported as no referents.
pub fn get_referents<H: Host>(host: &H, obj: &H::Object) -> Vec<H::Object> {
    get_referents_with(host, obj, &BTreeSet::new())
}

/// As [`get_referents`], treating any of `leaf_types` as a leaf
pub fn get_referents_with<H: Host>(
    host: &H,
    obj: &H::Object,
    leaf_types: &BTreeSet<String>,
) -> Vec<H::Object> {
    match try_referents_of(host, obj, classify(host, obj, leaf_types)) {
        Ok(referents) => referents,
        Err(e) => {
            debug!(
                identity = host.identity_of(obj),
                type_name = %host.type_name_of(obj),
                error = %e,
                "cannot enumerate referents, treating as leaf"
            );
            vec![]
        }
    }
}
