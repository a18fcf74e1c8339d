//! Identities a dump must not emit
use std::iter::FromIterator;

use crate::common::intset::CompactIntSet;
use crate::host::Host;

/// Objects excluded from a dump
///
/// Membership is by identity. A skip set may also name the identity of
/// the host object that holds its members (the host's own container
/// for the set), which is likewise never dumped.
#[derive(Debug, Clone, Default)]
pub struct SkipSet {
    members: CompactIntSet,
    holder: Option<u64>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A skip set of the given host objects
    pub fn from_objects<H: Host>(host: &H, objects: &[H::Object]) -> Self {
        objects.iter().map(|o| host.identity_of(o)).collect()
    }

    /// Record the identity of the object holding the members
    pub fn with_holder(mut self, holder: u64) -> Self {
        self.holder = Some(holder);
        self
    }

    pub fn insert(&mut self, identity: u64) -> bool {
        self.members.insert(identity)
    }

    pub fn contains(&self, identity: u64) -> bool {
        self.holder == Some(identity) || self.members.contains(identity)
    }

    pub fn holder(&self) -> Option<u64> {
        self.holder
    }

    /// Number of members, not counting the holder
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.holder.is_none()
    }
}

impl FromIterator<u64> for SkipSet {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        SkipSet {
            members: iter.into_iter().collect(),
            holder: None,
        }
    }
}

impl Extend<u64> for SkipSet {
    fn extend<T: IntoIterator<Item = u64>>(&mut self, iter: T) {
        self.members.extend(iter)
    }
}

#[cfg(test)]
pub mod tests {
    use crate::host::synthetic::SyntheticHeap;

    use super::*;

    #[test]
    pub fn test_membership_by_identity() {
        let mut heap = SyntheticHeap::new();
        let a = heap.text("a");
        let b = heap.text("a");
        let skip = SkipSet::from_objects(&heap, &[a]);
        assert!(skip.contains(heap.identity_of(&a)));
        assert!(!skip.contains(heap.identity_of(&b)));
        assert_eq!(skip.len(), 1);
    }

    #[test]
    pub fn test_holder_is_skipped() {
        let skip: SkipSet = [10, 20].into_iter().collect();
        let skip = skip.with_holder(99);
        assert!(skip.contains(99));
        assert!(skip.contains(20));
        assert_eq!(skip.len(), 2);
        assert!(!SkipSet::new().with_holder(1).is_empty());
    }
}
