//! A synthetic object graph implementing [`Host`]
//!
//! Objects are plain records of the attributes the scanner observes.
//! The constructors model the shapes of a dynamic-language heap
//! (tuples, lists, dicts, modules, classes, frames and scalar leaves)
//! with 64-bit layouts, closely enough to drive every path of the
//! sizer and dumper. Slots are recycled through a free list, so
//! identities are reused after an object is freed just as a real
//! allocator reuses addresses.

use std::borrow::Cow;

use super::{Host, HostError, Layout, ObjectDetails, ScalarValue, Traversal};

/// Identity of slot zero
const BASE_IDENTITY: u64 = 0x7f3a_5c00_0000;

/// Identity distance between adjacent slots
const SLOT_STRIDE: u64 = 16;

const WORD: usize = 8;

/// Handle into a [`SyntheticHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Returns the raw slot index backing this handle.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One synthetic object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticObject {
    pub type_name: String,
    pub layout: Layout,
    pub traversal: Traversal,
    /// Direct referents in the order the referent walk reports them
    pub referents: Vec<ObjRef>,
    pub details: ObjectDetails,
    /// `None` when the object has no self-reporting size hook
    pub size_hook: Option<Result<i64, HostError>>,
    /// Set to make the referent walk of this object fail
    pub traverse_error: Option<HostError>,
}

impl SyntheticObject {
    pub fn new<S: Into<String>>(type_name: S, layout: Layout, traversal: Traversal) -> Self {
        SyntheticObject {
            type_name: type_name.into(),
            layout,
            traversal,
            referents: vec![],
            details: ObjectDetails::default(),
            size_hook: None,
            traverse_error: None,
        }
    }

    pub fn with_referents(mut self, referents: Vec<ObjRef>) -> Self {
        self.referents = referents;
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.details.name = Some(name.into());
        self
    }

    pub fn with_len(mut self, len: usize) -> Self {
        self.details.len = Some(len);
        self
    }

    pub fn with_value(mut self, value: ScalarValue) -> Self {
        self.details.value = Some(value);
        self
    }

    pub fn with_size_hook(mut self, hook: Result<i64, HostError>) -> Self {
        self.size_hook = Some(hook);
        self
    }

    pub fn with_traverse_error(mut self, error: HostError) -> Self {
        self.traverse_error = Some(error);
        self
    }
}

/// An in-memory heap of synthetic objects
#[derive(Debug, Default)]
pub struct SyntheticHeap {
    slots: Vec<Option<SyntheticObject>>,
    free_list: Vec<u32>,
    well_known: Vec<ObjRef>,
}

impl SyntheticHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an object, reusing a freed slot (and so its identity)
    /// when one is available.
    pub fn alloc(&mut self, object: SyntheticObject) -> ObjRef {
        if let Some(idx) = self.free_list.pop() {
            if let Some(slot) = self.slots.get_mut(idx as usize) {
                *slot = Some(object);
                return ObjRef(idx);
            }
        }
        let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Some(object));
        ObjRef(idx)
    }

    /// Release an object; its identity becomes available for reuse
    pub fn free(&mut self, obj: ObjRef) -> Option<SyntheticObject> {
        let released = self.slots.get_mut(obj.0 as usize)?.take();
        if released.is_some() {
            self.free_list.push(obj.0);
            self.well_known.retain(|w| *w != obj);
        }
        released
    }

    pub fn get(&self, obj: ObjRef) -> Option<&SyntheticObject> {
        self.slots.get(obj.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> Option<&mut SyntheticObject> {
        self.slots.get_mut(obj.0 as usize)?.as_mut()
    }

    /// Number of live objects, whatever their traversal
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the referents of an existing object, e.g. to close a cycle
    pub fn set_referents(&mut self, obj: ObjRef, referents: Vec<ObjRef>) {
        if let Some(o) = self.get_mut(obj) {
            o.referents = referents;
        }
    }

    /// Stop the collector tracking `obj`: it leaves the live population
    /// but keeps its referents.
    pub fn untrack(&mut self, obj: ObjRef) {
        if let Some(o) = self.get_mut(obj) {
            if o.traversal == Traversal::Tracked {
                o.traversal = Traversal::Untracked;
            }
        }
    }

    /// Report `obj` among the host's well-known shared objects
    pub fn mark_well_known(&mut self, obj: ObjRef) {
        if !self.well_known.contains(&obj) {
            self.well_known.push(obj);
        }
    }

    pub fn none(&mut self) -> ObjRef {
        self.alloc(SyntheticObject::new(
            "NoneType",
            Layout::fixed(2 * WORD).without_gc_header(),
            Traversal::Leaf,
        ))
    }

    pub fn boolean(&mut self, value: bool) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "bool",
                Layout::variable(3 * WORD, 4, 1).without_gc_header(),
                Traversal::Leaf,
            )
            .with_value(ScalarValue::Bool(value)),
        )
    }

    pub fn int(&mut self, value: i128) -> ObjRef {
        // 30 bit digits, none at all for zero
        let mut digits = 0;
        let mut rest = value.unsigned_abs();
        while rest != 0 {
            digits += 1;
            rest >>= 30;
        }
        self.alloc(
            SyntheticObject::new(
                "int",
                Layout::variable(3 * WORD, 4, digits).without_gc_header(),
                Traversal::Leaf,
            )
            .with_value(ScalarValue::Int(value)),
        )
    }

    pub fn bytes(&mut self, value: &[u8]) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "bytes",
                Layout::variable(4 * WORD + 1, 1, value.len()).without_gc_header(),
                Traversal::Leaf,
            )
            .with_len(value.len())
            .with_value(ScalarValue::Bytes(value.to_vec())),
        )
    }

    pub fn text(&mut self, value: &str) -> ObjRef {
        let chars = value.chars().count();
        let widest = value.chars().map(u32::from).max().unwrap_or(0);
        let (basic, kind) = match widest {
            0..=0x7f => (6 * WORD, 1),
            0x80..=0xff => (9 * WORD, 1),
            0x100..=0xffff => (9 * WORD, 2),
            _ => (9 * WORD, 4),
        };
        self.alloc(
            SyntheticObject::new(
                "str",
                Layout::variable(basic, kind, chars + 1).without_gc_header(),
                Traversal::Leaf,
            )
            .with_len(chars)
            .with_value(ScalarValue::Text(value.to_string())),
        )
    }

    /// A plain instance of the root object type: no slots, no referents
    pub fn object(&mut self) -> ObjRef {
        self.alloc(SyntheticObject::new(
            "object",
            Layout::fixed(2 * WORD).without_gc_header(),
            Traversal::Leaf,
        ))
    }

    /// Items are walked last to first, as a slot-array traverse does.
    pub fn tuple(&mut self, items: &[ObjRef]) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "tuple",
                Layout::variable(3 * WORD, WORD, items.len()),
                Traversal::Tracked,
            )
            .with_referents(items.iter().rev().copied().collect())
            .with_len(items.len()),
        )
    }

    /// Items are walked last to first. Size counts the over-allocated
    /// pointer array, rounded up to a multiple of four slots.
    pub fn list(&mut self, items: &[ObjRef]) -> ObjRef {
        let allocated = (items.len() + 3) & !3;
        self.alloc(
            SyntheticObject::new(
                "list",
                Layout::variable(5 * WORD, WORD, allocated),
                Traversal::Tracked,
            )
            .with_referents(items.iter().rev().copied().collect())
            .with_len(items.len()),
        )
    }

    /// Keys and values are walked pairwise in insertion order. The
    /// table size is only known to the object itself, so dicts report
    /// their size through the self-reporting hook.
    pub fn dict(&mut self, entries: &[(ObjRef, ObjRef)]) -> ObjRef {
        let mut capacity = 8;
        while capacity * 2 < entries.len() * 3 {
            capacity *= 2;
        }
        let table = 4 * WORD + capacity + (capacity * 2 / 3) * 3 * WORD;
        let referents = entries.iter().flat_map(|(k, v)| [*k, *v]).collect();
        self.alloc(
            SyntheticObject::new("dict", Layout::fixed(6 * WORD), Traversal::Tracked)
                .with_referents(referents)
                .with_len(entries.len())
                .with_size_hook(Ok((6 * WORD + table) as i64)),
        )
    }

    pub fn set(&mut self, members: &[ObjRef]) -> ObjRef {
        self.alloc(
            SyntheticObject::new("set", Layout::fixed(25 * WORD), Traversal::Tracked)
                .with_referents(members.to_vec())
                .with_len(members.len()),
        )
    }

    pub fn module(&mut self, name: &str, dict: ObjRef) -> ObjRef {
        self.alloc(
            SyntheticObject::new("module", Layout::fixed(7 * WORD), Traversal::Tracked)
                .with_referents(vec![dict])
                .with_name(name),
        )
    }

    pub fn code(&mut self, name: &str) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "code",
                Layout::fixed(20 * WORD).without_gc_header(),
                Traversal::Leaf,
            )
            .with_name(name),
        )
    }

    pub fn function(&mut self, name: &str, code: ObjRef, globals: ObjRef) -> ObjRef {
        self.alloc(
            SyntheticObject::new("function", Layout::fixed(17 * WORD), Traversal::Tracked)
                .with_referents(vec![code, globals])
                .with_name(name),
        )
    }

    /// A builtin type: statically allocated, no referent walk
    pub fn builtin_type(&mut self, name: &str) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "type",
                Layout::fixed(52 * WORD).without_gc_header(),
                Traversal::Leaf,
            )
            .with_name(name),
        )
    }

    /// A user defined class with its attribute dict and bases
    pub fn class(&mut self, name: &str, dict: ObjRef, bases: &[ObjRef]) -> ObjRef {
        let mut referents = vec![dict];
        referents.extend_from_slice(bases);
        self.alloc(
            SyntheticObject::new("type", Layout::fixed(110 * WORD), Traversal::Tracked)
                .with_referents(referents)
                .with_name(name),
        )
    }

    /// An instance of a user defined class with an attribute dict
    pub fn instance(&mut self, class: ObjRef, attrs: Option<ObjRef>) -> ObjRef {
        let type_name = self
            .get(class)
            .and_then(|c| c.details.name.clone())
            .unwrap_or_else(|| "object".to_string());
        let mut referents = vec![];
        referents.extend(attrs);
        referents.push(class);
        self.alloc(
            SyntheticObject::new(type_name, Layout::fixed(2 * WORD), Traversal::Tracked)
                .with_referents(referents),
        )
    }

    pub fn frame(&mut self, code_name: &str, locals: &[ObjRef]) -> ObjRef {
        self.alloc(
            SyntheticObject::new(
                "frame",
                Layout::variable(13 * WORD, WORD, locals.len()),
                Traversal::Tracked,
            )
            .with_referents(locals.to_vec())
            .with_value(ScalarValue::Frame(code_name.to_string())),
        )
    }

    /// A compressor holding large native window buffers its generic
    /// layout does not show.
    pub fn compressor(&mut self) -> ObjRef {
        self.alloc(SyntheticObject::new(
            "zlib.Compress",
            Layout::fixed(5 * WORD).without_gc_header(),
            Traversal::Leaf,
        ))
    }

    pub fn decompressor(&mut self) -> ObjRef {
        self.alloc(SyntheticObject::new(
            "zlib.Decompress",
            Layout::fixed(7 * WORD).without_gc_header(),
            Traversal::Leaf,
        ))
    }
}

impl Host for SyntheticHeap {
    type Object = ObjRef;

    fn identity_of(&self, obj: &ObjRef) -> u64 {
        BASE_IDENTITY + u64::from(obj.0) * SLOT_STRIDE
    }

    fn type_name_of<'a>(&'a self, obj: &'a ObjRef) -> Cow<'a, str> {
        match self.get(*obj) {
            Some(o) => Cow::Borrowed(o.type_name.as_str()),
            None => Cow::Borrowed("<freed>"),
        }
    }

    fn layout_of(&self, obj: &ObjRef) -> Layout {
        self.get(*obj).map(|o| o.layout).unwrap_or_default()
    }

    fn self_reported_size(&self, obj: &ObjRef) -> Option<Result<i64, HostError>> {
        self.get(*obj)?.size_hook.clone()
    }

    fn direct_referents_of(&self, obj: &ObjRef) -> Result<Vec<ObjRef>, HostError> {
        let o = self.get(*obj).ok_or(HostError::Dead(self.identity_of(obj)))?;
        match &o.traverse_error {
            Some(e) => Err(e.clone()),
            None => Ok(o.referents.clone()),
        }
    }

    fn traversal_of(&self, obj: &ObjRef) -> Traversal {
        self.get(*obj)
            .map(|o| o.traversal)
            .unwrap_or(Traversal::Leaf)
    }

    fn describe(&self, obj: &ObjRef) -> ObjectDetails {
        self.get(*obj).map(|o| o.details.clone()).unwrap_or_default()
    }

    fn live_objects(&self) -> Box<dyn Iterator<Item = ObjRef> + '_> {
        Box::new(self.slots.iter().enumerate().filter_map(|(i, s)| {
            match s {
                Some(o) if o.traversal == Traversal::Tracked => {
                    u32::try_from(i).ok().map(ObjRef)
                }
                _ => None,
            }
        }))
    }

    fn well_known_objects(&self) -> Vec<ObjRef> {
        self.well_known.clone()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn test_identities_are_distinct() {
        let mut heap = SyntheticHeap::new();
        let a = heap.object();
        let b = heap.object();
        assert_ne!(heap.identity_of(&a), heap.identity_of(&b));
    }

    #[test]
    pub fn test_freed_identity_is_recycled() {
        let mut heap = SyntheticHeap::new();
        let a = heap.object();
        let id = heap.identity_of(&a);
        assert!(heap.free(a).is_some());
        let b = heap.text("reused");
        assert_eq!(heap.identity_of(&b), id);
        assert_eq!(heap.type_name_of(&b), "str");
    }

    #[test]
    pub fn test_tuple_walks_last_to_first() {
        let mut heap = SyntheticHeap::new();
        let a = heap.object();
        let b = heap.object();
        let t = heap.tuple(&[a, b]);
        assert_eq!(heap.direct_referents_of(&t).unwrap(), vec![b, a]);
    }

    #[test]
    pub fn test_live_objects_are_tracked_only() {
        let mut heap = SyntheticHeap::new();
        let s = heap.text("leaf");
        let l = heap.list(&[s]);
        let t = heap.tuple(&[s]);
        heap.untrack(t);
        let live: Vec<_> = heap.live_objects().collect();
        assert_eq!(live, vec![l]);
    }

    #[test]
    pub fn test_dead_object_cannot_be_walked() {
        let mut heap = SyntheticHeap::new();
        let l = heap.list(&[]);
        heap.free(l);
        assert!(matches!(
            heap.direct_referents_of(&l),
            Err(HostError::Dead(_))
        ));
    }
}
