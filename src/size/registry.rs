//! Per-type size overrides
//!
//! Some objects own native buffers that generic introspection cannot
//! see (compressor windows, for instance). The registry maps a type
//! name to a pair of size functions, one per size model width, which
//! the sizer consults before anything else.
//!
//! A size function returns the content size in bytes, or `-1` to
//! decline and let the sizer compute its default.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;

/// Return value by which a size function declines
pub const DECLINE: i64 = -1;

/// A size function for objects of type `O`
pub type SizeFn<O> = Arc<dyn Fn(&O) -> i64 + Send + Sync>;

/// Wrap a closure as a [`SizeFn`]
pub fn size_fn<O, F>(f: F) -> SizeFn<O>
where
    F: Fn(&O) -> i64 + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which of the two size models an override is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeWidth {
    /// 32-bit pointers
    Narrow,
    /// 64-bit pointers
    Wide,
}

impl SizeWidth {
    /// The width of the running process
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            SizeWidth::Wide
        } else {
            SizeWidth::Narrow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot register a size override without a type name")]
    EmptyTypeName,
    #[error("size override for {0} must give both widths or neither")]
    PartialOverride(String),
}

struct SizeOverride<O> {
    narrow: SizeFn<O>,
    wide: SizeFn<O>,
}

impl<O> Clone for SizeOverride<O> {
    fn clone(&self) -> Self {
        SizeOverride {
            narrow: Arc::clone(&self.narrow),
            wide: Arc::clone(&self.wide),
        }
    }
}

/// Table of size overrides keyed by type name
pub struct SizeRegistry<O> {
    overrides: HashMap<String, SizeOverride<O>>,
}

impl<O> Default for SizeRegistry<O> {
    fn default() -> Self {
        SizeRegistry {
            overrides: HashMap::new(),
        }
    }
}

impl<O> Clone for SizeRegistry<O> {
    fn clone(&self) -> Self {
        SizeRegistry {
            overrides: self.overrides.clone(),
        }
    }
}

impl<O> fmt::Debug for SizeRegistry<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.type_names()).finish()
    }
}

// Deflate keeps a 32K-entry window and hash chains (64 KiB each at the
// default window bits) plus a 64 KiB pending buffer at the default
// memory level. Inflate keeps one 32 KiB window.
const DEFLATE_BUFFERS: i64 = 262_144;
const INFLATE_WINDOW: i64 = 32_768;
const DEFLATE_STATE_NARROW: i64 = 5_828;
const DEFLATE_STATE_WIDE: i64 = 5_952;
const INFLATE_STATE_NARROW: i64 = 7_116;
const INFLATE_STATE_WIDE: i64 = 7_152;

impl<O> SizeRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install, replace or (with both functions `None`) clear the
    /// override for `type_name`.
    pub fn register(
        &mut self,
        type_name: &str,
        narrow: Option<SizeFn<O>>,
        wide: Option<SizeFn<O>>,
    ) -> Result<(), RegistryError> {
        if type_name.is_empty() {
            return Err(RegistryError::EmptyTypeName);
        }
        match (narrow, wide) {
            (None, None) => {
                self.overrides.remove(type_name);
                Ok(())
            }
            (Some(narrow), Some(wide)) => {
                self.overrides
                    .insert(type_name.to_string(), SizeOverride { narrow, wide });
                Ok(())
            }
            _ => Err(RegistryError::PartialOverride(type_name.to_string())),
        }
    }

    /// Install or replace an override from two closures
    pub fn insert<N, W>(&mut self, type_name: &str, narrow: N, wide: W) -> Result<(), RegistryError>
    where
        N: Fn(&O) -> i64 + Send + Sync + 'static,
        W: Fn(&O) -> i64 + Send + Sync + 'static,
    {
        self.register(type_name, Some(size_fn(narrow)), Some(size_fn(wide)))
    }

    /// Remove the override for `type_name`, returning whether there was one
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.overrides.remove(type_name).is_some()
    }

    pub fn lookup(&self, type_name: &str, width: SizeWidth) -> Option<&SizeFn<O>> {
        self.overrides.get(type_name).map(|o| match width {
            SizeWidth::Narrow => &o.narrow,
            SizeWidth::Wide => &o.wide,
        })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.overrides.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Type names with an active override, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.overrides.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

lazy_static! {
    static ref GLOBAL_REGISTRIES: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>> =
        Mutex::new(HashMap::new());
}

impl<O: 'static> SizeRegistry<O> {
    /// A registry preloaded with approximations for compressor and
    /// decompressor objects.
    pub fn with_builtin_overrides() -> Self {
        let mut registry = Self::new();
        registry.overrides.insert(
            "zlib.Compress".to_string(),
            SizeOverride {
                narrow: size_fn(|_: &O| DEFLATE_STATE_NARROW + DEFLATE_BUFFERS),
                wide: size_fn(|_: &O| DEFLATE_STATE_WIDE + DEFLATE_BUFFERS),
            },
        );
        registry.overrides.insert(
            "zlib.Decompress".to_string(),
            SizeOverride {
                narrow: size_fn(|_: &O| INFLATE_STATE_NARROW + INFLATE_WINDOW),
                wide: size_fn(|_: &O| INFLATE_STATE_WIDE + INFLATE_WINDOW),
            },
        );
        registry
    }

    /// The process-wide registry for objects of type `O`
    ///
    /// A convenience for callers without a registry of their own;
    /// dumpers take a snapshot of it rather than reading it mid-scan.
    /// Writers must not race each other.
    pub fn global() -> Arc<RwLock<SizeRegistry<O>>> {
        let mut registries = GLOBAL_REGISTRIES
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registries
            .entry(TypeId::of::<O>())
            .or_insert_with(|| {
                Box::new(Arc::new(RwLock::new(SizeRegistry::<O>::new())))
                    as Box<dyn Any + Send + Sync>
            })
            .downcast_ref::<Arc<RwLock<SizeRegistry<O>>>>()
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(RwLock::new(SizeRegistry::new())))
    }

    /// A copy of the current process-wide registry for `O`
    pub fn global_snapshot() -> SizeRegistry<O> {
        let shared = Self::global();
        let registry = shared.read().unwrap_or_else(PoisonError::into_inner);
        registry.clone()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn test_register_and_lookup() {
        let mut registry = SizeRegistry::<u32>::new();
        registry
            .register("Foo", Some(size_fn(|_| 800)), Some(size_fn(|_| 1600)))
            .unwrap();
        assert_eq!(registry.lookup("Foo", SizeWidth::Narrow).unwrap()(&0), 800);
        assert_eq!(registry.lookup("Foo", SizeWidth::Wide).unwrap()(&0), 1600);
        assert!(registry.lookup("Bar", SizeWidth::Wide).is_none());
    }

    #[test]
    pub fn test_reregister_replaces() {
        let mut registry = SizeRegistry::<u32>::new();
        registry.insert("Foo", |_| 1, |_| 2).unwrap();
        registry.insert("Foo", |_| 3, |_| 4).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("Foo", SizeWidth::Wide).unwrap()(&0), 4);
    }

    #[test]
    pub fn test_register_none_clears() {
        let mut registry = SizeRegistry::<u32>::new();
        registry.insert("Foo", |_| 1, |_| 2).unwrap();
        registry.register("Foo", None, None).unwrap();
        assert!(!registry.contains("Foo"));
        // clearing an unknown name is not an error
        registry.register("Bar", None, None).unwrap();
    }

    #[test]
    pub fn test_register_rejects_misuse() {
        let mut registry = SizeRegistry::<u32>::new();
        assert_eq!(
            registry.register("Foo", Some(size_fn(|_| 1)), None),
            Err(RegistryError::PartialOverride("Foo".to_string()))
        );
        assert_eq!(
            registry.register("", Some(size_fn(|_| 1)), Some(size_fn(|_| 1))),
            Err(RegistryError::EmptyTypeName)
        );
        assert_eq!(
            registry.insert("", |_| 1, |_| 1),
            Err(RegistryError::EmptyTypeName)
        );
        assert!(registry.is_empty());
    }

    #[test]
    pub fn test_builtin_overrides() {
        let registry = SizeRegistry::<u32>::with_builtin_overrides();
        assert_eq!(registry.type_names(), vec!["zlib.Compress", "zlib.Decompress"]);
        assert!(registry.lookup("zlib.Compress", SizeWidth::Wide).unwrap()(&0) > 256_000);
        assert!(registry.lookup("zlib.Decompress", SizeWidth::Narrow).unwrap()(&0) > 30_000);
    }

    #[test]
    pub fn test_global_registry_is_shared() {
        struct Marker;
        SizeRegistry::<Marker>::global()
            .write()
            .unwrap()
            .insert("Shared", |_| 8, |_| 16)
            .unwrap();
        assert!(SizeRegistry::<Marker>::global_snapshot().contains("Shared"));
        SizeRegistry::<Marker>::global().write().unwrap().unregister("Shared");
        assert!(SizeRegistry::<Marker>::global_snapshot().is_empty());
    }
}
