//! Streaming dumps of the object graph
//!
//! The dumper writes one record per object to a sink. Traversal is
//! driven by an explicit worklist, so arbitrarily deep graphs never
//! exhaust the stack. Within one [`DumpSession`] an identity is
//! emitted at most once.
//!
//! Per-object introspection failures (a failing size hook, a walk the
//! host cannot perform) are logged, counted and replaced by fallbacks.
//! A sink failure ends the dump at once.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::common::intset::CompactIntSet;
use crate::host::{Host, Traversal};
use crate::scan::referents;
use crate::size::registry::SizeRegistry;
use crate::size::sizer::Sizer;

use super::error::DumpError;
use super::escape::truncate_chars;
use super::options::{DumpOptions, RecurseMode};
use super::record::{ObjectRecord, Preview, RecordEncoder};
use super::sink::file_sink;
use super::skip::SkipSet;
use super::stats::DumpStats;

/// Dedup scope and running statistics shared by the calls of one dump
#[derive(Debug, Default)]
pub struct DumpSession {
    seen: CompactIntSet,
    stats: DumpStats,
    encoder: RecordEncoder,
}

impl DumpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `identity` has been emitted in this session
    pub fn has_emitted(&self, identity: u64) -> bool {
        self.seen.contains(identity)
    }

    pub fn stats(&self) -> &DumpStats {
        &self.stats
    }

    pub fn into_stats(self) -> DumpStats {
        self.stats
    }

    fn write<W: Write>(&mut self, sink: &mut W, record: &ObjectRecord) -> Result<(), DumpError> {
        let records = self.stats.records;
        let line = self.encoder.encode(record)?;
        if let Err(source) = sink.write_all(line) {
            warn!(records, error = %source, "sink rejected record, abandoning dump");
            return Err(DumpError::Sink { records, source });
        }
        let encoded = line.len();
        self.stats
            .record_emitted(&record.type_name, record.size, encoded);
        Ok(())
    }
}

/// Dumps objects of one host
pub struct Dumper<'h, H: Host> {
    host: &'h H,
    sizer: Sizer,
    registry: SizeRegistry<H::Object>,
    options: DumpOptions,
}

impl<'h, H: Host> Dumper<'h, H> {
    /// A dumper with the native size model and no size overrides
    pub fn new(host: &'h H) -> Self {
        Dumper {
            host,
            sizer: Sizer::native(),
            registry: SizeRegistry::new(),
            options: DumpOptions::default(),
        }
    }

    pub fn with_sizer(mut self, sizer: Sizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn with_registry(mut self, registry: SizeRegistry<H::Object>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_options(mut self, options: DumpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn host(&self) -> &'h H {
        self.host
    }

    pub fn sizer(&self) -> &Sizer {
        &self.sizer
    }

    pub fn registry(&self) -> &SizeRegistry<H::Object> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SizeRegistry<H::Object> {
        &mut self.registry
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    /// Resident size of `obj` under this dumper's size model
    pub fn size_of(&self, obj: &H::Object) -> usize {
        self.sizer.size_of(self.host, &self.registry, obj)
    }

    /// Direct referents of `obj`, honouring the configured leaf types
    ///
    /// A failed walk is logged and reported as no referents.
    pub fn get_referents(&self, obj: &H::Object) -> Vec<H::Object> {
        referents::get_referents_with(self.host, obj, &self.options.leaf_types)
    }

    /// The record `obj` would be dumped as
    pub fn record_of(&self, obj: &H::Object) -> ObjectRecord {
        let mut stats = DumpStats::default();
        self.inspect(obj, self.host.identity_of(obj), &mut stats).0
    }

    /// Dump a single object and, depending on `recurse`, some of its
    /// referents. Objects in `skip` are neither emitted nor expanded.
    pub fn dump_object_info<W: Write>(
        &self,
        sink: &mut W,
        obj: &H::Object,
        skip: Option<&SkipSet>,
        recurse: RecurseMode,
    ) -> Result<DumpStats, DumpError> {
        let mut session = DumpSession::new();
        self.dump_object_info_in(&mut session, sink, obj, skip, recurse)?;
        self.finish(session, sink, "object")
    }

    /// As [`Dumper::dump_object_info`], deduplicating against and
    /// recording into an existing session. The sink is not flushed.
    pub fn dump_object_info_in<W: Write>(
        &self,
        session: &mut DumpSession,
        sink: &mut W,
        obj: &H::Object,
        skip: Option<&SkipSet>,
        recurse: RecurseMode,
    ) -> Result<(), DumpError> {
        let mut pending = vec![(obj.clone(), recurse)];
        while let Some((next, mode)) = pending.pop() {
            let children = match self.emit(session, sink, &next, skip)? {
                Some(children) => children,
                None => continue,
            };
            let expand: Vec<_> = match mode {
                RecurseMode::None => vec![],
                RecurseMode::Children => children
                    .into_iter()
                    .map(|c| (c, RecurseMode::None))
                    .collect(),
                RecurseMode::Unreachable => children
                    .into_iter()
                    .filter_map(|c| match self.classify(&c) {
                        Traversal::Leaf => Some((c, RecurseMode::None)),
                        Traversal::Untracked => Some((c, RecurseMode::Unreachable)),
                        Traversal::Tracked => None,
                    })
                    .collect(),
            };
            // reversed so children are emitted in referent order
            pending.extend(expand.into_iter().rev());
        }
        Ok(())
    }

    /// Dump `root` and everything it transitively references, once each
    pub fn dump_all_referenced<W: Write>(
        &self,
        sink: &mut W,
        root: &H::Object,
        skip: Option<&SkipSet>,
    ) -> Result<DumpStats, DumpError> {
        info!(root = self.host.identity_of(root), "dumping closure");
        let mut session = DumpSession::new();
        let mut pending = vec![root.clone()];
        while let Some(next) = pending.pop() {
            if let Some(children) = self.emit(&mut session, sink, &next, skip)? {
                pending.extend(children.into_iter().filter(|c| {
                    let identity = self.host.identity_of(c);
                    !session.has_emitted(identity) && !skip.map_or(false, |s| s.contains(identity))
                }));
            }
        }
        self.finish(session, sink, "closure")
    }

    /// Dump the whole live population
    ///
    /// The host's well-known objects are emitted first (unless disabled
    /// in the options) and then skipped for the rest of the dump.
    pub fn dump_gc_objects<W: Write>(
        &self,
        sink: &mut W,
        recurse: RecurseMode,
    ) -> Result<DumpStats, DumpError> {
        info!(recurse = recurse.depth(), "dumping live objects");
        let mut session = DumpSession::new();
        let mut skip = SkipSet::new();
        if self.options.skip_well_known {
            for obj in self.host.well_known_objects() {
                self.dump_object_info_in(&mut session, sink, &obj, None, RecurseMode::None)?;
                skip.insert(self.host.identity_of(&obj));
            }
        }
        for obj in self.host.live_objects() {
            self.dump_object_info_in(&mut session, sink, &obj, Some(&skip), recurse)?;
        }
        self.finish(session, sink, "bulk")
    }

    /// [`Dumper::dump_gc_objects`] into a newly created file
    pub fn dump_gc_objects_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        recurse: RecurseMode,
    ) -> Result<DumpStats, DumpError> {
        let mut sink =
            file_sink(path).map_err(|source| DumpError::Sink { records: 0, source })?;
        self.dump_gc_objects(&mut sink, recurse)
    }

    fn classify(&self, obj: &H::Object) -> Traversal {
        referents::classify(self.host, obj, &self.options.leaf_types)
    }

    /// Emit `obj` unless skipped or already emitted, returning its
    /// referents when it was emitted.
    fn emit<W: Write>(
        &self,
        session: &mut DumpSession,
        sink: &mut W,
        obj: &H::Object,
        skip: Option<&SkipSet>,
    ) -> Result<Option<Vec<H::Object>>, DumpError> {
        let identity = self.host.identity_of(obj);
        if skip.map_or(false, |s| s.contains(identity)) {
            session.stats.skipped += 1;
            return Ok(None);
        }
        if !session.seen.insert(identity) {
            session.stats.duplicates += 1;
            return Ok(None);
        }
        let (record, children) = self.inspect(obj, identity, &mut session.stats);
        session.write(sink, &record)?;
        Ok(Some(children))
    }

    fn inspect(
        &self,
        obj: &H::Object,
        identity: u64,
        stats: &mut DumpStats,
    ) -> (ObjectRecord, Vec<H::Object>) {
        let type_name = self.host.type_name_of(obj);
        let children = match referents::try_referents_of(self.host, obj, self.classify(obj)) {
            Ok(children) => children,
            Err(e) => {
                debug!(identity, type_name = %type_name, error = %e, "no referents for object");
                stats.referent_failures += 1;
                vec![]
            }
        };

        let size = self.sizer.measure(self.host, &self.registry, obj);
        if size.anomaly {
            stats.size_anomalies += 1;
        }

        let limit = self.options.preview_limit;
        let details = self.host.describe(obj);
        let record = ObjectRecord {
            address: identity,
            type_name: type_name.into_owned(),
            size: size.bytes,
            name: details.name.map(|n| truncate_chars(&n, limit).to_string()),
            len: details.len,
            value: details.value.and_then(|v| Preview::from_scalar(v, limit)),
            refs: children.iter().map(|c| self.host.identity_of(c)).collect(),
        };
        (record, children)
    }

    fn finish<W: Write>(
        &self,
        session: DumpSession,
        sink: &mut W,
        kind: &str,
    ) -> Result<DumpStats, DumpError> {
        let stats = session.into_stats();
        sink.flush().map_err(|source| DumpError::Sink {
            records: stats.records,
            source,
        })?;
        info!(
            kind,
            records = stats.records,
            bytes = stats.bytes_written,
            skipped = stats.skipped,
            anomalies = stats.size_anomalies + stats.referent_failures,
            "dump finished"
        );
        Ok(stats)
    }
}

impl<'h, H: Host> Dumper<'h, H>
where
    H::Object: 'static,
{
    /// A dumper using a snapshot of the process-wide size registry
    pub fn with_global_registry(host: &'h H) -> Self {
        Dumper::new(host).with_registry(SizeRegistry::global_snapshot())
    }
}
