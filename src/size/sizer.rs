//! Resident size of a single object
//!
//! The content size comes from, in order of preference: a registered
//! override, the object's own size hook, or the generic layout the host
//! reports. Collector header bytes are added for objects that carry a
//! header and the total is rounded up to the word size.

use std::mem::size_of;

use tracing::debug;

use crate::host::{Host, HostError};

use super::registry::{SizeRegistry, SizeWidth, DECLINE};

/// Platform parameters of the size model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizerConfig {
    /// Allocation granularity; sizes are rounded up to a multiple
    pub word_size: usize,
    /// Collector bookkeeping in front of tracked objects
    pub gc_header_size: usize,
    /// Which registry override function applies
    pub width: SizeWidth,
}

impl SizerConfig {
    /// The size model of the running process
    pub fn native() -> Self {
        let word_size = size_of::<usize>();
        SizerConfig {
            word_size,
            gc_header_size: 2 * word_size,
            width: SizeWidth::native(),
        }
    }

    /// 32-bit pointers
    pub fn narrow() -> Self {
        SizerConfig {
            word_size: 4,
            gc_header_size: 8,
            width: SizeWidth::Narrow,
        }
    }

    /// 64-bit pointers
    pub fn wide() -> Self {
        SizerConfig {
            word_size: 8,
            gc_header_size: 16,
            width: SizeWidth::Wide,
        }
    }
}

impl Default for SizerConfig {
    fn default() -> Self {
        SizerConfig::native()
    }
}

/// Where a size figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    Override,
    SelfReported,
    Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub bytes: usize,
    pub source: SizeSource,
    /// An override or size hook produced an unusable figure and was
    /// ignored. A plain decline from an override is not an anomaly.
    pub anomaly: bool,
}

/// Computes object sizes under one size model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sizer {
    config: SizerConfig,
}

impl Sizer {
    pub fn new(config: SizerConfig) -> Self {
        Sizer { config }
    }

    pub fn native() -> Self {
        Sizer::new(SizerConfig::native())
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// Resident size of `obj` in bytes
    pub fn size_of<H: Host>(
        &self,
        host: &H,
        registry: &SizeRegistry<H::Object>,
        obj: &H::Object,
    ) -> usize {
        self.measure(host, registry, obj).bytes
    }

    /// Resident size of `obj` with a note of how it was computed
    pub fn measure<H: Host>(
        &self,
        host: &H,
        registry: &SizeRegistry<H::Object>,
        obj: &H::Object,
    ) -> SizeReport {
        let layout = host.layout_of(obj);
        let header = if layout.has_gc_header {
            self.config.gc_header_size
        } else {
            0
        };
        let mut anomaly = false;

        let type_name = host.type_name_of(obj);
        if let Some(size_fn) = registry.lookup(&type_name, self.config.width) {
            match size_fn(obj) {
                content if content >= 0 => {
                    return self.report(content, header, SizeSource::Override, anomaly)
                }
                DECLINE => {}
                content => {
                    debug!(
                        type_name = %type_name,
                        content,
                        "size override returned a negative size, ignoring"
                    );
                    anomaly = true;
                }
            }
        }

        match host.self_reported_size(obj) {
            Some(Ok(content)) if content >= 0 => {
                return self.report(content, header, SizeSource::SelfReported, anomaly)
            }
            Some(Ok(content)) => {
                debug!(
                    type_name = %type_name,
                    content,
                    "self-reported size is negative, using layout"
                );
                anomaly = true;
            }
            Some(Err(HostError::SizeHook(reason))) => {
                debug!(type_name = %type_name, %reason, "size hook failed, using layout");
                anomaly = true;
            }
            Some(Err(e)) => {
                debug!(type_name = %type_name, error = %e, "size hook unusable, using layout");
                anomaly = true;
            }
            None => {}
        }

        SizeReport {
            bytes: self.round_up(layout.content_size().saturating_add(header)),
            source: SizeSource::Layout,
            anomaly,
        }
    }

    fn report(&self, content: i64, header: usize, source: SizeSource, anomaly: bool) -> SizeReport {
        let content = usize::try_from(content).unwrap_or(usize::MAX);
        SizeReport {
            bytes: self.round_up(content.saturating_add(header)),
            source,
            anomaly,
        }
    }

    /// Round up to a multiple of the word size, saturating at the
    /// largest such multiple.
    fn round_up(&self, bytes: usize) -> usize {
        let word = self.config.word_size.max(1);
        match bytes % word {
            0 => bytes,
            rem => bytes
                .checked_add(word - rem)
                .unwrap_or(usize::MAX - usize::MAX % word),
        }
    }
}
