//! Object size computation
pub mod registry;
pub mod sizer;

pub use registry::{SizeRegistry, SizeWidth};
pub use sizer::{Sizer, SizerConfig};
