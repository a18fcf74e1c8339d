extern crate bitmaps;
extern crate indexmap;
extern crate serde_json;
extern crate thiserror;
#[macro_use]
extern crate lazy_static;

pub mod common;
pub mod dump;
pub mod host;
pub mod scan;
pub mod size;
