//! Image content graph handling.
//!
//! - `dispatch`: fetch every blob reachable from a root descriptor
//! - `manifest`: decode manifests, indexes and configs
//! - `layers`: pair manifest layers with config diff ids
//!
//! # Graph
//!
//! ```text
//! index ──► manifest (per platform)
//!              ├──► config   (rootfs.diff_ids)
//!              └──► layers   (compressed blobs, applied bottom to top)
//! ```

pub mod dispatch;
pub mod layers;
pub mod manifest;

pub use dispatch::{dispatch, ChildrenHandler, FetchHandler, Handler, Handlers};
pub use layers::{resolve_layers, Layer};
