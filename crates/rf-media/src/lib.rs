//! rf-media: object storage, signed URLs, and the URL lifecycle.

pub mod images;
pub mod paths;
pub mod signing;
pub mod storage;
pub mod url_manager;

pub use signing::{SignedUrl, UrlSigner};
pub use storage::{LocalObjectStore, ObjectStore};
pub use url_manager::{needs_refresh, UrlManager};
