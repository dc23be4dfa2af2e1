//! # api2html cache
//!
//! Per-engine response cache for api2html pages.
//!
//! Backend responses are stored under a [`Fingerprint`] of the resolved
//! backend call and expire lazily: an entry whose TTL has elapsed is dropped
//! the next time somebody looks it up. There is no sweeping task.
//!
//! ## Example
//!
//! ```rust
//! use api2html_cache::{Fingerprint, ResponseCache};
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = ResponseCache::new();
//!     let key = Fingerprint::new("https://api.example.com/posts/1", &BTreeMap::new());
//!
//!     cache.store(key.clone(), "payload".to_string(), Duration::from_secs(60)).await;
//!     assert_eq!(cache.lookup(&key).await.as_deref(), Some("payload"));
//! }
//! ```

pub mod cache;
pub mod fingerprint;
pub mod store;

pub use cache::{CacheStats, CachedResponse};
pub use fingerprint::Fingerprint;
pub use store::ResponseCache;
