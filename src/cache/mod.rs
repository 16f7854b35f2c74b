//! Response cache.
//!
//! # Data Flow
//! ```text
//! GET /api/stats?range=30d
//!     → key.rs    ("tier:{tier}:/api/stats?range=30d" for shared rules,
//!                  "{identifier}:/api/stats?range=30d" otherwise)
//!     → policy.rs (TTL: longest matching prefix, else default; 0 = uncacheable)
//!     → store.rs  (cache-aside over the coordination store, key cache:{key})
//!     → entry.rs  (JSON record, base64 body, SHA-256 ETag)
//! ```
//!
//! # Design Decisions
//! - Invalidation is TTL-only; writes upstream are not tracked
//! - Freshness is checked against the clock on read, not only by store expiry
//! - Store failures degrade to a miss; a failed write is logged and dropped
//! - Upstream `Cache-Control: private` / `no-store` responses are never stored

pub mod entry;
pub mod key;
pub mod policy;
pub mod store;

pub use entry::{etag_for, etag_matches, CacheEntry};
pub use key::CacheKey;
pub use policy::TtlPolicy;
pub use store::{CacheLookup, Conditional, ResponseCache};
