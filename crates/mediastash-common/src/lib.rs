//! Mediastash-Common: Shared identifiers, wire types, and errors.
//!
//! This crate provides common functionality used across mediastash:
//!
//! - **Typed IDs**: Validated wrappers for resource ids, qualities and cache keys
//! - **Core Types**: Download status, progress events and metadata records
//! - **Path Utilities**: Cache file naming and temp-file detection
//! - **Error Handling**: The unified error type and result alias
//!
//! # Examples
//!
//! ```
//! use mediastash_common::{CacheKey, Quality, ResourceId, Result};
//!
//! fn example() -> Result<CacheKey> {
//!     let resource: ResourceId = "dQw4w9WgXcQ".parse()?;
//!     let quality: Quality = "720p".parse()?;
//!     Ok(CacheKey::new(resource, quality))
//! }
//!
//! assert_eq!(example().unwrap().to_string(), "dQw4w9WgXcQ_720");
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
