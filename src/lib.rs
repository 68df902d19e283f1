//! Image delivery resolver: picks a transforming CDN URL, falls back to a
//! signed object-store URL, and finally to the original reference.

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod health;
pub mod metrics;
pub mod primary;
pub mod resolver;
pub mod secondary;
pub mod transform;
pub mod upstream;

pub use cache::Source;
pub use config::Config;
pub use error::{ConfigError, ResolveError};
pub use format::ClientContext;
pub use resolver::{ImageResolver, ResolvedImage};
pub use transform::{CropMode, FocusPoint, ImageFormat, TransformParams};
