//! # Marionette foundation
//!
//! Shared foundation types for the marionette compiler: source location
//! tracking and the runtime value model.
//!
//! - [`Span`] / [`SourceMap`] — compact source locations with file and
//!   line lookup for diagnostics and catalog output
//! - [`Value`] — the tagged value type attached to resource attributes
//! - [`ResourceRef`] — a resource identity (`Type[title]`)

pub mod span;
pub mod value;

pub use span::{SourceFile, SourceMap, Span};
pub use value::{ResourceRef, Value};
