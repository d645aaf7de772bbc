//! # Marionette Catalog
//!
//! Catalog construction and deferred resolution for the Marionette
//! configuration language.
//!
//! Evaluation of a manifest is a single linear pass that declares
//! resources into a [`Catalog`] and records everything that cannot
//! resolve yet on the [`EvaluationContext`]: attribute overrides,
//! relationship operands, collectors, and declared defined-type
//! instances. [`EvaluationContext::finalize`] then drains the deferred
//! work in a fixed order, runs collectors and defined-type expansion to
//! a fixpoint, resolves relationships into the dependency graph, and
//! rejects cycles. The finished catalog renders to JSON or DOT via
//! [`Catalog::write`] and [`Catalog::write_graph`].
//!
//! Any compile error aborts the whole compile; there is no partial
//! catalog output.

pub mod attribute;
pub mod catalog;
pub mod collector;
pub mod context;
pub mod definition;
pub mod emit;
pub mod error;
pub mod graph;
pub mod overrides;
pub mod query;
pub mod resource;

pub use attribute::{Attribute, AttributeOp};
pub use catalog::Catalog;
pub use collector::Collector;
pub use context::{DeclaredInstance, DeferredRelationship, EvaluationContext, Expander, MAX_EVALUATION_DEPTH};
pub use definition::{DefinedType, Definitions, Scope};
pub use error::{CompileError, CompileResult, ErrorKind, Label, StackFrame};
pub use graph::{DependencyGraph, Relationship};
pub use overrides::{Override, OverrideQueue};
pub use query::{AttributeTest, BoolOp, CollectorQuery, QueryOperand, TestOp};
pub use resource::{Resource, ResourceIndex};

pub use marionette_foundation::{ResourceRef, SourceFile, SourceMap, Span, Value};
