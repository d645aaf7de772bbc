//! Resource attributes.
//!
//! An attribute remembers where its name and its value were written, so
//! duplicate-attribute and malformed-application errors can cite the
//! exact manifest positions. Values are held behind `Rc` because the
//! same parsed literal may be shared between a declaration, a default
//! and any number of override sites.

use marionette_foundation::{Span, Value};
use std::rc::Rc;

/// A named, source-traceable value attached to a resource.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    name_span: Span,
    value: Rc<Value>,
    value_span: Span,
}

/// How an override or collector applies an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOp {
    /// Replace the current value (`=>`).
    Assign,
    /// Append to the current array value (`+>`).
    Append,
}

impl Attribute {
    pub fn new(name: impl Into<String>, name_span: Span, value: Rc<Value>, value_span: Span) -> Self {
        Self {
            name: name.into(),
            name_span,
            value,
            value_span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_span(&self) -> Span {
        self.name_span
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The shared value handle.
    pub fn shared_value(&self) -> Rc<Value> {
        Rc::clone(&self.value)
    }

    pub fn value_span(&self) -> Span {
        self.value_span
    }

    /// True if no other holder shares this attribute's value handle.
    ///
    /// Distinguishes "safe to mutate in place" from "referenced by some
    /// other declaration or override site".
    pub fn unique(&self) -> bool {
        Rc::strong_count(&self.value) == 1
    }
}
