//! Managed resources.
//!
//! A resource is an identity (`Type[title]`) plus everything recorded
//! about it during evaluation: the attribute map, the containment link
//! to the class or defined-type instance that declared it, the
//! virtual/exported flags and the explicit tag set. Resources live in
//! the catalog's arena and are addressed by [`ResourceIndex`]; an index
//! handed out at insertion stays valid for the whole compile.

use crate::attribute::{Attribute, AttributeOp};
use crate::error::{CompileError, CompileResult, ErrorKind};
use indexmap::IndexMap;
use marionette_foundation::{ResourceRef, Span, Value};
use std::rc::Rc;

/// Arena index of a resource in its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIndex(pub usize);

/// A declared resource.
#[derive(Debug, Clone)]
pub struct Resource {
    id: ResourceRef,
    /// Graph vertex assigned at insertion; stable for the resource's lifetime.
    vertex: usize,
    container: Option<ResourceIndex>,
    /// Declaration site; absent for implicitly-created resources.
    span: Option<Span>,
    attributes: IndexMap<String, Rc<Attribute>>,
    tags: Vec<String>,
    virtualized: bool,
    exported: bool,
}

impl Resource {
    /// An exported resource is also virtual until collected.
    pub(crate) fn new(
        id: ResourceRef,
        vertex: usize,
        container: Option<ResourceIndex>,
        span: Option<Span>,
        virtualized: bool,
        exported: bool,
    ) -> Self {
        Self {
            id,
            vertex,
            container,
            span,
            attributes: IndexMap::new(),
            tags: Vec::new(),
            virtualized: virtualized || exported,
            exported,
        }
    }

    pub fn id(&self) -> &ResourceRef {
        &self.id
    }

    pub fn vertex(&self) -> usize {
        self.vertex
    }

    pub fn container(&self) -> Option<ResourceIndex> {
        self.container
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn is_virtual(&self) -> bool {
        self.virtualized
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// Clear the virtual flag; returns whether this call cleared it.
    pub(crate) fn realize(&mut self) -> bool {
        let was_virtual = self.virtualized;
        self.virtualized = false;
        was_virtual
    }

    /// Add an explicit tag.
    pub fn tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn attribute(&self, name: &str) -> Option<&Rc<Attribute>> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Rc<Attribute>)> {
        self.attributes.iter().map(|(name, a)| (name.as_str(), a))
    }

    /// Set an attribute.
    ///
    /// The first set on a name always succeeds. Setting a name that is
    /// already set succeeds only when `is_override` is true; otherwise
    /// the error cites both the new and the original site.
    pub fn set(&mut self, attribute: Rc<Attribute>, is_override: bool) -> CompileResult<()> {
        if let Some(existing) = self.attributes.get(attribute.name()) {
            if !is_override {
                return Err(CompileError::new(
                    ErrorKind::DuplicateAttribute,
                    attribute.name_span(),
                    format!(
                        "attribute '{}' already set on {}",
                        attribute.name(),
                        self.id
                    ),
                )
                .with_label(existing.name_span(), "first set here"));
            }
        }
        self.attributes
            .insert(attribute.name().to_string(), attribute);
        Ok(())
    }

    /// Append to an array attribute.
    ///
    /// The result is the original elements followed by the appended
    /// ones; appending a non-array value pushes a single element. An
    /// attribute with no current value is set instead. Appending onto a
    /// non-array value fails and leaves the attribute unchanged.
    pub fn append(&mut self, attribute: Rc<Attribute>) -> CompileResult<()> {
        let Some(existing) = self.attributes.get(attribute.name()) else {
            return self.set(attribute, false);
        };

        let Some(elements) = existing.value().as_array() else {
            return Err(CompileError::new(
                ErrorKind::InvalidAttributeOperation,
                attribute.value_span(),
                format!(
                    "cannot append to attribute '{}' of {}: existing value is not an array",
                    attribute.name(),
                    self.id
                ),
            )
            .with_label(existing.value_span(), "current value set here"));
        };

        let mut merged: Vec<Value> = elements.to_vec();
        match attribute.value() {
            Value::Array(appended) => merged.extend(appended.iter().cloned()),
            other => merged.push(other.clone()),
        }

        let merged = Rc::new(Attribute::new(
            attribute.name(),
            attribute.name_span(),
            Rc::new(Value::Array(merged)),
            attribute.value_span(),
        ));
        self.attributes
            .insert(merged.name().to_string(), merged);
        Ok(())
    }

    /// Apply a recorded override or collector attribute list.
    pub fn apply(&mut self, operations: &[(AttributeOp, Rc<Attribute>)]) -> CompileResult<()> {
        for (op, attribute) in operations {
            match op {
                AttributeOp::Assign => self.set(Rc::clone(attribute), true)?,
                AttributeOp::Append => self.append(Rc::clone(attribute))?,
            }
        }
        Ok(())
    }
}
