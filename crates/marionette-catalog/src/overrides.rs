//! Deferred attribute overrides.
//!
//! An override targets a resource by identity and may be recorded before
//! that resource is ever declared — manifests are evaluated in one
//! linear pass and reference order is not declaration order. Overrides
//! that cannot apply immediately wait in this queue, keyed by identity;
//! they drain when the target is declared or realized, and whatever is
//! left after the finalize fixpoint either applies then or is an
//! unresolved-reference error at the site that recorded it.

use crate::attribute::{Attribute, AttributeOp};
use crate::catalog::Catalog;
use crate::error::{CompileError, CompileResult, ErrorKind, StackFrame};
use indexmap::IndexMap;
use marionette_foundation::{ResourceRef, Span};
use std::rc::Rc;
use tracing::trace;

/// A recorded attribute override awaiting its target.
#[derive(Debug, Clone)]
pub struct Override {
    /// Identity of the resource being overridden.
    pub target: ResourceRef,
    /// Where the override was written.
    pub span: Span,
    /// Attribute operations to apply, in source order.
    pub operations: Vec<(AttributeOp, Rc<Attribute>)>,
    /// Call stack captured when the override was recorded.
    pub backtrace: Vec<StackFrame>,
}

/// Identity-keyed queue of overrides whose targets did not exist yet.
#[derive(Debug, Clone, Default)]
pub struct OverrideQueue {
    pending: IndexMap<ResourceRef, Vec<Override>>,
}

impl OverrideQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue an override for a target that does not exist yet.
    pub fn defer(&mut self, record: Override) {
        trace!(target = %record.target, "deferring override");
        self.pending
            .entry(record.target.clone())
            .or_default()
            .push(record);
    }

    /// Apply and remove every queued override for one identity.
    ///
    /// Called when the target is declared and again when it is realized;
    /// entries are removed on application, so nothing applies twice.
    pub fn apply_pending(
        &mut self,
        catalog: &mut Catalog,
        target: &ResourceRef,
    ) -> CompileResult<()> {
        let Some(records) = self.pending.shift_remove(target) else {
            return Ok(());
        };
        let Some(index) = catalog.find(target) else {
            return Err(CompileError::new(
                ErrorKind::Internal,
                Span::zero(0),
                format!("pending overrides applied for undeclared resource {target}"),
            ));
        };
        for record in records {
            trace!(target = %record.target, "applying deferred override");
            catalog
                .resource_mut(index)
                .apply(&record.operations)
                .map_err(|e| e.with_backtrace(record.backtrace.clone()))?;
        }
        Ok(())
    }

    /// Resolve everything still queued after the finalize fixpoint.
    ///
    /// Targets that exist by now get their overrides applied; a target
    /// that was never declared is a hard error citing the override's
    /// original source position and recorded backtrace.
    pub fn resolve_remaining(&mut self, catalog: &mut Catalog) -> CompileResult<()> {
        let pending = std::mem::take(&mut self.pending);
        for (target, records) in pending {
            if catalog.find(&target).is_none() {
                let record = &records[0];
                return Err(CompileError::new(
                    ErrorKind::UnresolvedReference,
                    record.span,
                    format!("cannot override resource {target}: resource not found"),
                )
                .with_backtrace(record.backtrace.clone()));
            }
            self.pending.insert(target.clone(), records);
            self.apply_pending(catalog, &target)?;
        }
        Ok(())
    }
}
