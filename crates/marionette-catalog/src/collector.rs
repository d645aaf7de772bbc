//! Resource collectors.
//!
//! Collectors pull virtual and exported resources into realized state.
//! They run repeatedly inside the finalize fixpoint: defined-type
//! expansion can declare new candidates at any point, so each collector
//! keeps a resumable position and only ever looks at resources it has
//! not examined before. After the fixpoint, `detect_uncollected` decides
//! whether incomplete coverage is an error — it is for explicit resource
//! lists, never for queries.

use crate::attribute::{Attribute, AttributeOp};
use crate::catalog::Catalog;
use crate::error::{CompileError, CompileResult, ErrorKind, StackFrame};
use crate::overrides::OverrideQueue;
use crate::query::CollectorQuery;
use crate::resource::ResourceIndex;
use marionette_foundation::{ResourceRef, Span};
use std::rc::Rc;
use tracing::{debug, trace};

/// A registered collector.
#[derive(Debug, Clone)]
pub enum Collector {
    /// Explicit resource references (e.g. a relationship operand list).
    List(ListCollector),
    /// A `Type <| query |>` expression.
    Query(QueryCollector),
}

/// Collector over an explicit list of identities.
#[derive(Debug, Clone)]
pub struct ListCollector {
    entries: Vec<ListEntry>,
    attributes: Vec<(AttributeOp, Rc<Attribute>)>,
    resources: Vec<ResourceIndex>,
    backtrace: Vec<StackFrame>,
}

#[derive(Debug, Clone)]
struct ListEntry {
    id: ResourceRef,
    span: Span,
    found: bool,
}

/// Collector over all resources of one type matching a query.
#[derive(Debug, Clone)]
pub struct QueryCollector {
    /// Normalized type name.
    kind: String,
    /// Collect only exported resources (`<<| |>>`).
    exported_only: bool,
    /// Absent query matches every candidate.
    query: Option<CollectorQuery>,
    /// Resume position in the catalog's per-type sequence.
    cursor: usize,
    attributes: Vec<(AttributeOp, Rc<Attribute>)>,
    resources: Vec<ResourceIndex>,
}

impl Collector {
    pub fn list(entries: Vec<(ResourceRef, Span)>, backtrace: Vec<StackFrame>) -> Self {
        Collector::List(ListCollector {
            entries: entries
                .into_iter()
                .map(|(id, span)| ListEntry {
                    id,
                    span,
                    found: false,
                })
                .collect(),
            attributes: Vec::new(),
            resources: Vec::new(),
            backtrace,
        })
    }

    pub fn query(kind: impl AsRef<str>, exported_only: bool, query: Option<CollectorQuery>) -> Self {
        Collector::Query(QueryCollector {
            kind: kind.as_ref().to_lowercase(),
            exported_only,
            query,
            cursor: 0,
            attributes: Vec::new(),
            resources: Vec::new(),
        })
    }

    /// Attach attributes to apply to every collected resource.
    pub fn with_attributes(mut self, attributes: Vec<(AttributeOp, Rc<Attribute>)>) -> Self {
        match &mut self {
            Collector::List(c) => c.attributes = attributes,
            Collector::Query(c) => c.attributes = attributes,
        }
        self
    }

    /// Resources matched so far, in collection order.
    pub fn resources(&self) -> &[ResourceIndex] {
        match self {
            Collector::List(c) => &c.resources,
            Collector::Query(c) => &c.resources,
        }
    }

    /// Advance matching; returns whether anything new was collected.
    pub fn collect(
        &mut self,
        catalog: &mut Catalog,
        overrides: &mut OverrideQueue,
    ) -> CompileResult<bool> {
        match self {
            Collector::List(c) => c.collect(catalog, overrides),
            Collector::Query(c) => c.collect(catalog, overrides),
        }
    }

    /// Check coverage once, after the finalize fixpoint.
    pub fn detect_uncollected(&self) -> CompileResult<()> {
        match self {
            Collector::List(c) => c.detect_uncollected(),
            // An empty query result is legitimate.
            Collector::Query(_) => Ok(()),
        }
    }
}

impl ListCollector {
    fn collect(
        &mut self,
        catalog: &mut Catalog,
        overrides: &mut OverrideQueue,
    ) -> CompileResult<bool> {
        let mut progressed = false;
        for entry in &mut self.entries {
            if entry.found {
                continue;
            }
            let Some(index) = catalog.find(&entry.id) else {
                continue;
            };
            trace!(resource = %entry.id, "collected listed resource");
            realize_and_apply(catalog, overrides, index, &self.attributes)?;
            entry.found = true;
            self.resources.push(index);
            progressed = true;
        }
        Ok(progressed)
    }

    fn detect_uncollected(&self) -> CompileResult<()> {
        for entry in &self.entries {
            if !entry.found {
                return Err(CompileError::new(
                    ErrorKind::UnresolvedReference,
                    entry.span,
                    format!("cannot realize resource {}: resource not found", entry.id),
                )
                .with_backtrace(self.backtrace.clone()));
            }
        }
        Ok(())
    }
}

impl QueryCollector {
    fn collect(
        &mut self,
        catalog: &mut Catalog,
        overrides: &mut OverrideQueue,
    ) -> CompileResult<bool> {
        // First pass is read-only: find new matches from the cursor on.
        let mut matched = Vec::new();
        self.cursor = catalog.each(Some(&self.kind), self.cursor, |index, resource| {
            if self.exported_only && !resource.is_exported() {
                return true;
            }
            let matches = match &self.query {
                Some(query) => query.evaluate(catalog, index),
                None => true,
            };
            if matches {
                matched.push(index);
            }
            true
        });

        if matched.is_empty() {
            return Ok(false);
        }
        debug!(kind = %self.kind, matched = matched.len(), "query collector matched");
        for index in matched {
            realize_and_apply(catalog, overrides, index, &self.attributes)?;
            self.resources.push(index);
        }
        Ok(true)
    }
}

/// Realize one collected resource and apply the collector's attributes.
///
/// Realization triggers pending-override application, exactly once per
/// virtual-to-real transition.
fn realize_and_apply(
    catalog: &mut Catalog,
    overrides: &mut OverrideQueue,
    index: ResourceIndex,
    attributes: &[(AttributeOp, Rc<Attribute>)],
) -> CompileResult<()> {
    let id = catalog.resource(index).id().clone();
    if catalog.realize(index) {
        overrides.apply_pending(catalog, &id)?;
    }
    if !attributes.is_empty() {
        catalog.resource_mut(index).apply(attributes)?;
    }
    Ok(())
}
