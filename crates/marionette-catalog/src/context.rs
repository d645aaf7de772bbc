//! The evaluation context and its finalize state machine.
//!
//! During the single linear evaluation pass the expression evaluator
//! declares resources into the catalog and records everything that
//! cannot resolve yet: attribute overrides, relationship operands,
//! declared defined-type instances and collectors. `finalize` then
//! drains all of it in a fixed forward order:
//!
//! 1. run every collector (resumable, monotonic cursors),
//! 2. expand pending defined-type instances (which may record any kind
//!    of new work),
//! 3. repeat 1–2 to a fixpoint,
//! 4. check collector coverage,
//! 5. resolve remaining overrides,
//! 6. resolve relationship endpoints into graph edges,
//! 7. build the dependency graph and reject cycles.
//!
//! Execution is single-threaded and strictly sequential; the explicit
//! call stack exists only to bound recursion depth and to give deferred
//! records a backtrace for diagnostics.

use crate::catalog::Catalog;
use crate::collector::Collector;
use crate::definition::{DefinedType, Scope};
use crate::error::{CompileError, CompileResult, ErrorKind, StackFrame};
use crate::graph::Relationship;
use crate::overrides::{Override, OverrideQueue};
use crate::resource::ResourceIndex;
use marionette_foundation::{ResourceRef, Span, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Maximum depth of nested defined-type expansion.
pub const MAX_EVALUATION_DEPTH: usize = 500;

/// A recorded relationship between endpoint values.
///
/// Each endpoint may denote one or many resources; it resolves to
/// concrete resources only at finalize, when everything is declared.
#[derive(Debug, Clone)]
pub struct DeferredRelationship {
    pub kind: Relationship,
    pub source: Rc<Value>,
    pub source_span: Span,
    pub target: Rc<Value>,
    pub target_span: Span,
    backtrace: Vec<StackFrame>,
}

/// A declared defined-type instance awaiting body evaluation.
#[derive(Debug, Clone)]
pub struct DeclaredInstance {
    pub resource: ResourceIndex,
    pub definition: Rc<DefinedType>,
    pub scope: Rc<RefCell<Scope>>,
}

/// The expression evaluator's seam for defined-type body evaluation.
///
/// Expansion runs against the given scope (rooted at the declaring
/// container's scope) and may declare resources and record any kind of
/// deferred work back into the context.
pub trait Expander {
    fn expand(
        &mut self,
        ctx: &mut EvaluationContext,
        resource: ResourceIndex,
        definition: &DefinedType,
        scope: &Rc<RefCell<Scope>>,
    ) -> CompileResult<()>;
}

/// Orchestrates deferred work for one compile.
#[derive(Debug)]
pub struct EvaluationContext {
    catalog: Catalog,
    overrides: OverrideQueue,
    relationships: Vec<DeferredRelationship>,
    declared: Vec<DeclaredInstance>,
    /// Monotonic drain position into `declared`; never moves backward.
    declared_cursor: usize,
    /// Virtual instances wait here until a collector realizes them.
    parked: Vec<DeclaredInstance>,
    collectors: Vec<Collector>,
    stack: Vec<StackFrame>,
    finalized: bool,
}

impl EvaluationContext {
    pub fn new(node: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            catalog: Catalog::new(node, environment),
            overrides: OverrideQueue::new(),
            relationships: Vec::new(),
            declared: Vec::new(),
            declared_cursor: 0,
            parked: Vec::new(),
            collectors: Vec::new(),
            stack: Vec::new(),
            finalized: false,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Consume the context, keeping only the finished catalog.
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    pub fn collectors(&self) -> &[Collector] {
        &self.collectors
    }

    /// Declare a resource and apply any overrides already queued for it.
    ///
    /// Overrides queued against a virtual resource stay queued until it
    /// is realized.
    pub fn declare(
        &mut self,
        id: ResourceRef,
        container: Option<ResourceIndex>,
        span: Option<Span>,
        virtualized: bool,
        exported: bool,
    ) -> CompileResult<ResourceIndex> {
        let index = self.catalog.add(id.clone(), container, span, virtualized, exported)?;
        if !self.catalog.resource(index).is_virtual() {
            self.overrides.apply_pending(&mut self.catalog, &id)?;
        }
        Ok(index)
    }

    /// Record a relationship for resolution at finalize.
    pub fn add_relationship(
        &mut self,
        kind: Relationship,
        source: Rc<Value>,
        source_span: Span,
        target: Rc<Value>,
        target_span: Span,
    ) {
        trace!(%kind, "recording relationship");
        self.relationships.push(DeferredRelationship {
            kind,
            source,
            source_span,
            target,
            target_span,
            backtrace: self.stack.clone(),
        });
    }

    /// Record an override; applies immediately if the target exists.
    pub fn add_override(&mut self, record: Override) -> CompileResult<()> {
        let mut record = record;
        record.backtrace = self.stack.clone();
        if let Some(index) = self.catalog.find(&record.target) {
            trace!(target = %record.target, "applying override at record time");
            return self
                .catalog
                .resource_mut(index)
                .apply(&record.operations)
                .map_err(|e| e.with_backtrace(record.backtrace.clone()));
        }
        self.overrides.defer(record);
        Ok(())
    }

    /// Record a defined-type instance for expansion during finalize.
    pub fn add_declared_instance(
        &mut self,
        resource: ResourceIndex,
        definition: Rc<DefinedType>,
        scope: Rc<RefCell<Scope>>,
    ) {
        self.declared.push(DeclaredInstance {
            resource,
            definition,
            scope,
        });
    }

    /// Register a collector.
    pub fn add_collector(&mut self, collector: Collector) {
        self.collectors.push(collector);
    }

    /// Apply every queued override for an identity.
    pub fn evaluate_overrides(&mut self, target: &ResourceRef) -> CompileResult<()> {
        self.overrides.apply_pending(&mut self.catalog, target)
    }

    /// Realize a resource and apply its pending overrides.
    pub fn realize(&mut self, index: ResourceIndex) -> CompileResult<()> {
        let id = self.catalog.resource(index).id().clone();
        if self.catalog.realize(index) {
            self.overrides.apply_pending(&mut self.catalog, &id)?;
        }
        Ok(())
    }

    /// Enter a defined-type or class body.
    ///
    /// Fails with a full backtrace when expansion nests deeper than
    /// [`MAX_EVALUATION_DEPTH`].
    pub fn push_frame(&mut self, name: impl Into<String>, span: Span) -> CompileResult<()> {
        if self.stack.len() >= MAX_EVALUATION_DEPTH {
            return Err(CompileError::new(
                ErrorKind::StackOverflow,
                span,
                format!("evaluation exceeded {MAX_EVALUATION_DEPTH} nested expansions"),
            )
            .with_backtrace(self.stack.clone()));
        }
        self.stack.push(StackFrame {
            name: name.into(),
            span,
        });
        Ok(())
    }

    pub fn pop_frame(&mut self) {
        self.stack.pop();
    }

    /// The current evaluation backtrace.
    pub fn backtrace(&self) -> Vec<StackFrame> {
        self.stack.clone()
    }

    /// Drain all deferred work and build the dependency graph.
    ///
    /// Runs exactly once per compile; any error aborts the compile with
    /// no partial catalog.
    pub fn finalize(&mut self, expander: &mut dyn Expander) -> CompileResult<()> {
        if self.finalized {
            return Err(CompileError::new(
                ErrorKind::Internal,
                Span::zero(0),
                "finalize called twice on one compile",
            ));
        }
        self.finalized = true;

        let mut passes = 0usize;
        loop {
            passes += 1;
            let mut progressed = self.run_collectors()?;
            if self.unpark_realized() {
                progressed = true;
            }
            if self.expand_declared(expander)? {
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        debug!(passes, resources = self.catalog.len(), "finalize fixpoint reached");

        for collector in &self.collectors {
            collector.detect_uncollected()?;
        }

        self.overrides.resolve_remaining(&mut self.catalog)?;
        self.link_relationships()?;
        self.catalog.populate_graph()?;
        self.catalog.detect_cycles()
    }

    /// Run one pass of every collector.
    fn run_collectors(&mut self) -> CompileResult<bool> {
        let EvaluationContext {
            catalog,
            overrides,
            collectors,
            ..
        } = self;
        let mut progressed = false;
        for collector in collectors.iter_mut() {
            if collector.collect(catalog, overrides)? {
                progressed = true;
            }
        }
        Ok(progressed)
    }

    /// Move parked instances whose resources were realized back into
    /// the expansion queue.
    fn unpark_realized(&mut self) -> bool {
        let mut moved = false;
        let mut position = 0;
        while position < self.parked.len() {
            if self.catalog.resource(self.parked[position].resource).is_virtual() {
                position += 1;
            } else {
                let entry = self.parked.remove(position);
                trace!(definition = entry.definition.name(), "unparking realized instance");
                self.declared.push(entry);
                moved = true;
            }
        }
        moved
    }

    /// Expand every pending non-virtual declared instance.
    fn expand_declared(&mut self, expander: &mut dyn Expander) -> CompileResult<bool> {
        let mut progressed = false;
        while self.declared_cursor < self.declared.len() {
            let entry = self.declared[self.declared_cursor].clone();
            self.declared_cursor += 1;

            if self.catalog.resource(entry.resource).is_virtual() {
                self.parked.push(entry);
                continue;
            }

            let resource = self.catalog.resource(entry.resource);
            let span = resource.span().unwrap_or_else(|| entry.definition.span());
            debug!(
                definition = entry.definition.name(),
                resource = %resource.id(),
                "expanding defined type"
            );

            self.push_frame(entry.definition.name(), span)?;
            let result = expander.expand(self, entry.resource, &entry.definition, &entry.scope);
            self.pop_frame();
            result?;
            progressed = true;
        }
        Ok(progressed)
    }

    /// Resolve relationship endpoint values into graph edges.
    fn link_relationships(&mut self) -> CompileResult<()> {
        let relationships = std::mem::take(&mut self.relationships);
        debug!(count = relationships.len(), "linking relationships");
        for record in relationships {
            let sources =
                self.resolve_endpoint(&record.source, record.source_span, &record.backtrace)?;
            let targets =
                self.resolve_endpoint(&record.target, record.target_span, &record.backtrace)?;
            for &source in &sources {
                for &target in &targets {
                    self.catalog.relate(record.kind, source, target);
                }
            }
        }
        Ok(())
    }

    /// Resolve one endpoint value to concrete resources.
    ///
    /// An empty array resolves to no resources (and thus no edges); any
    /// other value without references is malformed, and a reference to
    /// an undeclared resource is an unresolved-reference error.
    fn resolve_endpoint(
        &self,
        value: &Value,
        span: Span,
        backtrace: &[StackFrame],
    ) -> CompileResult<Vec<ResourceIndex>> {
        let references = value.references();
        if references.is_empty() {
            if matches!(value, Value::Array(a) if a.is_empty()) {
                return Ok(Vec::new());
            }
            return Err(CompileError::new(
                ErrorKind::InvalidRelationship,
                span,
                format!("relationship endpoint '{value}' does not denote a resource"),
            )
            .with_backtrace(backtrace.to_vec()));
        }

        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            let Some(index) = self.catalog.find(reference) else {
                return Err(CompileError::new(
                    ErrorKind::UnresolvedReference,
                    span,
                    format!("cannot create relationship: resource {reference} not found"),
                )
                .with_backtrace(backtrace.to_vec()));
            };
            resolved.push(index);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, AttributeOp};

    fn test_span() -> Span {
        Span::new(0, 0, 0, 1)
    }

    /// An expander for contexts that declare no defined types.
    pub(crate) struct NoExpansion;

    impl Expander for NoExpansion {
        fn expand(
            &mut self,
            _ctx: &mut EvaluationContext,
            _resource: ResourceIndex,
            definition: &DefinedType,
            _scope: &Rc<RefCell<Scope>>,
        ) -> CompileResult<()> {
            panic!("unexpected expansion of {}", definition.name());
        }
    }

    fn assign(name: &str, value: Value) -> (AttributeOp, Rc<Attribute>) {
        (
            AttributeOp::Assign,
            Rc::new(Attribute::new(name, test_span(), Rc::new(value), test_span())),
        )
    }

    #[test]
    fn test_override_applies_at_record_time_when_target_exists() {
        let mut ctx = EvaluationContext::new("node", "production");
        let index = ctx
            .declare(ResourceRef::new("notify", "a"), None, Some(test_span()), false, false)
            .unwrap();
        ctx.add_override(Override {
            target: ResourceRef::new("notify", "a"),
            span: test_span(),
            operations: vec![assign("message", Value::String("now".to_string()))],
            backtrace: Vec::new(),
        })
        .unwrap();
        assert!(ctx.catalog().resource(index).attribute("message").is_some());
    }

    #[test]
    fn test_declare_applies_queued_overrides() {
        let mut ctx = EvaluationContext::new("node", "production");
        ctx.add_override(Override {
            target: ResourceRef::new("notify", "a"),
            span: test_span(),
            operations: vec![assign("message", Value::String("early".to_string()))],
            backtrace: Vec::new(),
        })
        .unwrap();
        let index = ctx
            .declare(ResourceRef::new("notify", "a"), None, Some(test_span()), false, false)
            .unwrap();
        assert_eq!(
            ctx.catalog().resource(index).attribute("message").unwrap().value(),
            &Value::String("early".to_string())
        );
    }

    #[test]
    fn test_virtual_resource_defers_overrides_until_realized() {
        let mut ctx = EvaluationContext::new("node", "production");
        ctx.add_override(Override {
            target: ResourceRef::new("notify", "a"),
            span: test_span(),
            operations: vec![assign("message", Value::String("later".to_string()))],
            backtrace: Vec::new(),
        })
        .unwrap();
        let index = ctx
            .declare(ResourceRef::new("notify", "a"), None, Some(test_span()), true, false)
            .unwrap();
        assert!(ctx.catalog().resource(index).attribute("message").is_none());

        ctx.realize(index).unwrap();
        assert!(ctx.catalog().resource(index).attribute("message").is_some());
    }

    #[test]
    fn test_push_frame_depth_bound() {
        let mut ctx = EvaluationContext::new("node", "production");
        for depth in 0..MAX_EVALUATION_DEPTH {
            ctx.push_frame(format!("level{depth}"), test_span()).unwrap();
        }
        let err = ctx.push_frame("too deep", test_span()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(err.backtrace.len(), MAX_EVALUATION_DEPTH);
    }

    #[test]
    fn test_finalize_runs_once() {
        let mut ctx = EvaluationContext::new("node", "production");
        ctx.finalize(&mut NoExpansion).unwrap();
        let err = ctx.finalize(&mut NoExpansion).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn test_relationship_endpoint_must_denote_resource() {
        let mut ctx = EvaluationContext::new("node", "production");
        ctx.declare(ResourceRef::new("notify", "a"), None, Some(test_span()), false, false)
            .unwrap();
        ctx.add_relationship(
            Relationship::Before,
            Rc::new(Value::Reference(ResourceRef::new("notify", "a"))),
            test_span(),
            Rc::new(Value::Integer(42)),
            test_span(),
        );
        let err = ctx.finalize(&mut NoExpansion).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRelationship);
    }

    #[test]
    fn test_relationship_empty_array_endpoint_is_noop() {
        let mut ctx = EvaluationContext::new("node", "production");
        ctx.declare(ResourceRef::new("notify", "a"), None, Some(test_span()), false, false)
            .unwrap();
        ctx.add_relationship(
            Relationship::Before,
            Rc::new(Value::Reference(ResourceRef::new("notify", "a"))),
            test_span(),
            Rc::new(Value::Array(Vec::new())),
            test_span(),
        );
        ctx.finalize(&mut NoExpansion).unwrap();
        let mut edges = 0;
        ctx.catalog().each_edge(|_, _, _| edges += 1);
        assert_eq!(edges, 0);
    }
}
