//! End-to-end finalize scenarios through the public API.

use marionette_catalog::{
    Attribute, AttributeOp, Collector, CollectorQuery, CompileResult, DefinedType,
    EvaluationContext, Expander, ErrorKind, Override, Relationship, ResourceIndex, ResourceRef,
    Scope, SourceMap, Span, TestOp, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

fn span(line: u32) -> Span {
    Span::new(0, line * 10, line * 10 + 5, line)
}

fn sources() -> SourceMap {
    let mut map = SourceMap::new();
    map.add_file(
        std::path::PathBuf::from("site.mrn"),
        "notify { 'a': }\n".repeat(40),
    );
    map
}

fn assign(name: &str, value: Value) -> (AttributeOp, Rc<Attribute>) {
    (
        AttributeOp::Assign,
        Rc::new(Attribute::new(name, span(1), Rc::new(value), span(1))),
    )
}

fn reference(kind: &str, title: &str) -> Rc<Value> {
    Rc::new(Value::Reference(ResourceRef::new(kind, title)))
}

/// Expander for manifests without defined types.
struct NoExpansion;

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

#[test]
fn test_before_relationship_reverses_edge_direction() {
    let mut ctx = EvaluationContext::new("node", "production");
    ctx.declare(ResourceRef::new("notify", "a"), None, Some(span(1)), false, false)
        .unwrap();
    ctx.declare(ResourceRef::new("notify", "b"), None, Some(span(2)), false, false)
        .unwrap();
    ctx.add_relationship(
        Relationship::Before,
        reference("notify", "a"),
        span(1),
        reference("notify", "b"),
        span(1),
    );
    ctx.finalize(&mut NoExpansion).unwrap();

    let mut edges = Vec::new();
    ctx.catalog().each_edge(|from, to, label| {
        edges.push((from.id().to_string(), to.id().to_string(), label));
    });
    // a before b: b depends on a
    assert_eq!(
        edges,
        vec![("Notify[b]".to_string(), "Notify[a]".to_string(), Relationship::Before)]
    );
}

#[test]
fn test_require_relationship_keeps_edge_direction() {
    let mut ctx = EvaluationContext::new("node", "production");
    ctx.declare(ResourceRef::new("notify", "a"), None, Some(span(1)), false, false)
        .unwrap();
    ctx.declare(ResourceRef::new("notify", "b"), None, Some(span(2)), false, false)
        .unwrap();
    ctx.add_relationship(
        Relationship::Require,
        reference("notify", "a"),
        span(1),
        reference("notify", "b"),
        span(1),
    );
    ctx.finalize(&mut NoExpansion).unwrap();

    let mut edges = Vec::new();
    ctx.catalog().each_edge(|from, to, _| {
        edges.push((from.id().to_string(), to.id().to_string()));
    });
    assert_eq!(edges, vec![("Notify[a]".to_string(), "Notify[b]".to_string())]);
}

#[test]
fn test_array_endpoints_produce_cross_product() {
    let mut ctx = EvaluationContext::new("node", "production");
    for title in ["a", "b", "c", "d"] {
        ctx.declare(ResourceRef::new("notify", title), None, Some(span(1)), false, false)
            .unwrap();
    }
    ctx.add_relationship(
        Relationship::Require,
        Rc::new(Value::Array(vec![
            Value::Reference(ResourceRef::new("notify", "a")),
            Value::Reference(ResourceRef::new("notify", "b")),
        ])),
        span(1),
        Rc::new(Value::Array(vec![
            Value::Reference(ResourceRef::new("notify", "c")),
            Value::Reference(ResourceRef::new("notify", "d")),
        ])),
        span(1),
    );
    ctx.finalize(&mut NoExpansion).unwrap();

    let mut edges = 0;
    ctx.catalog().each_edge(|_, _, _| edges += 1);
    assert_eq!(edges, 4);
}

#[test]
fn test_query_collector_realizes_virtual_resource() {
    let mut ctx = EvaluationContext::new("node", "production");
    let a = ctx
        .declare(ResourceRef::new("notify", "a"), None, Some(span(3)), true, false)
        .unwrap();
    ctx.declare(ResourceRef::new("notify", "b"), None, Some(span(4)), true, false)
        .unwrap();
    ctx.add_collector(Collector::query(
        "Notify",
        false,
        Some(CollectorQuery::test(
            "title",
            TestOp::Eq,
            Rc::new(Value::String("a".to_string())),
            span(5),
        )),
    ));
    ctx.finalize(&mut NoExpansion).unwrap();

    assert!(!ctx.catalog().resource(a).is_virtual());
    let doc = ctx.catalog().write(&sources());
    let resources = doc["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["title"], "a");
}

#[test]
fn test_collector_attributes_apply_to_matches() {
    let mut ctx = EvaluationContext::new("node", "production");
    let a = ctx
        .declare(ResourceRef::new("notify", "a"), None, Some(span(3)), true, false)
        .unwrap();
    ctx.add_collector(
        Collector::query("notify", false, None)
            .with_attributes(vec![assign("message", Value::String("patched".to_string()))]),
    );
    ctx.finalize(&mut NoExpansion).unwrap();

    assert_eq!(
        ctx.catalog().resource(a).attribute("message").unwrap().value(),
        &Value::String("patched".to_string())
    );
}

#[test]
fn test_exported_collector_skips_local_virtual() {
    let mut ctx = EvaluationContext::new("node", "production");
    let local = ctx
        .declare(ResourceRef::new("notify", "local"), None, Some(span(3)), true, false)
        .unwrap();
    let exported = ctx
        .declare(ResourceRef::new("notify", "shared"), None, Some(span(4)), false, true)
        .unwrap();
    assert!(ctx.catalog().resource(exported).is_virtual());

    ctx.add_collector(Collector::query("notify", true, None));
    ctx.finalize(&mut NoExpansion).unwrap();

    assert!(ctx.catalog().resource(local).is_virtual());
    assert!(!ctx.catalog().resource(exported).is_virtual());
    let doc = ctx.catalog().write(&sources());
    let resources = doc["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["exported"], true);
}

#[test]
fn test_override_of_undeclared_resource_fails() {
    let mut ctx = EvaluationContext::new("node", "production");
    ctx.add_override(Override {
        target: ResourceRef::new("notify", "ghost"),
        span: span(7),
        operations: vec![assign("message", Value::String("boo".to_string()))],
        backtrace: Vec::new(),
    })
    .unwrap();
    let err = ctx.finalize(&mut NoExpansion).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedReference);
    assert_eq!(err.span, span(7));
}

#[test]
fn test_list_collector_reports_missing_resource() {
    let mut ctx = EvaluationContext::new("node", "production");
    ctx.add_collector(Collector::list(
        vec![(ResourceRef::new("notify", "missing"), span(9))],
        Vec::new(),
    ));
    let err = ctx.finalize(&mut NoExpansion).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnresolvedReference);
    assert!(err.message.contains("Notify[missing]"));
}

#[test]
fn test_cycle_detection_names_the_chain() {
    let mut ctx = EvaluationContext::new("node", "production");
    ctx.declare(ResourceRef::new("notify", "a"), None, Some(span(1)), false, false)
        .unwrap();
    ctx.declare(ResourceRef::new("notify", "b"), None, Some(span(2)), false, false)
        .unwrap();
    ctx.add_relationship(
        Relationship::Require,
        reference("notify", "a"),
        span(1),
        reference("notify", "b"),
        span(1),
    );
    ctx.add_relationship(
        Relationship::Require,
        reference("notify", "b"),
        span(2),
        reference("notify", "a"),
        span(2),
    );
    let err = ctx.finalize(&mut NoExpansion).unwrap_err();
    assert_eq!(err.kind, ErrorKind::CyclicDependency);
    assert!(err.message.contains("Notify[a]"));
    assert!(err.message.contains("Notify[b]"));
}

/// Expands `webstack` instances into a virtual worker plus the
/// collector that realizes it, forcing a second fixpoint pass.
struct WebstackExpander;

impl Expander for WebstackExpander {
    fn expand(
        &mut self,
        ctx: &mut EvaluationContext,
        resource: ResourceIndex,
        _definition: &DefinedType,
        _scope: &Rc<RefCell<Scope>>,
    ) -> CompileResult<()> {
        let title = ctx.catalog().resource(resource).id().title().to_string();
        ctx.declare(
            ResourceRef::new("notify", format!("{title}-worker")),
            Some(resource),
            Some(span(20)),
            true,
            false,
        )?;
        ctx.add_collector(Collector::query(
            "notify",
            false,
            Some(CollectorQuery::test(
                "title",
                TestOp::Eq,
                Rc::new(Value::String(format!("{title}-worker"))),
                span(21),
            )),
        ));
        Ok(())
    }
}

#[test]
fn test_expansion_work_feeds_back_into_fixpoint() {
    let mut ctx = EvaluationContext::new("node", "production");
    let definition = Rc::new(DefinedType::new("webstack", span(10)));
    let instance = ctx
        .declare(ResourceRef::new("webstack", "main"), None, Some(span(11)), false, false)
        .unwrap();
    ctx.add_declared_instance(instance, definition, Scope::root());
    ctx.finalize(&mut WebstackExpander).unwrap();

    let worker = ctx
        .catalog()
        .find(&ResourceRef::new("notify", "main-worker"))
        .unwrap();
    assert!(!ctx.catalog().resource(worker).is_virtual());
    // the worker inherits its container's tags
    let tags = ctx.catalog().calculate_tags(worker);
    assert!(tags.iter().any(|t| t == "webstack"));
    assert!(tags.iter().any(|t| t == "main"));
}

/// Simulates inline class evaluation that never bottoms out.
struct RunawayExpander;

impl Expander for RunawayExpander {
    fn expand(
        &mut self,
        ctx: &mut EvaluationContext,
        resource: ResourceIndex,
        definition: &DefinedType,
        scope: &Rc<RefCell<Scope>>,
    ) -> CompileResult<()> {
        ctx.push_frame(definition.name(), span(30))?;
        let result = self.expand(ctx, resource, definition, scope);
        ctx.pop_frame();
        result
    }
}

#[test]
fn test_runaway_expansion_hits_depth_bound() {
    let mut ctx = EvaluationContext::new("node", "production");
    let definition = Rc::new(DefinedType::new("looper", span(10)));
    let instance = ctx
        .declare(ResourceRef::new("looper", "x"), None, Some(span(11)), false, false)
        .unwrap();
    ctx.add_declared_instance(instance, definition, Scope::root());
    let err = ctx.finalize(&mut RunawayExpander).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
    assert!(!err.backtrace.is_empty());
}

#[test]
fn test_metaparameter_relationships_reach_the_graph() {
    let mut ctx = EvaluationContext::new("node", "production");
    let a = ctx
        .declare(ResourceRef::new("notify", "a"), None, Some(span(1)), false, false)
        .unwrap();
    ctx.declare(ResourceRef::new("notify", "b"), None, Some(span(2)), false, false)
        .unwrap();
    ctx.catalog_mut()
        .resource_mut(a)
        .set(
            Rc::new(Attribute::new(
                "notify",
                span(1),
                reference("notify", "b"),
                span(1),
            )),
            false,
        )
        .unwrap();
    ctx.finalize(&mut NoExpansion).unwrap();

    let mut edges = Vec::new();
    ctx.catalog().each_edge(|from, to, label| {
        edges.push((from.id().to_string(), to.id().to_string(), label));
    });
    // a notifies b: b depends on a
    assert_eq!(
        edges,
        vec![("Notify[b]".to_string(), "Notify[a]".to_string(), Relationship::Notify)]
    );
}

#[test]
fn test_full_document_round_through_finalize() {
    let mut ctx = EvaluationContext::new("web01", "production");
    let class = ctx
        .declare(ResourceRef::new("class", "apache"), None, Some(span(1)), false, false)
        .unwrap();
    let vhost = ctx
        .declare(
            ResourceRef::new("apache::vhost", "main"),
            Some(class),
            Some(span(2)),
            false,
            false,
        )
        .unwrap();
    ctx.catalog_mut()
        .resource_mut(vhost)
        .set(
            Rc::new(Attribute::new(
                "port",
                span(2),
                Rc::new(Value::Integer(8080)),
                span(2),
            )),
            false,
        )
        .unwrap();
    ctx.finalize(&mut NoExpansion).unwrap();

    let doc = ctx.catalog().write(&sources());
    assert_eq!(doc["name"], "web01");
    assert_eq!(doc["classes"].as_array().unwrap().len(), 1);
    let resources = doc["resources"].as_array().unwrap();
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[1]["type"], "Apache::Vhost");
    assert_eq!(resources[1]["parameters"]["port"], 8080);
    // containment shows up as an edge
    let edges = doc["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["relationship"], "contains");
}
