//! The resource catalog.
//!
//! The catalog owns all resources declared for one node, the identity
//! and per-type indexes over them, and the dependency graph. Resources
//! live in an append-only arena: insertion never invalidates an existing
//! [`ResourceIndex`], which the whole deferred-resolution machinery
//! relies on — collector result lists, override targets and stack-frame
//! links all hold indexes across the entire finalize drain.

use crate::error::{CompileError, CompileResult, ErrorKind};
use crate::graph::{DependencyGraph, Relationship};
use crate::resource::{Resource, ResourceIndex};
use indexmap::{IndexMap, IndexSet};
use marionette_foundation::{ResourceRef, Span, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// The compiled resource store and dependency graph for one node.
#[derive(Debug, Clone)]
pub struct Catalog {
    node: String,
    environment: String,
    /// Compile timestamp, written into catalog output.
    version: String,
    /// Append-only arena; vertex ids coincide with arena positions.
    resources: Vec<Resource>,
    index: IndexMap<ResourceRef, ResourceIndex>,
    /// Declaration-ordered resource indexes per normalized type name.
    by_type: IndexMap<String, Vec<ResourceIndex>>,
    graph: DependencyGraph,
}

impl Catalog {
    pub fn new(node: impl Into<String>, environment: impl Into<String>) -> Self {
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| "0".to_string());
        Self {
            node: node.into(),
            environment: environment.into(),
            version,
            resources: Vec::new(),
            index: IndexMap::new(),
            by_type: IndexMap::new(),
            graph: DependencyGraph::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, index: ResourceIndex) -> &Resource {
        &self.resources[index.0]
    }

    pub fn resource_mut(&mut self, index: ResourceIndex) -> &mut Resource {
        &mut self.resources[index.0]
    }

    pub(crate) fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Declare a resource.
    ///
    /// Fails with [`ErrorKind::DuplicateResource`] if the identity is
    /// already taken, citing both declaration sites. On success the
    /// resource is inserted into the arena, assigned the next graph
    /// vertex, and indexed by identity and by type name.
    pub fn add(
        &mut self,
        id: ResourceRef,
        container: Option<ResourceIndex>,
        span: Option<Span>,
        virtualized: bool,
        exported: bool,
    ) -> CompileResult<ResourceIndex> {
        if let Some(&existing) = self.index.get(&id) {
            let mut error = CompileError::new(
                ErrorKind::DuplicateResource,
                span.unwrap_or_else(|| Span::zero(0)),
                format!("resource {id} already declared"),
            );
            if let Some(first) = self.resources[existing.0].span() {
                error = error.with_label(first, "first declared here");
            }
            return Err(error);
        }

        let vertex = self.graph.add_vertex();
        let index = ResourceIndex(self.resources.len());
        debug_assert_eq!(vertex, index.0);
        trace!(resource = %id, ?index, "declared resource");

        self.by_type
            .entry(id.kind().to_string())
            .or_default()
            .push(index);
        self.index.insert(id.clone(), index);
        self.resources
            .push(Resource::new(id, vertex, container, span, virtualized, exported));
        Ok(index)
    }

    /// Look up a resource by identity.
    pub fn find(&self, id: &ResourceRef) -> Option<ResourceIndex> {
        self.index.get(id).copied()
    }

    /// Restartable iteration over resources.
    ///
    /// Visits resources in declaration order, filtered by normalized
    /// type name if given, starting at `offset` (a position in the
    /// visited sequence, not an arena index). Returns the offset just
    /// past the last visited entry, so a worklist can resume exactly
    /// where it stopped even when new resources were appended
    /// mid-iteration. The callback returns `false` to stop early.
    pub fn each<F>(&self, type_filter: Option<&str>, offset: usize, mut callback: F) -> usize
    where
        F: FnMut(ResourceIndex, &Resource) -> bool,
    {
        match type_filter {
            Some(kind) => {
                let Some(indexes) = self.by_type.get(kind) else {
                    return offset;
                };
                let mut position = offset;
                while position < indexes.len() {
                    let index = indexes[position];
                    position += 1;
                    if !callback(index, &self.resources[index.0]) {
                        break;
                    }
                }
                position
            }
            None => {
                let mut position = offset;
                while position < self.resources.len() {
                    let index = ResourceIndex(position);
                    position += 1;
                    if !callback(index, &self.resources[index.0]) {
                        break;
                    }
                }
                position
            }
        }
    }

    /// Insert a dependency edge for a declared relationship.
    ///
    /// `require`/`subscribe`/`contains` store the edge source → target;
    /// `before`/`notify` store it reversed, because the declaring
    /// resource asserts it precedes the target, meaning the target
    /// depends on the declarer.
    pub fn relate(&mut self, kind: Relationship, source: ResourceIndex, target: ResourceIndex) {
        let (from, to) = if kind.inverted() {
            (target, source)
        } else {
            (source, target)
        };
        trace!(
            from = %self.resources[from.0].id(),
            to = %self.resources[to.0].id(),
            %kind,
            "relate"
        );
        self.graph
            .add_edge(self.resources[from.0].vertex(), self.resources[to.0].vertex(), kind);
    }

    /// Iterate all dependency edges as (from, to, label) resources.
    pub fn each_edge<F>(&self, mut callback: F)
    where
        F: FnMut(&Resource, &Resource, Relationship),
    {
        for (from, to, label) in self.graph.edges() {
            callback(&self.resources[from], &self.resources[to], label);
        }
    }

    /// Clear a resource's virtual flag.
    ///
    /// Idempotent; returns whether this call performed the transition,
    /// so the caller can apply pending overrides exactly once.
    pub fn realize(&mut self, index: ResourceIndex) -> bool {
        let realized = self.resources[index.0].realize();
        if realized {
            trace!(resource = %self.resources[index.0].id(), "realized");
        }
        realized
    }

    /// The full tag set of a resource.
    ///
    /// Explicit tags plus the type name and title of the resource and of
    /// every container ancestor, deduplicated in first-seen order.
    pub fn calculate_tags(&self, index: ResourceIndex) -> Vec<String> {
        let mut tags: IndexSet<&str> = IndexSet::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            let resource = &self.resources[idx.0];
            for tag in resource.tags() {
                tags.insert(tag.as_str());
            }
            tags.insert(resource.id().kind());
            tags.insert(resource.id().title());
            current = resource.container();
        }
        tags.into_iter().map(String::from).collect()
    }

    /// Build the dependency graph from relationship metaparameters.
    ///
    /// For every resource, each relationship metaparameter value (a
    /// single reference or a collection) produces one edge per denoted
    /// resource, and the containment link produces a `contains` edge.
    /// Unresolvable references are hard errors citing the attribute.
    pub fn populate_graph(&mut self) -> CompileResult<()> {
        let mut edges: Vec<(Relationship, ResourceIndex, ResourceIndex)> = Vec::new();

        for (position, resource) in self.resources.iter().enumerate() {
            let source = ResourceIndex(position);
            if let Some(container) = resource.container() {
                edges.push((Relationship::Contains, source, container));
            }

            for name in Relationship::METAPARAMETERS {
                let Some(attribute) = resource.attribute(name) else {
                    continue;
                };
                let kind = Relationship::from_metaparameter(name)
                    .expect("metaparameter list entries are relationships");
                let value = attribute.value();
                if value.is_undef() {
                    continue;
                }
                let references = value.references();
                if references.is_empty() && !matches!(value, Value::Array(a) if a.is_empty()) {
                    return Err(CompileError::new(
                        ErrorKind::InvalidRelationship,
                        attribute.value_span(),
                        format!(
                            "attribute '{}' of {} does not denote a resource",
                            name,
                            resource.id()
                        ),
                    ));
                }
                for reference in references {
                    let Some(target) = self.find(reference) else {
                        return Err(CompileError::new(
                            ErrorKind::UnresolvedReference,
                            attribute.value_span(),
                            format!(
                                "cannot create relationship from {}: resource {} not found",
                                resource.id(),
                                reference
                            ),
                        ));
                    };
                    edges.push((kind, source, target));
                }
            }
        }

        debug!(edges = edges.len(), "populating dependency graph");
        for (kind, source, target) in edges {
            self.relate(kind, source, target);
        }
        Ok(())
    }

    /// Fail if the dependency graph contains a cycle.
    ///
    /// Must run only after `populate_graph` and after all deferred
    /// relationships and overrides are applied; edges recorded later can
    /// both create and break cycles. The error reports the full cycle as
    /// an ordered chain of identities.
    pub fn detect_cycles(&self) -> CompileResult<()> {
        let Some(cycle) = self.graph.find_cycle() else {
            debug!(
                vertices = self.graph.vertex_count(),
                edges = self.graph.edge_count(),
                "dependency graph is acyclic"
            );
            return Ok(());
        };

        let chain = cycle
            .iter()
            .map(|&vertex| self.resources[vertex].id().to_string())
            .collect::<Vec<_>>()
            .join(" → ");

        let first = &self.resources[cycle[0]];
        let mut error = CompileError::new(
            ErrorKind::CyclicDependency,
            first.span().unwrap_or_else(|| Span::zero(0)),
            format!("dependency cycle detected: {chain}"),
        );
        for (step, &vertex) in cycle.iter().enumerate() {
            let Some(span) = self.resources[vertex].span() else {
                continue;
            };
            if step == 0 {
                error = error.with_label(span, "cycle starts here");
            } else if step == cycle.len() - 1 {
                error = error.with_label(span, "cycle completes here");
            } else {
                error = error.with_label(
                    span,
                    format!("depends on {}", self.resources[cycle[step + 1]].id()),
                );
            }
        }
        Err(error)
    }
}
