//! The dependency graph.
//!
//! Vertices are assigned by the catalog when resources are inserted and
//! never reused. An edge `a → b` always means "a depends on b"; the
//! translation from declared relationships to that convention happens
//! in [`Catalog::relate`](crate::catalog::Catalog::relate), not here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relationship kind labeling a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Contains,
    Before,
    Require,
    Notify,
    Subscribe,
}

impl Relationship {
    /// Relationship metaparameter names, in evaluation order.
    pub const METAPARAMETERS: [&'static str; 4] = ["before", "require", "notify", "subscribe"];

    /// Look up the relationship for a metaparameter name.
    pub fn from_metaparameter(name: &str) -> Option<Relationship> {
        match name {
            "before" => Some(Relationship::Before),
            "require" => Some(Relationship::Require),
            "notify" => Some(Relationship::Notify),
            "subscribe" => Some(Relationship::Subscribe),
            _ => None,
        }
    }

    /// Whether the stored edge runs opposite to the declaration.
    ///
    /// `before`/`notify` assert "I precede the target": in dependency
    /// terms the target depends on the declarer, so the edge is stored
    /// target → source. `require`/`subscribe`/`contains` store the edge
    /// as declared. This convention must not be re-derived; an inverted
    /// direction silently corrupts apply ordering.
    pub fn inverted(self) -> bool {
        matches!(self, Relationship::Before | Relationship::Notify)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Relationship::Contains => "contains",
            Relationship::Before => "before",
            Relationship::Require => "require",
            Relationship::Notify => "notify",
            Relationship::Subscribe => "subscribe",
        };
        write!(f, "{name}")
    }
}

/// Directed graph over catalog vertices with labeled edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// adjacency[v] lists (target, label) pairs for edges out of v.
    adjacency: Vec<Vec<(usize, Relationship)>>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next vertex id.
    pub fn add_vertex(&mut self) -> usize {
        self.adjacency.push(Vec::new());
        self.adjacency.len() - 1
    }

    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Insert an edge; duplicate (from, to, label) triples are ignored.
    pub fn add_edge(&mut self, from: usize, to: usize, label: Relationship) {
        let out = &mut self.adjacency[from];
        if !out.contains(&(to, label)) {
            out.push((to, label));
            self.edge_count += 1;
        }
    }

    /// All edges as (from, to, label), in insertion order per vertex.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, Relationship)> + '_ {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(from, out)| out.iter().map(move |&(to, label)| (from, to, label)))
    }

    /// Find one cycle, if any.
    ///
    /// Returns the cycle as a vertex path with the starting vertex
    /// repeated at the end, e.g. `[a, b, a]`.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Active,
            Done,
        }

        let mut state = vec![State::Unvisited; self.adjacency.len()];
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.adjacency.len() {
            if state[start] != State::Unvisited {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            state[start] = State::Active;
            path.push(start);

            while let Some(frame) = stack.last_mut() {
                let (vertex, next) = (frame.0, frame.1);
                if next < self.adjacency[vertex].len() {
                    frame.1 += 1;
                    let (to, _) = self.adjacency[vertex][next];
                    match state[to] {
                        State::Unvisited => {
                            state[to] = State::Active;
                            path.push(to);
                            stack.push((to, 0));
                        }
                        State::Active => {
                            // Back edge: the cycle is the path suffix from
                            // the first occurrence of `to`.
                            let pos = path
                                .iter()
                                .position(|&v| v == to)
                                .expect("active vertices are on the current path");
                            let mut cycle = path[pos..].to_vec();
                            cycle.push(to);
                            return Some(cycle);
                        }
                        State::Done => {}
                    }
                } else {
                    state[vertex] = State::Done;
                    path.pop();
                    stack.pop();
                }
            }
        }
        None
    }
}
