//! Catalog output.
//!
//! Two renderings of a finished catalog: the JSON document handed to an
//! agent, and a DOT digraph of the dependency graph for inspection.

use crate::catalog::Catalog;
use crate::graph::Relationship;
use marionette_foundation::SourceMap;
use serde_json::{Map, Value as Json, json};
use std::fmt::Write as _;

impl Catalog {
    /// Render the catalog as its JSON document.
    ///
    /// Virtual resources and edges touching them are omitted; a virtual
    /// resource never made it into the catalog as far as an agent is
    /// concerned. `classes` lists the titles of realized class
    /// resources. Relationship metaparameters are not parameters and
    /// are excluded; their effect already lives in `edges`.
    pub fn write(&self, sources: &SourceMap) -> Json {
        let mut classes = Vec::new();
        self.each(Some("class"), 0, |_, resource| {
            if !resource.is_virtual() {
                classes.push(Json::String(resource.id().title().to_string()));
            }
            true
        });

        let mut resources = Vec::new();
        self.each(None, 0, |index, resource| {
            if resource.is_virtual() {
                return true;
            }
            let mut entry = Map::new();
            entry.insert("type".to_string(), json!(resource.id().display_kind()));
            entry.insert("title".to_string(), json!(resource.id().title()));
            entry.insert("exported".to_string(), json!(resource.is_exported()));
            entry.insert("tags".to_string(), json!(self.calculate_tags(index)));
            if let Some(span) = resource.span() {
                entry.insert("file".to_string(), json!(sources.path(&span).display().to_string()));
                entry.insert("line".to_string(), json!(span.line));
            }
            let mut parameters = Map::new();
            for (name, attribute) in resource.attributes() {
                if Relationship::METAPARAMETERS.contains(&name) {
                    continue;
                }
                parameters.insert(name.to_string(), attribute.value().to_json());
            }
            if !parameters.is_empty() {
                entry.insert("parameters".to_string(), Json::Object(parameters));
            }
            resources.push(Json::Object(entry));
            true
        });

        let mut edges = Vec::new();
        self.each_edge(|from, to, label| {
            if from.is_virtual() || to.is_virtual() {
                return;
            }
            edges.push(json!({
                "source": from.id().to_string(),
                "target": to.id().to_string(),
                "relationship": label.to_string(),
            }));
        });

        json!({
            "name": self.node(),
            "environment": self.environment(),
            "version": self.version(),
            "classes": classes,
            "resources": resources,
            "edges": edges,
        })
    }

    /// Render the dependency graph in DOT format.
    pub fn write_graph(&self) -> String {
        let mut out = String::from("digraph catalog {\n");
        self.each(None, 0, |_, resource| {
            let _ = writeln!(out, "    \"{}\";", resource.id());
            true
        });
        self.each_edge(|from, to, label| {
            let _ = writeln!(out, "    \"{}\" -> \"{}\" [label=\"{label}\"];", from.id(), to.id());
        });
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use marionette_foundation::{ResourceRef, Span, Value};
    use std::rc::Rc;

    fn test_span() -> Span {
        Span::new(0, 0, 4, 3)
    }

    fn sources() -> SourceMap {
        let mut map = SourceMap::new();
        map.add_file(
            std::path::PathBuf::from("site.mrn"),
            "\n\nnotify { 'a': }\n".to_string(),
        );
        map
    }

    fn sample_catalog() -> Catalog {
        let mut c = Catalog::new("web01", "production");
        let a = c
            .add(ResourceRef::new("notify", "a"), None, Some(test_span()), false, false)
            .unwrap();
        c.resource_mut(a)
            .set(
                Rc::new(Attribute::new(
                    "message",
                    test_span(),
                    Rc::new(Value::String("hello".to_string())),
                    test_span(),
                )),
                false,
            )
            .unwrap();
        let b = c
            .add(ResourceRef::new("notify", "b"), None, Some(test_span()), false, false)
            .unwrap();
        c.relate(crate::graph::Relationship::Require, b, a);
        c
    }

    #[test]
    fn test_write_document_shape() {
        let c = sample_catalog();
        let doc = c.write(&sources());
        assert_eq!(doc["name"], "web01");
        assert_eq!(doc["environment"], "production");
        let resources = doc["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["type"], "Notify");
        assert_eq!(resources[0]["title"], "a");
        assert_eq!(resources[0]["line"], 3);
        assert_eq!(resources[0]["parameters"]["message"], "hello");
        let edges = doc["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["source"], "Notify[b]");
        assert_eq!(edges[0]["target"], "Notify[a]");
        assert_eq!(edges[0]["relationship"], "require");
    }

    #[test]
    fn test_write_skips_virtual_resources_and_their_edges() {
        let mut c = Catalog::new("web01", "production");
        let a = c
            .add(ResourceRef::new("notify", "a"), None, Some(test_span()), true, false)
            .unwrap();
        let b = c
            .add(ResourceRef::new("notify", "b"), None, Some(test_span()), false, false)
            .unwrap();
        c.relate(crate::graph::Relationship::Require, b, a);
        let doc = c.write(&sources());
        assert_eq!(doc["resources"].as_array().unwrap().len(), 1);
        assert!(doc["edges"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_write_excludes_relationship_metaparameters() {
        let mut c = sample_catalog();
        let b = c.find(&ResourceRef::new("notify", "b")).unwrap();
        c.resource_mut(b)
            .set(
                Rc::new(Attribute::new(
                    "require",
                    test_span(),
                    Rc::new(Value::Reference(ResourceRef::new("notify", "a"))),
                    test_span(),
                )),
                false,
            )
            .unwrap();
        let doc = c.write(&sources());
        let resources = doc["resources"].as_array().unwrap();
        assert!(resources[1].get("parameters").is_none());
    }

    #[test]
    fn test_write_lists_realized_classes() {
        let mut c = Catalog::new("web01", "production");
        c.add(ResourceRef::new("class", "apache"), None, Some(test_span()), false, false)
            .unwrap();
        c.add(ResourceRef::new("class", "ntp"), None, Some(test_span()), true, false)
            .unwrap();
        let doc = c.write(&sources());
        assert_eq!(doc["classes"], json!(["apache"]));
    }

    #[test]
    fn test_write_graph_dot() {
        let c = sample_catalog();
        let dot = c.write_graph();
        assert!(dot.starts_with("digraph catalog {"));
        assert!(dot.contains("\"Notify[a]\";"));
        assert!(dot.contains("\"Notify[b]\" -> \"Notify[a]\" [label=\"require\"];"));
        assert!(dot.ends_with("}\n"));
    }
}
