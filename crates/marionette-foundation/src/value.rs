//! The attribute value model.
//!
//! Manifest expressions evaluate to [`Value`]s before they are attached
//! to resources, so the catalog core never sees raw AST. Values are
//! shared by handle (`Rc<Value>`) between declaration sites, overrides
//! and defaults; the catalog only ever replaces handles, never mutates a
//! shared value in place.
//!
//! [`ResourceRef`] is the identity half of the model: the `Type[title]`
//! pair used to key resources, target overrides and express
//! relationship endpoints.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource identity: type name plus title.
///
/// Type names compare case-insensitively and are stored normalized to
/// lowercase; titles compare exactly. Rendered as `Type[title]` with
/// each `::` segment capitalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    kind: String,
    title: String,
}

impl ResourceRef {
    pub fn new(kind: impl AsRef<str>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.as_ref().to_lowercase(),
            title: title.into(),
        }
    }

    /// The normalized (lowercase) type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The type name as rendered in output: `foo::bar` becomes `Foo::Bar`.
    pub fn display_kind(&self) -> String {
        capitalize_type_name(&self.kind)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.display_kind(), self.title)
    }
}

/// Capitalize each `::` segment of a type name.
pub fn capitalize_type_name(name: &str) -> String {
    name.split("::")
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("::")
}

/// A compiled regular expression carried as a value.
///
/// Equality is over the pattern text; `regex::Regex` itself does not
/// implement `PartialEq`.
#[derive(Debug, Clone)]
pub struct ValueRegex(Regex);

impl ValueRegex {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(Regex::new(pattern)?))
    }

    pub fn pattern(&self) -> &str {
        self.0.as_str()
    }

    /// Unanchored search; query predicates bind no captures.
    pub fn search(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }
}

impl PartialEq for ValueRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern() == other.pattern()
    }
}

/// A manifest value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undef,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Regex(ValueRegex),
    Reference(ResourceRef),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Every resource reference this value denotes.
    ///
    /// A single reference denotes itself; an array denotes each element's
    /// references in order. Other values denote nothing.
    pub fn references(&self) -> Vec<&ResourceRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a ResourceRef>) {
        match self {
            Value::Reference(reference) => refs.push(reference),
            Value::Array(elements) => {
                for element in elements {
                    element.collect_references(refs);
                }
            }
            _ => {}
        }
    }

    /// Equality as used by collector query predicates.
    ///
    /// String comparison is case-insensitive, matching type-name
    /// comparison elsewhere. A regex on either side searches the other
    /// side's string form. Integers and floats compare numerically.
    /// Arrays and hashes compare element-wise with the same rules.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            (Value::Regex(re), Value::String(s)) | (Value::String(s), Value::Regex(re)) => {
                re.search(s)
            }
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.loose_eq(kb) && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Convert to the JSON representation used in catalog output.
    ///
    /// References render as `Type[title]` strings and regexes as their
    /// pattern text, which is how they round-trip through catalogs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undef => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Regex(re) => serde_json::Value::String(re.pattern().to_string()),
            Value::Reference(reference) => serde_json::Value::String(reference.to_string()),
            Value::Array(elements) => {
                serde_json::Value::Array(elements.iter().map(Value::to_json).collect())
            }
            Value::Hash(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match key {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    map.insert(key, value.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undef => write!(f, "undef"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Regex(re) => write!(f, "/{}/", re.pattern()),
            Value::Reference(reference) => write!(f, "{reference}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Hash(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key} => {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
