//! Definition registry and scopes.
//!
//! The expression evaluator owns class, defined-type and node
//! definitions; the catalog core only needs handles to them so that a
//! declared defined-type instance can be expanded during finalize. The
//! registry here is the lookup seam, and [`Scope`] is the variable
//! environment a body is expanded against — rooted at the scope of the
//! container that declared the instance.

use indexmap::IndexMap;
use marionette_foundation::{Span, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A class or defined-type definition handle.
///
/// The body itself lives with the expression evaluator; the catalog
/// core only carries the qualified name and the definition site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedType {
    name: String,
    span: Span,
}

impl DefinedType {
    pub fn new(name: impl AsRef<str>, span: Span) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            span,
        }
    }

    /// The normalized (lowercase) qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

/// Registry of known classes, defined types and node definitions.
///
/// Names are qualified (`foo::bar`) and matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    classes: IndexMap<String, Rc<DefinedType>>,
    defined_types: IndexMap<String, Rc<DefinedType>>,
    nodes: IndexMap<String, Rc<DefinedType>>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class(&mut self, definition: DefinedType) -> Rc<DefinedType> {
        let definition = Rc::new(definition);
        self.classes
            .insert(definition.name().to_string(), Rc::clone(&definition));
        definition
    }

    pub fn define_defined_type(&mut self, definition: DefinedType) -> Rc<DefinedType> {
        let definition = Rc::new(definition);
        self.defined_types
            .insert(definition.name().to_string(), Rc::clone(&definition));
        definition
    }

    pub fn define_node(&mut self, definition: DefinedType) -> Rc<DefinedType> {
        let definition = Rc::new(definition);
        self.nodes
            .insert(definition.name().to_string(), Rc::clone(&definition));
        definition
    }

    pub fn find_class(&self, name: &str) -> Option<&Rc<DefinedType>> {
        self.classes.get(&name.to_lowercase())
    }

    pub fn find_defined_type(&self, name: &str) -> Option<&Rc<DefinedType>> {
        self.defined_types.get(&name.to_lowercase())
    }

    pub fn find_node(&self, name: &str) -> Option<&Rc<DefinedType>> {
        self.nodes.get(&name.to_lowercase())
    }
}

/// A variable environment with a parent chain.
///
/// Variables are write-once, as the language's assignment semantics
/// require; lookups walk the chain toward the root.
#[derive(Debug, Default)]
pub struct Scope {
    name: String,
    parent: Option<Rc<RefCell<Scope>>>,
    variables: IndexMap<String, Rc<Value>>,
}

impl Scope {
    /// The top scope of a compile.
    pub fn root() -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope::default()))
    }

    /// A child scope for a named body.
    pub fn child(parent: &Rc<RefCell<Scope>>, name: impl Into<String>) -> Rc<RefCell<Scope>> {
        Rc::new(RefCell::new(Scope {
            name: name.into(),
            parent: Some(Rc::clone(parent)),
            variables: IndexMap::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualify a relative variable name against this scope.
    pub fn qualify(&self, name: &str) -> String {
        if self.name.is_empty() || name.contains("::") {
            name.to_string()
        } else {
            format!("{}::{}", self.name, name)
        }
    }

    /// Set a variable; fails (returns false) if already set here.
    pub fn set(&mut self, name: impl Into<String>, value: Rc<Value>) -> bool {
        let name = name.into();
        if self.variables.contains_key(&name) {
            return false;
        }
        self.variables.insert(name, value);
        true
    }

    /// Look up a variable, walking the parent chain.
    pub fn get(&self, name: &str) -> Option<Rc<Value>> {
        if let Some(value) = self.variables.get(name) {
            return Some(Rc::clone(value));
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.borrow().get(name))
    }
}
