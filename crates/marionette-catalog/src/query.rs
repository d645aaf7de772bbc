//! Collector query predicates.
//!
//! A query collector's predicate arrives from the parser as a first
//! operand plus a flat list of `(and|or, operand)` pairs, mirroring how
//! binary operator chains are recorded before precedence is applied.
//! Evaluation runs precedence climbing directly over that list: `and`
//! binds tighter than `or`, both left-associative — the same scheme the
//! expression evaluator uses for general binary operators.

use crate::catalog::Catalog;
use crate::resource::ResourceIndex;
use marionette_foundation::{Span, Value};
use std::rc::Rc;

/// Boolean combinator between query operands.
///
/// Higher precedence binds tighter; both combinators are left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    Or,
    And,
}

impl BoolOp {
    fn precedence(self) -> u8 {
        match self {
            BoolOp::Or => 10,
            BoolOp::And => 20,
        }
    }
}

/// Attribute comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOp {
    Eq,
    Ne,
}

/// A single attribute (in)equality test.
///
/// `title` compares the resource title and `tag` the computed tag set;
/// any other name compares the attribute's value, with a missing
/// attribute reading as undef.
#[derive(Debug, Clone)]
pub struct AttributeTest {
    pub name: String,
    pub op: TestOp,
    pub value: Rc<Value>,
    pub span: Span,
}

/// One operand of a query: a test or a parenthesized subquery.
#[derive(Debug, Clone)]
pub enum QueryOperand {
    Test(AttributeTest),
    Group(Box<CollectorQuery>),
}

/// A collector query as recorded by the parser.
#[derive(Debug, Clone)]
pub struct CollectorQuery {
    first: QueryOperand,
    rest: Vec<(BoolOp, QueryOperand)>,
}

impl CollectorQuery {
    pub fn new(first: QueryOperand) -> Self {
        Self {
            first,
            rest: Vec::new(),
        }
    }

    /// Convenience constructor for a single-test query.
    pub fn test(name: impl Into<String>, op: TestOp, value: Rc<Value>, span: Span) -> Self {
        Self::new(QueryOperand::Test(AttributeTest {
            name: name.into(),
            op,
            value,
            span,
        }))
    }

    /// Append a combinator and operand to the flat list.
    pub fn then(mut self, op: BoolOp, operand: QueryOperand) -> Self {
        self.rest.push((op, operand));
        self
    }

    /// Evaluate the query against one resource.
    pub fn evaluate(&self, catalog: &Catalog, index: ResourceIndex) -> bool {
        let left = evaluate_operand(&self.first, catalog, index);
        let mut position = 0;
        climb(left, &self.rest, &mut position, 0, catalog, index)
    }
}

/// Precedence climbing over the flat combinator list.
fn climb(
    mut left: bool,
    ops: &[(BoolOp, QueryOperand)],
    position: &mut usize,
    min_precedence: u8,
    catalog: &Catalog,
    index: ResourceIndex,
) -> bool {
    while *position < ops.len() {
        let (op, operand) = &ops[*position];
        let op = *op;
        let precedence = op.precedence();
        if precedence < min_precedence {
            break;
        }
        *position += 1;

        let right = evaluate_operand(operand, catalog, index);
        // Left-associative: climb the right side at one level tighter.
        let right = climb(right, ops, position, precedence + 1, catalog, index);

        left = match op {
            BoolOp::And => left && right,
            BoolOp::Or => left || right,
        };
    }
    left
}

fn evaluate_operand(operand: &QueryOperand, catalog: &Catalog, index: ResourceIndex) -> bool {
    match operand {
        QueryOperand::Test(test) => evaluate_test(test, catalog, index),
        QueryOperand::Group(query) => query.evaluate(catalog, index),
    }
}

fn evaluate_test(test: &AttributeTest, catalog: &Catalog, index: ResourceIndex) -> bool {
    let resource = catalog.resource(index);
    let matched = match test.name.as_str() {
        "title" => Value::String(resource.id().title().to_string()).loose_eq(&test.value),
        "tag" => match test.value.as_str() {
            Some(wanted) => catalog
                .calculate_tags(index)
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(wanted)),
            None => false,
        },
        name => match resource.attribute(name) {
            Some(attribute) => attribute.value().loose_eq(&test.value),
            None => Value::Undef.loose_eq(&test.value),
        },
    };
    match test.op {
        TestOp::Eq => matched,
        TestOp::Ne => !matched,
    }
}
