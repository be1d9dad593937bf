//! Rule expression evaluation.
//!
//! A rule tree is a declarative boolean expression evaluated against the
//! fact set of an attempted action. Trees are plain JSON documents so
//! that policy authors can write them by hand:
//!
//! ```json
//! {"and":[{"field":"program_ids","operator":"string_does_not_contain_any","value":["..."]}]}
//! ```
//!
//! Evaluation is pure and total. Unknown fields resolve to a
//! deterministic [`FactValue::Absent`] sentinel, and any operator whose
//! value type does not match the fact's actual type evaluates the leaf
//! to `false` (fail closed). The single documented exception is
//! `string_does_not_contain_any`, which holds vacuously for an absent
//! fact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::error::TokenGateError;

/// Comparison operators usable in a rule leaf.
///
/// Adding an operator is a localized change: extend this enum and the
/// single `match` in [`RuleLeaf::evaluate`]; the compiler flags every
/// site that needs updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    StringEquals,
    StringNotEquals,
    /// Every element of the fact list must appear in the rule's list.
    StringIsSubset,
    /// Membership for list facts, substring for string facts.
    StringContains,
    /// The fact string contains the rule string.
    StringHasSubstring,
    /// The fact contains none of the rule's listed values.
    StringDoesNotContainAny,
    IntGreaterThan,
    IntIn,
}

/// Value carried by a rule leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Int(i64),
    Str(String),
    StrList(Vec<String>),
    IntList(Vec<i64>),
}

/// A single comparison against one fact field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleLeaf {
    pub field: String,
    pub operator: RuleOperator,
    pub value: RuleValue,
}

/// Recursive boolean rule expression.
///
/// Internal nodes combine children, leaves compare a single field.
/// The JSON encoding uses the node kind as the object key
/// (`and`/`or`/`not`) with leaves spelled out inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    And { and: Vec<RuleNode> },
    Or { or: Vec<RuleNode> },
    Not { not: Box<RuleNode> },
    Leaf(RuleLeaf),
}

/// Runtime value of a single fact field.
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Int(i64),
    Str(String),
    StrList(Vec<String>),
    /// Deterministic sentinel for fields the action did not provide.
    Absent,
}

/// Flat fact set keyed by slash-separated field paths, e.g.
/// `metadata/name` or `mint_state/derived_datetime/utc_hour`.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    values: HashMap<String, FactValue>,
}

const ABSENT: FactValue = FactValue::Absent;

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_str(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(field.into(), FactValue::Str(value.into()));
    }

    pub fn insert_int(&mut self, field: impl Into<String>, value: i64) {
        self.values.insert(field.into(), FactValue::Int(value));
    }

    pub fn insert_str_list(&mut self, field: impl Into<String>, value: Vec<String>) {
        self.values.insert(field.into(), FactValue::StrList(value));
    }

    pub fn get(&self, field: &str) -> &FactValue {
        self.values.get(field).unwrap_or(&ABSENT)
    }
}

impl RuleNode {
    /// Evaluate this tree against a fact set.
    ///
    /// `and` is false as soon as any child is false and vacuously true
    /// when empty; `or` is true as soon as any child is true and
    /// vacuously false when empty.
    pub fn evaluate(&self, facts: &Facts) -> bool {
        match self {
            RuleNode::And { and } => and.iter().all(|child| child.evaluate(facts)),
            RuleNode::Or { or } => or.iter().any(|child| child.evaluate(facts)),
            RuleNode::Not { not } => !not.evaluate(facts),
            RuleNode::Leaf(leaf) => leaf.evaluate(facts),
        }
    }

    /// Length of the canonical JSON encoding, checked against the
    /// payload budget at policy creation time.
    pub fn serialized_len(&self) -> Result<usize, TokenGateError> {
        let encoded = serde_json::to_string(self).map_err(|e| {
            TokenGateError::serialization(format!("Failed to serialize rule tree: {}", e), Some(e))
        })?;
        Ok(encoded.len())
    }

    /// Parse a rule tree from its JSON encoding.
    pub fn from_json(json: &str) -> Result<Self, TokenGateError> {
        serde_json::from_str(json).map_err(|e| {
            TokenGateError::serialization(format!("Failed to parse rule tree: {}", e), Some(e))
        })
    }
}

impl RuleLeaf {
    fn evaluate(&self, facts: &Facts) -> bool {
        let fact = facts.get(&self.field);
        match self.operator {
            RuleOperator::StringEquals => match (fact, &self.value) {
                (FactValue::Str(f), RuleValue::Str(v)) => f == v,
                _ => false,
            },
            RuleOperator::StringNotEquals => match (fact, &self.value) {
                (FactValue::Str(f), RuleValue::Str(v)) => f != v,
                _ => false,
            },
            RuleOperator::StringIsSubset => match (fact, &self.value) {
                (FactValue::StrList(f), RuleValue::StrList(v)) => {
                    f.iter().all(|item| v.contains(item))
                }
                _ => false,
            },
            RuleOperator::StringContains => match (fact, &self.value) {
                (FactValue::StrList(f), RuleValue::Str(v)) => f.iter().any(|item| item == v),
                (FactValue::Str(f), RuleValue::Str(v)) => f.contains(v.as_str()),
                _ => false,
            },
            RuleOperator::StringHasSubstring => match (fact, &self.value) {
                (FactValue::Str(f), RuleValue::Str(v)) => f.contains(v.as_str()),
                _ => false,
            },
            RuleOperator::StringDoesNotContainAny => match (fact, &self.value) {
                // Vacuously true: an action with no such fact cannot
                // contain a denied value.
                (FactValue::Absent, RuleValue::StrList(_)) => true,
                (FactValue::StrList(f), RuleValue::StrList(v)) => {
                    f.iter().all(|item| !v.contains(item))
                }
                (FactValue::Str(f), RuleValue::StrList(v)) => v.iter().all(|item| item != f),
                _ => false,
            },
            RuleOperator::IntGreaterThan => match (fact, &self.value) {
                (FactValue::Int(f), RuleValue::Int(v)) => f > v,
                _ => false,
            },
            RuleOperator::IntIn => match (fact, &self.value) {
                (FactValue::Int(f), RuleValue::IntList(v)) => v.contains(f),
                _ => false,
            },
        }
    }
}
