//! Predicate groups and tree evaluation.

use crate::operator::FieldOperator;
use driftstore_model::{ModelDefinition, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupType {
    /// True iff every child matches. An empty list matches.
    And,
    /// True iff any child matches. An empty list matches, by the same
    /// short-circuit-on-empty convention as `And`.
    Or,
    /// Negates the `And`-evaluation of the children.
    Not,
}

/// A single field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    /// Field the condition applies to.
    pub field: String,
    /// The comparison.
    #[serde(flatten)]
    pub operator: FieldOperator,
}

/// A node in a predicate tree: a leaf condition or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateNode {
    /// A nested group.
    Group(PredicateGroup),
    /// A leaf field condition.
    Field(FieldPredicate),
}

/// A tree of conditions combined by a group type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateGroup {
    /// How children combine.
    pub group_type: GroupType,
    /// Child nodes.
    pub predicates: Vec<PredicateNode>,
}

impl PredicateGroup {
    /// Creates a group of the given type.
    pub fn new(group_type: GroupType, predicates: Vec<PredicateNode>) -> Self {
        Self {
            group_type,
            predicates,
        }
    }

    /// An `and` group over leaf conditions.
    pub fn all(conditions: Vec<FieldPredicate>) -> Self {
        Self::new(
            GroupType::And,
            conditions.into_iter().map(PredicateNode::Field).collect(),
        )
    }

    /// A single-condition group matching `field == value`.
    pub fn field_eq(field: impl Into<String>, value: Value) -> Self {
        Self::all(vec![FieldPredicate {
            field: field.into(),
            operator: FieldOperator::Eq(value),
        }])
    }

    /// Returns true if the group has no children.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluates the tree against a record.
    pub fn evaluate(&self, record: &Record) -> bool {
        match self.group_type {
            GroupType::And => self.predicates.iter().all(|p| p.evaluate(record)),
            GroupType::Or => {
                self.predicates.is_empty() || self.predicates.iter().any(|p| p.evaluate(record))
            }
            GroupType::Not => !self.predicates.iter().all(|p| p.evaluate(record)),
        }
    }

    /// If this predicate fully pins the model's key, returns the pinned
    /// key values in declaration order.
    ///
    /// Holds only for a top-level `and` group whose children are all
    /// `Eq` leaves on key fields, covering every key field. Storage uses
    /// this to resolve the query as a direct lookup.
    pub fn key_values_if_fully_pinned(&self, definition: &ModelDefinition) -> Option<Vec<Value>> {
        if self.group_type != GroupType::And || self.predicates.is_empty() {
            return None;
        }

        let mut pinned: Vec<Option<&Value>> = vec![None; definition.primary_key.len()];
        for node in &self.predicates {
            let PredicateNode::Field(leaf) = node else {
                return None;
            };
            let FieldOperator::Eq(value) = &leaf.operator else {
                return None;
            };
            let position = definition
                .primary_key
                .iter()
                .position(|key| key == &leaf.field)?;
            pinned[position] = Some(value);
        }

        pinned
            .into_iter()
            .map(|slot| slot.cloned())
            .collect::<Option<Vec<_>>>()
    }

    /// Serializes the group to canonical JSON for persistence and
    /// change comparison.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl PredicateNode {
    /// Evaluates this node against a record.
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            PredicateNode::Group(group) => group.evaluate(record),
            PredicateNode::Field(leaf) => leaf.operator.evaluate(record.get(&leaf.field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftstore_model::{ModelField, ScalarType};
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn leaf(field: &str, operator: FieldOperator) -> PredicateNode {
        PredicateNode::Field(FieldPredicate {
            field: field.into(),
            operator,
        })
    }

    #[test]
    fn empty_and_matches() {
        let group = PredicateGroup::new(GroupType::And, vec![]);
        assert!(group.evaluate(&record(json!({"x": 1}))));
    }

    #[test]
    fn empty_or_matches() {
        let group = PredicateGroup::new(GroupType::Or, vec![]);
        assert!(group.evaluate(&record(json!({"x": 1}))));
    }

    #[test]
    fn and_requires_all_children() {
        let group = PredicateGroup::new(
            GroupType::And,
            vec![
                leaf("rating", FieldOperator::Gt(json!(3))),
                leaf("status", FieldOperator::Eq(json!("ACTIVE"))),
            ],
        );
        assert!(group.evaluate(&record(json!({"rating": 5, "status": "ACTIVE"}))));
        assert!(!group.evaluate(&record(json!({"rating": 5, "status": "DRAFT"}))));
    }

    #[test]
    fn or_requires_any_child() {
        let group = PredicateGroup::new(
            GroupType::Or,
            vec![
                leaf("rating", FieldOperator::Gt(json!(3))),
                leaf("status", FieldOperator::Eq(json!("ACTIVE"))),
            ],
        );
        assert!(group.evaluate(&record(json!({"rating": 1, "status": "ACTIVE"}))));
        assert!(!group.evaluate(&record(json!({"rating": 1, "status": "DRAFT"}))));
    }

    #[test]
    fn not_negates_and_of_children() {
        let group = PredicateGroup::new(
            GroupType::Not,
            vec![leaf("status", FieldOperator::Eq(json!("ACTIVE")))],
        );
        assert!(!group.evaluate(&record(json!({"status": "ACTIVE"}))));
        assert!(group.evaluate(&record(json!({"status": "DRAFT"}))));
    }

    #[test]
    fn nested_groups() {
        let group = PredicateGroup::new(
            GroupType::And,
            vec![
                leaf("rating", FieldOperator::Ge(json!(1))),
                PredicateNode::Group(PredicateGroup::new(
                    GroupType::Or,
                    vec![
                        leaf("status", FieldOperator::Eq(json!("ACTIVE"))),
                        leaf("status", FieldOperator::Eq(json!("REVIEW"))),
                    ],
                )),
            ],
        );
        assert!(group.evaluate(&record(json!({"rating": 2, "status": "REVIEW"}))));
        assert!(!group.evaluate(&record(json!({"rating": 2, "status": "DRAFT"}))));
    }

    #[test]
    fn fully_pinned_single_key() {
        let def = ModelDefinition::new("Post", vec![ModelField::scalar("id", ScalarType::Id)]);
        let group = PredicateGroup::field_eq("id", json!("p1"));
        assert_eq!(
            group.key_values_if_fully_pinned(&def),
            Some(vec![json!("p1")])
        );
    }

    #[test]
    fn fully_pinned_composite_key_any_order() {
        let def = ModelDefinition::new("Post", vec![ModelField::scalar("id", ScalarType::Id)])
            .with_primary_key(vec!["tenant".into(), "id".into()]);
        let group = PredicateGroup::all(vec![
            FieldPredicate {
                field: "id".into(),
                operator: FieldOperator::Eq(json!("p1")),
            },
            FieldPredicate {
                field: "tenant".into(),
                operator: FieldOperator::Eq(json!("acme")),
            },
        ]);
        assert_eq!(
            group.key_values_if_fully_pinned(&def),
            Some(vec![json!("acme"), json!("p1")])
        );
    }

    #[test]
    fn partially_pinned_key_is_not_a_lookup() {
        let def = ModelDefinition::new("Post", vec![ModelField::scalar("id", ScalarType::Id)])
            .with_primary_key(vec!["tenant".into(), "id".into()]);
        let group = PredicateGroup::field_eq("id", json!("p1"));
        assert_eq!(group.key_values_if_fully_pinned(&def), None);
    }

    #[test]
    fn non_eq_or_extra_fields_are_not_a_lookup() {
        let def = ModelDefinition::new("Post", vec![ModelField::scalar("id", ScalarType::Id)]);
        let ranged = PredicateGroup::all(vec![FieldPredicate {
            field: "id".into(),
            operator: FieldOperator::BeginsWith("p".into()),
        }]);
        assert_eq!(ranged.key_values_if_fully_pinned(&def), None);

        let extra = PredicateGroup::all(vec![
            FieldPredicate {
                field: "id".into(),
                operator: FieldOperator::Eq(json!("p1")),
            },
            FieldPredicate {
                field: "title".into(),
                operator: FieldOperator::Eq(json!("t")),
            },
        ]);
        assert_eq!(extra.key_values_if_fully_pinned(&def), None);
    }

    #[test]
    fn canonical_json_round_trip_and_stability() {
        let group = PredicateGroup::field_eq("id", json!("p1"));
        let encoded = group.to_canonical_json();
        let decoded: PredicateGroup = serde_json::from_str(&encoded).unwrap();
        assert_eq!(group, decoded);
        assert_eq!(encoded, decoded.to_canonical_json());
    }
}
