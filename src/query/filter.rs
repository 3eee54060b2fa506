//! Per-request query value objects: predicates, ordering, pagination, includes.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    /// Value is one of.
    In(Vec<Value>),
    /// Case-insensitive substring match.
    Contains(String),
    /// List field contains all of.
    HasEvery(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Field { field: String, condition: Condition },
    /// Condition on a field of a directly related entity (`team.name`).
    Related {
        relation: String,
        field: String,
        condition: Condition,
    },
}

/// Conjunction of per-field conditions, optionally AND-ed with a disjunction (`any`).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Filter {
    pub conditions: IndexMap<String, Condition>,
    pub any: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(field, Condition::Equals(value.into()))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    pub fn any_of(predicates: Vec<Predicate>) -> Self {
        Filter {
            conditions: IndexMap::new(),
            any: predicates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.any.is_empty()
    }

    /// Layer `self` over `base`: conditions on the same field and a non-empty `any` replace the base's.
    pub fn merged_over(self, base: &Filter) -> Filter {
        let mut conditions = base.conditions.clone();
        conditions.extend(self.conditions);
        let any = if self.any.is_empty() { base.any.clone() } else { self.any };
        Filter { conditions, any }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuerySpec {
    pub filter: Filter,
    pub order_by: Option<OrderBy>,
    pub skip: u64,
    pub take: Option<u64>,
    /// Relation accessors to eager-load.
    pub include: BTreeSet<String>,
    /// Fields to return; all when `None`.
    pub select: Option<BTreeSet<String>>,
}

impl QuerySpec {
    pub fn filtered(filter: Filter) -> Self {
        QuerySpec {
            filter,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_conditions_override_base() {
        let base = Filter::eq("tenant", 1).with("status", Condition::Equals(json!("draft")));
        let derived = Filter::eq("status", "published");
        let merged = derived.merged_over(&base);
        assert_eq!(merged.conditions.get("tenant"), Some(&Condition::Equals(json!(1))));
        assert_eq!(merged.conditions.get("status"), Some(&Condition::Equals(json!("published"))));
    }

    #[test]
    fn base_disjunction_survives_when_derived_has_none() {
        let base = Filter::any_of(vec![Predicate::Field {
            field: "archived".into(),
            condition: Condition::Equals(json!(false)),
        }]);
        let merged = Filter::new().merged_over(&base);
        assert_eq!(merged.any.len(), 1);
    }
}
