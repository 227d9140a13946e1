//! Predicate tree and combinators.
//!
//! # Responsibility
//! - Represent filters as a tree of field conditions joined by `and`/`or`/`not`.
//! - Validate field names and value kinds against entity metadata.
//! - Evaluate a tree against an in-memory `Record`.
//!
//! # Invariants
//! - `Predicate::All` (the empty tree) matches every row.
//! - Evaluation is left-to-right and short-circuits.
//! - Comparisons involving `Null` are false; use `is_null` to test for it.

use crate::model::entity::{EntityMeta, FieldKind};
use crate::model::value::{Record, Value};
use crate::query::QueryError;
use std::cmp::Ordering;

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// Leaf condition on one column.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    StartsWith {
        field: String,
        prefix: String,
    },
    IsNull {
        field: String,
    },
    /// `field` is a reference column whose target row satisfies `predicate`.
    Related {
        field: String,
        target: &'static EntityMeta,
        predicate: Box<Predicate>,
    },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Self::Compare { field, .. }
            | Self::In { field, .. }
            | Self::StartsWith { field, .. }
            | Self::IsNull { field }
            | Self::Related { field, .. } => field.as_str(),
        }
    }
}

/// Lookup used to follow `Condition::Related` during in-memory evaluation.
pub type RelatedLookup<'a> = dyn Fn(&'static EntityMeta, &Value) -> Option<Record> + 'a;

#[derive(Debug, Clone, Default)]
pub enum Predicate {
    #[default]
    All,
    Condition(Condition),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Condition(Condition::Compare {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn in_set<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Condition(Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::Condition(Condition::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        })
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::Condition(Condition::IsNull {
            field: field.into(),
        })
    }

    pub fn related(
        field: impl Into<String>,
        target: &'static EntityMeta,
        predicate: Predicate,
    ) -> Self {
        Self::Condition(Condition::Related {
            field: field.into(),
            target,
            predicate: Box::new(predicate),
        })
    }

    /// Conjunction. `All` is the identity element.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, other) => other,
            (this, Self::All) => this,
            (this, other) => Self::And(Box::new(this), Box::new(other)),
        }
    }

    /// Disjunction. `All` absorbs the other side.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (this, other) => Self::Or(Box::new(this), Box::new(other)),
        }
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Folds conditions with `and`; an empty input yields `All`.
    pub fn all_of(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        predicates.into_iter().fold(Self::All, Self::and)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Checks every field and value kind against `meta`.
    pub fn validate(&self, meta: &'static EntityMeta) -> Result<(), QueryError> {
        match self {
            Self::All => Ok(()),
            Self::Condition(condition) => validate_condition(meta, condition),
            Self::And(left, right) | Self::Or(left, right) => {
                left.validate(meta)?;
                right.validate(meta)
            }
            Self::Not(inner) => inner.validate(meta),
        }
    }

    /// Evaluates the tree against one row.
    pub fn matches(&self, record: &Record, related: &RelatedLookup<'_>) -> bool {
        match self {
            Self::All => true,
            Self::Condition(condition) => condition_matches(condition, record, related),
            Self::And(left, right) => left.matches(record, related) && right.matches(record, related),
            Self::Or(left, right) => left.matches(record, related) || right.matches(record, related),
            Self::Not(inner) => !inner.matches(record, related),
        }
    }
}

fn validate_condition(meta: &'static EntityMeta, condition: &Condition) -> Result<(), QueryError> {
    let field = meta
        .field(condition.field())
        .ok_or_else(|| QueryError::UnknownField {
            entity: meta.name,
            field: condition.field().to_string(),
        })?;
    let expected = field.value_kind();
    let check = |value: &Value| -> Result<(), QueryError> {
        if value.is_null() || !expected.accepts(value) {
            return Err(QueryError::TypeMismatch {
                field: field.name.to_string(),
                expected,
                found: value.kind_name(),
            });
        }
        Ok(())
    };

    match condition {
        Condition::Compare { value, .. } => check(value),
        Condition::In { values, .. } => values.iter().try_for_each(check),
        Condition::StartsWith { .. } => {
            if field.kind == FieldKind::Text {
                Ok(())
            } else {
                Err(QueryError::TypeMismatch {
                    field: field.name.to_string(),
                    expected: FieldKind::Text,
                    found: "non-text column",
                })
            }
        }
        Condition::IsNull { .. } => Ok(()),
        Condition::Related {
            target, predicate, ..
        } => match field.references {
            Some(actual) if actual.same_table(target) => predicate.validate(*target),
            _ => Err(QueryError::NotAReference {
                entity: meta.name,
                field: field.name.to_string(),
                target: target.name,
            }),
        },
    }
}

fn condition_matches(condition: &Condition, record: &Record, related: &RelatedLookup<'_>) -> bool {
    let cell = record.get(condition.field());
    match condition {
        Condition::Compare { op, value, .. } => {
            compare_cells(cell, value).is_some_and(|ordering| op.holds(ordering))
        }
        Condition::In { values, .. } => !cell.is_null() && values.contains(cell),
        Condition::StartsWith { prefix, .. } => cell
            .as_str()
            .is_some_and(|text| text.starts_with(prefix.as_str())),
        Condition::IsNull { .. } => cell.is_null(),
        Condition::Related {
            target, predicate, ..
        } => {
            if cell.is_null() {
                return false;
            }
            related(*target, cell).is_some_and(|row| predicate.matches(&row, related))
        }
    }
}

/// Orders two cells of the same kind; `None` for nulls or mixed kinds.
fn compare_cells(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Predicate;
    use crate::model::entity::EntityMeta;
    use crate::model::member::MEMBER_META;
    use crate::model::team::TEAM_META;
    use crate::model::value::{Record, Value};
    use crate::query::QueryError;
    use std::cell::Cell;

    fn no_related(_: &'static EntityMeta, _: &Value) -> Option<Record> {
        None
    }

    fn member(username: &str, age: i64) -> Record {
        Record::new().with("username", username).with("age", age)
    }

    #[test]
    fn empty_tree_matches_everything() {
        assert!(Predicate::All.matches(&Record::new(), &no_related));
        assert!(Predicate::all_of(Vec::new()).is_all());
    }

    #[test]
    fn and_or_combine_conditions() {
        let row = member("fad", 20);
        let both = Predicate::eq("username", "fad").and(Predicate::gt("age", 15));
        assert!(both.matches(&row, &no_related));

        let either = Predicate::eq("username", "other").or(Predicate::ge("age", 20));
        assert!(either.matches(&row, &no_related));

        let neither = Predicate::eq("username", "other").or(Predicate::lt("age", 20));
        assert!(!neither.matches(&row, &no_related));
    }

    #[test]
    fn all_is_identity_for_and_and_absorbing_for_or() {
        let leaf = Predicate::eq("username", "fad");
        assert!(matches!(Predicate::All.and(leaf.clone()), Predicate::Condition(_)));
        assert!(Predicate::All.or(leaf).is_all());
    }

    #[test]
    fn evaluation_short_circuits_left_to_right() {
        let calls = Cell::new(0);
        let lookup = |_: &'static EntityMeta, _: &Value| {
            calls.set(calls.get() + 1);
            Some(Record::new().with("name", "teamA"))
        };
        let row = member("fad", 10).with("team_id", 1);
        let related = Predicate::related("team_id", &TEAM_META, Predicate::eq("name", "teamA"));

        let and_tree = Predicate::eq("username", "nobody").and(related.clone());
        assert!(!and_tree.matches(&row, &lookup));
        assert_eq!(calls.get(), 0);

        let or_tree = Predicate::eq("username", "fad").or(related.clone());
        assert!(or_tree.matches(&row, &lookup));
        assert_eq!(calls.get(), 0);

        assert!(related.matches(&row, &lookup));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn null_cells_never_compare_equal() {
        let row = Record::new().with("team_id", Value::Null);
        assert!(!Predicate::eq("team_id", 1).matches(&row, &no_related));
        assert!(!Predicate::ne("team_id", 1).matches(&row, &no_related));
        assert!(Predicate::is_null("team_id").matches(&row, &no_related));
    }

    #[test]
    fn in_set_and_prefix_conditions() {
        let row = member("AA2", 10);
        assert!(Predicate::in_set("username", ["AA1", "AA2"]).matches(&row, &no_related));
        assert!(!Predicate::in_set("username", Vec::<&str>::new()).matches(&row, &no_related));
        assert!(Predicate::starts_with("username", "AA").matches(&row, &no_related));
        assert!(!Predicate::starts_with("username", "aa").matches(&row, &no_related));
    }

    #[test]
    fn validate_rejects_unknown_field_and_type_mismatch() {
        let unknown = Predicate::eq("nickname", "x").validate(&MEMBER_META);
        assert!(matches!(unknown, Err(QueryError::UnknownField { .. })));

        let mismatch = Predicate::gt("age", "old").validate(&MEMBER_META);
        assert!(matches!(mismatch, Err(QueryError::TypeMismatch { .. })));

        let null_compare = Predicate::eq("username", Value::Null).validate(&MEMBER_META);
        assert!(matches!(null_compare, Err(QueryError::TypeMismatch { .. })));

        let related = Predicate::related("username", &TEAM_META, Predicate::All);
        assert!(matches!(
            related.validate(&MEMBER_META),
            Err(QueryError::NotAReference { .. })
        ));

        let nested = Predicate::related("team_id", &TEAM_META, Predicate::eq("title", "x"));
        assert!(matches!(
            nested.validate(&MEMBER_META),
            Err(QueryError::UnknownField { entity: "Team", .. })
        ));
    }
}
