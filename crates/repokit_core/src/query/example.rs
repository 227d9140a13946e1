//! Query by example.
//!
//! A probe entity is turned into an equality conjunction over its business
//! columns. Id, version and audit columns never take part.

use crate::model::entity::Entity;
use crate::query::predicate::Predicate;
use std::collections::BTreeSet;

/// Controls which probe columns become conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleMatcher {
    ignored: BTreeSet<String>,
    include_nulls: bool,
}

impl ExampleMatcher {
    /// All non-null business columns must match.
    pub fn matching() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ignore_paths(mut self, paths: &[&str]) -> Self {
        self.ignored
            .extend(paths.iter().map(|path| (*path).to_string()));
        self
    }

    /// Null probe columns become `IS NULL` conditions instead of being skipped.
    #[must_use]
    pub fn with_include_null_values(mut self) -> Self {
        self.include_nulls = true;
        self
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.contains(path)
    }
}

#[derive(Debug, Clone)]
pub struct Example<E> {
    probe: E,
    matcher: ExampleMatcher,
}

impl<E: Entity> Example<E> {
    pub fn of(probe: E) -> Self {
        Self::with_matcher(probe, ExampleMatcher::matching())
    }

    pub fn with_matcher(probe: E, matcher: ExampleMatcher) -> Self {
        Self { probe, matcher }
    }

    pub fn probe(&self) -> &E {
        &self.probe
    }

    pub fn to_predicate(&self) -> Predicate {
        let record = self.probe.to_record();
        let conditions = E::meta()
            .business_fields()
            .filter(|field| !self.matcher.is_ignored(field.name))
            .filter_map(|field| {
                let value = record.get(field.name);
                if value.is_null() {
                    self.matcher
                        .include_nulls
                        .then(|| Predicate::is_null(field.name))
                } else {
                    Some(Predicate::eq(field.name, value.clone()))
                }
            });
        Predicate::all_of(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::{Example, ExampleMatcher};
    use crate::model::entity::EntityMeta;
    use crate::model::member::{Member, MEMBER_META};
    use crate::model::value::{Record, Value};

    fn no_related(_: &'static EntityMeta, _: &Value) -> Option<Record> {
        None
    }

    #[test]
    fn ignored_paths_and_nulls_are_skipped() {
        let example = Example::with_matcher(
            Member::new("m1"),
            ExampleMatcher::matching().with_ignore_paths(&["age"]),
        );
        let predicate = example.to_predicate();
        predicate.validate(&MEMBER_META).unwrap();

        let m1 = Record::new().with("username", "m1").with("age", 33);
        let m2 = Record::new().with("username", "m2").with("age", 0);
        assert!(predicate.matches(&m1, &no_related));
        assert!(!predicate.matches(&m2, &no_related));
    }

    #[test]
    fn include_nulls_requires_missing_team() {
        let example = Example::with_matcher(
            Member::new("m1"),
            ExampleMatcher::matching()
                .with_ignore_paths(&["age"])
                .with_include_null_values(),
        );
        let with_team = Record::new().with("username", "m1").with("team_id", 1);
        assert!(!example.to_predicate().matches(&with_team, &no_related));
    }
}
