//! Composable predicates over reconciliation runs.
//!
//! A [`Filter`] evaluates against the stored row of a run, either in memory
//! ([`Filter::matches`]) or rendered into a parameterised SurrealQL `WHERE`
//! clause ([`Filter::to_surql`]). Both paths read the same stored fields.

use chrono::{DateTime, Utc};
use fleetkeeper_model::{timestamp, Row, SchedulingId};
use serde_json::Value;

use crate::client::Bindings;

/// Predicate over reconciliation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Runs of one cluster.
    RuntimeId(String),
    /// One run.
    SchedulingId(SchedulingId),
    /// Runs of one configuration version.
    ConfigVersion(i64),
    /// Finished or unfinished runs.
    Finished(bool),
    /// Runs created strictly before the given time.
    CreatedBefore(DateTime<Utc>),
    /// Logical AND; empty matches everything.
    And(Vec<Filter>),
}

impl Filter {
    /// Match every run.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Runs of a cluster.
    pub fn runtime_id(runtime_id: impl Into<String>) -> Self {
        Self::RuntimeId(runtime_id.into())
    }

    /// One run.
    #[must_use]
    pub const fn scheduling_id(id: SchedulingId) -> Self {
        Self::SchedulingId(id)
    }

    /// Runs of a configuration version.
    #[must_use]
    pub const fn config_version(version: i64) -> Self {
        Self::ConfigVersion(version)
    }

    /// Runs by finished flag.
    #[must_use]
    pub const fn finished(finished: bool) -> Self {
        Self::Finished(finished)
    }

    /// Runs the bookkeeper still has to look at.
    #[must_use]
    pub const fn active() -> Self {
        Self::Finished(false)
    }

    /// Runs created before `at`.
    #[must_use]
    pub fn created_before(at: DateTime<Utc>) -> Self {
        Self::CreatedBefore(timestamp::truncate(at))
    }

    /// Combine with another filter.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let mut parts = match self {
            Self::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Self::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Self::And(parts)
    }

    /// Evaluate against a stored reconciliation row.
    ///
    /// A row missing a filtered field does not match.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::RuntimeId(id) => row.get("runtime_id").and_then(Value::as_str) == Some(id.as_str()),
            Self::SchedulingId(id) => {
                row.get("scheduling_id").and_then(Value::as_str) == Some(id.to_string().as_str())
            }
            Self::ConfigVersion(version) => {
                row.get("cluster_config_version").and_then(Value::as_i64) == Some(*version)
            }
            Self::Finished(finished) => row.get("finished").and_then(Value::as_bool) == Some(*finished),
            Self::CreatedBefore(at) => row
                .get("created")
                .and_then(Value::as_i64)
                .is_some_and(|created| created < timestamp::to_micros(*at)),
            Self::And(parts) => parts.iter().all(|part| part.matches(row)),
        }
    }

    /// Render as a SurrealQL condition, appending parameters to `bindings`.
    ///
    /// Parameter names are `$f0`, `$f1`, ... in rendering order.
    pub(crate) fn to_surql(&self, bindings: &mut Bindings) -> String {
        match self {
            Self::RuntimeId(id) => format!("runtime_id = {}", push_binding(bindings, Value::from(id.as_str()))),
            Self::SchedulingId(id) => format!("scheduling_id = {}", push_binding(bindings, Value::from(id.to_string()))),
            Self::ConfigVersion(version) => {
                format!("cluster_config_version = {}", push_binding(bindings, Value::from(*version)))
            }
            Self::Finished(finished) => format!("finished = {}", push_binding(bindings, Value::Bool(*finished))),
            Self::CreatedBefore(at) => {
                format!("created < {}", push_binding(bindings, Value::from(timestamp::to_micros(*at))))
            }
            Self::And(parts) if parts.is_empty() => "true".to_string(),
            Self::And(parts) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|part| format!("({})", part.to_surql(bindings)))
                    .collect();
                rendered.join(" AND ")
            }
        }
    }
}

fn push_binding(bindings: &mut Bindings, value: Value) -> String {
    let name = format!("f{}", bindings.len());
    bindings.push((name.clone(), value));
    format!("${name}")
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use fleetkeeper_model::{DatabaseEntity, ReconciliationEntity};

    fn run(runtime_id: &str, version: i64) -> ReconciliationEntity {
        ReconciliationEntity::new(runtime_id, version, Utc::now())
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::all().matches(&run("a", 1).marshal()));
        assert!(Filter::default().matches(&Row::new()));
    }

    #[test]
    fn test_field_filters() {
        let entity = run("runtime-1", 3);
        let row = entity.marshal();

        assert!(Filter::runtime_id("runtime-1").matches(&row));
        assert!(!Filter::runtime_id("runtime-2").matches(&row));
        assert!(Filter::scheduling_id(entity.scheduling_id).matches(&row));
        assert!(!Filter::scheduling_id(SchedulingId::new()).matches(&row));
        assert!(Filter::config_version(3).matches(&row));
        assert!(Filter::active().matches(&row));
        assert!(!Filter::finished(true).matches(&row));
    }

    #[test]
    fn test_created_before_is_strict() {
        let entity = run("runtime-1", 3);
        let row = entity.marshal();

        assert!(!Filter::created_before(entity.created).matches(&row));
        assert!(Filter::created_before(entity.created + chrono::Duration::microseconds(1)).matches(&row));
    }

    #[test]
    fn test_and_requires_all_parts() {
        let row = run("runtime-1", 3).marshal();
        let filter = Filter::runtime_id("runtime-1").and(Filter::config_version(4));
        assert!(!filter.matches(&row));

        let filter = Filter::runtime_id("runtime-1").and(Filter::active());
        assert!(filter.matches(&row));
    }

    #[test]
    fn test_and_flattens() {
        let filter = Filter::runtime_id("a")
            .and(Filter::active())
            .and(Filter::config_version(2).and(Filter::finished(false)));
        assert!(matches!(filter, Filter::And(ref parts) if parts.len() == 4), "got {filter:?}");
    }

    #[test]
    fn test_to_surql_binds_parameters() {
        let mut bindings = Bindings::new();
        let clause = Filter::runtime_id("runtime-1")
            .and(Filter::active())
            .to_surql(&mut bindings);

        assert_eq!(clause, "(runtime_id = $f0) AND (finished = $f1)");
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0], ("f0".to_string(), Value::from("runtime-1")));
        assert_eq!(bindings[1], ("f1".to_string(), Value::Bool(false)));
    }

    #[test]
    fn test_to_surql_empty_is_true() {
        let mut bindings = Bindings::new();
        assert_eq!(Filter::all().to_surql(&mut bindings), "true");
        assert!(bindings.is_empty());
    }
}
