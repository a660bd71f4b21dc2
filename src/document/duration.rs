//! Duration fields.
//!
//! A duration can be written as a mapping of named units that are summed
//! (`{"minutes": 1, "seconds": 30}`) or, under a `_<unit>`-suffixed key, as
//! a bare integer in that unit (`"timeout_secs": 90`). The two forms are
//! mutually exclusive.

use std::time::Duration;

use super::{
    binder::Binder,
    error::{BindError, BindResult},
    node::Node,
};

/// Recognized unit names and their length in nanoseconds.
///
/// `hnsecs` are hectonanoseconds, the 100 ns ticks common in this ecosystem.
const UNITS: &[(&str, u64)] = &[
    ("weeks", 7 * 24 * 3_600 * 1_000_000_000),
    ("days", 24 * 3_600 * 1_000_000_000),
    ("hours", 3_600 * 1_000_000_000),
    ("minutes", 60 * 1_000_000_000),
    ("seconds", 1_000_000_000),
    ("msecs", 1_000_000),
    ("usecs", 1_000),
    ("hnsecs", 100),
    ("nsecs", 1),
];

fn unit_factor(unit: &str) -> Option<u64> {
    UNITS.iter().find(|(name, _)| *name == unit).map(|(_, f)| *f)
}

fn unit_names() -> String {
    UNITS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse the mapping-of-units form.
fn from_unit_mapping(node: &Node) -> BindResult<Duration> {
    let mapping = node
        .as_mapping()
        .ok_or_else(|| BindError::type_mismatch("mapping of duration units", node.kind(), node.span()))?;

    let mut total_nanos: u128 = 0;
    for (key, entry) in mapping.iter() {
        let factor = unit_factor(key).ok_or_else(|| {
            BindError::unknown_key(key, entry.key_span)
                .with_help(format!("valid duration units are: {}", unit_names()))
        })?;
        let scalar = entry.value.expect_scalar()?;
        let amount = scalar.to_i64()?;
        if amount < 0 {
            return Err(BindError::construction(
                key,
                "duration amounts must not be negative",
                scalar.span(),
            ));
        }
        total_nanos += amount as u128 * factor as u128;
    }
    Ok(Duration::from_nanos(total_nanos.min(u64::MAX as u128) as u64))
}

/// Parse the `_<unit>`-suffixed scalar form.
fn from_suffixed_scalar(node: &Node, unit: &str) -> BindResult<Duration> {
    let scalar = node.as_scalar().ok_or_else(|| {
        BindError::type_mismatch("integer", node.kind(), node.span())
    })?;
    let amount = scalar.to_i64()?;
    if amount < 0 {
        return Err(BindError::construction(
            unit,
            "duration amounts must not be negative",
            scalar.span(),
        ));
    }
    let factor = unit_factor(unit).expect("caller verified the unit");
    Ok(Duration::from_nanos((amount as u64).saturating_mul(factor)))
}

impl Binder<'_> {
    /// An optional duration field named `key`, accepted either as
    /// `key: {unit: amount, …}` or as exactly one `key_<unit>: amount`.
    pub fn duration(&mut self, key: &str) -> BindResult<Option<Duration>> {
        self.claim(key)?;

        // collect present suffixed spellings first so ambiguity is detected
        // before any value parsing
        let mut suffixed: Vec<(String, &'static str)> = Vec::new();
        for &(unit, _) in UNITS {
            let candidate = format!("{key}_{unit}");
            if self.mapping().contains_key(&candidate) {
                suffixed.push((candidate, unit));
            }
        }
        for (candidate, _) in &suffixed {
            self.claim(candidate)?;
        }

        let mapping_form = self.mapping().get(key);
        if mapping_form.is_some() && !suffixed.is_empty() || suffixed.len() > 1 {
            let span = mapping_form
                .map(|n| n.span())
                .or_else(|| {
                    suffixed
                        .first()
                        .and_then(|(k, _)| self.mapping().entry(k))
                        .map(|e| e.key_span)
                })
                .unwrap_or_else(|| self.span());
            return Err(BindError::DurationAmbiguity {
                field: key.to_string(),
                span,
            });
        }

        if let Some(node) = mapping_form {
            if node.is_null() {
                return Ok(None);
            }
            return from_unit_mapping(node).map(Some);
        }
        if let Some((candidate, unit)) = suffixed.first() {
            let node = self.mapping().get(candidate).expect("key is present");
            return from_suffixed_scalar(node, unit).map(Some);
        }
        Ok(None)
    }

    /// A required duration field; absence of both forms is an error.
    pub fn required_duration(&mut self, key: &str) -> BindResult<Duration> {
        let span = self.span();
        self.duration(key)?
            .ok_or_else(|| BindError::missing_key(key, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{
        binder::{bind_record, BindContext, BindRecord},
        json::parse_json,
    };

    #[derive(Debug)]
    struct Timeouts {
        idle: Option<Duration>,
        total: Duration,
    }

    impl BindRecord for Timeouts {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            Ok(Timeouts {
                idle: b.duration("idle")?,
                total: b.required_duration("total")?,
            })
        }
    }

    fn bind(text: &str) -> BindResult<Timeouts> {
        let node = parse_json(text).unwrap();
        bind_record(&node, &BindContext::default())
    }

    #[test]
    fn mapping_form_sums_units() {
        let t = bind(r#"{"total": {"minutes": 1, "seconds": 30}}"#).unwrap();
        assert_eq!(t.total, Duration::from_secs(90));
        assert!(t.idle.is_none());
    }

    #[test]
    fn suffixed_form_uses_that_unit() {
        let t = bind(r#"{"total_msecs": 1500}"#).unwrap();
        assert_eq!(t.total, Duration::from_millis(1500));

        let t = bind(r#"{"total_hnsecs": 10}"#).unwrap();
        assert_eq!(t.total, Duration::from_nanos(1000));
    }

    #[test]
    fn both_forms_is_ambiguous() {
        let err = bind(r#"{"total": {"seconds": 1}, "total_seconds": 1}"#).unwrap_err();
        assert!(matches!(err, BindError::DurationAmbiguity { .. }));
    }

    #[test]
    fn two_suffixed_forms_are_ambiguous() {
        let err = bind(r#"{"total_seconds": 1, "total_msecs": 5}"#).unwrap_err();
        assert!(matches!(err, BindError::DurationAmbiguity { .. }));
    }

    #[test]
    fn plain_key_rejects_scalar_form() {
        let err = bind(r#"{"total": 30}"#).unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
    }

    #[test]
    fn suffixed_key_rejects_mapping_form() {
        let err = bind(r#"{"total_seconds": {"seconds": 1}}"#).unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_required_duration() {
        let err = bind(r#"{}"#).unwrap_err();
        assert!(matches!(err, BindError::MissingRequiredKey { ref key, .. } if key == "total"));
    }

    #[test]
    fn unknown_unit_is_rejected_with_help() {
        let err = bind(r#"{"total": {"fortnights": 1}}"#).unwrap_err();
        assert!(matches!(err, BindError::UnknownKey { .. }));
    }
}
