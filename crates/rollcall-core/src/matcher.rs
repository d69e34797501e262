//! Nearest-reference matching under a distance tolerance.

use crate::registry::Registry;
use crate::types::{Descriptor, MatchResult};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for comparing a query descriptor against the registry.
pub trait Matcher: Send + Sync {
    fn compare(&self, query: Option<&Descriptor>, registry: &Registry, tolerance: f32) -> MatchResult;
}

/// Best-of-all-references Euclidean matcher.
///
/// Every reference descriptor of every identity is compared; the smallest
/// distance wins and is accepted when `distance <= tolerance`. On equal
/// distances the entry met first in registry order is kept. Incomparable
/// references (length mismatch, NaN) are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: Option<&Descriptor>, registry: &Registry, tolerance: f32) -> MatchResult {
        let Some(query) = query else {
            return MatchResult::unknown(None);
        };

        let mut best: Option<(f32, usize)> = None;

        for (idx, record) in registry.records().iter().enumerate() {
            for reference in &record.descriptors {
                let Some(dist) = query.distance(reference) else {
                    continue;
                };
                if dist.is_nan() {
                    continue;
                }
                if best.map_or(true, |(best_dist, _)| dist < best_dist) {
                    best = Some((dist, idx));
                }
            }
        }

        match best {
            Some((dist, idx)) if dist <= tolerance => {
                let record = &registry.records()[idx];
                MatchResult {
                    matched: true,
                    distance: Some(dist),
                    identity_id: Some(record.id.clone()),
                    label: Some(record.label.clone()),
                }
            }
            other => MatchResult::unknown(other.map(|(dist, _)| dist)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec())
    }

    fn alice_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register("Alice", d(&[0.0, 0.0, 0.0]));
        reg
    }

    #[test]
    fn test_exact_descriptor_matches_with_zero_distance() {
        let mut reg = Registry::new();
        reg.register("Alice", d(&[0.1, 0.2, 0.3]));
        reg.register("Bob", d(&[0.9, 0.8, 0.7]));

        let result = EuclideanMatcher.compare(Some(&d(&[0.9, 0.8, 0.7])), &reg, DEFAULT_TOLERANCE);
        assert!(result.matched);
        assert_eq!(result.label.as_deref(), Some("Bob"));
        assert_eq!(result.distance, Some(0.0));
        assert_eq!(result.identity_id.as_deref(), Some(reg.records()[1].id.as_str()));
    }

    #[test]
    fn test_within_tolerance_matches() {
        let reg = alice_registry();
        let result = EuclideanMatcher.compare(Some(&d(&[0.55, 0.0, 0.0])), &reg, 0.6);
        assert!(result.matched);
        assert_eq!(result.display_label(), "Alice");
        assert!((result.distance.unwrap() - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_beyond_tolerance_is_unknown() {
        let reg = alice_registry();
        let result = EuclideanMatcher.compare(Some(&d(&[0.65, 0.0, 0.0])), &reg, 0.6);
        assert!(!result.matched);
        assert_eq!(result.display_label(), "Unknown");
        assert!((result.distance.unwrap() - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_distance_is_inclusive() {
        let reg = alice_registry();
        // 0.75² + 1.0² = 1.5625 = 1.25², exact in f32
        let query = d(&[0.75, 1.0, 0.0]);
        let result = EuclideanMatcher.compare(Some(&query), &reg, 1.25);
        assert!(result.matched);
        assert_eq!(result.distance, Some(1.25));

        let result = EuclideanMatcher.compare(Some(&query), &reg, 1.2499);
        assert!(!result.matched);
    }

    #[test]
    fn test_boundary_at_computed_distance() {
        let reg = alice_registry();
        let query = d(&[0.3, 0.4, 0.2]);
        let tolerance = query.distance(&reg.records()[0].descriptors[0]).unwrap();
        assert!(EuclideanMatcher.compare(Some(&query), &reg, tolerance).matched);
    }

    #[test]
    fn test_best_of_all_reference_descriptors() {
        let mut reg = Registry::new();
        reg.register("Alice", d(&[5.0, 5.0]));
        reg.register("Bob", d(&[0.4, 0.0]));
        reg.register("Alice", d(&[0.1, 0.0]));

        let result = EuclideanMatcher.compare(Some(&d(&[0.0, 0.0])), &reg, 0.6);
        assert_eq!(result.label.as_deref(), Some("Alice"));
        assert!((result.distance.unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_tie_first_in_registry_order_wins() {
        let mut reg = Registry::new();
        reg.register("First", d(&[1.0, 0.0]));
        reg.register("Second", d(&[-1.0, 0.0]));

        for _ in 0..10 {
            let result = EuclideanMatcher.compare(Some(&d(&[0.0, 0.0])), &reg, 1.0);
            assert_eq!(result.label.as_deref(), Some("First"));
        }
    }

    #[test]
    fn test_missing_query_is_unknown() {
        let result = EuclideanMatcher.compare(None, &alice_registry(), 0.6);
        assert_eq!(result, MatchResult::unknown(None));
    }

    #[test]
    fn test_empty_registry_is_unknown() {
        let result = EuclideanMatcher.compare(Some(&d(&[0.0])), &Registry::new(), 0.6);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
    }

    #[test]
    fn test_incomparable_references_skipped() {
        let mut reg = Registry::new();
        reg.register("Short", d(&[0.0]));
        reg.register("NaN", d(&[f32::NAN, 0.0]));
        reg.register("Alice", d(&[0.2, 0.0]));

        let result = EuclideanMatcher.compare(Some(&d(&[0.0, 0.0])), &reg, 0.6);
        assert_eq!(result.label.as_deref(), Some("Alice"));
    }
}
