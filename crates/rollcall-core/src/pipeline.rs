//! Frame → annotations transform: Extractor → Matcher → Tracker.
//!
//! Matching and first-seen recording are separate steps so a caller can
//! abandon a matched frame without touching the tracker.

use crate::extractor::DescriptorExtractor;
use crate::matcher::Matcher;
use crate::registry::Registry;
use crate::tracker::SessionTracker;
use crate::types::{Annotation, DetectedFace};
use chrono::{DateTime, Local};
use image::RgbImage;

/// Everything matching needs besides the faces.
pub struct MatchContext<'a> {
    pub matcher: &'a dyn Matcher,
    pub registry: &'a Registry,
    pub tolerance: f32,
}

/// Label every face, in detection order. First-seen times are left unset.
pub fn match_faces(faces: Vec<DetectedFace>, ctx: &MatchContext<'_>) -> Vec<Annotation> {
    faces
        .into_iter()
        .map(|face| {
            let result = ctx.matcher.compare(Some(&face.descriptor), ctx.registry, ctx.tolerance);
            Annotation {
                bbox: face.bbox,
                label: result.label,
                distance: result.distance,
                first_seen: None,
            }
        })
        .collect()
}

/// Fill in first-seen times for matched faces, recording `now` for labels the
/// tracker has not seen yet.
pub fn record_first_seen(tracker: &SessionTracker, annotations: &mut [Annotation], now: DateTime<Local>) {
    for annotation in annotations {
        if let Some(label) = annotation.label.as_deref() {
            annotation.first_seen = Some(tracker.record_if_first_seen(label, now));
        }
    }
}

/// Annotate every face in `frame`: extract, match, then record first
/// sightings. A frame without faces yields an empty list.
pub fn annotate_frame(
    extractor: &mut dyn DescriptorExtractor,
    ctx: &MatchContext<'_>,
    tracker: &SessionTracker,
    frame: &RgbImage,
    now: DateTime<Local>,
) -> Vec<Annotation> {
    let mut annotations = match_faces(extractor.extract(frame), ctx);
    record_first_seen(tracker, &mut annotations, now);
    annotations
}


#[cfg(test)]
mod tests {
    use super::testing::{frame_with_faces, PixelExtractor};
    use super::*;
    use crate::matcher::EuclideanMatcher;
    use crate::types::Descriptor;
    use chrono::Duration;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.register("Alice", Descriptor::new(vec![1.0, 0.0]));
        reg.register("Bob", Descriptor::new(vec![2.0, 0.0]));
        reg
    }

    #[test]
    fn test_zero_faces_yields_empty_annotations() {
        let reg = registry();
        let tracker = SessionTracker::new();
        let ctx = MatchContext { matcher: &EuclideanMatcher, registry: &reg, tolerance: 0.6 };

        let anns = annotate_frame(&mut PixelExtractor, &ctx, &tracker, &frame_with_faces(&[]), Local::now());
        assert!(anns.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_annotations_follow_detection_order() {
        let reg = registry();
        let tracker = SessionTracker::new();
        let ctx = MatchContext { matcher: &EuclideanMatcher, registry: &reg, tolerance: 0.6 };
        let now = Local::now();

        // Bob, a stranger, then Alice
        let frame = frame_with_faces(&[(200, 0), (50, 250), (100, 0)]);
        let anns = annotate_frame(&mut PixelExtractor, &ctx, &tracker, &frame, now);

        let labels: Vec<_> = anns.iter().map(|a| a.label.as_deref()).collect();
        assert_eq!(labels, vec![Some("Bob"), None, Some("Alice")]);
        assert_eq!(anns[0].first_seen, Some(now));
        assert_eq!(anns[1].first_seen, None);
        assert_eq!(anns[1].text(), "Unknown");
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_first_seen_persists_across_frames() {
        let reg = registry();
        let tracker = SessionTracker::new();
        let ctx = MatchContext { matcher: &EuclideanMatcher, registry: &reg, tolerance: 0.6 };
        let t0 = Local::now();
        let t1 = t0 + Duration::seconds(60);

        let frame = frame_with_faces(&[(100, 0)]);
        annotate_frame(&mut PixelExtractor, &ctx, &tracker, &frame, t0);
        let later = annotate_frame(&mut PixelExtractor, &ctx, &tracker, &frame, t1);

        assert_eq!(later[0].first_seen, Some(t0));
    }

    #[test]
    fn test_same_identity_twice_in_one_frame() {
        let reg = registry();
        let tracker = SessionTracker::new();
        let ctx = MatchContext { matcher: &EuclideanMatcher, registry: &reg, tolerance: 0.6 };
        let now = Local::now();

        let anns = annotate_frame(&mut PixelExtractor, &ctx, &tracker, &frame_with_faces(&[(100, 0), (105, 0)]), now);
        assert_eq!(anns.len(), 2);
        assert_eq!(anns[0].first_seen, anns[1].first_seen);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_matching_alone_leaves_tracker_untouched() {
        let reg = registry();
        let tracker = SessionTracker::new();
        let ctx = MatchContext { matcher: &EuclideanMatcher, registry: &reg, tolerance: 0.6 };

        let faces = PixelExtractor.extract(&frame_with_faces(&[(100, 0), (200, 0)]));
        let mut anns = match_faces(faces, &ctx);
        assert_eq!(anns[0].label.as_deref(), Some("Alice"));
        assert!(anns.iter().all(|a| a.first_seen.is_none()));
        assert!(tracker.is_empty());

        let now = Local::now();
        record_first_seen(&tracker, &mut anns, now);
        assert_eq!(anns[1].first_seen, Some(now));
        assert_eq!(tracker.len(), 2);
    }
}
