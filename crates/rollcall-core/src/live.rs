//! Live loop: frame source → annotations → presentation sink.

use crate::extractor::DescriptorExtractor;
use crate::matcher::{EuclideanMatcher, DEFAULT_TOLERANCE};
use crate::pipeline::{match_faces, record_first_seen, MatchContext};
use crate::registry::Registry;
use crate::tracker::SessionTracker;
use crate::types::{Annotation, TrackingEntry};
use image::imageops;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("frame read failed: {0}")]
pub struct FrameSourceError(pub String);

/// Producer of RGB frames.
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameSourceError>;
}

/// Whether the loop should keep going after a frame was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Quit,
}

/// Consumer of annotated frames (display, log, network...).
pub trait PresentationSink {
    fn present(&mut self, frame: &RgbImage, annotations: &[Annotation]) -> SinkControl;
}

/// Shared flag that asks a running loop to stop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a single [`LiveLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame was annotated and presented.
    Presented { faces: usize },
    /// The sink asked to quit after presenting.
    Quit { faces: usize },
    /// Stop was requested; any in-flight frame was abandoned unpresented.
    Stopped,
    /// The source has no more frames.
    EndOfStream,
    /// The source failed; the loop ends.
    SourceFailed,
}

/// Why [`LiveLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    Quit,
    EndOfStream,
    SourceFailed,
}

/// Totals for one run, plus the attendance it produced.
#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub frames: u64,
    pub faces: u64,
    pub reason: StopReason,
    pub attendance: Vec<TrackingEntry>,
}

/// Tunables for the loop.
#[derive(Debug, Clone, Copy)]
pub struct LiveOptions {
    pub tolerance: f32,
    /// Flip frames horizontally before processing (selfie view).
    pub mirror: bool,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            mirror: true,
        }
    }
}

/// Drives Extractor → Matcher → Tracker over a frame source.
///
/// The registry is shared and may be replaced between frames; each frame's
/// faces are matched under one read lock, taken after extraction. The tracker
/// is this run's first-seen state.
pub struct LiveLoop<E: DescriptorExtractor> {
    extractor: E,
    matcher: EuclideanMatcher,
    registry: Arc<RwLock<Registry>>,
    tracker: Arc<SessionTracker>,
    options: LiveOptions,
    frames: u64,
    faces: u64,
}

impl<E: DescriptorExtractor> LiveLoop<E> {
    pub fn new(
        extractor: E,
        registry: Arc<RwLock<Registry>>,
        tracker: Arc<SessionTracker>,
        options: LiveOptions,
    ) -> Self {
        Self {
            extractor,
            matcher: EuclideanMatcher,
            registry,
            tracker,
            options,
            frames: 0,
            faces: 0,
        }
    }

    /// Extractor access for work done between frames (e.g. registration).
    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Pull, annotate and present one frame.
    pub fn step(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn PresentationSink,
        stop: &StopSignal,
    ) -> Step {
        if stop.is_stopped() {
            return Step::Stopped;
        }

        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(frames = self.frames, "frame source exhausted");
                return Step::EndOfStream;
            }
            Err(e) => {
                tracing::warn!(error = %e, frames = self.frames, "frame read failed; ending loop");
                return Step::SourceFailed;
            }
        };

        let now = chrono::Local::now();

        if self.options.mirror {
            imageops::flip_horizontal_in_place(&mut frame);
        }

        let faces = self.extractor.extract(&frame);
        let mut annotations = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let ctx = MatchContext {
                matcher: &self.matcher,
                registry: &registry,
                tolerance: self.options.tolerance,
            };
            match_faces(faces, &ctx)
        };

        // An abandoned frame must leave no first-seen entries behind.
        if stop.is_stopped() {
            tracing::debug!("stop requested mid-frame; abandoning annotations");
            return Step::Stopped;
        }
        record_first_seen(&self.tracker, &mut annotations, now);

        self.frames += 1;
        self.faces += annotations.len() as u64;
        tracing::debug!(frame = self.frames, faces = annotations.len(), "frame annotated");

        let faces = annotations.len();
        match sink.present(&frame, &annotations) {
            SinkControl::Continue => Step::Presented { faces },
            SinkControl::Quit => Step::Quit { faces },
        }
    }

    /// Run until stopped, quit, end of stream, or a failed read.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn PresentationSink,
        stop: &StopSignal,
    ) -> LoopSummary {
        self.run_with(source, sink, stop, |_| {})
    }

    /// Like [`LiveLoop::run`], calling `between_frames` before every frame is
    /// pulled. Work done there (registration, reloads) is visible to the next
    /// frame.
    pub fn run_with(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn PresentationSink,
        stop: &StopSignal,
        mut between_frames: impl FnMut(&mut Self),
    ) -> LoopSummary {
        tracing::info!(
            tolerance = self.options.tolerance,
            mirror = self.options.mirror,
            "live loop started"
        );
        let reason = loop {
            between_frames(self);
            match self.step(source, sink, stop) {
                Step::Presented { .. } => continue,
                Step::Quit { .. } => break StopReason::Quit,
                Step::Stopped => break StopReason::Stopped,
                Step::EndOfStream => break StopReason::EndOfStream,
                Step::SourceFailed => break StopReason::SourceFailed,
            }
        };
        let summary = self.summary(reason);
        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            present = summary.attendance.len(),
            ?reason,
            "live loop finished"
        );
        summary
    }

    pub fn summary(&self, reason: StopReason) -> LoopSummary {
        LoopSummary {
            frames: self.frames,
            faces: self.faces,
            reason,
            attendance: self.tracker.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{frame_with_faces, PixelExtractor};
    use crate::types::{Descriptor, DetectedFace};
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Result<Option<RgbImage>, FrameSourceError>>);

    impl ScriptedSource {
        fn frames(frames: Vec<RgbImage>) -> Self {
            Self(frames.into_iter().map(|f| Ok(Some(f))).collect())
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameSourceError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<Annotation>>,
        quit_after: Option<usize>,
        stop_on_present: Option<StopSignal>,
    }

    impl PresentationSink for RecordingSink {
        fn present(&mut self, _frame: &RgbImage, annotations: &[Annotation]) -> SinkControl {
            self.frames.push(annotations.to_vec());
            if let Some(stop) = &self.stop_on_present {
                stop.stop();
            }
            match self.quit_after {
                Some(n) if self.frames.len() >= n => SinkControl::Quit,
                _ => SinkControl::Continue,
            }
        }
    }

    /// Raises the stop signal while the frame is being analysed.
    struct StoppingExtractor(StopSignal);

    impl DescriptorExtractor for StoppingExtractor {
        fn extract(&mut self, frame: &RgbImage) -> Vec<DetectedFace> {
            self.0.stop();
            PixelExtractor.extract(frame)
        }
    }

    fn live_loop(mirror: bool) -> LiveLoop<PixelExtractor> {
        let mut reg = Registry::new();
        reg.register("Alice", Descriptor::new(vec![1.0, 0.0]));
        LiveLoop::new(
            PixelExtractor,
            Arc::new(RwLock::new(reg)),
            Arc::new(SessionTracker::new()),
            LiveOptions { tolerance: 0.6, mirror },
        )
    }

    #[test]
    fn test_runs_to_end_of_stream() {
        let mut live = live_loop(false);
        let mut source = ScriptedSource::frames(vec![
            frame_with_faces(&[(100, 0)]),
            frame_with_faces(&[]),
            frame_with_faces(&[(100, 0), (10, 200)]),
        ]);
        let mut sink = RecordingSink::default();

        let summary = live.run(&mut source, &mut sink, &StopSignal::new());

        assert_eq!(summary.reason, StopReason::EndOfStream);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.faces, 3);
        assert!(sink.frames[1].is_empty());
        assert_eq!(sink.frames[2][1].text(), "Unknown");
        assert!(sink.frames[0][0].text().starts_with("Alice "));
        assert_eq!(sink.frames[0][0].first_seen, sink.frames[2][0].first_seen);
        assert_eq!(summary.attendance.len(), 1);
        assert_eq!(summary.attendance[0].label, "Alice");
    }

    #[test]
    fn test_failed_read_ends_loop_cleanly() {
        let mut live = live_loop(false);
        let mut source = ScriptedSource(VecDeque::from(vec![
            Ok(Some(frame_with_faces(&[(100, 0)]))),
            Err(FrameSourceError("device unplugged".into())),
            Ok(Some(frame_with_faces(&[(100, 0)]))),
        ]));
        let mut sink = RecordingSink::default();

        let summary = live.run(&mut source, &mut sink, &StopSignal::new());
        assert_eq!(summary.reason, StopReason::SourceFailed);
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_sink_quit_stops_loop() {
        let mut live = live_loop(false);
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[]); 5]);
        let mut sink = RecordingSink { quit_after: Some(2), ..Default::default() };

        let summary = live.run(&mut source, &mut sink, &StopSignal::new());
        assert_eq!(summary.reason, StopReason::Quit);
        assert_eq!(summary.frames, 2);
    }

    #[test]
    fn test_stop_signal_prevents_further_frames() {
        let mut live = live_loop(false);
        let stop = StopSignal::new();
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[]); 5]);
        let mut sink = RecordingSink { stop_on_present: Some(stop.clone()), ..Default::default() };

        let summary = live.run(&mut source, &mut sink, &stop);
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_stopped_before_start_reads_nothing() {
        let mut live = live_loop(false);
        let stop = StopSignal::new();
        stop.stop();
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[(100, 0)])]);
        let mut sink = RecordingSink::default();

        assert_eq!(live.step(&mut source, &mut sink, &stop), Step::Stopped);
        assert_eq!(source.0.len(), 1);
        assert!(sink.frames.is_empty());
        assert!(live.tracker().is_empty());
    }

    #[test]
    fn test_mirror_flips_before_extraction() {
        // Face encoded at the right edge moves to x = 0 after mirroring.
        let mut frame = RgbImage::new(3, 2);
        frame.put_pixel(2, 0, image::Rgb([100, 0, 0]));

        let mut live = live_loop(true);
        let mut source = ScriptedSource::frames(vec![frame]);
        let mut sink = RecordingSink::default();
        live.step(&mut source, &mut sink, &StopSignal::new());

        assert_eq!(sink.frames[0].len(), 1);
        assert_eq!(sink.frames[0][0].label.as_deref(), Some("Alice"));
        assert_eq!(sink.frames[0][0].bbox.x, 0.0);
    }

    #[test]
    fn test_registry_updates_visible_next_frame() {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let mut live = LiveLoop::new(
            PixelExtractor,
            Arc::clone(&registry),
            Arc::new(SessionTracker::new()),
            LiveOptions { tolerance: 0.6, mirror: false },
        );
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[(100, 0)]); 2]);
        let mut sink = RecordingSink::default();
        let stop = StopSignal::new();

        live.step(&mut source, &mut sink, &stop);
        registry.write().unwrap().register("Alice", Descriptor::new(vec![1.0, 0.0]));
        live.step(&mut source, &mut sink, &stop);

        assert_eq!(sink.frames[0][0].label, None);
        assert_eq!(sink.frames[1][0].label.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_stop_during_extraction_abandons_frame() {
        let stop = StopSignal::new();
        let mut reg = Registry::new();
        reg.register("Alice", Descriptor::new(vec![1.0, 0.0]));
        let mut live = LiveLoop::new(
            StoppingExtractor(stop.clone()),
            Arc::new(RwLock::new(reg)),
            Arc::new(SessionTracker::new()),
            LiveOptions { tolerance: 0.6, mirror: false },
        );
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[(100, 0)])]);
        let mut sink = RecordingSink::default();

        assert_eq!(live.step(&mut source, &mut sink, &stop), Step::Stopped);
        assert!(sink.frames.is_empty());
        assert!(live.tracker().is_empty());
        assert_eq!(live.tracker().first_seen("Alice"), None);
    }

    #[test]
    fn test_between_frames_runs_before_each_frame() {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let mut live = LiveLoop::new(
            PixelExtractor,
            Arc::clone(&registry),
            Arc::new(SessionTracker::new()),
            LiveOptions { tolerance: 0.6, mirror: false },
        );
        let mut source = ScriptedSource::frames(vec![frame_with_faces(&[(100, 0)]); 2]);
        let mut sink = RecordingSink::default();
        let mut calls = 0;

        let summary = live.run_with(&mut source, &mut sink, &StopSignal::new(), |_| {
            calls += 1;
            if calls == 2 {
                registry.write().unwrap().register("Alice", Descriptor::new(vec![1.0, 0.0]));
            }
        });

        // Two frames plus the call that finds the stream exhausted.
        assert_eq!(calls, 3);
        assert_eq!(summary.frames, 2);
        assert_eq!(sink.frames[0][0].label, None);
        assert_eq!(sink.frames[1][0].label.as_deref(), Some("Alice"));
        assert_eq!(summary.attendance.len(), 1);
    }
}
