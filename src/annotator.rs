//! Frame annotator loop.
//!
//! Reads frames from a `FrameSource`, runs the detector, draws labelled boxes
//! for detections above the display threshold, snapshots violations and
//! pushes the annotated frame to the video sink and the display sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::annotate::{draw_rect, put_text_rect, LabelStyle};
use crate::config::MonitorConfig;
use crate::detect::{Detection, DetectorBackend, HardhatClass};
use crate::frame::{Bgr, Frame};
use crate::ingest::FrameSource;
use crate::output::VideoSink;
use crate::preview::DisplaySink;
use crate::snapshot::{SnapshotPolicy, SnapshotRecord, SnapshotWriter};

/// Labels are never anchored above this row so the text box stays visible.
pub const MIN_LABEL_Y: i32 = 35;

/// Counters for one run of the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub detections_drawn: u64,
    pub violations: u64,
    pub snapshots_written: u64,
}

impl RunSummary {
    fn record(&mut self, report: &FrameReport) {
        self.frames_processed += 1;
        self.detections_drawn += report.drawn;
        self.violations += report.violations;
        self.snapshots_written += report.snapshots.len() as u64;
    }
}

/// What happened to a single frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub drawn: u64,
    pub violations: u64,
    pub snapshots: Vec<SnapshotRecord>,
}

/// Loop controls that are not part of the annotation itself.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Checked once per iteration; set to end the run like end-of-stream.
    pub stop: Option<Arc<AtomicBool>>,
}

impl RunOptions {
    fn should_stop(&self, frames: u64) -> bool {
        if self.max_frames.is_some_and(|max| frames >= max) {
            return true;
        }
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    confidence_threshold: f32,
    box_thickness: u32,
    style: LabelStyle,
    policy: SnapshotPolicy,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            box_thickness: 3,
            style: LabelStyle::default(),
            policy: SnapshotPolicy::PerDetection,
        }
    }
}

impl FrameAnnotator {
    pub fn new(confidence_threshold: f32, box_thickness: u32, policy: SnapshotPolicy) -> Self {
        Self {
            confidence_threshold,
            box_thickness,
            policy,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(
            cfg.annotate.confidence_threshold,
            cfg.annotate.box_thickness,
            cfg.snapshots.policy,
        )
    }

    /// A detection is drawn only when its rounded confidence is strictly
    /// above the threshold.
    pub fn is_displayed(&self, detection: &Detection) -> bool {
        detection.display_confidence() > self.confidence_threshold
    }

    /// Annotate `frame` in place.
    ///
    /// Detections are handled in order. A violation is snapshotted before its
    /// own box is drawn, so the image carries earlier boxes of the same frame
    /// only.
    pub fn annotate(
        &self,
        frame: &mut Frame,
        detections: &[Detection],
        snapshots: &mut SnapshotWriter,
    ) -> Result<FrameReport> {
        let mut report = FrameReport::default();
        for detection in detections.iter().filter(|d| self.is_displayed(d)) {
            let color = class_color(detection.class);
            if detection.class.is_violation() {
                report.violations += 1;
                let take = match self.policy {
                    SnapshotPolicy::PerDetection => true,
                    SnapshotPolicy::PerFrame => report.snapshots.is_empty(),
                };
                if take {
                    report.snapshots.push(snapshots.save(frame, detection)?);
                }
            }

            let bbox = &detection.bbox;
            put_text_rect(
                frame,
                &label_text(detection),
                (bbox.x1.max(0), bbox.y1.max(MIN_LABEL_Y)),
                color,
                &self.style,
            );
            draw_rect(frame, bbox, color, self.box_thickness);
            report.drawn += 1;
        }
        Ok(report)
    }
}

/// Red for violations, green otherwise.
pub fn class_color(class: HardhatClass) -> Bgr {
    if class.is_violation() {
        Bgr::RED
    } else {
        Bgr::GREEN
    }
}

/// `"<class> <confidence>"` with the confidence rounded up to two decimals.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} {:.2}",
        detection.class.label(),
        detection.display_confidence()
    )
}

/// Drain `source` through the detector and annotator into `sink` and
/// `display`.
///
/// The source must already be connected. Whatever the outcome, the source
/// is released, the sink finished and the display closed before returning.
/// A failed read ends the run like end-of-stream.
pub fn run<S, D, V, P>(
    source: &mut S,
    detector: &mut D,
    annotator: &FrameAnnotator,
    snapshots: &mut SnapshotWriter,
    sink: &mut V,
    display: &mut P,
    options: &RunOptions,
) -> Result<RunSummary>
where
    S: FrameSource + ?Sized,
    D: DetectorBackend + ?Sized,
    V: VideoSink + ?Sized,
    P: DisplaySink + ?Sized,
{
    let mut summary = RunSummary::default();
    let outcome = drive(
        source,
        detector,
        annotator,
        snapshots,
        sink,
        display,
        options,
        &mut summary,
    );

    source.release();
    let finished = sink.finish();
    display.close();

    match (outcome, finished) {
        (Err(err), finished) => {
            if let Err(finish_err) = finished {
                log::warn!("output sink finish failed after error: {}", finish_err);
            }
            Err(err)
        }
        (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => {
            log::info!(
                "run finished: {} frames, {} detections drawn, {} violations, {} snapshots",
                summary.frames_processed,
                summary.detections_drawn,
                summary.violations,
                summary.snapshots_written
            );
            Ok(summary)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn drive<S, D, V, P>(
    source: &mut S,
    detector: &mut D,
    annotator: &FrameAnnotator,
    snapshots: &mut SnapshotWriter,
    sink: &mut V,
    display: &mut P,
    options: &RunOptions,
    summary: &mut RunSummary,
) -> Result<()>
where
    S: FrameSource + ?Sized,
    D: DetectorBackend + ?Sized,
    V: VideoSink + ?Sized,
    P: DisplaySink + ?Sized,
{
    loop {
        if options.should_stop(summary.frames_processed) {
            log::info!("stop requested after {} frames", summary.frames_processed);
            return Ok(());
        }
        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("source exhausted after {} frames", summary.frames_processed);
                return Ok(());
            }
            Err(err) => {
                log::warn!("frame read failed, ending run: {:#}", err);
                return Ok(());
            }
        };

        let detections = detector.detect(&frame)?;
        let report = annotator.annotate(&mut frame, &detections, snapshots)?;
        log::debug!(
            "frame {}: {} detections, {} drawn, {} violations",
            frame.index(),
            detections.len(),
            report.drawn,
            report.violations
        );
        summary.record(&report);

        sink.write_frame(&frame)?;
        display.show(&frame, summary)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(class: HardhatClass, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(10, 50, 40, 80), class, confidence)
    }

    #[test]
    fn threshold_applies_to_rounded_confidence() {
        let annotator = FrameAnnotator::default();
        assert!(!annotator.is_displayed(&det(HardhatClass::Hardhat, 0.5)));
        assert!(!annotator.is_displayed(&det(HardhatClass::Hardhat, 0.495)));
        assert!(annotator.is_displayed(&det(HardhatClass::Hardhat, 0.501)));
    }

    #[test]
    fn label_shows_two_decimals() {
        assert_eq!(label_text(&det(HardhatClass::NoHardhat, 0.912)), "NO-Hardhat 0.92");
        assert_eq!(label_text(&det(HardhatClass::Hardhat, 0.7)), "Hardhat 0.70");
    }

    #[test]
    fn snapshot_is_taken_before_the_violating_box() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SnapshotWriter::open(dir.path(), false)?;
        let mut frame = Frame::filled(100, 100, Bgr::BLACK, 0)?;
        let annotator = FrameAnnotator::default();

        let report = annotator.annotate(
            &mut frame,
            &[det(HardhatClass::NoHardhat, 0.9)],
            &mut writer,
        )?;
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(frame.pixel(10, 65), Some(Bgr::RED));

        let saved = image::open(writer.path_for(0))?.to_rgb8();
        assert_eq!(saved.get_pixel(10, 65).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn per_frame_policy_saves_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SnapshotWriter::open(dir.path(), false)?;
        let mut frame = Frame::filled(100, 100, Bgr::BLACK, 0)?;
        let annotator = FrameAnnotator::new(0.5, 3, SnapshotPolicy::PerFrame);

        let report = annotator.annotate(
            &mut frame,
            &[det(HardhatClass::NoHardhat, 0.9), det(HardhatClass::NoHardhat, 0.8)],
            &mut writer,
        )?;
        assert_eq!(report.violations, 2);
        assert_eq!(report.snapshots.len(), 1);
        Ok(())
    }

    #[test]
    fn label_is_kept_below_the_top_margin() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = SnapshotWriter::open(dir.path(), false)?;
        let mut frame = Frame::filled(100, 100, Bgr::BLACK, 0)?;
        let near_top = Detection::new(BoundingBox::new(20, 2, 60, 90), HardhatClass::Hardhat, 0.9);

        FrameAnnotator::default().annotate(&mut frame, &[near_top], &mut writer)?;
        // Label box spans rows 35-8-5 ..= 35+5 at x = 20-5.
        assert_eq!(frame.pixel(15, 22), Some(Bgr::GREEN));
        assert_eq!(frame.pixel(15, 40), Some(Bgr::GREEN));
        assert_eq!(frame.pixel(15, 41), Some(Bgr::BLACK));
        Ok(())
    }
}
