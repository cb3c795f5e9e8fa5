use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use hardhat_monitor::ingest::SourceStats;
use hardhat_monitor::preview::DisplaySink;
use hardhat_monitor::{
    run, Bgr, BoundingBox, Detection, DetectorBackend, Frame, FrameAnnotator, FrameSource,
    HardhatClass, MemorySink, NullDisplay, RunOptions, RunSummary, SnapshotPolicy,
    SnapshotWriter, StubBackend, SyntheticSource,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn clip(frames: u64) -> Result<SyntheticSource> {
    let mut source = SyntheticSource::new("stub://clip", WIDTH, HEIGHT, Some(frames))?;
    source.connect()?;
    Ok(source)
}

fn reference_frames(frames: u64) -> Result<Vec<Frame>> {
    let mut source = clip(frames)?;
    let mut out = Vec::new();
    while let Some(frame) = source.next_frame()? {
        out.push(frame);
    }
    Ok(out)
}

fn det(x1: i32, y1: i32, class: HardhatClass, confidence: f32) -> Detection {
    Detection::new(BoundingBox::new(x1, y1, x1 + 100, y1 + 100), class, confidence)
}

#[derive(Default)]
struct CountingDisplay {
    shown: u64,
    closed: bool,
    last: RunSummary,
}

impl DisplaySink for CountingDisplay {
    fn show(&mut self, _frame: &Frame, summary: &RunSummary) -> Result<()> {
        self.shown += 1;
        self.last = *summary;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    snapshots: SnapshotWriter,
    sink: MemorySink,
    display: CountingDisplay,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let snapshots = SnapshotWriter::open(dir.path(), false)?;
        Ok(Self {
            _dir: dir,
            snapshots,
            sink: MemorySink::default(),
            display: CountingDisplay::default(),
        })
    }

    fn run<S: FrameSource, D: DetectorBackend>(
        &mut self,
        source: &mut S,
        detector: &mut D,
        options: &RunOptions,
    ) -> Result<RunSummary> {
        run(
            source,
            detector,
            &FrameAnnotator::default(),
            &mut self.snapshots,
            &mut self.sink,
            &mut self.display,
            options,
        )
    }

    fn snapshot_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(self.snapshots.dir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".png"))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[test]
fn low_confidence_detections_leave_frames_untouched() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut detector = StubBackend::scripted(vec![
        vec![det(50, 50, HardhatClass::NoHardhat, 0.5)],
        vec![det(60, 60, HardhatClass::Hardhat, 0.3)],
    ]);

    let summary = harness.run(&mut clip(2)?, &mut detector, &RunOptions::default())?;

    assert_eq!(summary.detections_drawn, 0);
    assert_eq!(summary.snapshots_written, 0);
    let expected = reference_frames(2)?;
    for (written, original) in harness.sink.frames.iter().zip(&expected) {
        assert_eq!(written.as_bgr(), original.as_bgr());
    }
    assert!(harness.snapshot_names()?.is_empty());
    Ok(())
}

#[test]
fn violations_are_red_and_saved_compliant_is_green_and_not_saved() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut detector = StubBackend::scripted(vec![
        vec![det(100, 100, HardhatClass::NoHardhat, 0.91)],
        vec![det(100, 100, HardhatClass::Hardhat, 0.88)],
    ]);

    let summary = harness.run(&mut clip(2)?, &mut detector, &RunOptions::default())?;

    assert_eq!(summary.violations, 1);
    assert_eq!(summary.snapshots_written, 1);
    assert_eq!(harness.sink.frames[0].pixel(100, 150), Some(Bgr::RED));
    assert_eq!(harness.sink.frames[1].pixel(100, 150), Some(Bgr::GREEN));
    assert_eq!(harness.snapshot_names()?, vec!["no_helmet_0.png".to_string()]);

    let manifest = std::fs::read_to_string(harness.snapshots.dir().join("manifest.jsonl"))?;
    assert_eq!(manifest.lines().count(), 1);
    Ok(())
}

#[test]
fn snapshot_names_are_unique_and_sequential() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut detector = StubBackend::scripted(vec![
        vec![
            det(10, 40, HardhatClass::NoHardhat, 0.9),
            det(150, 40, HardhatClass::NoHardhat, 0.8),
        ],
        vec![],
        vec![det(10, 40, HardhatClass::NoHardhat, 0.7)],
    ]);

    let summary = harness.run(&mut clip(3)?, &mut detector, &RunOptions::default())?;

    assert_eq!(summary.snapshots_written, 3);
    assert_eq!(harness.snapshots.next_number(), 3);
    let names = harness.snapshot_names()?;
    assert_eq!(
        names,
        vec!["no_helmet_0.png", "no_helmet_1.png", "no_helmet_2.png"]
    );
    Ok(())
}

#[test]
fn per_frame_policy_limits_snapshots() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut detector = StubBackend::scripted(vec![vec![
        det(10, 40, HardhatClass::NoHardhat, 0.9),
        det(150, 40, HardhatClass::NoHardhat, 0.8),
    ]]);
    let annotator = FrameAnnotator::new(0.5, 3, SnapshotPolicy::PerFrame);

    let summary = run(
        &mut clip(1)?,
        &mut detector,
        &annotator,
        &mut harness.snapshots,
        &mut harness.sink,
        &mut NullDisplay,
        &RunOptions::default(),
    )?;
    assert_eq!(summary.violations, 2);
    assert_eq!(summary.snapshots_written, 1);
    Ok(())
}

#[test]
fn loop_ends_when_source_is_exhausted() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut source = clip(5)?;

    let summary = harness.run(&mut source, &mut StubBackend::seeded(7), &RunOptions::default())?;

    assert_eq!(summary.frames_processed, 5);
    assert_eq!(harness.sink.frames.len(), 5);
    assert!(harness.sink.finished);
    assert_eq!(harness.display.shown, 5);
    assert!(harness.display.closed);
    assert_eq!(harness.display.last, summary);
    assert_eq!(source.stats().frames_captured, 5);
    Ok(())
}

#[test]
fn max_frames_and_stop_flag_end_the_run() -> Result<()> {
    let mut harness = Harness::new()?;
    let options = RunOptions {
        max_frames: Some(3),
        stop: None,
    };
    let summary = harness.run(&mut clip(10)?, &mut StubBackend::default(), &options)?;
    assert_eq!(summary.frames_processed, 3);

    let mut harness = Harness::new()?;
    let options = RunOptions {
        max_frames: None,
        stop: Some(Arc::new(AtomicBool::new(true))),
    };
    let summary = harness.run(&mut clip(10)?, &mut StubBackend::default(), &options)?;
    assert_eq!(summary.frames_processed, 0);
    assert!(harness.sink.finished);
    Ok(())
}

/// Yields `good` frames, then fails every read.
struct FlakySource {
    inner: SyntheticSource,
    good: u64,
    released: bool,
}

impl FrameSource for FlakySource {
    fn connect(&mut self) -> Result<()> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.inner.stats().frames_captured >= self.good {
            return Err(anyhow!("device unplugged"));
        }
        self.inner.next_frame()
    }

    fn release(&mut self) {
        self.released = true;
        self.inner.release();
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

#[test]
fn read_error_ends_run_like_end_of_stream() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut source = FlakySource {
        inner: clip(10)?,
        good: 2,
        released: false,
    };

    let summary = harness.run(&mut source, &mut StubBackend::default(), &RunOptions::default())?;

    assert_eq!(summary.frames_processed, 2);
    assert!(source.released);
    assert!(harness.sink.finished);
    Ok(())
}

struct BrokenDetector;

impl DetectorBackend for BrokenDetector {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Err(anyhow!("inference failed"))
    }
}

#[test]
fn detector_error_propagates_after_release() -> Result<()> {
    let mut harness = Harness::new()?;
    let mut source = FlakySource {
        inner: clip(10)?,
        good: 10,
        released: false,
    };

    let err = harness
        .run(&mut source, &mut BrokenDetector, &RunOptions::default())
        .unwrap_err();

    assert!(err.to_string().contains("inference failed"));
    assert!(source.released);
    assert!(harness.sink.finished);
    assert!(harness.display.closed);
    Ok(())
}
