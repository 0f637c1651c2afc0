use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use textcam::capture::{
    Frame, FrameMetadata, FrameSink, FrameSource, FrameSourceError, FrameView, PixelFormat,
    SyntheticSource,
};
use textcam::pipeline::{PipelineController, PipelineError, PipelineState};
use textcam::recognition::{recognizer_fn, RecognitionError, RecognitionResult, Recognizer};
use textcam::sink::{ChannelSink, LatestResult};
use textcam::CaptureConfig;

/// Camera driven by the test: frames go out only when `emit` is called.
#[derive(Clone, Default)]
struct ManualCamera {
    state: Arc<Mutex<CameraState>>,
}

#[derive(Default)]
struct CameraState {
    sink: Option<FrameSink>,
    starts: usize,
    stops: usize,
    fail_next_start: Option<FrameSourceError>,
}

impl ManualCamera {
    /// Deliver a frame; false if the camera isn't bound.
    fn emit(&self, frame: Frame) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        match sink {
            Some(sink) => {
                sink.push(frame);
                true
            }
            None => false,
        }
    }

    fn fault(&self, error: FrameSourceError) {
        if let Some(sink) = self.state.lock().unwrap().sink.clone() {
            sink.fault(error);
        }
    }

    fn fail_next_start(&self, error: FrameSourceError) {
        self.state.lock().unwrap().fail_next_start = Some(error);
    }

    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.starts, state.stops)
    }
}

impl FrameSource for ManualCamera {
    fn start(&mut self, sink: FrameSink) -> Result<(), FrameSourceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next_start.take() {
            return Err(error);
        }
        state.starts += 1;
        state.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.sink.take().is_some() {
            state.stops += 1;
        }
    }

    fn name(&self) -> &str {
        "manual"
    }
}

/// Counts release notifications per frame sequence.
#[derive(Clone, Default)]
struct Ledger(Arc<Mutex<HashMap<u64, usize>>>);

impl Ledger {
    fn frame(&self, sequence: u64) -> Frame {
        let ledger = self.clone();
        Frame::new(
            Bytes::from_static(&[0u8; 16]),
            FrameMetadata::new(sequence, 4, 4, PixelFormat::Gray8),
        )
        .with_release(move |sequence| {
            *ledger.0.lock().unwrap().entry(sequence).or_default() += 1;
        })
    }

    fn releases(&self, sequence: u64) -> usize {
        self.0.lock().unwrap().get(&sequence).copied().unwrap_or(0)
    }

    /// Every sequence in `range` released exactly once.
    fn all_released_once(&self, range: std::ops::RangeInclusive<u64>) -> bool {
        let map = self.0.lock().unwrap();
        range.clone().all(|s| map.get(&s) == Some(&1)) && map.len() == range.count()
    }
}

/// Recognizer that records what it saw and takes `delay` per call.
fn slow_recognizer(
    delay: Duration,
    seen: Arc<Mutex<Vec<u64>>>,
) -> impl Recognizer {
    recognizer_fn(move |view: FrameView| {
        seen.lock().unwrap().push(view.meta.sequence);
        async move {
            tokio::time::sleep(delay).await;
            Ok(format!("frame {}", view.meta.sequence))
        }
    })
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn controller<R: Recognizer>(
    camera: &ManualCamera,
    recognizer: R,
) -> (
    PipelineController<ManualCamera, R>,
    flume::Receiver<RecognitionResult>,
) {
    let (sink, results) = ChannelSink::bounded(64);
    let controller = PipelineController::new(
        camera.clone(),
        recognizer,
        Arc::new(sink),
        Duration::from_secs(2),
    );
    (controller, results)
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let camera = ManualCamera::default();
    let (mut pipeline, _results) = controller(&camera, recognizer_fn(|_| async { Ok(String::new()) }));
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    pipeline.stop().await;
    assert_eq!(camera.counts(), (0, 0));

    pipeline.start().unwrap();
    pipeline.start().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(camera.counts(), (1, 0));

    pipeline.stop().await;
    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(camera.counts(), (1, 1));
}

#[tokio::test]
async fn failed_source_start_stays_stopped() {
    let camera = ManualCamera::default();
    let (mut pipeline, _results) = controller(&camera, recognizer_fn(|_| async { Ok(String::new()) }));

    camera.fail_next_start(FrameSourceError::Unavailable("permission denied".into()));
    let err = pipeline.start().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::SourceStart {
            error: FrameSourceError::Unavailable(_),
            ..
        }
    ));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(!camera.emit(Ledger::default().frame(1)));

    // Retrying after the camera becomes available works
    pipeline.start().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    pipeline.stop().await;
}

#[tokio::test]
async fn toggle_after_failed_start_stays_stopped_and_can_retry() {
    let camera = ManualCamera::default();
    let (mut pipeline, _results) = controller(&camera, recognizer_fn(|_| async { Ok(String::new()) }));

    camera.fail_next_start(FrameSourceError::Device("unplugged".into()));
    assert!(pipeline.toggle().await.is_err());
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    assert_eq!(pipeline.toggle().await.unwrap(), PipelineState::Running);
    assert_eq!(pipeline.toggle().await.unwrap(), PipelineState::Stopped);
    assert_eq!(camera.counts(), (1, 1));
}

#[test]
fn start_outside_runtime_is_an_error() {
    let camera = ManualCamera::default();
    let (mut pipeline, _results) = controller(&camera, recognizer_fn(|_| async { Ok(String::new()) }));
    assert!(matches!(pipeline.start(), Err(PipelineError::NoRuntime)));
    assert_eq!(camera.counts(), (0, 0));
}

#[tokio::test]
async fn recognized_text_reaches_display_and_frame_is_released() {
    let camera = ManualCamera::default();
    let display = Arc::new(LatestResult::new());
    let mut pipeline = PipelineController::new(
        camera.clone(),
        recognizer_fn(|_| async { Ok("扫描文本\n".to_string()) }),
        display.clone(),
        Duration::from_secs(1),
    );
    let ledger = Ledger::default();

    pipeline.start().unwrap();
    assert!(camera.emit(ledger.frame(1)));

    eventually(|| display.updates() == 1 && ledger.releases(1) == 1).await;
    assert_eq!(
        display.get().as_deref(),
        Some(&RecognitionResult::Text("扫描文本".into()))
    );

    pipeline.stop().await;
    assert!(ledger.all_released_once(1..=1));
    assert_eq!(pipeline.stats().recognized, 1);
}

#[tokio::test]
async fn failures_do_not_stop_the_pipeline() {
    let camera = ManualCamera::default();
    let (mut pipeline, results) = controller(
        &camera,
        recognizer_fn(|view: FrameView| async move {
            match view.meta.sequence {
                1 => Err(RecognitionError::Backend("engine crashed".into())),
                2 => Ok(String::new()),
                _ => Ok("ok".to_string()),
            }
        }),
    );
    let ledger = Ledger::default();
    pipeline.start().unwrap();

    let mut outcomes = Vec::new();
    for sequence in 1..=3 {
        camera.emit(ledger.frame(sequence));
        outcomes.push(results.recv_async().await.unwrap());
    }
    assert_eq!(
        outcomes,
        vec![
            RecognitionResult::Failure(RecognitionError::Backend("engine crashed".into())),
            RecognitionResult::Empty,
            RecognitionResult::Text("ok".into()),
        ]
    );

    pipeline.stop().await;
    assert!(ledger.all_released_once(1..=3));
}

#[tokio::test]
async fn burst_while_busy_recognizes_only_newest() {
    let camera = ManualCamera::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (mut pipeline, results) = controller(
        &camera,
        slow_recognizer(Duration::from_millis(100), seen.clone()),
    );
    let ledger = Ledger::default();
    pipeline.start().unwrap();

    camera.emit(ledger.frame(1));
    eventually(|| seen.lock().unwrap().len() == 1).await;

    // Worker is busy with frame 1; these pile onto the single slot
    for sequence in 2..=11 {
        camera.emit(ledger.frame(sequence));
    }
    for sequence in 2..=10 {
        assert_eq!(ledger.releases(sequence), 1, "frame {sequence} not released");
    }

    assert_eq!(
        results.recv_async().await.unwrap(),
        RecognitionResult::Text("frame 1".into())
    );
    assert_eq!(
        results.recv_async().await.unwrap(),
        RecognitionResult::Text("frame 11".into())
    );
    assert_eq!(*seen.lock().unwrap(), vec![1, 11]);

    pipeline.stop().await;
    assert!(ledger.all_released_once(1..=11));
    let stats = pipeline.stats();
    assert_eq!(stats.captured, 11);
    assert_eq!(stats.dropped, 9);
    assert_eq!(stats.recognized, 2);
}

#[tokio::test]
async fn nothing_reaches_sink_after_stop() {
    let camera = ManualCamera::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (mut pipeline, results) = controller(
        &camera,
        slow_recognizer(Duration::from_millis(150), seen.clone()),
    );
    let ledger = Ledger::default();
    pipeline.start().unwrap();

    camera.emit(ledger.frame(1));
    eventually(|| seen.lock().unwrap().len() == 1).await;
    // Frame 2 waits in the slot behind the in-flight frame 1
    camera.emit(ledger.frame(2));

    pipeline.stop().await;
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(!camera.emit(ledger.frame(3)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(results.try_recv().is_err());
    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert!(ledger.all_released_once(1..=3));

    let stats = pipeline.stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.recognized, 0);
}

#[tokio::test]
async fn restart_after_stop_processes_new_frames() {
    let camera = ManualCamera::default();
    let (mut pipeline, results) = controller(&camera, recognizer_fn(|_| async { Ok("again".to_string()) }));
    let ledger = Ledger::default();

    assert_eq!(pipeline.toggle().await.unwrap(), PipelineState::Running);
    camera.emit(ledger.frame(1));
    assert_eq!(
        results.recv_async().await.unwrap(),
        RecognitionResult::Text("again".into())
    );
    assert_eq!(pipeline.toggle().await.unwrap(), PipelineState::Stopped);

    assert_eq!(pipeline.toggle().await.unwrap(), PipelineState::Running);
    camera.emit(ledger.frame(2));
    assert_eq!(
        results.recv_async().await.unwrap(),
        RecognitionResult::Text("again".into())
    );
    pipeline.stop().await;

    assert_eq!(camera.counts(), (2, 2));
    assert!(ledger.all_released_once(1..=2));
}

#[tokio::test]
async fn acquisition_faults_are_forwarded() {
    let camera = ManualCamera::default();
    let (mut pipeline, _results) = controller(&camera, recognizer_fn(|_| async { Ok(String::new()) }));
    let faults = pipeline.faults();
    pipeline.start().unwrap();

    camera.fault(FrameSourceError::Device("buffer dequeue failed".into()));
    let fault = tokio::time::timeout(Duration::from_secs(1), faults.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fault, FrameSourceError::Device("buffer dequeue failed".into()));
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(pipeline.stats().faults, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn dropping_running_controller_releases_frames() {
    let camera = ManualCamera::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (mut pipeline, _results) = controller(
        &camera,
        slow_recognizer(Duration::from_secs(10), seen.clone()),
    );
    let ledger = Ledger::default();
    pipeline.start().unwrap();

    camera.emit(ledger.frame(1));
    eventually(|| seen.lock().unwrap().len() == 1).await;
    camera.emit(ledger.frame(2));

    drop(pipeline);
    assert_eq!(camera.counts(), (1, 1));
    assert_eq!(ledger.releases(2), 1);
    eventually(|| ledger.releases(1) == 1).await;
    assert!(ledger.all_released_once(1..=2));
}

#[tokio::test]
async fn dropping_controller_cancels_in_flight_recognition() {
    let camera = ManualCamera::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(Mutex::new(false));
    let recognizer = {
        let (seen, completed) = (seen.clone(), completed.clone());
        recognizer_fn(move |view: FrameView| {
            seen.lock().unwrap().push(view.meta.sequence);
            let completed = completed.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                *completed.lock().unwrap() = true;
                Ok("late".to_string())
            }
        })
    };
    let (mut pipeline, results) = controller(&camera, recognizer);
    let ledger = Ledger::default();
    pipeline.start().unwrap();

    camera.emit(ledger.frame(1));
    eventually(|| seen.lock().unwrap().len() == 1).await;
    drop(pipeline);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!*completed.lock().unwrap());
    assert!(ledger.all_released_once(1..=1));
    assert!(results.try_recv().is_err());
}

#[tokio::test]
async fn synthetic_camera_end_to_end() {
    let display = Arc::new(LatestResult::new());
    let config = CaptureConfig {
        width: 32,
        height: 8,
        fps: 120,
        ..CaptureConfig::default()
    };
    let mut pipeline = PipelineController::new(
        SyntheticSource::new(config),
        recognizer_fn(|view: FrameView| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(format!("{} bytes", view.data.len()))
        }),
        display.clone(),
        Duration::from_secs(1),
    );

    pipeline.start().unwrap();
    eventually(|| display.updates() >= 3).await;
    pipeline.stop().await;

    assert_eq!(
        display.get().as_deref(),
        Some(&RecognitionResult::Text("256 bytes".into()))
    );
    assert_eq!(pipeline.source().outstanding(), 0);
    let stats = pipeline.stats();
    assert!(stats.captured >= stats.consumed);
    assert!(stats.dropped > 0);
}
