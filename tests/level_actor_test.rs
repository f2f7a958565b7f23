//! End-to-end tests of the level actor driven by a mock camera.

mod common;

use common::*;
use async_trait::async_trait;
use laser_level::acquisition::{SessionMode, SessionState};
use laser_level::actor;
use laser_level::camera::{CameraRegistry, FrameSource, MockCamera};
use laser_level::config::Settings;
use laser_level::error::{AppResult, LevelError};
use laser_level::frame::Frame;
use laser_level::messages::LevelEvent;
use laser_level::units::DisplayUnit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::timeout;

#[tokio::test]
async fn test_zero_then_samples_along_a_straight_slope() {
    let settings = test_settings(5);
    let (level, task, laser) = start_level(&settings).await;

    let zero = level.acquire(SessionMode::Zeroing).await.unwrap();
    assert!(zero.was_zeroing);
    assert!(zero.latest_sample.is_none());
    assert!((zero.value - 24.0 * MM_PER_PX).abs() < TOLERANCE);

    for (i, row) in [24.0, 26.0, 28.0].into_iter().enumerate() {
        move_line(&laser, row).await;
        let done = level.acquire(SessionMode::SAMPLE).await.unwrap();
        assert!(!done.was_zeroing);
        let sample = done.latest_sample.unwrap();
        assert!((sample.y - (row - 24.0) * MM_PER_PX).abs() < TOLERANCE, "sample {}", i);
    }

    let snapshot = level.snapshot();
    assert_eq!(snapshot.samples.len(), 3);
    for sample in snapshot.samples.iter() {
        assert!(sample.lin_y_error.abs() < TOLERANCE);
        assert!(sample.shim.abs() < TOLERANCE);
        assert!(sample.scrape.abs() < TOLERANCE);
    }

    // A dip breaks the line; residuals still sum to zero.
    move_line(&laser, 24.0).await;
    level.acquire(SessionMode::SAMPLE).await.unwrap();
    let snapshot = level.snapshot();
    let residual: f64 = snapshot.samples.iter().map(|s| s.lin_y_error).sum();
    assert!(residual.abs() < TOLERANCE);
    let last = snapshot.samples[3];
    assert!(last.shim > 0.0);
    assert_eq!(last.scrape, 0.0);
    assert_eq!(snapshot.stats.unwrap().count, 4);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_zeroing_clears_samples() {
    let settings = test_settings(3);
    let (level, task, laser) = start_level(&settings).await;

    level.acquire(SessionMode::Zeroing).await.unwrap();
    move_line(&laser, 30.0).await;
    level.acquire(SessionMode::SAMPLE).await.unwrap();
    level.acquire(SessionMode::SAMPLE).await.unwrap();
    assert_eq!(level.snapshot().samples.len(), 2);

    let zero = level.acquire(SessionMode::Zeroing).await.unwrap();
    let snapshot = level.snapshot();
    assert!(snapshot.samples.is_empty());
    assert_eq!(snapshot.zero.value(), Some(zero.value));
    assert!((zero.value - 30.0 * MM_PER_PX).abs() < TOLERANCE);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_start_while_accumulating_is_rejected() {
    let settings = test_settings(5);
    let (level, task, laser) = start_level(&settings).await;

    // No line, so the session cannot progress.
    laser.set_enabled(None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    level.zero().await.unwrap();

    let err = level.start_sample().await.unwrap_err();
    assert!(matches!(err, LevelError::AcquisitionConflict));
    let err = level.acquire(SessionMode::Zeroing).await.unwrap_err();
    assert!(matches!(err, LevelError::AcquisitionConflict));

    let snapshot = level.snapshot();
    assert_eq!(snapshot.session, SessionState::Accumulating);
    let progress = snapshot.progress.unwrap();
    assert_eq!(progress.collected, 0);
    assert_eq!(progress.target, 5);

    // Signal returns and the pending session completes.
    let mut events = level.subscribe();
    laser.set_enabled(Some(24.0)).await;
    let completion = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(LevelEvent::Completed(done)) = events.recv().await {
                return done;
            }
        }
    })
    .await
    .unwrap();
    assert!(completion.was_zeroing);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_progress_events_count_up_to_target() {
    let settings = test_settings(4);
    let (level, task, _laser) = start_level(&settings).await;
    let mut events = level.subscribe();

    level.acquire(SessionMode::Zeroing).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            LevelEvent::Progress { progress, .. } => seen.push(progress.collected),
            LevelEvent::Completed(_) => break,
            _ => {}
        }
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_camera_loss_aborts_without_committing() {
    let settings = test_settings(10);
    let mut registry = CameraRegistry::new();
    registry.register("flaky", || {
        Box::new(
            MockCamera::new(WIDTH, HEIGHT)
                .with_frame_interval(Duration::from_millis(1))
                .with_disconnect_after(3),
        )
    });
    let (level, task) = actor::spawn(&settings, registry);
    let mut events = level.subscribe();
    level.set_camera("flaky").await.unwrap();

    let err = level.acquire(SessionMode::Zeroing).await.unwrap_err();
    assert!(matches!(err, LevelError::Acquisition(_)));

    let snapshot = level.snapshot();
    assert!(!snapshot.zero.is_set());
    assert!(snapshot.samples.is_empty());
    assert_eq!(snapshot.session, SessionState::Idle);
    assert!(snapshot.camera.is_none());

    let mut lost = false;
    while let Ok(event) = events.try_recv() {
        if let LevelEvent::CameraLost { id, .. } = event {
            assert_eq!(id, "flaky");
            lost = true;
        }
    }
    assert!(lost);

    // Nothing to acquire from until a camera is selected again.
    let err = level.start_sample().await.unwrap_err();
    assert!(matches!(err, LevelError::Acquisition(_)));

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_replace_and_delete_samples() {
    let settings = test_settings(3);
    let (level, task, laser) = start_level(&settings).await;

    level.acquire(SessionMode::Zeroing).await.unwrap();
    for row in [25.0, 26.0, 27.0] {
        move_line(&laser, row).await;
        level.acquire(SessionMode::SAMPLE).await.unwrap();
    }

    move_line(&laser, 20.0).await;
    let done = level
        .acquire(SessionMode::Sampling {
            replace_index: Some(0),
        })
        .await
        .unwrap();
    let replaced = done.latest_sample.unwrap();
    let snapshot = level.snapshot();
    assert_eq!(snapshot.samples.len(), 3);
    assert!((snapshot.samples[0].y - (-4.0 * MM_PER_PX)).abs() < TOLERANCE);
    assert_eq!(snapshot.samples[0], replaced);

    let err = level.replace_sample(3).await.unwrap_err();
    assert!(matches!(
        err,
        LevelError::SampleIndexOutOfRange { index: 3, len: 3 }
    ));

    level.delete(Some(1)).await.unwrap();
    let snapshot = level.snapshot();
    assert_eq!(snapshot.samples.len(), 2);
    assert!((snapshot.samples[1].y - 3.0 * MM_PER_PX).abs() < TOLERANCE);
    // Two points always lie on their own trend line.
    assert!(snapshot.samples.iter().all(|s| s.lin_y_error.abs() < TOLERANCE));

    assert!(matches!(
        level.delete(Some(5)).await,
        Err(LevelError::SampleIndexOutOfRange { .. })
    ));

    level.delete(None).await.unwrap();
    assert!(level.snapshot().samples.is_empty());

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_cycle_trigger_zeroes_first_then_samples() {
    let settings = test_settings(3);
    let (level, task, _laser) = start_level(&settings).await;
    let mut events = level.subscribe();

    assert_eq!(level.cycle_trigger().await.unwrap(), SessionMode::Zeroing);
    loop {
        if let LevelEvent::Completed(_) = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(level.cycle_trigger().await.unwrap(), SessionMode::SAMPLE);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_invalid_configuration_keeps_previous() {
    let settings = test_settings(3);
    let (level, task, _laser) = start_level(&settings).await;
    let mut events = level.subscribe();

    let mut bad = settings.sampler;
    bad.outlier_pct = 100;
    bad.display_unit = DisplayUnit::Inch;
    assert!(matches!(
        level.configure(bad).await,
        Err(LevelError::InvalidConfiguration(_))
    ));
    assert_eq!(level.snapshot().display_unit, DisplayUnit::Millimetre);

    let mut analyser = settings.analyser;
    analyser.smoothing = 201;
    assert!(matches!(
        level.set_analyser(analyser).await,
        Err(LevelError::InvalidConfiguration(_))
    ));

    level.set_display_unit(DisplayUnit::Micron).await.unwrap();
    assert_eq!(level.snapshot().display_unit, DisplayUnit::Micron);
    let mut units_changed = false;
    while let Ok(event) = events.try_recv() {
        if let LevelEvent::UnitsChanged(unit) = event {
            assert_eq!(unit, DisplayUnit::Micron);
            units_changed = true;
        }
    }
    assert!(units_changed);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_camera_selection() {
    let settings = Settings::default();
    let mut registry = CameraRegistry::new();
    registry.register("front", || Box::new(MockCamera::new(WIDTH, HEIGHT)));
    registry.register("side", || Box::new(MockCamera::new(WIDTH, HEIGHT)));
    let (level, task) = actor::spawn(&settings, registry);

    assert_eq!(level.get_cameras().await.unwrap(), vec!["front", "side"]);
    assert!(matches!(
        level.start_sample().await,
        Err(LevelError::Acquisition(_))
    ));
    assert!(matches!(
        level.set_camera("top").await,
        Err(LevelError::CameraNotFound(_))
    ));

    level.set_camera_index(1).await.unwrap();
    assert_eq!(level.snapshot().camera.as_deref(), Some("side"));
    assert!(matches!(
        level.set_camera_index(2).await,
        Err(LevelError::CameraNotFound(_))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(level.profile().is_some());

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_switching_camera_aborts_running_session() {
    let settings = test_settings(5);
    let (level, task, laser) = start_level(&settings).await;

    laser.set_enabled(None).await;
    let pending = {
        let level = level.clone();
        tokio::spawn(async move { level.acquire(SessionMode::Zeroing).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    level.set_camera("mock").await.unwrap();
    let result = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(LevelError::Acquisition(_))));
    assert_eq!(level.snapshot().session, SessionState::Idle);

    stop_level(level, task).await;
}

#[tokio::test]
async fn test_snapshot_progress_follows_accepted_readings() {
    let settings = test_settings(1000);
    let (level, task, _laser) = start_level(&settings).await;
    let mut events = level.subscribe();

    level.zero().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut last_event = 0;
    loop {
        match events.try_recv() {
            Ok(LevelEvent::Progress { progress, .. }) => last_event = progress.collected,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(last_event > 0);

    let snapshot = level.snapshot();
    assert_eq!(snapshot.session, SessionState::Accumulating);
    let progress = snapshot.progress.unwrap();
    assert_eq!(progress.target, 1000);
    assert!(
        progress.collected >= last_event,
        "snapshot at {} behind event at {}",
        progress.collected,
        last_event
    );

    stop_level(level, task).await;
}

/// Counts frames started and finished so dropped reads are visible.
struct CountingCamera {
    inner: MockCamera,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for CountingCamera {
    fn name(&self) -> String {
        "Counting Camera".to_string()
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.inner.connect().await
    }

    async fn next_frame(&mut self) -> AppResult<Frame> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let frame = self.inner.next_frame().await?;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        self.inner.disconnect().await
    }
}

#[tokio::test]
async fn test_analyser_changes_do_not_interrupt_frame_reads() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
    let mut registry = CameraRegistry::new();
    registry.register("counting", move || {
        Box::new(CountingCamera {
            inner: MockCamera::new(WIDTH, HEIGHT).with_frame_interval(Duration::from_millis(30)),
            started: Arc::clone(&s),
            finished: Arc::clone(&f),
        })
    });
    let settings = test_settings(3);
    let (level, task) = actor::spawn(&settings, registry);
    level.set_camera("counting").await.unwrap();

    let mut analyser = settings.analyser;
    for smoothing in 1..=10 {
        analyser.smoothing = smoothing;
        level.set_analyser(analyser).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    stop_level(level, task).await;
    // Only the read pending at shutdown may be left unfinished.
    let dropped = started.load(Ordering::SeqCst) - finished.load(Ordering::SeqCst);
    assert!(dropped <= 1, "{} frame reads dropped", dropped);
}
