//! Shared fixtures for driving the level actor with a mock camera.
#![allow(dead_code)]

use laser_level::actor::{self, LevelHandle};
use laser_level::camera::{CameraRegistry, MockCamera, MockLaser};
use laser_level::config::Settings;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 64 px wide frames over a 6.4 mm sensor: 0.1 mm per pixel.
pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const SENSOR_WIDTH_MM: f64 = 6.4;
pub const MM_PER_PX: f64 = 0.1;

/// Floating point tolerance for heights derived from centroids.
pub const TOLERANCE: f64 = 1e-6;

pub fn test_settings(subsamples: u32) -> Settings {
    let mut settings = Settings::default();
    settings.analyser.smoothing = 0;
    settings.sampler.subsamples = subsamples;
    settings.sampler.outlier_pct = 20;
    settings.sampler.sensor_width_mm = SENSOR_WIDTH_MM;
    settings
}

pub fn mock_camera(laser: &MockLaser) -> MockCamera {
    MockCamera::new(WIDTH, HEIGHT)
        .with_laser(laser.clone())
        .with_frame_interval(Duration::from_millis(1))
}

/// Actor with one mock camera registered as "mock" and already selected.
pub async fn start_level(settings: &Settings) -> (LevelHandle, JoinHandle<()>, MockLaser) {
    let laser = MockCamera::new(WIDTH, HEIGHT)
        .with_line_at(24.0)
        .laser();
    let shared = laser.clone();
    let mut registry = CameraRegistry::new();
    registry.register("mock", move || Box::new(mock_camera(&shared)));

    let (level, task) = actor::spawn(settings, registry);
    level.set_camera("mock").await.expect("mock camera should open");
    (level, task, laser)
}

/// Move the line and let frames rendered at the old position drain.
pub async fn move_line(laser: &MockLaser, row: f64) {
    laser.set_position(row).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn stop_level(level: LevelHandle, task: JoinHandle<()>) {
    level.shutdown().await.expect("shutdown should be accepted");
    tokio::time::timeout(Duration::from_secs(6), task)
        .await
        .expect("actor should exit")
        .expect("actor should not panic");
}
