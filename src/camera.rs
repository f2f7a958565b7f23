//! Camera sources and the registry used to enumerate and select them.
//!
//! Decoding and streaming from real devices belongs to platform capture
//! backends; the engine only needs something that yields [`Frame`]s. Backends
//! implement [`FrameSource`] and register a factory under a device id.
//! [`MockCamera`] renders a synthetic laser line for tests and demos.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::error::{AppResult, LevelError};
use crate::frame::{Frame, LineOrientation, PixelBuffer};

/// A stream of frames from one camera.
///
/// `next_frame` returning an error means the device is gone; the frame task
/// reports it and stops. The frame task only drops a pending `next_frame`
/// future on shutdown, right before calling `disconnect`, so implementations
/// need not be cancel-safe mid-stream.
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable device name.
    fn name(&self) -> String;

    /// Open the device.
    async fn connect(&mut self) -> AppResult<()>;

    /// Wait for and return the next frame.
    async fn next_frame(&mut self) -> AppResult<Frame>;

    /// Release the device.
    async fn disconnect(&mut self) -> AppResult<()>;
}

type SourceFactory = Box<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Ordered set of known cameras.
#[derive(Default)]
pub struct CameraRegistry {
    factories: Vec<(String, SourceFactory)>,
}

impl CameraRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera under `id`, replacing any previous factory with that id.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn FrameSource> + Send + Sync + 'static,
    {
        let id = id.into();
        self.factories.retain(|(existing, _)| *existing != id);
        self.factories.push((id, Box::new(factory)));
    }

    /// Device ids in registration order.
    pub fn list(&self) -> Vec<String> {
        self.factories.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Id of the camera at `index`.
    pub fn id_at(&self, index: usize) -> Option<&str> {
        self.factories.get(index).map(|(id, _)| id.as_str())
    }

    /// Build a fresh source for `id`.
    pub fn create(&self, id: &str) -> AppResult<Box<dyn FrameSource>> {
        self.factories
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, factory)| factory())
            .ok_or_else(|| LevelError::CameraNotFound(id.to_string()))
    }
}

/// Shared control over where the mock camera draws its line.
#[derive(Clone, Debug)]
pub struct MockLaser {
    position: Arc<RwLock<Option<f64>>>,
}

impl MockLaser {
    fn new(position: f64) -> Self {
        Self {
            position: Arc::new(RwLock::new(Some(position))),
        }
    }

    /// Move the line to `position` pixels across the frame.
    pub async fn set_position(&self, position: f64) {
        *self.position.write().await = Some(position);
    }

    /// Switch the laser off (frames go dark) or back on at `position`.
    pub async fn set_enabled(&self, position: Option<f64>) {
        *self.position.write().await = position;
    }

    /// Current line position, if lit.
    pub async fn position(&self) -> Option<f64> {
        *self.position.read().await
    }
}

/// Simulated webcam pointed at a laser line.
///
/// Draws a Gaussian line profile on a dim background with optional uniform
/// noise, at a fixed frame interval. Can be told to fail after a number of
/// frames to simulate a device being unplugged.
pub struct MockCamera {
    width: u32,
    height: u32,
    orientation: LineOrientation,
    laser: MockLaser,
    line_sigma: f64,
    background: f64,
    amplitude: f64,
    noise: f64,
    frame_interval: Duration,
    disconnect_after: Option<u64>,
    sequence: u64,
    connected: bool,
    rng: StdRng,
}

impl MockCamera {
    /// A `width`x`height` camera with a horizontal line through the middle.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            orientation: LineOrientation::Horizontal,
            laser: MockLaser::new(f64::from(height) / 2.0),
            line_sigma: 2.0,
            background: 12.0,
            amplitude: 220.0,
            noise: 0.0,
            frame_interval: Duration::from_millis(33),
            disconnect_after: None,
            sequence: 0,
            connected: false,
            rng: StdRng::seed_from_u64(0x1a5e),
        }
    }

    /// Draw a vertical line instead.
    pub fn with_orientation(mut self, orientation: LineOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Start the line at `position`.
    pub fn with_line_at(mut self, position: f64) -> Self {
        self.laser = MockLaser::new(position);
        self
    }

    /// Share line control with another handle.
    pub fn with_laser(mut self, laser: MockLaser) -> Self {
        self.laser = laser;
        self
    }

    /// Add up to `amplitude` counts of uniform noise per pixel.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude.max(0.0);
        self
    }

    /// Time between frames.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Fail every call after `frames` frames.
    pub fn with_disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    /// Handle for moving the line while the camera runs.
    pub fn laser(&self) -> MockLaser {
        self.laser.clone()
    }

    fn render(&mut self, line: Option<f64>) -> AppResult<Frame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = Vec::with_capacity(w * h);
        let two_sigma_sq = 2.0 * self.line_sigma * self.line_sigma;

        for y in 0..h {
            for x in 0..w {
                let across = match self.orientation {
                    LineOrientation::Horizontal => y,
                    LineOrientation::Vertical => x,
                } as f64;
                let mut value = self.background;
                if let Some(centre) = line {
                    let d = across - centre;
                    value += self.amplitude * (-(d * d) / two_sigma_sq).exp();
                }
                if self.noise > 0.0 {
                    value += self.rng.gen_range(-self.noise..=self.noise);
                }
                pixels.push(value.round().clamp(0.0, 255.0) as u8);
            }
        }

        let frame = Frame::new(self.width, self.height, PixelBuffer::U8(pixels))?;
        Ok(frame.with_sequence(self.sequence))
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    fn name(&self) -> String {
        format!("Mock Camera {}x{}", self.width, self.height)
    }

    async fn connect(&mut self) -> AppResult<()> {
        info!("Connecting to {}", self.name());
        self.connected = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> AppResult<Frame> {
        if !self.connected {
            return Err(LevelError::Acquisition("Mock camera not connected".to_string()));
        }
        if let Some(limit) = self.disconnect_after {
            if self.sequence >= limit {
                self.connected = false;
                return Err(LevelError::Acquisition("Mock camera disconnected".to_string()));
            }
        }

        // Runs inside the frame task, so never block here.
        sleep(self.frame_interval).await;

        let line = self.laser.position().await;
        let frame = self.render(line)?;
        self.sequence += 1;
        Ok(frame)
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        info!("Disconnecting from {}", self.name());
        self.connected = false;
        Ok(())
    }
}
