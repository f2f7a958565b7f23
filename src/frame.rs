//! Raw video frames handed from a camera to the analyser.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, LevelError};

/// Pixel storage in the camera's native bit depth.
///
/// Webcams deliver 8-bit luma, machine-vision sensors often 16-bit. Keeping the
/// native type avoids widening every frame to floats before the analyser has
/// reduced it to a one-dimensional profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 8-bit unsigned integer pixels (0-255)
    U8(Vec<u8>),
    /// 16-bit unsigned integer pixels (0-65535)
    U16(Vec<u16>),
}

impl PixelBuffer {
    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixel at a flat index, normalised to 0.0..=1.0.
    #[inline]
    fn normalised(&self, index: usize) -> f64 {
        match self {
            PixelBuffer::U8(data) => f64::from(data[index]) / f64::from(u8::MAX),
            PixelBuffer::U16(data) => f64::from(data[index]) / f64::from(u16::MAX),
        }
    }
}

/// Which way the projected laser line runs across the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrientation {
    /// Line runs left to right; its position is a row coordinate.
    #[default]
    Horizontal,
    /// Line runs top to bottom; its position is a column coordinate.
    Vertical,
}

/// One grayscale frame in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: PixelBuffer,
    /// Monotonic frame counter assigned by the source.
    pub sequence: u64,
}

impl Frame {
    /// Wrap a pixel buffer, checking it matches the stated dimensions.
    pub fn new(width: u32, height: u32, pixels: PixelBuffer) -> AppResult<Self> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(LevelError::Acquisition(format!(
                "Frame buffer holds {} pixels, expected {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            sequence: 0,
        })
    }

    /// Set the frame counter.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Underlying pixel data.
    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// Normalised intensity at `(x, y)`.
    #[inline]
    pub fn intensity(&self, x: u32, y: u32) -> f64 {
        self.pixels
            .normalised(y as usize * self.width as usize + x as usize)
    }
}
