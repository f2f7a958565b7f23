//! Pixel to physical conversion.
//!
//! The camera sensor has square pixels, so the pixel pitch along either axis is
//! `sensor_width_mm / frame_width_px`. A centroid in pixel space multiplied by
//! the pitch is a position on the sensor in millimetres.

use crate::units::DisplayUnit;

/// Convert a raw centroid (pixels) into millimetres on the sensor.
pub fn pixel_to_physical(raw_centroid: f64, sensor_width_mm: f64, frame_width_px: u32) -> f64 {
    if frame_width_px == 0 {
        return 0.0;
    }
    raw_centroid * sensor_width_mm / f64::from(frame_width_px)
}

/// Convert a canonical millimetre value into `unit`.
pub fn physical_to_display(value_mm: f64, unit: DisplayUnit) -> f64 {
    unit.from_mm(value_mm)
}

/// Convert a value expressed in `unit` back to millimetres.
pub fn display_to_physical(value: f64, unit: DisplayUnit) -> f64 {
    unit.to_mm(value)
}
