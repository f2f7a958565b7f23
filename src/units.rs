//! Display units for height values.
//!
//! Every value stored by the engine is in millimetres. A [`DisplayUnit`] only
//! changes how values are presented or exported, never what is stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, LevelError};

/// Unit used to present heights to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayUnit {
    /// Nanometres.
    #[serde(rename = "nm")]
    Nanometre,
    /// Micrometres.
    #[serde(rename = "um", alias = "μm", alias = "micron")]
    Micron,
    /// Millimetres (the canonical storage unit).
    #[default]
    #[serde(rename = "mm")]
    Millimetre,
    /// Centimetres.
    #[serde(rename = "cm")]
    Centimetre,
    /// Thousandths of an inch.
    #[serde(rename = "mil", alias = "thou")]
    Mil,
    /// Inches.
    #[serde(rename = "in", alias = "inch")]
    Inch,
}

impl DisplayUnit {
    /// All supported units, smallest first.
    pub const ALL: [DisplayUnit; 6] = [
        DisplayUnit::Nanometre,
        DisplayUnit::Micron,
        DisplayUnit::Mil,
        DisplayUnit::Millimetre,
        DisplayUnit::Centimetre,
        DisplayUnit::Inch,
    ];

    /// Millimetres in one of this unit.
    pub fn mm_per_unit(self) -> f64 {
        match self {
            DisplayUnit::Nanometre => 1e-6,
            DisplayUnit::Micron => 1e-3,
            DisplayUnit::Millimetre => 1.0,
            DisplayUnit::Centimetre => 10.0,
            DisplayUnit::Mil => 0.0254,
            DisplayUnit::Inch => 25.4,
        }
    }

    /// Short symbol shown next to values.
    pub fn symbol(self) -> &'static str {
        match self {
            DisplayUnit::Nanometre => "nm",
            DisplayUnit::Micron => "μm",
            DisplayUnit::Millimetre => "mm",
            DisplayUnit::Centimetre => "cm",
            DisplayUnit::Mil => "mil",
            DisplayUnit::Inch => "in",
        }
    }

    /// Decimal places that keep roughly micron resolution in this unit.
    pub fn decimals(self) -> usize {
        match self {
            DisplayUnit::Nanometre => 0,
            DisplayUnit::Micron => 2,
            DisplayUnit::Millimetre => 4,
            DisplayUnit::Centimetre => 5,
            DisplayUnit::Mil => 3,
            DisplayUnit::Inch => 6,
        }
    }

    /// Convert a canonical millimetre value into this unit.
    pub fn from_mm(self, value_mm: f64) -> f64 {
        value_mm / self.mm_per_unit()
    }

    /// Convert a value in this unit back to millimetres.
    pub fn to_mm(self, value: f64) -> f64 {
        value * self.mm_per_unit()
    }

    /// Format a canonical value for display, e.g. `"12.50 μm"`.
    pub fn format(self, value_mm: f64) -> String {
        format!(
            "{:.*} {}",
            self.decimals(),
            self.from_mm(value_mm),
            self.symbol()
        )
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for DisplayUnit {
    type Err = LevelError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nm" | "nanometre" | "nanometer" => Ok(DisplayUnit::Nanometre),
            "um" | "μm" | "micron" | "micrometre" | "micrometer" => Ok(DisplayUnit::Micron),
            "mm" | "millimetre" | "millimeter" => Ok(DisplayUnit::Millimetre),
            "cm" | "centimetre" | "centimeter" => Ok(DisplayUnit::Centimetre),
            "mil" | "thou" => Ok(DisplayUnit::Mil),
            "in" | "inch" | "\"" => Ok(DisplayUnit::Inch),
            other => Err(LevelError::InvalidConfiguration(format!(
                "Unknown display unit '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_unit() {
        for unit in DisplayUnit::ALL {
            for x in [-12.5, 0.0, 0.001, 3.75, 1234.5678] {
                let back = unit.from_mm(unit.to_mm(x));
                assert!((back - x).abs() < 1e-9, "{unit}: {x} -> {back}");
            }
        }
    }

    #[test]
    fn test_inch_conversion() {
        assert!((DisplayUnit::Inch.from_mm(25.4) - 1.0).abs() < 1e-12);
        assert!((DisplayUnit::Mil.from_mm(0.0254) - 1.0).abs() < 1e-12);
        assert!((DisplayUnit::Micron.from_mm(0.5) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_symbols() {
        assert_eq!("μm".parse::<DisplayUnit>().unwrap(), DisplayUnit::Micron);
        assert_eq!("THOU".parse::<DisplayUnit>().unwrap(), DisplayUnit::Mil);
        assert!("furlong".parse::<DisplayUnit>().is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(DisplayUnit::Micron.format(0.0125), "12.50 μm");
        assert_eq!(DisplayUnit::Millimetre.format(1.0), "1.0000 mm");
    }
}
