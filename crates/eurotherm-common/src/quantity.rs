//! A small magnitude + physical-dimension type, with string parsing.
//!
//! Modelled on the original Python implementation's use of `pint` typed
//! quantities (`TemperatureQ`, `DimensionlessQ`, `VoltageQ` in
//! `eurothermlib/utils.py`), but hand-rolled: this workspace only ever needs
//! five dimensions and a handful of units, so a full dimensional-analysis
//! crate would be more machinery than the problem calls for.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The physical dimension of a [`Quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Temperature (affine: Kelvin, Celsius, Fahrenheit).
    Temperature,
    /// Time/duration.
    Time,
    /// Frequency (sampling rates).
    Frequency,
    /// Temperature change rate, used by ramps (K per unit time).
    Rate,
    /// A dimensionless percentage-like quantity.
    Dimensionless,
}

/// A magnitude paired with a physical dimension.
///
/// Temperature is stored internally in Kelvin so that ramp arithmetic never
/// has to reason about an affine offset; [`Quantity::magnitude_in`] converts
/// to a display unit only at the presentation boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    /// Canonical magnitude: Kelvin for temperature, seconds for time, Hertz
    /// for frequency, Kelvin-per-second for rate, a bare fraction (not a
    /// percentage) for dimensionless quantities.
    canonical: f64,
    dimension: Dimension,
}

impl Quantity {
    fn new(canonical: f64, dimension: Dimension) -> Self {
        Self {
            canonical,
            dimension,
        }
    }

    /// Construct a temperature quantity from a value already in Kelvin.
    pub fn kelvin(value: f64) -> Self {
        Self::new(value, Dimension::Temperature)
    }

    /// Construct a temperature quantity from a value in degrees Celsius.
    pub fn celsius(value: f64) -> Self {
        Self::new(value + CELSIUS_OFFSET, Dimension::Temperature)
    }

    /// Construct a frequency quantity from a value in Hertz.
    pub fn hertz(value: f64) -> Self {
        Self::new(value, Dimension::Frequency)
    }

    /// Construct a duration quantity from a value in seconds.
    pub fn seconds(value: f64) -> Self {
        Self::new(value, Dimension::Time)
    }

    /// Construct a ramp rate from a value in Kelvin per minute.
    pub fn kelvin_per_minute(value: f64) -> Self {
        Self::new(value / 60.0, Dimension::Rate)
    }

    /// Construct a dimensionless percentage quantity.
    pub fn percent(value: f64) -> Self {
        Self::new(value / 100.0, Dimension::Dimensionless)
    }

    /// The dimension of this quantity.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// The magnitude in Kelvin. Panics in debug builds if not a temperature;
    /// callers in this workspace always check `dimension()` at trust
    /// boundaries (RPC, config) before calling unit accessors.
    pub fn as_kelvin(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Temperature);
        self.canonical
    }

    /// The magnitude in degrees Celsius.
    pub fn as_celsius(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Temperature);
        self.canonical - CELSIUS_OFFSET
    }

    /// The magnitude in Hertz.
    pub fn as_hertz(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Frequency);
        self.canonical
    }

    /// The magnitude in seconds.
    pub fn as_seconds(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Time);
        self.canonical
    }

    /// The magnitude as a `std::time::Duration`. Negative or non-finite
    /// durations are clamped to zero.
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.as_seconds().max(0.0))
    }

    /// The magnitude in Kelvin per second.
    pub fn as_kelvin_per_second(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Rate);
        self.canonical
    }

    /// The magnitude in Kelvin per minute.
    pub fn as_kelvin_per_minute(&self) -> f64 {
        self.as_kelvin_per_second() * 60.0
    }

    /// The magnitude as a fraction (0.0..1.0 for a 0..100% quantity).
    pub fn as_fraction(&self) -> f64 {
        debug_assert_eq!(self.dimension, Dimension::Dimensionless);
        self.canonical
    }

    /// The magnitude as a percentage (0..100).
    pub fn as_percent(&self) -> f64 {
        self.as_fraction() * 100.0
    }

    /// Parse a quantity from `"<number><unit>"` or `"<number> <unit>"`.
    pub fn parse(s: &str) -> Result<Self, super::EurothermError> {
        let s = s.trim();
        let split_at = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E'))
            .ok_or_else(|| super::EurothermError::BadUnit(format!("no unit in {s:?}")))?;
        let (number, unit) = s.split_at(split_at);
        let number: f64 = number
            .trim()
            .parse()
            .map_err(|_| super::EurothermError::BadUnit(format!("bad magnitude in {s:?}")))?;
        let unit = unit.trim();

        Ok(match unit {
            "K" => Self::kelvin(number),
            "degC" | "°C" | "C" => Self::celsius(number),
            "degF" | "°F" | "F" => Self::kelvin((number + 459.67) * 5.0 / 9.0),
            "Hz" => Self::hertz(number),
            "kHz" => Self::hertz(number * 1_000.0),
            "s" => Self::seconds(number),
            "ms" => Self::seconds(number / 1_000.0),
            "min" => Self::seconds(number * 60.0),
            "h" => Self::seconds(number * 3_600.0),
            "K/min" | "degC/min" => Self::kelvin_per_minute(number),
            "K/s" | "degC/s" => Self::new(number, Dimension::Rate),
            "%" => Self::percent(number),
            "" => Self::new(number, Dimension::Dimensionless),
            other => {
                return Err(super::EurothermError::BadUnit(format!(
                    "unrecognised unit {other:?} in {s:?}"
                )))
            }
        })
    }
}

/// Offset between 0 K and 0 degC.
const CELSIUS_OFFSET: f64 = 273.15;

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimension {
            Dimension::Temperature => write!(f, "{:.2}K", self.canonical),
            Dimension::Time => write!(f, "{:.3}s", self.canonical),
            Dimension::Frequency => write!(f, "{:.3}Hz", self.canonical),
            Dimension::Rate => write!(f, "{:.4}K/s", self.canonical),
            Dimension::Dimensionless => write!(f, "{:.2}%", self.as_percent()),
        }
    }
}

/// Serializes in the unit the wire format calls for per dimension: Kelvin
/// for temperature, percent for dimensionless, K/min for rate, seconds and
/// Hertz otherwise. Matches the wire encoding described in spec.md §4.7
/// ("temperatures are serialised in kelvin, output in percent").
impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire_value = match self.dimension {
            Dimension::Temperature => self.canonical,
            Dimension::Dimensionless => self.as_percent(),
            Dimension::Rate => self.as_kelvin_per_minute(),
            Dimension::Time | Dimension::Frequency => self.canonical,
        };
        serializer.serialize_f64(wire_value)
    }
}

/// Raw `Deserialize` assumes Temperature, the most common wire case: fields
/// of any other dimension (e.g. `working_output`) must instead name one of
/// the `deserialize_as_*` helpers below via `#[serde(deserialize_with = ...)]`,
/// since the dimension cannot be recovered from a bare number.
impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(Quantity::kelvin(value))
    }
}

/// Deserializes a percent-valued wire field (e.g. `working_output`) as a
/// dimensionless [`Quantity`], the inverse of its percent-valued `Serialize`.
pub fn deserialize_as_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Quantity, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(Quantity::percent(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_kelvin_roundtrip_is_exact() {
        let q = Quantity::celsius(20.0);
        assert!((q.as_kelvin() - 293.15).abs() < 1e-9);
        assert!((q.as_celsius() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn parse_accepts_no_space_and_space_forms() {
        assert_eq!(Quantity::parse("5Hz").unwrap().as_hertz(), 5.0);
        assert_eq!(Quantity::parse("5 Hz").unwrap().as_hertz(), 5.0);
        assert!((Quantity::parse("20degC").unwrap().as_kelvin() - 293.15).abs() < 1e-9);
        assert!((Quantity::parse("60 K/min").unwrap().as_kelvin_per_minute() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn parse_rejects_unknown_unit() {
        assert!(Quantity::parse("5furlongs").is_err());
    }

    #[test]
    fn parse_rejects_missing_unit() {
        assert!(Quantity::parse("5").is_err());
    }

    #[test]
    fn fahrenheit_converts_through_kelvin() {
        let q = Quantity::parse("32F").unwrap();
        assert!((q.as_celsius() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn negative_temperatures_round_trip() {
        let q = Quantity::celsius(-40.0);
        assert!((q.as_celsius() - (-40.0)).abs() < 1e-9);
    }
}
