//! Point-in-time metrics derived from the latest observations.
//!
//! A missing input is never an error: the derived value is simply absent.

use crate::core::observation::Observation;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// WHO body-mass-index classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    pub fn from_value(bmi: f64) -> Self {
        if bmi < 18.5 {
            BmiCategory::Underweight
        } else if bmi < 25.0 {
            BmiCategory::Normal
        } else if bmi < 30.0 {
            BmiCategory::Overweight
        } else {
            BmiCategory::Obese
        }
    }
}

/// Where the height used for a BMI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightSource {
    Recorded,
    Configured,
}

/// A computed body-mass index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bmi {
    pub value: f64,
    pub category: BmiCategory,
    pub weight_kg: f64,
    pub height_m: f64,
    pub height_source: HeightSource,
}

impl Bmi {
    /// The value rounded to one decimal, as shown to users.
    pub fn rounded(&self) -> f64 {
        (self.value * 10.0).round() / 10.0
    }
}

/// Convert a body-mass observation to kilograms.
pub fn mass_in_kg(obs: &Observation) -> Option<f64> {
    let factor = match obs.unit_or_default() {
        "kg" => 1.0,
        "g" => 0.001,
        "lb" => 0.453_592_37,
        "st" => 6.350_293_18,
        _ => return None,
    };
    Some(obs.value * factor)
}

/// Convert a height observation to meters.
pub fn height_in_m(obs: &Observation) -> Option<f64> {
    let factor = match obs.unit_or_default() {
        "m" => 1.0,
        "cm" => 0.01,
        "mm" => 0.001,
        "in" => 0.0254,
        "ft" => 0.3048,
        _ => return None,
    };
    Some(obs.value * factor)
}

/// Body-mass index from the latest weight and height.
///
/// The recorded height wins over `configured_height_m`. Returns `None`
/// unless both operands exist and are positive and the result is finite.
pub fn body_mass_index(
    weight: Option<&Observation>,
    height: Option<&Observation>,
    configured_height_m: Option<f64>,
) -> Option<Bmi> {
    let weight_kg = weight.and_then(mass_in_kg)?;
    let (height_m, height_source) = match height.and_then(height_in_m) {
        Some(h) => (h, HeightSource::Recorded),
        None => (configured_height_m?, HeightSource::Configured),
    };

    if !(weight_kg > 0.0 && height_m > 0.0) {
        return None;
    }

    let value = weight_kg / (height_m * height_m);
    if !value.is_finite() {
        return None;
    }

    Some(Bmi {
        value,
        category: BmiCategory::from_value(value),
        weight_kg,
        height_m,
        height_source,
    })
}

/// Whole calendar years between the earliest observation and `now`.
///
/// This is a rough span of recorded data (`current year - first year`), not
/// a day-accurate duration and not the person's age.
pub fn data_span_years(observations: &[Observation], now: DateTime<Utc>, tz: Tz) -> Option<i32> {
    let earliest = observations.iter().map(|obs| obs.timestamp).min()?;
    let first_year = earliest.with_timezone(&tz).year();
    Some(now.with_timezone(&tz).year() - first_year)
}

/// Age in completed years from an exact birth date.
pub fn age_from_birth_date(birth_date: NaiveDate, today: NaiveDate) -> Option<i32> {
    if birth_date > today {
        return None;
    }
    let mut age = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }
    Some(age)
}

/// Rough age from a birth year (`current year - birth year`).
pub fn age_from_birth_year(birth_year: i32, today: NaiveDate) -> Option<i32> {
    let age = today.year() - birth_year;
    (age >= 0).then_some(age)
}
