//! Sunrise/sunset/twilight calculation.
//!
//! NOAA sunrise-equation implementation: (latitude, longitude, date) →
//! dawn, sunrise, sunset, dusk. Sunrise and sunset use the standard
//! −0.833° altitude (refraction plus solar radius); dawn and dusk are civil
//! twilight at −6°. Results are cached per (latitude, longitude, date);
//! the cache is cleared once it grows past a bound so month-long
//! deployments do not accumulate state.

use crate::error::{EchologError, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use std::collections::HashMap;
use std::sync::Mutex;

/// Solar event times for one date and position, in UTC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarTimes {
    pub dawn: NaiveTime,
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
    pub dusk: NaiveTime,
}

impl SolarTimes {
    /// Shifts all four times into a local offset, wrapping within the day.
    pub fn to_offset(&self, offset: chrono::FixedOffset) -> SolarTimes {
        let shift = ChronoDuration::seconds(offset.local_minus_utc() as i64);
        SolarTimes {
            dawn: self.dawn.overflowing_add_signed(shift).0,
            sunrise: self.sunrise.overflowing_add_signed(shift).0,
            sunset: self.sunset.overflowing_add_signed(shift).0,
            dusk: self.dusk.overflowing_add_signed(shift).0,
        }
    }
}

/// Altitude of the sun's center at sunrise/sunset, in degrees.
const SUNRISE_ALTITUDE_DEG: f64 = -0.833;
/// Altitude at civil dawn/dusk, in degrees.
const TWILIGHT_ALTITUDE_DEG: f64 = -6.0;

/// Cache key quantization: 1e-4 degrees is roughly 10 m, far finer than the
/// minute resolution of the schedule.
fn quantize(degrees: f64) -> i64 {
    (degrees * 10_000.0).round() as i64
}

/// Memoizing solar time calculator.
pub struct SolarCalculator {
    cache: Mutex<HashMap<(i64, i64, NaiveDate), SolarTimes>>,
    cache_max: usize,
}

impl SolarCalculator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            cache_max: crate::defaults::SOLAR_CACHE_MAX,
        }
    }

    /// Solar times in UTC for the given position and date.
    ///
    /// Fails above the polar circles when the sun never crosses the
    /// requested altitude (midnight sun / polar night).
    pub fn solar_times_utc(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<SolarTimes> {
        let key = (quantize(latitude), quantize(longitude), date);
        {
            let cache = self.cache.lock().expect("solar cache poisoned");
            if let Some(times) = cache.get(&key) {
                return Ok(*times);
            }
        }

        let times = compute_solar_times(latitude, longitude, date)?;

        let mut cache = self.cache.lock().expect("solar cache poisoned");
        if cache.len() >= self.cache_max {
            cache.clear();
        }
        cache.insert(key, times);
        Ok(times)
    }

    /// Solar times shifted into the system's local offset for that date.
    pub fn solar_times_local(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
    ) -> Result<SolarTimes> {
        let utc = self.solar_times_utc(latitude, longitude, date)?;
        let noon = NaiveDateTime::new(
            date,
            NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
        );
        let offset = chrono::Local
            .from_local_datetime(&noon)
            .earliest()
            .map(|dt| *dt.offset())
            .unwrap_or_else(|| chrono::FixedOffset::east_opt(0).expect("zero offset is valid"));
        Ok(utc.to_offset(offset))
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.lock().expect("solar cache poisoned").len()
    }
}

impl Default for SolarCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Days from J2000 (2000-01-01) to the given date.
fn days_since_j2000(date: NaiveDate) -> i64 {
    let j2000 = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid epoch");
    date.signed_duration_since(j2000).num_days()
}

/// Crossing times (as fractional hours UTC) at which the sun reaches the
/// given altitude: first ascending (morning side), then descending
/// (evening side).
fn crossing_hours_utc(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
    altitude_deg: f64,
) -> Option<(f64, f64)> {
    let n = days_since_j2000(date) as f64 + 0.0008;

    // Mean solar noon at this longitude, in days from J2000.
    let j_star = n - longitude / 360.0;

    // Solar mean anomaly.
    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let m_rad = m.to_radians();

    // Equation of the center and ecliptic longitude.
    let c = 1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0);
    let lambda_rad = lambda.to_radians();

    // Solar transit, in days from J2000.
    let j_transit = j_star + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda_rad).sin();

    // Declination of the sun.
    let sin_decl = lambda_rad.sin() * 23.4397_f64.to_radians().sin();
    let cos_decl = (1.0 - sin_decl * sin_decl).sqrt();

    let lat_rad = latitude.to_radians();
    let cos_hour_angle = (altitude_deg.to_radians().sin() - lat_rad.sin() * sin_decl)
        / (lat_rad.cos() * cos_decl);
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        // Sun never reaches this altitude today (polar day or night).
        return None;
    }
    let hour_angle_deg = cos_hour_angle.acos().to_degrees();

    let j_rise = j_transit - hour_angle_deg / 360.0;
    let j_set = j_transit + hour_angle_deg / 360.0;

    // Days from J2000 to fractional hours UTC on `date`. J2000 is
    // 2000-01-01 12:00 UTC, so day fractions are offset by half a day.
    let to_hours = |j: f64| -> f64 {
        let midnight = days_since_j2000(date) as f64 - 0.5;
        ((j - midnight) * 24.0).rem_euclid(24.0)
    };
    Some((to_hours(j_rise), to_hours(j_set)))
}

fn hours_to_time(hours: f64) -> NaiveTime {
    let total_seconds = (hours * 3600.0).rem_euclid(86_400.0) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(total_seconds.min(86_399), 0)
        .unwrap_or_default()
}

fn compute_solar_times(latitude: f64, longitude: f64, date: NaiveDate) -> Result<SolarTimes> {
    let (sunrise_h, sunset_h) = crossing_hours_utc(latitude, longitude, date, SUNRISE_ALTITUDE_DEG)
        .ok_or_else(|| EchologError::SolarCompute {
            message: format!(
                "no sunrise/sunset at latitude {:.4} on {}",
                latitude, date
            ),
        })?;
    let (dawn_h, dusk_h) = crossing_hours_utc(latitude, longitude, date, TWILIGHT_ALTITUDE_DEG)
        .ok_or_else(|| EchologError::SolarCompute {
            message: format!("no civil twilight at latitude {:.4} on {}", latitude, date),
        })?;

    Ok(SolarTimes {
        dawn: hours_to_time(dawn_h),
        sunrise: hours_to_time(sunrise_h),
        sunset: hours_to_time(sunset_h),
        dusk: hours_to_time(dusk_h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn minutes(t: NaiveTime) -> i64 {
        use chrono::Timelike;
        t.hour() as i64 * 60 + t.minute() as i64
    }

    #[test]
    fn equator_equinox_is_roughly_six_to_six() {
        let calc = SolarCalculator::new();
        let times = calc.solar_times_utc(0.0, 0.0, date(2024, 3, 20)).unwrap();

        // Sunrise close to 06:00 UTC, sunset close to 18:00 UTC.
        assert!((minutes(times.sunrise) - 6 * 60).abs() <= 20);
        assert!((minutes(times.sunset) - 18 * 60).abs() <= 20);
    }

    #[test]
    fn events_are_ordered_dawn_sunrise_sunset_dusk() {
        let calc = SolarCalculator::new();
        let times = calc
            .solar_times_utc(57.662, 12.6383, date(2024, 9, 1))
            .unwrap();

        assert!(times.dawn < times.sunrise);
        assert!(times.sunrise < times.sunset);
        assert!(times.sunset < times.dusk);
    }

    #[test]
    fn northern_summer_has_long_days() {
        let calc = SolarCalculator::new();
        let summer = calc
            .solar_times_utc(57.662, 12.6383, date(2024, 6, 21))
            .unwrap();
        let winter = calc
            .solar_times_utc(57.662, 12.6383, date(2024, 12, 21))
            .unwrap();

        let summer_day = minutes(summer.sunset) - minutes(summer.sunrise);
        let winter_day = minutes(winter.sunset) - minutes(winter.sunrise);
        assert!(summer_day > 16 * 60);
        assert!(winter_day < 8 * 60);
    }

    #[test]
    fn eastern_longitude_shifts_utc_times_earlier() {
        let calc = SolarCalculator::new();
        let greenwich = calc.solar_times_utc(0.0, 0.0, date(2024, 3, 20)).unwrap();
        let east = calc.solar_times_utc(0.0, 45.0, date(2024, 3, 20)).unwrap();

        // 45°E is 3 hours ahead of Greenwich.
        let shift = minutes(greenwich.sunrise) - minutes(east.sunrise);
        assert!((shift - 180).abs() <= 15);
    }

    #[test]
    fn polar_night_is_an_error() {
        let calc = SolarCalculator::new();
        let result = calc.solar_times_utc(80.0, 0.0, date(2024, 12, 21));
        assert!(matches!(
            result,
            Err(EchologError::SolarCompute { .. })
        ));
    }

    #[test]
    fn results_are_cached_per_position_and_date() {
        let calc = SolarCalculator::new();
        let first = calc.solar_times_utc(10.0, 10.0, date(2024, 5, 5)).unwrap();
        let second = calc.solar_times_utc(10.0, 10.0, date(2024, 5, 5)).unwrap();
        assert_eq!(first, second);
        assert_eq!(calc.cache_len(), 1);

        calc.solar_times_utc(10.0, 10.0, date(2024, 5, 6)).unwrap();
        assert_eq!(calc.cache_len(), 2);
    }

    #[test]
    fn cache_is_bounded() {
        let calc = SolarCalculator {
            cache: Mutex::new(HashMap::new()),
            cache_max: 3,
        };
        for day in 1..=3 {
            calc.solar_times_utc(10.0, 10.0, date(2024, 5, day)).unwrap();
        }
        assert_eq!(calc.cache_len(), 3);
        // The fourth entry clears the cache first.
        calc.solar_times_utc(10.0, 10.0, date(2024, 5, 4)).unwrap();
        assert_eq!(calc.cache_len(), 1);
    }

    #[test]
    fn offset_shift_wraps_within_the_day() {
        let times = SolarTimes {
            dawn: NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
            sunrise: NaiveTime::from_hms_opt(23, 50, 0).unwrap(),
            sunset: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            dusk: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
        };
        let shifted = times.to_offset(chrono::FixedOffset::east_opt(3600).unwrap());
        assert_eq!(shifted.dawn, NaiveTime::from_hms_opt(0, 30, 0).unwrap());
        assert_eq!(shifted.sunset, NaiveTime::from_hms_opt(11, 0, 0).unwrap());
    }
}
