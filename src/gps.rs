//! GPS time and position capability.
//!
//! The recorder prefers GPS-backed timestamps and coordinates for file
//! names and for resolving solar times, falling back to the system clock
//! and configured defaults when no fix is available. The actual gpsd/serial
//! plumbing lives outside this crate; components receive a shared
//! [`GpsReader`] handle injected by the composition root.

use chrono::{DateTime, Local};

/// Read access to the most recent GPS fix. All getters return `None` until
/// a fix exists. Implementations are single-writer (their own background
/// reader), many-reader.
pub trait GpsReader: Send + Sync {
    /// Local time from the GPS clock.
    fn get_time_local(&self) -> Option<DateTime<Local>>;

    /// Latitude in decimal degrees, north positive.
    fn get_latitude(&self) -> Option<f64>;

    /// Longitude in decimal degrees, east positive.
    fn get_longitude(&self) -> Option<f64>;

    /// Position formatted for file names, e.g. `"N57.6620E12.6383"`.
    fn get_latlong_string(&self) -> Option<String> {
        let lat = self.get_latitude()?;
        let long = self.get_longitude()?;
        let ns = if lat >= 0.0 { 'N' } else { 'S' };
        let ew = if long >= 0.0 { 'E' } else { 'W' };
        Some(format!(
            "{}{:.4}{}{:.4}",
            ns,
            lat.abs(),
            ew,
            long.abs()
        ))
    }

    /// Local time formatted for file names, e.g. `"20260805T213045+0200"`.
    fn get_time_local_string(&self) -> Option<String> {
        self.get_time_local()
            .map(|t| t.format("%Y%m%dT%H%M%S%z").to_string())
    }
}

/// Reader used when no GPS receiver is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGps;

impl GpsReader for NoGps {
    fn get_time_local(&self) -> Option<DateTime<Local>> {
        None
    }

    fn get_latitude(&self) -> Option<f64> {
        None
    }

    fn get_longitude(&self) -> Option<f64> {
        None
    }
}

/// Fixed position and no clock. Useful for tests and for stationary
/// deployments where coordinates are known but no receiver is attached.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsReader for FixedPosition {
    fn get_time_local(&self) -> Option<DateTime<Local>> {
        None
    }

    fn get_latitude(&self) -> Option<f64> {
        Some(self.latitude)
    }

    fn get_longitude(&self) -> Option<f64> {
        Some(self.longitude)
    }
}
