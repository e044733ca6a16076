use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel shown as the job name while no print is active.
pub const IDLE_PRINT_NAME: &str = "Idle";

/// Normalized printer state as exposed to display consumers.
///
/// A record is always replaced as a whole. Consumers receive owned copies and
/// never see a record that mixes fields from two different telemetry messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Human readable job name, or [`IDLE_PRINT_NAME`] when nothing is printing
    pub print_name: String,
    /// Job progress in percent (0-100)
    pub progress: f64,
    pub current_layer: u32,
    /// `0` means the layer count is unknown
    pub total_layers: u32,
    pub nozzle_temp: f64,
    pub nozzle_temp_target: f64,
    pub bed_temp: f64,
    pub bed_temp_target: f64,
    /// Chamber temperature as reported by the printer
    pub ambient_temp: f64,
    /// Seconds until the job finishes
    pub time_remaining: u64,
    /// Seconds since the job started
    pub time_elapsed: u64,
    /// When this record was produced (decode time, not message time)
    pub last_updated: DateTime<Utc>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            print_name: IDLE_PRINT_NAME.to_string(),
            progress: 0.0,
            current_layer: 0,
            total_layers: 0,
            nozzle_temp: 0.0,
            nozzle_temp_target: 0.0,
            bed_temp: 0.0,
            bed_temp_target: 0.0,
            ambient_temp: 0.0,
            time_remaining: 0,
            time_elapsed: 0,
            last_updated: Utc::now(),
        }
    }
}

impl StatusRecord {
    pub fn is_idle(&self) -> bool {
        self.print_name == IDLE_PRINT_NAME
    }

    /// Remaining time as `HHh MMm`, `MMm` or `--:--` when unknown.
    pub fn format_time_remaining(&self) -> String {
        format_hours_minutes(self.time_remaining)
    }

    /// Elapsed time as `HHh MMm`, `MMm` or `--:--` when unknown.
    pub fn format_time_elapsed(&self) -> String {
        format_hours_minutes(self.time_elapsed)
    }
}

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {:.0}% (layer {}/{}) nozzle {:.1}/{:.1}°C bed {:.1}/{:.1}°C, remaining {}",
            self.print_name,
            self.progress,
            self.current_layer,
            self.total_layers,
            self.nozzle_temp,
            self.nozzle_temp_target,
            self.bed_temp,
            self.bed_temp_target,
            self.format_time_remaining()
        )
    }
}

fn format_hours_minutes(seconds: u64) -> String {
    if seconds == 0 {
        return "--:--".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;

    match (hours, minutes) {
        (0, m) => format!("{:02}m", m),
        (h, 0) => format!("{:02}h", h),
        (h, m) => format!("{:02}h {:02}m", h, m),
    }
}
