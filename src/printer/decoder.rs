//! Telemetry decoding
//!
//! Maps a raw `device/<serial>/report` payload onto a complete [`StatusRecord`].
//! The payload shape belongs to the printer firmware, so every field is optional
//! and anything missing falls back to the record defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::status::{StatusRecord, IDLE_PRINT_NAME};

/// Failure to turn a payload into a [`StatusRecord`].
///
/// Decode failures are per message: the caller logs and drops them.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed telemetry payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Top-level report message.
#[derive(Debug, Default, Deserialize)]
pub struct BambuMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub print: PrintData,
}

/// The `print` section of a report.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PrintData {
    #[serde(deserialize_with = "null_as_default")]
    pub bed_target_temper: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub bed_temper: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub chamber_temper: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub nozzle_target_temper: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub nozzle_temper: f64,

    #[serde(deserialize_with = "null_as_default")]
    pub subtask_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub gcode_file: String,

    #[serde(deserialize_with = "null_as_default")]
    pub mc_percent: f64,
    /// Whole minutes
    #[serde(deserialize_with = "null_as_default")]
    pub mc_remaining_time: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub layer_num: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_layer_num: i64,

    pub gcode_start_time: Option<StartTime>,
}

/// Reads an explicit `null` the same way as an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Negative layer counts (firmware sentinels) read as zero.
fn layer_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Job start time, published as a decimal string by most firmware builds and
/// as a bare integer by some.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StartTime {
    Epoch(i64),
    Text(String),
}

impl StartTime {
    /// Unix seconds, or `None` when the value does not parse.
    pub fn epoch_seconds(&self) -> Option<i64> {
        match self {
            StartTime::Epoch(secs) => Some(*secs),
            StartTime::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl BambuMessage {
    /// Builds the status record as of `now`.
    pub fn to_status(&self, now: DateTime<Utc>) -> StatusRecord {
        let print = &self.print;

        let print_name = if !print.subtask_name.is_empty() {
            print.subtask_name.clone()
        } else if !print.gcode_file.is_empty() {
            print.gcode_file.clone()
        } else {
            IDLE_PRINT_NAME.to_string()
        };

        // Future start times (clock skew) count as zero elapsed
        let time_elapsed = print
            .gcode_start_time
            .as_ref()
            .and_then(StartTime::epoch_seconds)
            .map(|start| now.timestamp().saturating_sub(start).max(0) as u64)
            .unwrap_or(0);

        StatusRecord {
            print_name,
            progress: print.mc_percent,
            current_layer: layer_count(print.layer_num),
            total_layers: layer_count(print.total_layer_num),
            nozzle_temp: print.nozzle_temper,
            nozzle_temp_target: print.nozzle_target_temper,
            bed_temp: print.bed_temper,
            bed_temp_target: print.bed_target_temper,
            ambient_temp: print.chamber_temper,
            time_remaining: (print.mc_remaining_time.max(0) as u64).saturating_mul(60),
            time_elapsed,
            last_updated: now,
        }
    }
}

/// Decodes a raw payload into a fresh status record stamped with the current time.
pub fn decode(payload: &[u8]) -> Result<StatusRecord, DecodeError> {
    decode_at(payload, Utc::now())
}

/// Same as [`decode`] with an explicit decode time.
pub fn decode_at(payload: &[u8], now: DateTime<Utc>) -> Result<StatusRecord, DecodeError> {
    let message: BambuMessage = serde_json::from_slice(payload)?;
    Ok(message.to_status(now))
}
