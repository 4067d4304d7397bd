//! Forward-fill reconstruction of a sparse price-change feed into a dense
//! one-entry-per-minute series.
//!
//! Reconstruction is two pure steps followed by grid expansion:
//! 1. [`normalize_events`] drops other instance classes, rounds sub-minute
//!    timestamps up to the next minute boundary and collapses anything before
//!    the window start onto the window start.
//! 2. [`build_price_map`] keys the normalized changes by minute; a later change
//!    in source order overwrites an earlier one for the same minute.
//! 3. [`expand_minute_grid`] walks every minute of the window carrying the last
//!    observed price forward.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::price_history::PriceChangeEvent;
use crate::window::MINUTE_TIMESTAMP_FORMAT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("no price covers the first minute of the window starting {window_start}")]
    NoInitialPrice { window_start: DateTime<Utc> },
    #[error("cannot reconstruct an empty window starting {window_start}")]
    EmptyWindow { window_start: DateTime<Utc> },
}

/// A price change attributed to a whole minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedChange {
    pub minute: DateTime<Utc>,
    pub price: String,
    /// The change happened before the window and now seeds its first minute.
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinutePrice {
    pub timestamp: DateTime<Utc>,
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedSeries {
    pub points: Vec<MinutePrice>,
}

impl ReconstructedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|point| point.timestamp)
    }

    /// Headerless `YYYY-MM-DD HH:MM:SS,price` rows.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(self.points.len() * 28));
        for point in &self.points {
            let timestamp = point.timestamp.format(MINUTE_TIMESTAMP_FORMAT).to_string();
            writer.write_record([timestamp.as_str(), point.price.as_str()])?;
        }
        writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))
    }
}

pub fn reconstruct_series(
    events: &[PriceChangeEvent],
    instance_class: &str,
    window_start: DateTime<Utc>,
    window_minutes: u32,
) -> Result<ReconstructedSeries, ReconstructError> {
    let window_start = floor_to_minute(window_start);
    let changes = normalize_events(events, instance_class, window_start);
    let collapsed = changes.iter().filter(|change| change.collapsed).count();
    if collapsed > 1 {
        // Only the last pre-window change in source order seeds the window.
        debug!(
            component = "reconstruct",
            event = "reconstruct.seed_collapsed",
            window_start = %window_start,
            collapsed
        );
    }

    let price_map = build_price_map(&changes);
    let series = expand_minute_grid(&price_map, window_start, window_minutes)?;

    info!(
        component = "reconstruct",
        event = "reconstruct.finish",
        window_start = %window_start,
        input_events = events.len(),
        tracked_changes = changes.len(),
        distinct_minutes = price_map.len(),
        output_points = series.len()
    );

    Ok(series)
}

pub fn normalize_events(
    events: &[PriceChangeEvent],
    instance_class: &str,
    window_start: DateTime<Utc>,
) -> Vec<NormalizedChange> {
    events
        .iter()
        .filter(|event| event.instance_class == instance_class)
        .map(|event| {
            let minute = ceil_to_minute(event.timestamp);
            if minute < window_start {
                NormalizedChange {
                    minute: window_start,
                    price: event.price.clone(),
                    collapsed: true,
                }
            } else {
                NormalizedChange {
                    minute,
                    price: event.price.clone(),
                    collapsed: false,
                }
            }
        })
        .collect()
}

pub fn build_price_map(changes: &[NormalizedChange]) -> BTreeMap<DateTime<Utc>, String> {
    let mut map = BTreeMap::new();
    for change in changes {
        map.insert(change.minute, change.price.clone());
    }
    map
}

pub fn expand_minute_grid(
    price_map: &BTreeMap<DateTime<Utc>, String>,
    window_start: DateTime<Utc>,
    window_minutes: u32,
) -> Result<ReconstructedSeries, ReconstructError> {
    if window_minutes == 0 {
        return Err(ReconstructError::EmptyWindow { window_start });
    }

    let mut points = Vec::with_capacity(window_minutes as usize);
    let mut current: Option<&String> = None;

    for offset in 0..i64::from(window_minutes) {
        let timestamp = window_start + ChronoDuration::minutes(offset);
        if let Some(price) = price_map.get(&timestamp) {
            current = Some(price);
        }
        let price = current.ok_or(ReconstructError::NoInitialPrice { window_start })?;
        points.push(MinutePrice {
            timestamp,
            price: price.clone(),
        });
    }

    Ok(ReconstructedSeries { points })
}

/// Rounds up to the next whole minute unless already on a boundary.
fn ceil_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_minute(ts);
    if floored == ts {
        ts
    } else {
        floored + ChronoDuration::minutes(1)
    }
}

fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(ChronoDuration::minutes(1)).unwrap_or(ts)
}
