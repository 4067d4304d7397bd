//! Reduction of a minute series into its weekly distribution summary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::reconstruct::ReconstructedSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuartileLabel {
    Q1,
    Q2,
    Q3,
    Max,
}

impl QuartileLabel {
    pub const ALL: [QuartileLabel; 4] = [Self::Q1, Self::Q2, Self::Q3, Self::Max];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q1 => "q1",
            Self::Q2 => "q2",
            Self::Q3 => "q3",
            Self::Max => "max",
        }
    }
}

/// One summary point. Field names match the persisted corpus header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuartileRow {
    #[serde(rename = "Timestamp")]
    pub date: NaiveDate,
    #[serde(rename = "SpotPrice")]
    pub price: f64,
    #[serde(rename = "q_id")]
    pub label: QuartileLabel,
}

/// Exactly four rows in `[q1, q2, q3, max]` order, all for the same date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuartileSummary {
    rows: [QuartileRow; 4],
}

#[derive(Debug, Error, PartialEq)]
pub enum QuartileError {
    #[error("cannot reduce an empty series")]
    EmptySeries,
    #[error("price '{value}' at {timestamp} is not a finite number")]
    InvalidPrice { timestamp: String, value: String },
    #[error("malformed quartile summary: {0}")]
    Malformed(String),
}

impl QuartileSummary {
    pub fn new(date: NaiveDate, q1: f64, q2: f64, q3: f64, max: f64) -> Self {
        let row = |price, label| QuartileRow { date, price, label };
        Self {
            rows: [
                row(q1, QuartileLabel::Q1),
                row(q2, QuartileLabel::Q2),
                row(q3, QuartileLabel::Q3),
                row(max, QuartileLabel::Max),
            ],
        }
    }

    /// Rebuilds a summary from four rows, which must already be in label order.
    pub fn from_rows(rows: &[QuartileRow]) -> Result<Self, QuartileError> {
        let [q1, q2, q3, max] = rows else {
            return Err(QuartileError::Malformed(format!(
                "expected 4 rows, found {}",
                rows.len()
            )));
        };
        for (row, expected) in [q1, q2, q3, max].iter().zip(QuartileLabel::ALL) {
            if row.label != expected {
                return Err(QuartileError::Malformed(format!(
                    "expected label {} found {}",
                    expected.as_str(),
                    row.label.as_str()
                )));
            }
            if row.date != q1.date {
                return Err(QuartileError::Malformed(format!(
                    "mixed dates {} and {}",
                    q1.date, row.date
                )));
            }
        }
        Ok(Self {
            rows: [*q1, *q2, *q3, *max],
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.rows[0].date
    }

    pub fn rows(&self) -> &[QuartileRow; 4] {
        &self.rows
    }

    pub fn get(&self, label: QuartileLabel) -> f64 {
        match label {
            QuartileLabel::Q1 => self.rows[0].price,
            QuartileLabel::Q2 => self.rows[1].price,
            QuartileLabel::Q3 => self.rows[2].price,
            QuartileLabel::Max => self.rows[3].price,
        }
    }

    /// Headerless `YYYY-MM-DD,price,label` rows.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, QuartileError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes);
        let rows = reader
            .deserialize::<QuartileRow>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| QuartileError::Malformed(err.to_string()))?;
        Self::from_rows(&rows)
    }
}

pub fn reduce_quartiles(series: &ReconstructedSeries) -> Result<QuartileSummary, QuartileError> {
    let first = series.points.first().ok_or(QuartileError::EmptySeries)?;
    let date = first.timestamp.date_naive();

    let mut prices = Vec::with_capacity(series.len());
    for point in &series.points {
        let value = point
            .price
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| QuartileError::InvalidPrice {
                timestamp: point.timestamp.to_string(),
                value: point.price.clone(),
            })?;
        prices.push(value);
    }
    prices.sort_by(f64::total_cmp);

    let summary = QuartileSummary::new(
        date,
        quantile_linear(&prices, 0.25),
        quantile_linear(&prices, 0.50),
        quantile_linear(&prices, 0.75),
        prices[prices.len() - 1],
    );

    info!(
        component = "quartiles",
        event = "quartiles.reduce.finish",
        date = %date,
        points = prices.len(),
        q1 = summary.get(QuartileLabel::Q1),
        q2 = summary.get(QuartileLabel::Q2),
        q3 = summary.get(QuartileLabel::Q3),
        max = summary.get(QuartileLabel::Max)
    );

    Ok(summary)
}

/// Linear interpolation between the order statistics around `(n - 1) * q`.
///
/// `sorted` must be non-empty and ascending.
pub fn quantile_linear(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let position = q.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(last);
    let t = position - lower as f64;
    let (a, b) = (sorted[lower], sorted[upper]);

    let value = if t >= 0.5 {
        b - (b - a) * (1.0 - t)
    } else {
        a + (b - a) * t
    };
    value.clamp(a, b)
}
