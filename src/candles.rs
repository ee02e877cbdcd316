use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// --- Data Structures ---

/// One OHLC candle as delivered by the price feed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Candles for one asset, ascending by timestamp with no duplicate timestamps.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Sorts the points and collapses duplicate timestamps, keeping the later entry.
    pub fn from_points(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by(|later, earlier| {
            if later.timestamp == earlier.timestamp {
                *earlier = *later;
                true
            } else {
                false
            }
        });
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    /// Builds a series with one-hour spacing, used by tests that only care about closes.
    #[cfg(test)]
    pub(crate) fn from_closes(closes: &[f64]) -> Self {
        let start = 1_700_000_000_000_i64;
        let points = closes
            .iter()
            .enumerate()
            .filter_map(|(i, &close)| {
                let timestamp = DateTime::from_timestamp_millis(start + i as i64 * 3_600_000)?;
                Some(PricePoint {
                    timestamp,
                    open: close,
                    high: close,
                    low: close,
                    close,
                })
            })
            .collect();
        Self::from_points(points)
    }
}

// --- Custom Deserialization ---

/// One lenient number inside a candle row.
#[derive(Deserialize, Debug)]
#[serde(transparent)]
struct LenientField(#[serde(deserialize_with = "deserialize_f64_lenient")] Option<f64>);

/// `[timestamp_ms, open, high, low, close]`. Rows are read as plain sequences,
/// so a short row becomes a dropped candle instead of a decode error.
#[derive(Deserialize, Debug)]
#[serde(transparent)]
struct RawCandle(Vec<LenientField>);

impl RawCandle {
    fn field(&self, index: usize) -> Option<f64> {
        self.0
            .get(index)
            .and_then(|field| field.0)
            .filter(|v| v.is_finite())
    }

    fn into_point(self) -> Option<PricePoint> {
        Some(PricePoint {
            timestamp: DateTime::from_timestamp_millis(self.field(0)? as i64)?,
            open: self.field(1)?,
            high: self.field(2)?,
            low: self.field(3)?,
            close: self.field(4)?,
        })
    }
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Parses an OHLC payload. Candles with a missing or null field are dropped.
pub fn parse_ohlc(body: &[u8]) -> Result<PriceSeries, serde_json::Error> {
    let raw: Vec<RawCandle> = serde_json::from_slice(body)?;
    let points = raw.into_iter().filter_map(RawCandle::into_point).collect();
    Ok(PriceSeries::from_points(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_fields() {
        let body = br#"[
            [1700000000000, 100.5, 101.0, 99.5, 100.8],
            [1700001800000, "100.8", "102", "100.1", "101.9"]
        ]"#;
        let series = parse_ohlc(body).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![100.8, 101.9]);
        assert_eq!(series.points()[1].high, 102.0);
        assert_eq!(series.points()[0].timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn drops_candles_with_missing_values() {
        let body = br#"[
            [1700000000000, 1.0, 1.0, 1.0, null],
            [1700001800000, 1.0, 1.0, 1.0, ""],
            [1700003600000, 2.0, 2.0, 2.0, 2.0]
        ]"#;
        let series = parse_ohlc(body).unwrap();
        assert_eq!(series.closes(), vec![2.0]);
    }

    #[test]
    fn drops_short_rows() {
        let body = br#"[
            [1700000000000, 1.0, 1.0, 1.0],
            [],
            [1700003600000, 2.0, 2.0, 2.0, 2.0]
        ]"#;
        let series = parse_ohlc(body).unwrap();
        assert_eq!(series.closes(), vec![2.0]);
    }

    #[test]
    fn drops_non_finite_values() {
        let body = br#"[
            [1700000000000, 1.0, 1.0, 1.0, "NaN"],
            [1700001800000, "inf", 1.0, 1.0, 1.0],
            [1700003600000, 2.0, 2.0, 2.0, 2.0]
        ]"#;
        let series = parse_ohlc(body).unwrap();
        assert_eq!(series.closes(), vec![2.0]);
    }

    #[test]
    fn rejects_non_numeric_strings() {
        let body = br#"[[1700000000000, "abc", 1.0, 1.0, 1.0]]"#;
        assert!(parse_ohlc(body).is_err());
    }

    #[test]
    fn empty_payload_is_empty_series() {
        let series = parse_ohlc(b"[]").unwrap();
        assert!(series.is_empty());
        assert!(series.last().is_none());
    }

    #[test]
    fn sorts_and_keeps_latest_duplicate() {
        let body = br#"[
            [1700003600000, 3.0, 3.0, 3.0, 3.0],
            [1700000000000, 1.0, 1.0, 1.0, 1.0],
            [1700003600000, 4.0, 4.0, 4.0, 4.0]
        ]"#;
        let series = parse_ohlc(body).unwrap();
        assert_eq!(series.closes(), vec![1.0, 4.0]);
        let stamps: Vec<i64> = series
            .points()
            .iter()
            .map(|p| p.timestamp.timestamp_millis())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
