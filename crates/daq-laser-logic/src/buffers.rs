//! Fixed-length sample history.
//!
//! Every series has the same length. A new sample shifts each series left by one
//! slot, dropping the oldest value, and lands in the last slot. Indices never wrap.

use std::collections::BTreeMap;

/// Name of the timestamp series (Unix seconds).
pub const TIME: &str = "time";
/// Name of the power series (mW).
pub const POWER: &str = "power";

/// Ring of named, equally long sample series.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffers {
    length: usize,
    series: BTreeMap<String, Vec<f64>>,
}

impl SampleBuffers {
    /// Buffers of `length` slots: `time` filled with `now`, `power` and one series
    /// per temperature name filled with zeros.
    pub fn new<'a>(length: usize, now: f64, temperature_names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut series = BTreeMap::new();
        series.insert(TIME.to_string(), vec![now; length]);
        series.insert(POWER.to_string(), vec![0.0; length]);
        for name in temperature_names {
            series.insert(name.to_string(), vec![0.0; length]);
        }
        Self { length, series }
    }

    /// Slots per series.
    pub fn len(&self) -> usize {
        self.length
    }

    /// True if the buffers hold no slots.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Series names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// One series, oldest sample first.
    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// Append one sample to every series.
    ///
    /// Series without a value in `values` repeat their newest sample.
    pub fn push<'a>(&mut self, values: impl IntoIterator<Item = (&'a str, f64)>) {
        if self.length == 0 {
            return;
        }
        let mut values: BTreeMap<&str, f64> = values.into_iter().collect();
        for (name, buf) in self.series.iter_mut() {
            let newest = buf[self.length - 1];
            buf.copy_within(1.., 0);
            buf[self.length - 1] = values.remove(name.as_str()).unwrap_or(newest);
        }
        for name in values.keys() {
            tracing::debug!("No buffer for sample '{}', dropped", name);
        }
    }

    /// The newest `count` rows as `(name, value)` columns, oldest row first.
    pub fn latest(&self, count: usize) -> Vec<Vec<(&str, f64)>> {
        let start = self.length.saturating_sub(count);
        (start..self.length)
            .map(|i| {
                self.series
                    .iter()
                    .map(|(name, buf)| (name.as_str(), buf[i]))
                    .collect()
            })
            .collect()
    }
}
