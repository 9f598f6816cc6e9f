//! Filter unit cost model
//!
//! Each filter unit is a Bloom filter with `bits_per_unit` bits per key.
//! Stacking `class` independent units multiplies their false positive rates,
//! and the expected I/O cost of a sample is proportional to the false positive
//! lookups it incurs.

use crate::error::{ClfError, Result};

/// Default bits-per-key of one filter unit
pub const DEFAULT_BITS_PER_UNIT: f64 = 4.0;

/// Number of filter units enabled per segment before any model exists
pub const DEFAULT_UNITS_NUM: usize = 2;

/// Largest number of units the storage engine will stack on one segment
pub const MAX_UNITS_NUM: usize = 6;

/// ln(2), truncated the same way the storage engine does
const PROBES_PER_BIT: f64 = 0.69;

/// Estimates the lookup cost of a filter class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    bits_per_unit: f64,
    num_probes: u32,
    per_unit_fp_rate: f64,
}

impl CostModel {
    /// Build a cost model for units of `bits_per_unit` bits per key
    pub fn new(bits_per_unit: f64) -> Result<Self> {
        if !bits_per_unit.is_finite() || bits_per_unit <= 0.0 {
            return Err(ClfError::Config(format!(
                "bits_per_unit must be a positive number, got {}",
                bits_per_unit
            )));
        }

        let num_probes = (bits_per_unit * PROBES_PER_BIT).floor() as u32;
        let per_unit_fp_rate = standard_fp_rate(bits_per_unit, num_probes);

        Ok(Self {
            bits_per_unit,
            num_probes,
            per_unit_fp_rate,
        })
    }

    pub fn bits_per_unit(&self) -> f64 {
        self.bits_per_unit
    }

    pub fn num_probes(&self) -> u32 {
        self.num_probes
    }

    /// False positive rate of a single filter unit
    pub fn per_unit_fp_rate(&self) -> f64 {
        self.per_unit_fp_rate
    }

    /// Expected cost of serving `weight` lookups with `class` stacked units
    pub fn estimated_cost(&self, class: usize, weight: f64) -> f64 {
        // Classes beyond i32::MAX underflow to zero anyway
        let exponent = i32::try_from(class).unwrap_or(i32::MAX);
        self.per_unit_fp_rate.powi(exponent) * weight
    }

    /// Sum of estimated costs, with the class of each item picked by `class_of`
    pub fn aggregate<I, F>(&self, items: I, mut class_of: F) -> f64
    where
        I: IntoIterator,
        F: FnMut(&I::Item) -> (usize, f64),
    {
        items
            .into_iter()
            .map(|item| {
                let (class, weight) = class_of(&item);
                self.estimated_cost(class, weight)
            })
            .sum()
    }
}

impl Default for CostModel {
    fn default() -> Self {
        let num_probes = (DEFAULT_BITS_PER_UNIT * PROBES_PER_BIT).floor() as u32;
        Self {
            bits_per_unit: DEFAULT_BITS_PER_UNIT,
            num_probes,
            per_unit_fp_rate: standard_fp_rate(DEFAULT_BITS_PER_UNIT, num_probes),
        }
    }
}

/// Standard Bloom filter false positive estimate
fn standard_fp_rate(bits_per_key: f64, num_probes: u32) -> f64 {
    let k = num_probes as f64;
    (1.0 - (-k / bits_per_key).exp()).powi(num_probes as i32)
}
