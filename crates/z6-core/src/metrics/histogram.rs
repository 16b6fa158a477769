//! HDR-style latency histogram.
//!
//! Bounded-memory percentile structure over a `[lowest, highest]` value
//! range at a configured number of significant figures. Memory depends
//! only on the range and precision, never on sample count. Recorded
//! values are resolved to within one unit in the last place at the
//! configured precision.

use crate::error::{ScenarioError, Z6Error};

/// A fixed-precision value histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    lowest_discernible: u64,
    highest_trackable: u64,
    significant_figures: u8,
    unit_magnitude: u32,
    sub_bucket_half_count_magnitude: u32,
    sub_bucket_half_count: usize,
    sub_bucket_mask: u64,
    counts: Vec<u64>,
    total_count: u64,
    min_value: u64,
    max_value: u64,
}

impl Histogram {
    /// Create a histogram covering `[lowest_discernible, highest_trackable]`
    /// with `significant_figures` in `1..=5`.
    pub fn new(
        lowest_discernible: u64,
        highest_trackable: u64,
        significant_figures: u8,
    ) -> Result<Self, Z6Error> {
        if !(1..=5).contains(&significant_figures) {
            return Err(ScenarioError::InvalidValue(
                "histogram significant figures must be in 1..=5".to_string(),
            )
            .into());
        }
        if lowest_discernible < 1 || highest_trackable < 2 * lowest_discernible {
            return Err(ScenarioError::InvalidValue(
                "histogram range must satisfy highest >= 2 * lowest >= 2".to_string(),
            )
            .into());
        }

        // Smallest power of two holding 2 * 10^sig distinct values gives
        // single-unit resolution across every bucket's upper half.
        let largest_single_unit = 2u64 * 10u64.pow(significant_figures as u32);
        let sub_bucket_count_magnitude = 64 - (largest_single_unit - 1).leading_zeros();
        let sub_bucket_count = 1usize << sub_bucket_count_magnitude;
        let sub_bucket_half_count_magnitude = sub_bucket_count_magnitude - 1;
        let sub_bucket_half_count = sub_bucket_count / 2;
        let unit_magnitude = 63 - lowest_discernible.leading_zeros();
        let sub_bucket_mask = ((sub_bucket_count - 1) as u64) << unit_magnitude;

        // Count buckets until the range covers highest_trackable.
        let mut smallest_untrackable = (sub_bucket_count as u64) << unit_magnitude;
        let mut bucket_count = 1usize;
        while smallest_untrackable <= highest_trackable {
            if smallest_untrackable > u64::MAX / 2 {
                bucket_count += 1;
                break;
            }
            smallest_untrackable <<= 1;
            bucket_count += 1;
        }

        let counts_len = (bucket_count + 1) * sub_bucket_half_count;
        Ok(Self {
            lowest_discernible,
            highest_trackable,
            significant_figures,
            unit_magnitude,
            sub_bucket_half_count_magnitude,
            sub_bucket_half_count,
            sub_bucket_mask,
            counts: vec![0; counts_len],
            total_count: 0,
            min_value: u64::MAX,
            max_value: 0,
        })
    }

    /// Record one occurrence of `value`. Values above the trackable range
    /// saturate to the top of the range.
    pub fn record_value(&mut self, value: u64) {
        self.record_values(value, 1);
    }

    /// Record `count` occurrences of `value`.
    pub fn record_values(&mut self, value: u64, count: u64) {
        if count == 0 {
            return;
        }
        let clamped = value.min(self.highest_trackable);
        let index = self.counts_index_for(clamped);
        self.counts[index] += count;
        self.total_count += count;
        if clamped < self.min_value {
            self.min_value = clamped;
        }
        if clamped > self.max_value {
            self.max_value = clamped;
        }
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Smallest recorded value, or 0 when empty.
    pub fn min(&self) -> u64 {
        if self.total_count == 0 {
            0
        } else {
            self.min_value
        }
    }

    /// Largest recorded value, or 0 when empty.
    pub fn max(&self) -> u64 {
        self.max_value
    }

    /// Arithmetic mean of recorded values at bucket resolution.
    pub fn mean(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for (index, &count) in self.counts.iter().enumerate() {
            if count > 0 {
                sum += self.median_equivalent(self.value_for(index)) as f64 * count as f64;
            }
        }
        sum / self.total_count as f64
    }

    /// Value at percentile `p` in `[0, 100]`, resolved to the top of its
    /// equivalent-value range.
    pub fn value_at_percentile(&self, p: f64) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        let p = p.clamp(0.0, 100.0);
        let target = ((p / 100.0) * self.total_count as f64).ceil() as u64;
        let target = target.max(1);
        let mut cumulative = 0u64;
        for (index, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let value = self.value_for(index);
                return self.highest_equivalent(value).min(self.max_value);
            }
        }
        self.max_value
    }

    /// Forget every recorded value, keeping the configuration.
    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.total_count = 0;
        self.min_value = u64::MAX;
        self.max_value = 0;
    }

    pub fn significant_figures(&self) -> u8 {
        self.significant_figures
    }

    /// Smallest value the histogram distinguishes from its neighbours.
    pub fn lowest_discernible(&self) -> u64 {
        self.lowest_discernible
    }

    /// Largest value the histogram can record without saturating.
    pub fn highest_trackable(&self) -> u64 {
        self.highest_trackable
    }

    // -- index math -------------------------------------------------------

    fn bucket_index(&self, value: u64) -> usize {
        let pow2_ceiling = 64 - (value | self.sub_bucket_mask).leading_zeros();
        (pow2_ceiling - self.unit_magnitude - (self.sub_bucket_half_count_magnitude + 1)) as usize
    }

    fn sub_bucket_index(&self, value: u64, bucket_index: usize) -> usize {
        (value >> (bucket_index as u32 + self.unit_magnitude)) as usize
    }

    fn counts_index_for(&self, value: u64) -> usize {
        let bucket = self.bucket_index(value);
        let sub = self.sub_bucket_index(value, bucket);
        (bucket + 1) * self.sub_bucket_half_count + (sub - self.sub_bucket_half_count)
    }

    /// Lowest value mapping to counts slot `index`.
    fn value_for(&self, index: usize) -> u64 {
        let mut bucket = (index >> self.sub_bucket_half_count_magnitude) as i64 - 1;
        let mut sub =
            (index & (self.sub_bucket_half_count - 1)) + self.sub_bucket_half_count;
        if bucket < 0 {
            sub -= self.sub_bucket_half_count;
            bucket = 0;
        }
        (sub as u64) << (bucket as u32 + self.unit_magnitude)
    }

    fn equivalent_range(&self, value: u64) -> u64 {
        let bucket = self.bucket_index(value);
        1u64 << (bucket as u32 + self.unit_magnitude)
    }

    fn lowest_equivalent(&self, value: u64) -> u64 {
        let bucket = self.bucket_index(value);
        let sub = self.sub_bucket_index(value, bucket);
        (sub as u64) << (bucket as u32 + self.unit_magnitude)
    }

    fn highest_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value) + self.equivalent_range(value) - 1
    }

    fn median_equivalent(&self, value: u64) -> u64 {
        self.lowest_equivalent(value) + (self.equivalent_range(value) >> 1)
    }
}
