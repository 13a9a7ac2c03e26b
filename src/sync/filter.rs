use std::collections::VecDeque;
use std::time::SystemTime;

use serde::{Serialize, Deserialize};

use crate::core::SAMPLE_CAPACITY;
use crate::time::{elapsed_seconds, Timestamp};

/// One completed round trip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Server time minus device time, seconds
    pub offset: f64,
    /// Round-trip network delay, seconds
    pub delay: f64,
    /// Error bound of this sample, seconds
    pub dispersion: f64,
    /// Device time at which the sample was computed
    #[serde(serialize_with = "crate::core::serde::serialize_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_time")]
    pub computed_at: SystemTime,
}

/// Offset and delay from the four exchange timestamps:
/// T1 client send, T2 server receive, T3 server send, T4 client receive.
pub fn offset_and_delay(t1: Timestamp, t2: Timestamp, t3: Timestamp, t4: Timestamp) -> (f64, f64) {
    let outbound = elapsed_seconds(t1, t2);
    let inbound = elapsed_seconds(t4, t3);
    let offset = (outbound + inbound) / 2.0;
    let delay = elapsed_seconds(t1, t4) - elapsed_seconds(t2, t3);
    (offset, delay)
}

/// Fixed-capacity history of the most recent samples, oldest first
#[derive(Debug, Clone, Default)]
pub struct SampleRing {
    samples: VecDeque<Sample>,
}

impl SampleRing {
    /// Creates an empty ring
    pub fn new() -> Self {
        SampleRing {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
        }
    }

    /// Appends a sample, evicting the oldest when full
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of samples held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is held
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    /// The lowest-dispersion sample; among equals the most recent wins
    pub fn best(&self) -> Option<&Sample> {
        self.samples.iter().fold(None, |best: Option<&Sample>, sample| match best {
            Some(b) if b.dispersion < sample.dispersion => Some(b),
            _ => Some(sample),
        })
    }
}
