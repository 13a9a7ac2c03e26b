//! Synchronization module
//!
//! This module turns server replies into a network time: each association
//! keeps a short history of samples and judges its own trust, the scheduler
//! drives every association from one task, and the aggregator combines the
//! trusted ones into the offset readers see.

pub mod aggregator;
pub mod association;
pub mod filter;
pub mod manager;
mod scheduler;
#[cfg(test)]
mod testing;

pub use self::aggregator::{Aggregator, PublishedOffset};
pub use self::association::{Association, AssociationConfig, AssociationReport, RoundUpdate};
pub use self::filter::{Sample, SampleRing};
pub use self::manager::NetworkClock;
pub use self::scheduler::AssociationEvent;

/// Utility functions for combining association results
pub mod util {
    use std::cmp::Ordering;

    use super::AssociationReport;

    /// Offset combined from several trusted associations
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct CombinedOffset {
        /// Mean offset of the selected associations, seconds
        pub offset: f64,
        /// Mean dispersion of the selected associations, seconds
        pub dispersion: f64,
        /// Associations selected
        pub sources: usize,
    }

    /// Combines the trusted reports: they are ranked by dispersion (ties by
    /// address) and the offsets of the best quarter, rounded up, are
    /// averaged. One to four trusted servers therefore reduce to the single
    /// best one.
    ///
    /// Returns `None` when no report is trusted.
    pub fn combine_offsets<'a, I>(reports: I) -> Option<CombinedOffset>
    where
        I: IntoIterator<Item = &'a AssociationReport>,
    {
        let mut trusted: Vec<&AssociationReport> = reports
            .into_iter()
            .filter(|r| r.trusted && r.offset.is_finite() && r.dispersion.is_finite())
            .collect();
        if trusted.is_empty() {
            return None;
        }

        trusted.sort_by(|a, b| {
            a.dispersion
                .partial_cmp(&b.dispersion)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.addr.cmp(&b.addr))
        });

        let take = (trusted.len() + 3) / 4;
        let selected = &trusted[..take];
        let n = selected.len() as f64;

        Some(CombinedOffset {
            offset: selected.iter().map(|r| r.offset).sum::<f64>() / n,
            dispersion: selected.iter().map(|r| r.dispersion).sum::<f64>() / n,
            sources: selected.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Poll, ServerId};
    use crate::protocol::AssociationState;
    use std::net::SocketAddr;

    fn report(last_octet: u8, offset: f64, dispersion: f64, trusted: bool) -> AssociationReport {
        let addr = SocketAddr::from(([192, 0, 2, last_octet], 123));
        AssociationReport {
            server: ServerId::from(addr),
            addr,
            state: AssociationState::Active,
            offset,
            dispersion,
            delay: 0.0,
            samples: 8,
            poll: Poll(4),
            trusted,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn test_combine_nothing_trusted() {
        let reports = vec![report(1, 0.5, 0.01, false)];
        assert!(util::combine_offsets(&reports).is_none());
        assert!(util::combine_offsets(&Vec::<AssociationReport>::new()).is_none());
    }

    #[test]
    fn test_combine_takes_lowest_quartile() {
        // eight trusted servers: the two lowest dispersions are averaged
        let reports: Vec<_> = (1..=8)
            .map(|i| report(i, i as f64 * 0.1, 0.001 * (9 - i) as f64, true))
            .collect();

        let combined = util::combine_offsets(&reports).unwrap();
        assert_eq!(combined.sources, 2);
        assert!((combined.offset - 0.75).abs() < 1e-12);
        assert!((combined.dispersion - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn test_combine_rounds_quartile_up() {
        let reports: Vec<_> = (1..=5).map(|i| report(i, i as f64, 0.01 * i as f64, true)).collect();
        assert_eq!(util::combine_offsets(&reports).unwrap().sources, 2);

        let reports: Vec<_> = (1..=4).map(|i| report(i, i as f64, 0.01 * i as f64, true)).collect();
        let combined = util::combine_offsets(&reports).unwrap();
        assert_eq!(combined.sources, 1);
        assert_eq!(combined.offset, 1.0);
    }

    #[test]
    fn test_combine_ties_break_by_address() {
        let reports = vec![report(9, 0.9, 0.01, true), report(3, 0.3, 0.01, true)];
        assert_eq!(util::combine_offsets(&reports).unwrap().offset, 0.3);
    }
}
