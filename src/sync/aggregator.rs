use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use serde::{Serialize, Deserialize};
use tokio::sync::watch;
use tracing::debug;

use crate::time::util::shift;
use super::association::AssociationReport;
use super::util::combine_offsets;

/// The combined offset shared with readers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PublishedOffset {
    /// Network time minus device time, seconds
    pub offset: f64,
    /// Error bound of the offset, seconds
    pub dispersion: f64,
    /// Trusted associations that contributed
    pub sources: usize,
    /// Generation of the report table the value was computed from
    pub generation: u64,
    /// When the value was published; `None` before the first publication
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(skip_deserializing)]
    pub updated_at: Option<SystemTime>,
}

impl PublishedOffset {
    /// Whether any offset has been published yet
    pub fn is_set(&self) -> bool {
        self.updated_at.is_some()
    }
}

#[derive(Debug, Clone, Default)]
struct ReportTable {
    generation: u64,
    reports: BTreeMap<SocketAddr, AssociationReport>,
}

/// Latest report of every association plus the published offset.
///
/// Both live in `watch` channels so reads never wait on the scheduler, and
/// a value is always replaced whole. Any thread may call
/// [`Aggregator::current_offset`]; a result computed from an older report
/// table never replaces one computed from a newer table.
#[derive(Debug)]
pub struct Aggregator {
    reports: watch::Sender<ReportTable>,
    published: watch::Sender<PublishedOffset>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new()
    }
}

impl Aggregator {
    /// Creates an aggregator with no reports and a zero offset
    pub fn new() -> Self {
        let (reports, _) = watch::channel(ReportTable::default());
        let (published, _) = watch::channel(PublishedOffset::default());
        Aggregator { reports, published }
    }

    /// Stores the latest report of an association
    pub fn record(&self, report: AssociationReport) {
        self.reports.send_modify(|table| {
            table.generation += 1;
            table.reports.insert(report.addr, report);
        });
    }

    /// Recomputes and publishes the combined offset, returning it.
    ///
    /// With no trusted association the last published offset is returned
    /// unchanged.
    pub fn current_offset(&self) -> f64 {
        let (generation, combined) = {
            let table = self.reports.borrow();
            (table.generation, combine_offsets(table.reports.values()))
        };

        if let Some(combined) = combined {
            let published = self.published.send_if_modified(|current| {
                if current.is_set() && current.generation >= generation {
                    return false;
                }
                *current = PublishedOffset {
                    offset: combined.offset,
                    dispersion: combined.dispersion,
                    sources: combined.sources,
                    generation,
                    updated_at: Some(SystemTime::now()),
                };
                true
            });
            if published {
                debug!(
                    offset = combined.offset,
                    dispersion = combined.dispersion,
                    sources = combined.sources,
                    generation,
                    "offset published"
                );
            }
        }

        self.published.borrow().offset
    }

    /// The last published value, without recomputing
    pub fn published(&self) -> PublishedOffset {
        *self.published.borrow()
    }

    /// Whether at least one association is currently trusted
    pub fn is_trusted(&self) -> bool {
        self.reports.borrow().reports.values().any(|r| r.trusted)
    }

    /// Device time corrected by the combined offset
    pub fn network_time(&self) -> SystemTime {
        shift(SystemTime::now(), self.current_offset())
    }

    /// Receiver notified on every publication
    pub fn subscribe(&self) -> watch::Receiver<PublishedOffset> {
        self.published.subscribe()
    }

    /// Latest report of every association, ordered by address
    pub fn reports(&self) -> Vec<AssociationReport> {
        self.reports.borrow().reports.values().cloned().collect()
    }

    /// Number of associations reporting
    pub fn len(&self) -> usize {
        self.reports.borrow().reports.len()
    }

    /// Whether no association has reported
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
