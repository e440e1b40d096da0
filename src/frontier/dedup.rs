use dashmap::DashSet;
use serde::{Deserialize, Serialize};

/// Which fingerprints `Frontier::push` turns away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// A fingerprint is admitted once for the lifetime of the frontier.
    #[default]
    Permanent,
    /// A fingerprint is rejected only while pending or in flight.
    InFlight,
}

impl DedupPolicy {
    pub fn filter(self) -> Box<dyn DuplicateFilter> {
        match self {
            DedupPolicy::Permanent => Box::new(PermanentDuplicateFilter::default()),
            DedupPolicy::InFlight => Box::new(InFlightDuplicateFilter::default()),
        }
    }
}

pub trait DuplicateFilter: Send + Sync {
    /// Records `fingerprint`; `false` when it must be rejected as a duplicate.
    fn admit(&self, fingerprint: &str) -> bool;

    /// The request left the crawl for good (succeeded or abandoned).
    fn release(&self, fingerprint: &str);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct PermanentDuplicateFilter {
    seen: DashSet<String>,
}

impl DuplicateFilter for PermanentDuplicateFilter {
    fn admit(&self, fingerprint: &str) -> bool {
        self.seen.insert(fingerprint.to_string())
    }

    fn release(&self, _fingerprint: &str) {}

    fn len(&self) -> usize {
        self.seen.len()
    }
}

#[derive(Default)]
pub struct InFlightDuplicateFilter {
    live: DashSet<String>,
}

impl DuplicateFilter for InFlightDuplicateFilter {
    fn admit(&self, fingerprint: &str) -> bool {
        self.live.insert(fingerprint.to_string())
    }

    fn release(&self, fingerprint: &str) {
        self.live.remove(fingerprint);
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}
