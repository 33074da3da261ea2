//! The supplier finder: a DHT random walk with a retry budget.
//!
//! Each attempt draws a random key, asks the DHT for the closest node,
//! filters out unusable candidates (self, already hired, blacklisted) and
//! offers the storage service: resolve identity, introduce ourselves,
//! request the service, wait for the answer. The first acceptance wins;
//! an exhausted budget reports `search-failed` and the controller retries
//! on a later tick.

use std::collections::HashSet;

use garner_dht::DhtService;
use garner_types::IdUrl;
use tracing::{debug, info};

/// Default number of candidates tried per search.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// What offering the service to one candidate yielded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// The candidate granted the service and is connected.
    Accepted,
    /// The candidate answered with a refusal.
    Rejected,
    /// No identity, no session or no answer.
    Unreachable,
}

/// Introduces this customer to a candidate and requests the service.
///
/// The node wiring implements the real handshake (identity resolution,
/// `Identity` packet, `RequestService`); tests script the answers.
pub trait CandidateProbe: Send + Sync {
    /// Offer the storage service to one candidate.
    fn offer_service(
        &self,
        candidate: &IdUrl,
    ) -> impl std::future::Future<Output = ProbeResult> + Send;
}

/// Result of one finder run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinderOutcome {
    /// A candidate accepted; hand it to the controller.
    Found(IdUrl),
    /// Budget exhausted with no acceptance.
    SearchFailed,
}

/// One search for one fleet slot.
pub struct SupplierFinder {
    exclude: HashSet<IdUrl>,
    attempts: u32,
}

impl SupplierFinder {
    /// Create a finder excluding the given IDURLs (the customer itself,
    /// every hired supplier, any blacklist).
    pub fn new(exclude: impl IntoIterator<Item = IdUrl>) -> Self {
        Self {
            exclude: exclude.into_iter().collect(),
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// Override the candidate budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Walk the DHT until a candidate accepts or the budget runs out.
    pub async fn run<D, P>(self, dht: &D, probe: &P) -> FinderOutcome
    where
        D: DhtService,
        P: CandidateProbe,
    {
        let mut tried: HashSet<IdUrl> = HashSet::new();
        for attempt in 1..=self.attempts {
            let key = dht.random_key();
            let candidate = match dht.find_node(&key).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => {
                    debug!(attempt, "dht returned no node");
                    continue;
                }
                Err(err) => {
                    debug!(attempt, error = %err, "dht lookup failed");
                    continue;
                }
            };

            if self.exclude.contains(&candidate) || !tried.insert(candidate.clone()) {
                debug!(attempt, candidate = %candidate, "candidate filtered");
                continue;
            }

            match probe.offer_service(&candidate).await {
                ProbeResult::Accepted => {
                    info!(candidate = %candidate, attempt, "supplier found");
                    return FinderOutcome::Found(candidate);
                }
                ProbeResult::Rejected => {
                    debug!(candidate = %candidate, "candidate rejected the service");
                }
                ProbeResult::Unreachable => {
                    debug!(candidate = %candidate, "candidate unreachable");
                }
            }
        }
        info!("supplier search failed");
        FinderOutcome::SearchFailed
    }
}
