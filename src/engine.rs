// 🎯 Matching Engine - fill open recipient slots from donor capacity
//
// Greedy and deterministic. Every tie is broken explicitly:
// - donors: most remaining capacity first, then email ascending
// - stores a donor already buys from: most cards first, then name ascending
// - a new store: most outstanding demand among recipients accepting it, then name
// - recipients within a store: fewest filled slots first, then home email ascending
//
// Two phases. The first keeps every donor within `preferred_store_limit`
// stores; the second lets donors with leftover capacity open stores up to
// `store_hard_limit`, each such opening reported as an ExtraStoreException.
// Each phase repeats passes over all donors until a pass places nothing.
//
// Recipients not marked valid are invisible here: no demand, no cards.
// The round runs on a copy of the registry, committed back only on success.

use crate::config::MatcherConfig;
use crate::entities::AssignmentRecord;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::report::{ExtraStoreException, RoundReport};
use std::collections::BTreeMap;

pub struct MatchingEngine {
    config: MatcherConfig,
}

/// Everything placed so far this round
#[derive(Default)]
struct RoundProgress {
    placed: Vec<AssignmentRecord>,
    extra_stores: Vec<ExtraStoreException>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::with_config(MatcherConfig::default())
    }

    pub fn with_config(config: MatcherConfig) -> Self {
        MatchingEngine { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Run one matching round against `registry`.
    ///
    /// On success the registry holds the new assignments and the round is
    /// logged. On error the registry is left exactly as it was.
    pub fn run_round(&self, registry: &mut Registry) -> Result<RoundReport> {
        self.config.validate()?;

        let round = registry.next_round_id();
        let mut working = registry.clone();
        let mut progress = RoundProgress::default();

        tracing::info!(
            round,
            open_demand = working.open_demand(),
            free_capacity = working.free_capacity(),
            "starting matching round"
        );

        for store_limit in [self.config.preferred_store_limit, self.config.store_hard_limit] {
            let mut pass = 0;
            loop {
                pass += 1;
                let before = progress.placed.len();
                for donor_key in donor_order(&working) {
                    self.place_donor(&mut working, &donor_key, store_limit, round, &mut progress)?;
                }
                let placed = progress.placed.len() - before;
                tracing::debug!(round, store_limit, pass, placed, "matching pass finished");
                if placed == 0 {
                    break;
                }
            }
        }

        // A round that placed nothing leaves no trace in the registry
        if !progress.placed.is_empty() {
            working.complete_round(round, progress.placed.len());
        }

        let report = RoundReport::build(&working, round, progress.placed, progress.extra_stores);
        tracing::info!(round, new_assignments = report.new_assignments.len(), "{}", report.summary());

        *registry = working;
        Ok(report)
    }

    /// Spend as much of one donor's capacity as `store_limit` allows.
    /// Committed stores come first; new stores only once those are exhausted.
    fn place_donor(
        &self,
        registry: &mut Registry,
        donor_key: &str,
        store_limit: usize,
        round: u32,
        progress: &mut RoundProgress,
    ) -> Result<()> {
        let committed = donor_snapshot(registry, donor_key)?.committed_stores();
        for store in &committed {
            if donor_snapshot(registry, donor_key)?.remaining() == 0 {
                return Ok(());
            }
            self.fill_store(registry, donor_key, store, round, progress)?;
        }

        loop {
            let donor = donor_snapshot(registry, donor_key)?;
            if donor.remaining() == 0 || donor.distinct_store_count() >= store_limit {
                return Ok(());
            }
            let prior_stores = donor.committed_stores();

            let store = match best_new_store(registry, donor_key) {
                Some(store) => store,
                None => return Ok(()),
            };

            let placed = self.fill_store(registry, donor_key, &store, round, progress)?;
            if placed == 0 {
                return Ok(());
            }

            if prior_stores.len() >= self.config.preferred_store_limit {
                tracing::warn!(donor = donor_key, store = %store, prior = ?prior_stores, "donor opened an extra store");
                progress.extra_stores.push(ExtraStoreException {
                    donor: donor_key.to_string(),
                    store,
                    prior_stores,
                    round,
                });
            }
        }
    }

    /// Give one card at a time from `store` to the neediest eligible recipient.
    /// Returns the number of cards placed.
    fn fill_store(
        &self,
        registry: &mut Registry,
        donor_key: &str,
        store: &str,
        round: u32,
        progress: &mut RoundProgress,
    ) -> Result<usize> {
        let mut placed = 0;

        loop {
            let donor = donor_snapshot(registry, donor_key)?;
            if donor.remaining() == 0 {
                break;
            }

            let target = registry
                .recipients()
                .values()
                .filter(|r| r.is_open() && r.accepts(store) && !donor.has_given_to(&r.home_email))
                .min_by(|a, b| {
                    a.filled()
                        .cmp(&b.filled())
                        .then_with(|| a.home_email.cmp(&b.home_email))
                })
                .map(|r| r.home_email.clone());

            let recipient_key = match target {
                Some(key) => key,
                None => break,
            };

            let record = registry.record_assignment(
                donor_key,
                &recipient_key,
                store,
                round,
                self.config.card_value_usd,
            )?;
            tracing::debug!(donor = donor_key, recipient = %recipient_key, store, "assigned card");
            progress.placed.push(record);
            placed += 1;
        }

        Ok(placed)
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Donors with capacity left: most remaining first, then email ascending
fn donor_order(registry: &Registry) -> Vec<String> {
    let mut donors: Vec<(&str, u32)> = registry
        .donors()
        .values()
        .filter(|d| d.remaining() > 0)
        .map(|d| (d.email.as_str(), d.remaining()))
        .collect();
    donors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    donors.into_iter().map(|(email, _)| email.to_string()).collect()
}

/// Store to open next for a donor: among stores accepted by a recipient the
/// donor could still give to, the one with the most outstanding demand
/// across every recipient accepting it. Ties go to the lower store name.
fn best_new_store(registry: &Registry, donor_key: &str) -> Option<String> {
    let donor = registry.donor(donor_key)?;
    let committed = donor.store_counts();

    let mut candidates: BTreeMap<&str, usize> = BTreeMap::new();
    for recipient in registry.recipients().values() {
        if !recipient.is_open() || donor.has_given_to(&recipient.home_email) {
            continue;
        }
        for store in &recipient.stores {
            if !committed.contains_key(store) {
                candidates.insert(store.as_str(), 0);
            }
        }
    }

    for recipient in registry.recipients().values().filter(|r| r.valid) {
        for store in &recipient.stores {
            if let Some(demand) = candidates.get_mut(store.as_str()) {
                *demand += recipient.outstanding();
            }
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (store, demand) in candidates {
        match best {
            Some((_, top)) if demand <= top => {}
            _ => best = Some((store, demand)),
        }
    }
    best.map(|(store, _)| store.to_string())
}

fn donor_snapshot(registry: &Registry, donor_key: &str) -> Result<crate::entities::Donor> {
    registry
        .donor(donor_key)
        .cloned()
        .ok_or_else(|| Error::InternalInvariantViolation(format!("donor {} vanished mid-round", donor_key)))
}
