//! Participant Ledger
//!
//! Tracks each participant's level and donation counter. After
//! `threshold` counted donations the participant advances one phase
//! (wrapping to phase 0 after the last) and the counter resets.
//!
//! The first successful donation creates the participant with counter 0;
//! only donations after that count toward a level-up.
//!
//! Created: 2026-10-19

use crate::types::Participant;
use anyhow::{ensure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default phase targets; NumPhases = 6
pub const DEFAULT_PHASES: [u64; 6] = [20, 80, 320, 1280, 5120, 20480];
pub const DEFAULT_LEVEL_UP_THRESHOLD: u32 = 10;

/// Level-up threshold and phase table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionRules {
    pub threshold: u32,
    pub phases: Vec<u64>,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LEVEL_UP_THRESHOLD,
            phases: DEFAULT_PHASES.to_vec(),
        }
    }
}

impl ProgressionRules {
    pub fn new(threshold: u32, phases: Vec<u64>) -> Result<Self> {
        ensure!(threshold >= 1, "level-up threshold must be at least 1");
        ensure!(!phases.is_empty(), "phase table must not be empty");
        Ok(Self { threshold, phases })
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    /// Target of the given level, `None` when out of range
    pub fn phase_target(&self, level: usize) -> Option<u64> {
        self.phases.get(level).copied()
    }

    /// Apply one counted donation to an existing participant.
    /// Returns true when the participant advanced a level.
    pub fn advance(&self, participant: &mut Participant) -> bool {
        participant.donation_count += 1;
        if participant.donation_count >= self.threshold {
            participant.level = (participant.level + 1) % self.num_phases();
            participant.donation_count = 0;
            true
        } else {
            false
        }
    }
}

/// Result of a ledger update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub participant: Participant,
    pub created: bool,
    pub leveled_up: bool,
}

/// Storage capability for participants.
///
/// `upsert_with_threshold_advance` must be atomic per address: two
/// concurrent updates for the same participant both count.
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn get(&self, address: &str) -> Option<Participant>;

    async fn upsert_with_threshold_advance(
        &self,
        address: &str,
        sponsor: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerUpdate;

    fn rules(&self) -> &ProgressionRules;
}

/// Process-lifetime ledger keyed by canonical address
#[derive(Debug)]
pub struct InMemoryLedger {
    participants: DashMap<String, Participant>,
    rules: ProgressionRules,
}

impl InMemoryLedger {
    pub fn new(rules: ProgressionRules) -> Self {
        Self {
            participants: DashMap::new(),
            rules,
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryLedger {
    async fn get(&self, address: &str) -> Option<Participant> {
        self.participants.get(address).map(|entry| entry.clone())
    }

    async fn upsert_with_threshold_advance(
        &self,
        address: &str,
        sponsor: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerUpdate {
        // The entry guard holds the shard lock for the whole read-modify-write
        match self.participants.entry(address.to_string()) {
            Entry::Vacant(slot) => {
                let participant = Participant {
                    address: address.to_string(),
                    level: 0,
                    donation_count: 0,
                    last_donation: at,
                    sponsor: sponsor.filter(|s| !s.is_empty()).map(str::to_string),
                };
                slot.insert(participant.clone());
                info!("New participant {} (sponsor: {:?})", address, participant.sponsor);
                LedgerUpdate {
                    participant,
                    created: true,
                    leveled_up: false,
                }
            }
            Entry::Occupied(mut slot) => {
                let participant = slot.get_mut();
                participant.last_donation = at;
                let leveled_up = self.rules.advance(participant);

                if leveled_up {
                    info!(
                        "{} advanced to level {} (target {})",
                        address,
                        participant.level,
                        self.rules.phase_target(participant.level).unwrap_or_default()
                    );
                } else {
                    debug!(
                        "{} donation count {}/{}",
                        address, participant.donation_count, self.rules.threshold
                    );
                }

                LedgerUpdate {
                    participant: participant.clone(),
                    created: false,
                    leveled_up,
                }
            }
        }
    }

    fn rules(&self) -> &ProgressionRules {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ADDR: &str = "0x1111111111111111111111111111111111111111";

    fn seeded(level: usize, count: u32) -> InMemoryLedger {
        let ledger = InMemoryLedger::new(ProgressionRules::default());
        ledger.participants.insert(
            ADDR.to_string(),
            Participant {
                address: ADDR.to_string(),
                level,
                donation_count: count,
                last_donation: Utc::now(),
                sponsor: None,
            },
        );
        ledger
    }

    #[tokio::test]
    async fn test_first_donation_creates_participant() {
        let ledger = InMemoryLedger::new(ProgressionRules::default());
        let update = ledger
            .upsert_with_threshold_advance(ADDR, Some("0x2222222222222222222222222222222222222222"), Utc::now())
            .await;

        assert!(update.created);
        assert!(!update.leveled_up);
        assert_eq!(update.participant.level, 0);
        assert_eq!(update.participant.donation_count, 0);
        assert!(update.participant.sponsor.is_some());
        assert_eq!(ledger.get(ADDR).await, Some(update.participant));
    }

    #[tokio::test]
    async fn test_empty_sponsor_recorded_as_none() {
        let ledger = InMemoryLedger::new(ProgressionRules::default());
        let update = ledger.upsert_with_threshold_advance(ADDR, Some(""), Utc::now()).await;
        assert_eq!(update.participant.sponsor, None);
    }

    #[tokio::test]
    async fn test_counter_below_threshold_increments() {
        let ledger = seeded(2, 5);
        let update = ledger.upsert_with_threshold_advance(ADDR, None, Utc::now()).await;
        assert!(!update.leveled_up);
        assert_eq!(update.participant.donation_count, 6);
        assert_eq!(update.participant.level, 2);
    }

    #[tokio::test]
    async fn test_counter_nine_levels_up() {
        let ledger = seeded(2, 9);
        let update = ledger.upsert_with_threshold_advance(ADDR, None, Utc::now()).await;
        assert!(update.leveled_up);
        assert_eq!(update.participant.donation_count, 0);
        assert_eq!(update.participant.level, 3);
    }

    #[tokio::test]
    async fn test_last_phase_wraps_to_zero() {
        let ledger = seeded(5, 9);
        let update = ledger.upsert_with_threshold_advance(ADDR, None, Utc::now()).await;
        assert!(update.leveled_up);
        assert_eq!(update.participant.level, 0);
    }

    #[tokio::test]
    async fn test_sponsor_not_overwritten_by_later_donations() {
        let ledger = InMemoryLedger::new(ProgressionRules::default());
        let sponsor = "0x2222222222222222222222222222222222222222";
        ledger.upsert_with_threshold_advance(ADDR, Some(sponsor), Utc::now()).await;
        let update = ledger
            .upsert_with_threshold_advance(ADDR, Some("0x3333333333333333333333333333333333333333"), Utc::now())
            .await;
        assert_eq!(update.participant.sponsor.as_deref(), Some(sponsor));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let ledger = Arc::new(InMemoryLedger::new(ProgressionRules::default()));
        ledger.upsert_with_threshold_advance(ADDR, None, Utc::now()).await;

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.upsert_with_threshold_advance(ADDR, None, Utc::now()).await
            }));
        }
        let level_ups = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| r.as_ref().map(|u| u.leveled_up).unwrap_or(false))
            .count();

        // 25 counted donations: two level-ups, five left on the counter
        let p = ledger.get(ADDR).await.unwrap();
        assert_eq!(level_ups, 2);
        assert_eq!(p.level, 2);
        assert_eq!(p.donation_count, 5);
    }

    #[test]
    fn test_rules_reject_empty_phase_table() {
        assert!(ProgressionRules::new(10, vec![]).is_err());
        assert!(ProgressionRules::new(0, vec![1]).is_err());
        assert_eq!(ProgressionRules::default().num_phases(), 6);
        assert_eq!(ProgressionRules::default().phase_target(1), Some(80));
    }
}
