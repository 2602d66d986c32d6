//! Reputation ledger: bounded, decaying trust scores between citizens.
//!
//! Scores move through signed adjustments made by one citizen about another.
//! Adjustments are gated (magnitude cap, no self-adjustment, per-actor daily
//! budget) and every accepted one is kept in the target's bounded history.
//! Independently of adjustment traffic, a periodic tick pulls every score
//! toward neutral:
//!
//! ```text
//! score' = neutral + (score - neutral) * (1 - decay_rate) ^ elapsed_days
//! ```
//!
//! clamped to `[min_score, max_score]`. Ticks closer together than the minimum
//! decay interval leave the record untouched (including `lastDecayTs`), so
//! repeated ticks compound to the same result as one long tick.

use crate::core::config::ReputationPolicy;
use crate::core::error::ZionError;
use crate::core::store::{self, LeasePolicy, StoreLease};
use crate::core::time;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

pub const MIN_SCORE: f64 = -1000.0;
pub const MAX_SCORE: f64 = 10000.0;
pub const NEUTRAL_SCORE: f64 = 0.0;
pub const DECAY_RATE: f64 = 0.05;
pub const MIN_DECAY_INTERVAL_SECS: i64 = 3600;
pub const MAX_ADJUSTMENTS_PER_DAY: u32 = 10;
pub const MAX_SINGLE_ADJUSTMENT: f64 = 100.0;
pub const MAX_HISTORY_ENTRIES: usize = 1000;
pub const DAILY_COUNTER_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Untrusted,
    Neutral,
    Respected,
    Honored,
    Legendary,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Untrusted => "Untrusted",
            Tier::Neutral => "Neutral",
            Tier::Respected => "Respected",
            Tier::Honored => "Honored",
            Tier::Legendary => "Legendary",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest to highest.
pub const TIER_ORDER: [Tier; 5] = [
    Tier::Untrusted,
    Tier::Neutral,
    Tier::Respected,
    Tier::Honored,
    Tier::Legendary,
];

/// Inclusive lower bound of each tier; each tier runs up to the next bound.
pub const TIER_THRESHOLDS: [(Tier, f64); 5] = [
    (Tier::Untrusted, MIN_SCORE),
    (Tier::Neutral, 0.0),
    (Tier::Respected, 100.0),
    (Tier::Honored, 500.0),
    (Tier::Legendary, 1500.0),
];

/// Highest tier whose threshold is at or below `score`.
pub fn get_reputation_tier(score: f64) -> Tier {
    TIER_THRESHOLDS
        .iter()
        .rev()
        .find(|(_, threshold)| *threshold <= score)
        .map(|(tier, _)| *tier)
        .unwrap_or(Tier::Untrusted)
}

fn clamp_score(score: f64, policy: &ReputationPolicy) -> f64 {
    score.clamp(policy.min_score, policy.max_score)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub from_id: String,
    pub target_id: String,
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_id: String,
    pub target_id: String,
    pub amount: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub old_score: f64,
    pub new_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentOutcome {
    pub old_score: f64,
    pub new_score: f64,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub tier_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationRecord {
    pub score: f64,
    #[serde(default)]
    pub history: VecDeque<HistoryEntry>,
    /// Adjustments this citizen made, keyed by UTC day (`YYYY-MM-DD`).
    #[serde(default)]
    pub daily_adjustment_counts: BTreeMap<String, u32>,
    pub last_decay_ts: DateTime<Utc>,
}

impl ReputationRecord {
    pub fn new(now: DateTime<Utc>, policy: &ReputationPolicy) -> Self {
        ReputationRecord {
            score: policy.neutral_score,
            history: VecDeque::new(),
            daily_adjustment_counts: BTreeMap::new(),
            last_decay_ts: now,
        }
    }

    pub fn tier(&self) -> Tier {
        get_reputation_tier(self.score)
    }

    pub fn adjustments_on(&self, day: &str) -> u32 {
        self.daily_adjustment_counts.get(day).copied().unwrap_or(0)
    }

    /// Apply an already-validated adjustment to this (target) record.
    pub fn apply_adjustment(
        &mut self,
        request: &AdjustmentRequest,
        policy: &ReputationPolicy,
    ) -> AdjustmentOutcome {
        let old_score = self.score;
        let new_score = clamp_score(old_score + request.amount, policy);
        self.score = new_score;
        self.history.push_back(HistoryEntry {
            from_id: request.from_id.clone(),
            target_id: request.target_id.clone(),
            amount: request.amount,
            reason: request.reason.clone(),
            timestamp: request.timestamp,
            old_score,
            new_score,
        });
        while self.history.len() > policy.max_history_entries {
            self.history.pop_front();
        }
        let old_tier = get_reputation_tier(old_score);
        let new_tier = get_reputation_tier(new_score);
        AdjustmentOutcome {
            old_score,
            new_score,
            old_tier,
            new_tier,
            tier_changed: old_tier != new_tier,
        }
    }

    /// Count one adjustment made by this (actor) record and drop stale days.
    pub fn count_adjustment(&mut self, at: DateTime<Utc>, policy: &ReputationPolicy) {
        let day = time::day_key(at);
        *self.daily_adjustment_counts.entry(day).or_insert(0) += 1;
        let oldest_kept = at.date_naive() - Duration::days(policy.daily_counter_retention_days);
        self.daily_adjustment_counts.retain(|day, _| {
            NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok_and(|d| d >= oldest_kept)
        });
    }

    /// Pull the score toward neutral for the time since the last decay.
    ///
    /// Returns whether the record changed.
    pub fn decay_reputation(&mut self, now: DateTime<Utc>, policy: &ReputationPolicy) -> bool {
        let elapsed = now - self.last_decay_ts;
        if elapsed <= Duration::zero() || elapsed < Duration::seconds(policy.min_decay_interval_secs)
        {
            return false;
        }
        let days = elapsed.num_milliseconds() as f64 / 86_400_000.0;
        let factor = (1.0 - policy.decay_rate).powf(days);
        let neutral = policy.neutral_score;
        self.score = clamp_score(neutral + (self.score - neutral) * factor, policy);
        self.last_decay_ts = now;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCitizen {
    pub citizen_id: String,
    pub score: f64,
    pub tier: Tier,
}

/// Every tracked record, keyed by citizen id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReputationLedger {
    pub records: BTreeMap<String, ReputationRecord>,
}

impl ReputationLedger {
    pub fn get(&self, citizen_id: &str) -> Option<&ReputationRecord> {
        self.records.get(citizen_id)
    }

    /// Records are created on first touch.
    pub fn touch(
        &mut self,
        citizen_id: &str,
        now: DateTime<Utc>,
        policy: &ReputationPolicy,
    ) -> &mut ReputationRecord {
        self.records
            .entry(citizen_id.to_string())
            .or_insert_with(|| ReputationRecord::new(now, policy))
    }

    /// Gate an adjustment request. All violations are reported.
    pub fn validate_adjustment(
        &self,
        request: &AdjustmentRequest,
        policy: &ReputationPolicy,
    ) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        if request.from_id.trim().is_empty() {
            errors.push("from_id must be a non-empty string".to_string());
        }
        if request.target_id.trim().is_empty() {
            errors.push("target_id must be a non-empty string".to_string());
        }
        if request.from_id == request.target_id {
            errors.push("Self-adjustment is not allowed".to_string());
        }
        if !request.amount.is_finite() {
            errors.push("amount must be a finite number".to_string());
        } else if request.amount.abs() > policy.max_single_adjustment {
            errors.push(format!(
                "amount magnitude exceeds maximum of {}",
                policy.max_single_adjustment
            ));
        }
        let day = time::day_key(request.timestamp);
        let made = self
            .get(&request.from_id)
            .map(|r| r.adjustments_on(&day))
            .unwrap_or(0);
        if made >= policy.max_adjustments_per_day {
            errors.push(format!(
                "Rate limit exceeded: {} has made {} adjustments on {} (max {})",
                request.from_id, made, day, policy.max_adjustments_per_day
            ));
        }
        (errors.is_empty(), errors)
    }

    /// Validate, then apply to the target and charge the actor's daily budget.
    pub fn apply_adjustment(
        &mut self,
        request: &AdjustmentRequest,
        policy: &ReputationPolicy,
    ) -> Result<AdjustmentOutcome, Vec<String>> {
        let (valid, errors) = self.validate_adjustment(request, policy);
        if !valid {
            return Err(errors);
        }
        let outcome = self
            .touch(&request.target_id, request.timestamp, policy)
            .apply_adjustment(request, policy);
        self.touch(&request.from_id, request.timestamp, policy)
            .count_adjustment(request.timestamp, policy);
        Ok(outcome)
    }

    /// Decay every record; returns how many changed.
    pub fn tick_reputation(&mut self, now: DateTime<Utc>, policy: &ReputationPolicy) -> usize {
        self.records
            .values_mut()
            .map(|record| record.decay_reputation(now, policy))
            .filter(|changed| *changed)
            .count()
    }

    /// Top `n` by descending score; ties by ascending id.
    pub fn get_top_citizens(&self, n: usize) -> Vec<RankedCitizen> {
        let mut ranked: Vec<RankedCitizen> = self
            .records
            .iter()
            .map(|(id, record)| RankedCitizen {
                citizen_id: id.clone(),
                score: record.score,
                tier: record.tier(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.citizen_id.cmp(&b.citizen_id))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.records.values().flat_map(|r| r.history.iter())
    }
}

/// Rebuild scores from adjustment history alone (decay is not replayed).
pub fn replay_scores<'a>(
    history: impl IntoIterator<Item = &'a HistoryEntry>,
    policy: &ReputationPolicy,
) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for entry in history {
        *scores
            .entry(entry.target_id.clone())
            .or_insert(policy.neutral_score) += entry.amount;
    }
    for score in scores.values_mut() {
        *score = clamp_score(*score, policy);
    }
    scores
}

/// Load/save access to the persisted ledger.
#[derive(Debug, Clone)]
pub struct ReputationStore {
    path: PathBuf,
    lease: LeasePolicy,
}

impl ReputationStore {
    pub fn new(path: impl Into<PathBuf>, lease: LeasePolicy) -> Self {
        ReputationStore {
            path: path.into(),
            lease,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lease(&self) -> Result<StoreLease, ZionError> {
        StoreLease::acquire(&self.path, self.lease)
    }

    /// Read-only load; a missing or corrupt ledger reads as empty.
    pub fn load(&self) -> ReputationLedger {
        load_reputation(&self.path)
    }

    /// Load for a load-modify-save cycle.
    ///
    /// A corrupt ledger is moved aside to `<name>.corrupt-<ulid>` so the
    /// following save cannot destroy it.
    pub fn load_for_update(&self, _lease: &StoreLease) -> Result<ReputationLedger, ZionError> {
        let Some(bytes) = store::read_optional(&self.path)? else {
            return Ok(ReputationLedger::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(ledger) => Ok(ledger),
            Err(err) => {
                let name = self
                    .path
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "reputation.json".to_string());
                let backup = self
                    .path
                    .with_file_name(format!("{}.corrupt-{}", name, time::new_event_id()));
                tracing::warn!(
                    ledger = %self.path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "corrupt reputation ledger moved aside; starting empty"
                );
                std::fs::rename(&self.path, &backup)?;
                Ok(ReputationLedger::default())
            }
        }
    }

    pub fn save(&self, ledger: &ReputationLedger) -> Result<(), ZionError> {
        save_reputation(&self.path, ledger)
    }
}

/// Read the ledger at `path`, degrading to empty when missing or corrupt.
pub fn load_reputation(path: &Path) -> ReputationLedger {
    match store::read_optional(path) {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            tracing::warn!(ledger = %path.display(), error = %err, "corrupt reputation ledger; reading as empty");
            ReputationLedger::default()
        }),
        Ok(None) => ReputationLedger::default(),
        Err(err) => {
            tracing::warn!(ledger = %path.display(), error = %err, "unreadable reputation ledger; reading as empty");
            ReputationLedger::default()
        }
    }
}

pub fn save_reputation(path: &Path, ledger: &ReputationLedger) -> Result<(), ZionError> {
    store::write_json_atomic(path, ledger)
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "reputation",
        "version": "0.1.0",
        "description": "Decaying, rate-limited citizen reputation ledger",
        "commands": [
            { "name": "show", "parameters": ["id"] },
            { "name": "adjust", "parameters": ["from", "to", "amount", "reason"] },
            { "name": "tick", "parameters": [] },
            { "name": "top", "parameters": ["limit", "format"] },
            { "name": "audit", "parameters": [] }
        ],
        "tiers": TIER_THRESHOLDS
            .iter()
            .map(|(tier, min)| serde_json::json!({ "tier": tier.as_str(), "min": min }))
            .collect::<Vec<_>>(),
        "storage": ["reputation.json"]
    })
}
