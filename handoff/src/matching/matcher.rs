use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::keys::{ContentKind, StorageKeys};
use crate::matching::similarity::{compare, Similarity};
use crate::primitives::activity::{ActivityReporter, ActivitySink};
use crate::primitives::config::{current_config, HandoffConfig};
use crate::primitives::partition_store::{PartitionStore, PartitionStoreExt, StoreError};
use crate::primitives::now_ms;

/// Why a legacy account was proposed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, uniffi::Enum,
)]
#[strum(serialize_all = "snake_case")]
pub enum MatchReason {
    /// Identical after case folding.
    ExactMatch,
    /// The target's comparison key contains the legacy username.
    TargetContainsSource,
    /// The legacy username contains the target's comparison key.
    SourceContainsTarget,
    /// Score of at least 0.9.
    VerySimilar,
    /// Score of at least 0.8.
    Similar,
    /// Score of at least 0.7.
    SimilarPattern,
    /// Anything lower that still passed a custom threshold.
    SomeSimilarity,
}

impl MatchReason {
    fn from_similarity(similarity: Similarity) -> Self {
        match similarity {
            Similarity::Exact => Self::ExactMatch,
            Similarity::FirstContainsSecond(_) => Self::SourceContainsTarget,
            Similarity::SecondContainsFirst(_) => Self::TargetContainsSource,
            Similarity::Edit(score) if score >= 0.9 => Self::VerySimilar,
            Similarity::Edit(score) if score >= 0.8 => Self::Similar,
            Similarity::Edit(score) if score >= 0.7 => Self::SimilarPattern,
            Similarity::Edit(_) => Self::SomeSimilarity,
        }
    }
}

/// A legacy account found in the partition store. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct LegacyAccountRecord {
    /// The legacy username.
    pub identifier: String,
    /// Number of saved texts.
    pub item_count: u64,
    /// Most recent item id, which the web app derives from `Date.now()`.
    pub last_used_ms: Option<i64>,
    /// Whether an unsaved draft exists.
    pub has_draft: bool,
}

/// A ranked proposal to link a legacy account to the target identity.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct MatchCandidate {
    pub identifier: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reason: MatchReason,
    pub last_used_ms: Option<i64>,
    pub item_count: u64,
}

/// The single persisted link between a legacy and a federated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct LinkageRecord {
    pub source: Identity,
    pub target: Identity,
    #[serde(rename = "linkedAt")]
    pub linked_at_ms: i64,
}

type IgnoredMatches = BTreeMap<String, BTreeSet<String>>;

/// Finds legacy accounts that probably belong to the user signing in, and persists the
/// user's link / ignore decisions.
///
/// Every operation tolerates a misbehaving store: reads fall back to "nothing found" and
/// writes report `false`, with the failure logged.
#[derive(uniffi::Object)]
pub struct AccountMatcher {
    store: Arc<dyn PartitionStore>,
    keys: StorageKeys,
    confidence_threshold: f64,
    activity: ActivityReporter,
}

#[crate::handoff_export]
impl AccountMatcher {
    /// Creates a matcher using the global [`HandoffConfig`].
    #[uniffi::constructor]
    pub fn new(
        store: Arc<dyn PartitionStore>,
        activity_sink: Option<Arc<dyn ActivitySink>>,
    ) -> Arc<Self> {
        Arc::new(Self::with_config(
            store,
            &current_config(),
            ActivityReporter::new(activity_sink),
        ))
    }

    /// Candidates for `target` with a confidence of at least `threshold` (the configured
    /// threshold when `None`), best first.
    ///
    /// Ordering: confidence descending, then last use descending with unknown last, then
    /// identifier ascending.
    pub fn find_matches(&self, target: Identity, threshold: Option<f64>) -> Vec<MatchCandidate> {
        let threshold = threshold
            .filter(|t| !t.is_nan())
            .map_or(self.confidence_threshold, |t| t.clamp(0.0, 1.0));

        match self.try_find_matches(&target, threshold) {
            Ok(candidates) => {
                crate::debug!(
                    "matcher.find_matches target={target} threshold={threshold} found={}",
                    candidates.len()
                );
                candidates
            }
            Err(e) => {
                crate::error!("matcher.find_matches_failed target={target} error={e}");
                Vec::new()
            }
        }
    }

    /// The best candidate for `target`, if any passes the configured threshold.
    pub fn suggest_match(&self, target: Identity) -> Option<MatchCandidate> {
        let best = self.find_matches(target.clone(), None).into_iter().next()?;
        self.activity.report(
            "match_suggested",
            "Legacy account suggested",
            &[
                ("target", target.to_string()),
                ("source", best.identifier.clone()),
                ("confidence", format!("{:.2}", best.confidence)),
                ("reason", best.reason.to_string()),
            ],
        );
        Some(best)
    }

    /// Every legacy account that owns at least one content partition.
    pub fn legacy_accounts(&self) -> Vec<LegacyAccountRecord> {
        self.scan_legacy_accounts().unwrap_or_else(|e| {
            crate::error!("matcher.scan_failed error={e}");
            Vec::new()
        })
    }

    /// Persists the link `source -> target`, replacing any previous one.
    ///
    /// Returns `false` when either identity is empty or the write fails.
    pub fn link_accounts(&self, source: Identity, target: Identity) -> bool {
        if source.key_fragment().is_empty() || target.key_fragment().is_empty() {
            crate::warn!("matcher.link_rejected reason=empty_identity");
            return false;
        }

        // Keep linked_at strictly increasing even if the wall clock goes backwards.
        let previous = self.read_linkage();
        let linked_at_ms = previous
            .as_ref()
            .map_or_else(now_ms, |p| now_ms().max(p.linked_at_ms.saturating_add(1)));

        let record = LinkageRecord {
            source: source.clone(),
            target: target.clone(),
            linked_at_ms,
        };

        let written = serde_json::to_string(&record)
            .map_err(|e| StoreError::Generic {
                message: e.to_string(),
            })
            .and_then(|json| self.store.set(self.keys.linked_accounts(), json));

        match written {
            Ok(()) => {
                self.activity.report(
                    "accounts_linked",
                    "Accounts linked",
                    &[("source", source.to_string()), ("target", target.to_string())],
                );
                true
            }
            Err(e) => {
                crate::error!("matcher.link_failed source={source} target={target} error={e}");
                false
            }
        }
    }

    /// Clears the link if `identifier` is either side of it.
    ///
    /// Returns `true` only when a record was removed.
    pub fn unlink_accounts(&self, identifier: Identity) -> bool {
        let Some(record) = self.read_linkage() else {
            return false;
        };
        if record.source != identifier && record.target != identifier {
            return false;
        }

        match self.store.delete_if_present(&self.keys.linked_accounts()) {
            Ok(()) => {
                self.activity.report(
                    "accounts_unlinked",
                    "Accounts unlinked",
                    &[
                        ("source", record.source.to_string()),
                        ("target", record.target.to_string()),
                    ],
                );
                true
            }
            Err(e) => {
                crate::error!("matcher.unlink_failed identifier={identifier} error={e}");
                false
            }
        }
    }

    /// The current link if `identifier` participates in it.
    pub fn linked_account(&self, identifier: Identity) -> Option<LinkageRecord> {
        self.read_linkage()
            .filter(|record| record.source == identifier || record.target == identifier)
    }

    /// Stops proposing `source` to `target`. Idempotent.
    pub fn ignore_match(&self, target: Identity, source: Identity) -> bool {
        let mut ignored = self.read_ignored();
        let inserted = ignored
            .entry(target.key_fragment().to_string())
            .or_default()
            .insert(source.key_fragment().to_string());
        if !inserted {
            return true;
        }

        let written = serde_json::to_string(&ignored)
            .map_err(|e| StoreError::Generic {
                message: e.to_string(),
            })
            .and_then(|json| self.store.set(self.keys.ignored_matches(), json));

        match written {
            Ok(()) => {
                self.activity.report(
                    "match_ignored",
                    "Match ignored",
                    &[("source", source.to_string()), ("target", target.to_string())],
                );
                true
            }
            Err(e) => {
                crate::error!("matcher.ignore_failed target={target} source={source} error={e}");
                false
            }
        }
    }

    /// Whether `source` was dismissed for `target`.
    pub fn is_match_ignored(&self, target: Identity, source: Identity) -> bool {
        self.read_ignored()
            .get(target.key_fragment())
            .is_some_and(|set| set.contains(source.key_fragment()))
    }
}

impl AccountMatcher {
    /// Creates a matcher with an explicit configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn PartitionStore>,
        config: &HandoffConfig,
        activity: ActivityReporter,
    ) -> Self {
        Self {
            store,
            keys: StorageKeys::new(&config.namespace),
            confidence_threshold: config.confidence_threshold,
            activity,
        }
    }

    fn try_find_matches(
        &self,
        target: &Identity,
        threshold: f64,
    ) -> Result<Vec<MatchCandidate>, StoreError> {
        let target_key = target.comparison_key();
        if target_key.is_empty() {
            return Ok(Vec::new());
        }

        let ignored = self.read_ignored();
        let dismissed = ignored.get(target.key_fragment());

        let mut candidates: Vec<MatchCandidate> = self
            .scan_legacy_accounts()?
            .into_iter()
            .filter(|account| account.identifier != target.key_fragment())
            .filter(|account| !dismissed.is_some_and(|set| set.contains(&account.identifier)))
            .filter_map(|account| {
                let similarity = compare(&account.identifier, target_key);
                let confidence = similarity.score();
                (confidence >= threshold).then(|| MatchCandidate {
                    identifier: account.identifier,
                    confidence,
                    reason: MatchReason::from_similarity(similarity),
                    last_used_ms: account.last_used_ms,
                    item_count: account.item_count,
                })
            })
            .collect();

        candidates.sort_by(rank);
        Ok(candidates)
    }

    fn scan_legacy_accounts(&self) -> Result<Vec<LegacyAccountRecord>, StoreError> {
        let mut accounts: BTreeMap<String, LegacyAccountRecord> = BTreeMap::new();

        for key in self.store.list_keys()? {
            let Some((kind, fragment)) = self.keys.parse_content_key(&key) else {
                continue;
            };
            let Some(identity @ Identity::Legacy { .. }) = Identity::from_stored(fragment) else {
                continue;
            };

            let entry = accounts
                .entry(identity.key_fragment().to_string())
                .or_insert_with(|| LegacyAccountRecord {
                    identifier: identity.key_fragment().to_string(),
                    item_count: 0,
                    last_used_ms: None,
                    has_draft: false,
                });

            match kind {
                ContentKind::SavedTexts => {
                    let Some(raw) = self.store.get_optional(&key)? else {
                        continue;
                    };
                    let (count, last_used) = summarize_collection(&raw);
                    entry.item_count = count;
                    entry.last_used_ms = last_used;
                }
                ContentKind::TempSave => entry.has_draft = true,
            }
        }

        Ok(accounts.into_values().collect())
    }

    fn read_linkage(&self) -> Option<LinkageRecord> {
        let raw = match self.store.get_optional(&self.keys.linked_accounts()) {
            Ok(raw) => raw?,
            Err(e) => {
                crate::warn!("matcher.linkage_read_failed error={e}");
                return None;
            }
        };
        serde_json::from_str(&raw)
            .inspect_err(|e| crate::warn!("matcher.linkage_corrupted resetting error={e}"))
            .ok()
    }

    fn read_ignored(&self) -> IgnoredMatches {
        let raw = match self.store.get_optional(&self.keys.ignored_matches()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return IgnoredMatches::new(),
            Err(e) => {
                crate::warn!("matcher.ignored_read_failed error={e}");
                return IgnoredMatches::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            crate::warn!("matcher.ignored_corrupted resetting error={e}");
            IgnoredMatches::new()
        })
    }
}

fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| match (a.last_used_ms, b.last_used_ms) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.identifier.cmp(&b.identifier))
}

/// Item count and most recent item id of a saved-texts array.
///
/// A malformed value counts as empty.
fn summarize_collection(raw: &str) -> (u64, Option<i64>) {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return (0, None);
    };
    let last_used = items
        .iter()
        .filter_map(|item| match item.get("id")? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .max();
    (items.len() as u64, last_used)
}
