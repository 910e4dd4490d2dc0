use std::sync::Arc;

use crate::decision::{DecisionSurface, LinkDecision};
use crate::identity::{Identity, IdentityError};
use crate::keys::StorageKeys;
use crate::matching::{AccountMatcher, MatchCandidate};
use crate::migration::{MigrationError, MigrationManager, MigrationOutcome, ProgressSink};
use crate::primitives::activity::{ActivityReporter, ActivitySink};
use crate::primitives::config::{current_config, HandoffConfig};
use crate::primitives::now_ms;
use crate::primitives::partition_store::PartitionStore;
use crate::session::SessionPointer;

/// What the identity provider reported for a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct FederatedLogin {
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// What happened to the user's legacy data during a federated login.
#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum Reconciliation {
    /// No legacy account looked like this user's.
    NoCandidate,
    /// The user chose to decide later; the candidate is proposed again next login.
    Deferred { candidate: MatchCandidate },
    /// The user dismissed the candidate for good.
    Ignored { candidate: MatchCandidate },
    /// The link could not be persisted, so nothing was migrated.
    LinkFailed { candidate: MatchCandidate },
    /// A migration ran (or was found unnecessary or declined).
    Migration {
        source: Identity,
        outcome: MigrationOutcome,
    },
}

/// Result of [`AccountReconciler::on_federated_login`].
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct LoginResult {
    /// The identity the session now points at.
    pub identity: Identity,
    pub reconciliation: Reconciliation,
}

/// Errors returned by [`AccountReconciler`].
#[crate::handoff_error]
pub enum ReconcileError {
    /// The provider returned an unusable email
    #[error(transparent)]
    InvalidLogin(#[from] IdentityError),
    /// The migration needs the caller's attention
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Runs the account reconciliation that follows a federated sign-in.
///
/// 1. If the session still points at a legacy account with content, that account is
///    migrated after the user confirms the preview.
/// 2. Otherwise the best fuzzy match among the local legacy accounts is proposed, and
///    the user links it (then migrates), postpones, or ignores it.
/// 3. The session pointer is moved to the federated identity.
#[derive(uniffi::Object)]
pub struct AccountReconciler {
    store: Arc<dyn PartitionStore>,
    decisions: Arc<dyn DecisionSurface>,
    matcher: Arc<AccountMatcher>,
    migrations: Arc<MigrationManager>,
    activity: ActivityReporter,
    keys: StorageKeys,
}

#[crate::handoff_export]
impl AccountReconciler {
    /// Creates a reconciler, with its matcher and migration manager, using the global
    /// [`HandoffConfig`].
    #[uniffi::constructor]
    pub fn new(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        activity_sink: Option<Arc<dyn ActivitySink>>,
    ) -> Arc<Self> {
        Arc::new(Self::with_config(
            store,
            decisions,
            progress_sink,
            ActivityReporter::new(activity_sink),
            &current_config(),
        ))
    }

    /// Reconciles legacy data for a user who just signed in with the identity provider.
    ///
    /// # Errors
    /// - `InvalidLogin` if the email is malformed; nothing is changed
    /// - `Migration` for `InvalidOperation` (already running) or `RollbackFailed`; the
    ///   session pointer is left alone so the user is not logged out of the legacy data
    pub async fn on_federated_login(
        &self,
        login: FederatedLogin,
    ) -> Result<LoginResult, ReconcileError> {
        let target = Identity::federated(&login.email)?;
        crate::info!(
            "reconciler.login target={target} display_name={}",
            login.display_name.as_deref().unwrap_or("-")
        );

        let reconciliation = self.reconcile(&target).await?;

        let session = SessionPointer::new(self.store.as_ref(), &self.keys);
        if let Err(e) = session.sign_in(&target, now_ms()) {
            crate::error!("reconciler.session_update_failed target={target} error={e}");
        }
        self.activity.report(
            "federated_login",
            "Signed in with identity provider",
            &[("identity", target.to_string())],
        );

        Ok(LoginResult {
            identity: target,
            reconciliation,
        })
    }

    /// The identity the session currently points at.
    pub fn current_identity(&self) -> Option<Identity> {
        SessionPointer::new(self.store.as_ref(), &self.keys)
            .current()
            .unwrap_or_else(|e| {
                crate::warn!("reconciler.session_read_failed error={e}");
                None
            })
    }

    /// The matcher used for fuzzy account suggestions.
    pub fn matcher(&self) -> Arc<AccountMatcher> {
        self.matcher.clone()
    }

    pub fn migration_manager(&self) -> Arc<MigrationManager> {
        self.migrations.clone()
    }
}

impl AccountReconciler {
    /// Creates a reconciler with an explicit configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn PartitionStore>,
        decisions: Arc<dyn DecisionSurface>,
        progress_sink: Option<Arc<dyn ProgressSink>>,
        activity: ActivityReporter,
        config: &HandoffConfig,
    ) -> Self {
        let matcher = Arc::new(AccountMatcher::with_config(
            store.clone(),
            config,
            activity.clone(),
        ));
        let migrations = Arc::new(MigrationManager::with_config(
            store.clone(),
            decisions.clone(),
            progress_sink,
            activity.clone(),
            config.clone(),
        ));
        Self {
            store,
            decisions,
            matcher,
            migrations,
            activity,
            keys: StorageKeys::new(&config.namespace),
        }
    }

    async fn reconcile(&self, target: &Identity) -> Result<Reconciliation, ReconcileError> {
        if let Some(source) = self.migrations.detect_active_legacy(target)? {
            crate::info!("reconciler.active_legacy_session source={source}");
            let outcome = self
                .migrations
                .confirm_and_migrate(source.clone(), target.clone())
                .await?;
            if outcome.is_completed() {
                self.matcher.link_accounts(source.clone(), target.clone());
            }
            return Ok(Reconciliation::Migration { source, outcome });
        }

        let Some(candidate) = self.matcher.suggest_match(target.clone()) else {
            return Ok(Reconciliation::NoCandidate);
        };

        let decision = self
            .decisions
            .decide_account_link(candidate.clone())
            .await
            .unwrap_or_else(|e| {
                crate::warn!("reconciler.link_decision_failed treating_as=later error={e}");
                LinkDecision::Later
            });
        crate::info!(
            "reconciler.link_decision source={} decision={decision}",
            candidate.identifier
        );

        let source = Identity::Legacy {
            username: candidate.identifier.clone(),
        };
        match decision {
            LinkDecision::Later => Ok(Reconciliation::Deferred { candidate }),
            LinkDecision::Ignore => {
                self.matcher.ignore_match(target.clone(), source);
                Ok(Reconciliation::Ignored { candidate })
            }
            LinkDecision::Link => {
                if !self.matcher.link_accounts(source.clone(), target.clone()) {
                    return Ok(Reconciliation::LinkFailed { candidate });
                }
                let outcome = self
                    .migrations
                    .confirm_and_migrate(source.clone(), target.clone())
                    .await?;
                Ok(Reconciliation::Migration { source, outcome })
            }
        }
    }
}
