use crate::matching::MatchCandidate;
use crate::migration::MigrationPreview;
use crate::security::DeviceClass;

/// Errors a [`DecisionSurface`] may report instead of an answer.
///
/// Any error is treated as the non-committal answer (later / cancel / no switch).
#[crate::handoff_error]
pub enum DecisionError {
    /// The dialog was dismissed without an answer
    #[error("dialog dismissed")]
    Dismissed,
    /// The foreign implementation threw something it could not map
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Reason reported by the bindings
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for DecisionError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// The user's answer to an account-link proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum LinkDecision {
    /// Link and migrate now.
    Link,
    /// Ask again at a later login.
    Later,
    /// Never propose this account again for this identity.
    Ignore,
}

/// The user's answer to a migration preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum MigrationConfirmation {
    Confirm,
    Cancel,
}

/// The user's answer to the device classification prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Record)]
pub struct DeviceClassChoice {
    pub device_class: DeviceClass,
    /// Whether the choice should be remembered for this profile.
    pub remember: bool,
}

/// Everything Handoff needs to ask the user.
///
/// Each method suspends until the user answers; there is no timeout. In the web app
/// these are the account-linking dialog, the migration preview dialog and the device
/// selection modal.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait DecisionSurface: Send + Sync {
    /// Asks whether `candidate` should be linked to the signing-in identity.
    async fn decide_account_link(
        &self,
        candidate: MatchCandidate,
    ) -> Result<LinkDecision, DecisionError>;

    /// Shows what a migration will move and asks for confirmation.
    async fn confirm_migration(
        &self,
        preview: MigrationPreview,
    ) -> Result<MigrationConfirmation, DecisionError>;

    /// Asks whether this device is personal or public.
    async fn choose_device_class(&self) -> Result<DeviceClassChoice, DecisionError>;

    /// Asks for confirmation before leaving public mode.
    async fn confirm_switch_to_personal(&self) -> Result<bool, DecisionError>;
}
