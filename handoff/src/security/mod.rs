//! Public / personal device security.
//!
//! On a shared computer the app must not leave a user's texts behind. A device
//! classified as public arms an inactivity timer; when it runs out, or when the page is
//! closed, the signed-in identity's data and session are removed.

/// Pure inactivity timer.
pub mod inactivity;

mod policy;

pub use policy::{Clock, DeviceSecurityPolicy, SecurityNotifier, SystemClock};

/// How the user classified this browser profile.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    uniffi::Enum,
)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceClass {
    /// Only this user uses the device. Nothing is wiped.
    Personal,
    /// Shared device. Data is wiped after inactivity or on page unload.
    Public,
}

/// Current state of the [`DeviceSecurityPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum SecurityState {
    /// Not classified yet in this session.
    Unclassified,
    Personal,
    /// Public, within the idle window.
    PublicActive,
    /// Public, the inactivity warning is showing.
    PublicWarning,
    /// Public data was wiped; the host must reload.
    LoggedOut,
}

impl SecurityState {
    /// Whether the inactivity timer is running.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::PublicActive | Self::PublicWarning)
    }
}

/// User interaction that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, uniffi::Enum)]
#[strum(serialize_all = "snake_case")]
pub enum ActivitySignal {
    Click,
    KeyPress,
    Scroll,
    PointerMove,
    Touch,
}
