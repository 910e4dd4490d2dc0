//! Identities that partition user content.
//!
//! A user is either a *legacy* account, keyed by a self-chosen username, or a
//! *federated* account, keyed by the verified email of the identity provider.
//! The distinction used to be a `'google'` / `'username'` string stored next to the
//! session pointer; here it is the [`Identity`] enum and the string only exists at the
//! storage boundary ([`Identity::provider_tag`]).

use std::fmt::Display;

use serde::{Deserialize, Serialize};

const MIN_USERNAME_LEN: usize = 2;
const MAX_USERNAME_LEN: usize = 50;
const MAX_EMAIL_LEN: usize = 254;

/// Words a *new* username may not contain.
const RESERVED_WORDS: [&str; 4] = ["admin", "root", "system", "test"];

/// Provider tag persisted for federated sessions.
pub const FEDERATED_PROVIDER_TAG: &str = "google";
/// Provider tag persisted for username sessions.
pub const LEGACY_PROVIDER_TAG: &str = "username";

/// Rejections produced while validating an identity.
#[crate::handoff_error]
pub enum IdentityError {
    /// Nothing but whitespace was supplied
    #[error("identity is empty")]
    Empty,
    /// Username shorter than the minimum
    #[error("username must be at least {min} characters, got {actual}")]
    TooShort {
        /// Minimum length
        min: u32,
        /// Supplied length
        actual: u32,
    },
    /// Username longer than the maximum
    #[error("username must be at most {max} characters, got {actual}")]
    TooLong {
        /// Maximum length
        max: u32,
        /// Supplied length
        actual: u32,
    },
    /// Characters outside letters, digits, Hangul, `-` and `_`
    #[error("username may only contain letters, digits, Hangul, '-' and '_'")]
    InvalidCharacters,
    /// Markup or script fragments
    #[error("username contains markup")]
    MarkupDetected,
    /// Contains a reserved word
    #[error("username contains the reserved word '{word}'")]
    ReservedWord {
        /// The offending word
        word: String,
    },
    /// Not a plausible email address
    #[error("invalid email: {reason}")]
    InvalidEmail {
        /// What is wrong with it
        reason: String,
    },
}

/// The key under which a user's content is partitioned.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, uniffi::Enum,
)]
#[serde(tag = "provider", rename_all = "camelCase")]
pub enum Identity {
    /// Account created with the simple username login.
    Legacy {
        /// The self-chosen username.
        username: String,
    },
    /// Account backed by the federated identity provider.
    Federated {
        /// Verified email address.
        email: String,
    },
}

impl Identity {
    /// A validated legacy identity. The input is trimmed.
    ///
    /// # Errors
    /// Any [`IdentityError`] produced by the username rules.
    pub fn legacy(username: &str) -> Result<Self, IdentityError> {
        let username = username.trim();
        validate_username(username)?;
        Ok(Self::Legacy {
            username: username.to_string(),
        })
    }

    /// A validated federated identity. The input is trimmed.
    ///
    /// # Errors
    /// [`IdentityError::Empty`] or [`IdentityError::InvalidEmail`].
    pub fn federated(email: &str) -> Result<Self, IdentityError> {
        let email = email.trim();
        validate_email(email)?;
        Ok(Self::Federated {
            email: email.to_string(),
        })
    }

    /// Validates raw user input: anything containing `@` is treated as federated.
    ///
    /// # Errors
    /// Whatever the selected rule set rejects.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.contains('@') {
            Self::federated(raw)
        } else {
            Self::legacy(raw)
        }
    }

    /// Rebuilds an identity from a key fragment that is already in storage.
    ///
    /// Stored accounts may predate the current username rules, so only emptiness is
    /// checked.
    #[must_use]
    pub fn from_stored(fragment: &str) -> Option<Self> {
        if fragment.is_empty() {
            return None;
        }
        Some(if fragment.contains('@') {
            Self::Federated {
                email: fragment.to_string(),
            }
        } else {
            Self::Legacy {
                username: fragment.to_string(),
            }
        })
    }

    /// Rebuilds the session identity from the persisted pointer and provider tag.
    #[must_use]
    pub fn from_session(current_user: &str, provider_tag: Option<&str>) -> Option<Self> {
        if current_user.is_empty() {
            return None;
        }
        // Before federated login existed no tag was written at all.
        Some(match provider_tag {
            Some(FEDERATED_PROVIDER_TAG) => Self::Federated {
                email: current_user.to_string(),
            },
            _ => Self::Legacy {
                username: current_user.to_string(),
            },
        })
    }

    /// The raw string used inside storage keys.
    #[must_use]
    pub fn key_fragment(&self) -> &str {
        match self {
            Self::Legacy { username } => username,
            Self::Federated { email } => email,
        }
    }

    /// The string compared by the similarity scorer: the local part of an email, or the
    /// username itself.
    #[must_use]
    pub fn comparison_key(&self) -> &str {
        match self {
            Self::Legacy { username } => username,
            Self::Federated { email } => email.split('@').next().unwrap_or(email),
        }
    }

    /// Whether this is a federated identity.
    #[must_use]
    pub const fn is_federated(&self) -> bool {
        matches!(self, Self::Federated { .. })
    }

    /// Tag persisted as the session's auth provider.
    #[must_use]
    pub const fn provider_tag(&self) -> &'static str {
        match self {
            Self::Legacy { .. } => LEGACY_PROVIDER_TAG,
            Self::Federated { .. } => FEDERATED_PROVIDER_TAG,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_fragment())
    }
}

fn char_len(value: &str) -> u32 {
    u32::try_from(value.chars().count()).unwrap_or(u32::MAX)
}

const fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || matches!(c, '\u{AC00}'..='\u{D7A3}')
}

fn contains_markup(value: &str) -> bool {
    let lower = value.to_lowercase();
    let has_tag = lower
        .find('<')
        .is_some_and(|open| lower[open..].contains('>'));
    has_tag
        || ["<script", "javascript:", "onerror=", "onclick="]
            .iter()
            .any(|needle| lower.contains(needle))
}

/// Length, markup and character rules shared by every username.
fn validate_username(username: &str) -> Result<(), IdentityError> {
    if username.is_empty() {
        return Err(IdentityError::Empty);
    }

    let len = char_len(username);
    if (len as usize) < MIN_USERNAME_LEN {
        return Err(IdentityError::TooShort {
            min: MIN_USERNAME_LEN as u32,
            actual: len,
        });
    }
    if (len as usize) > MAX_USERNAME_LEN {
        return Err(IdentityError::TooLong {
            max: MAX_USERNAME_LEN as u32,
            actual: len,
        });
    }
    if contains_markup(username) {
        return Err(IdentityError::MarkupDetected);
    }
    if !username.chars().all(is_username_char) {
        return Err(IdentityError::InvalidCharacters);
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), IdentityError> {
    if email.is_empty() {
        return Err(IdentityError::Empty);
    }
    let invalid = |reason: &str| IdentityError::InvalidEmail {
        reason: reason.to_string(),
    };

    if email.len() > MAX_EMAIL_LEN {
        return Err(invalid("longer than 254 bytes"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid("missing '@'"));
    };
    if local.is_empty() {
        return Err(invalid("empty local part"));
    }
    if domain.contains('@') {
        return Err(invalid("more than one '@'"));
    }
    if domain.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err(invalid("malformed domain"));
    }
    Ok(())
}

/// Validates a username a user is about to register, including the reserved-word rule.
///
/// # Errors
/// Any [`IdentityError`] for usernames; [`IdentityError::ReservedWord`] when it contains
/// `admin`, `root`, `system` or `test` (case-insensitive).
#[uniffi::export]
pub fn validate_new_username(username: String) -> Result<Identity, IdentityError> {
    let identity = Identity::legacy(&username)?;
    let lower = identity.key_fragment().to_lowercase();
    if let Some(word) = RESERVED_WORDS.iter().find(|word| lower.contains(*word)) {
        return Err(IdentityError::ReservedWord {
            word: (*word).to_string(),
        });
    }
    Ok(identity)
}

/// Validates raw identity input.
///
/// # Errors
/// See [`Identity::parse`].
#[uniffi::export]
pub fn parse_identity(raw: String) -> Result<Identity, IdentityError> {
    Identity::parse(&raw)
}

/// Best-effort cleanup of a username: drops tags and disallowed characters and
/// truncates to the maximum length.
#[uniffi::export]
#[must_use]
pub fn sanitize_username(raw: String) -> String {
    let mut without_tags = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.trim().chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => without_tags.push(c),
            _ => {}
        }
    }

    without_tags
        .chars()
        .filter(|c| is_username_char(*c))
        .take(MAX_USERNAME_LEN)
        .collect()
}
