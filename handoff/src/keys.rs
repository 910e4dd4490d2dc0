use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::identity::Identity;

/// How a content partition stores its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionLayout {
    /// A JSON array of items, transferred in batches.
    Collection,
    /// A single JSON document, transferred whole.
    Document,
}

/// The per-identity content partitions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
    uniffi::Enum,
)]
#[strum(serialize_all = "camelCase")]
pub enum ContentKind {
    /// Saved texts, `<ns>_savedTexts_<identity>`.
    SavedTexts,
    /// The in-progress draft, `<ns>_tempSave_<identity>`.
    TempSave,
}

impl ContentKind {
    /// Entity name used inside the storage key.
    #[must_use]
    pub fn entity(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub const fn layout(self) -> PartitionLayout {
        match self {
            Self::SavedTexts => PartitionLayout::Collection,
            Self::TempSave => PartitionLayout::Document,
        }
    }

    /// Every kind, collections first.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Builds every storage key Handoff reads or writes.
///
/// Keys follow `<namespace>_<entity>[_<identity>]`, e.g. `dualTextWriter_savedTexts_alice`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    namespace: String,
}

impl StorageKeys {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn fixed(&self, entity: &str) -> String {
        format!("{}_{entity}", self.namespace)
    }

    /// Key of one content partition of `identity`.
    #[must_use]
    pub fn content(&self, kind: ContentKind, identity: &Identity) -> String {
        format!(
            "{}_{}_{}",
            self.namespace,
            kind.entity(),
            identity.key_fragment()
        )
    }

    /// Splits a content key into its kind and identity fragment.
    ///
    /// Returns `None` for keys of other namespaces or entities, and for an empty
    /// identity fragment.
    #[must_use]
    pub fn parse_content_key<'k>(&self, key: &'k str) -> Option<(ContentKind, &'k str)> {
        let rest = key.strip_prefix(self.namespace.as_str())?.strip_prefix('_')?;
        ContentKind::all().find_map(|kind| {
            let fragment = rest.strip_prefix(kind.entity())?.strip_prefix('_')?;
            (!fragment.is_empty()).then_some((kind, fragment))
        })
    }

    #[must_use]
    pub fn current_user(&self) -> String {
        self.fixed("currentUser")
    }

    #[must_use]
    pub fn auth_provider(&self) -> String {
        self.fixed("authProvider")
    }

    #[must_use]
    pub fn username_session(&self) -> String {
        self.fixed("usernameSession")
    }

    #[must_use]
    pub fn linked_accounts(&self) -> String {
        self.fixed("linkedAccounts")
    }

    #[must_use]
    pub fn ignored_matches(&self) -> String {
        self.fixed("ignoredMatches")
    }

    #[must_use]
    pub fn migration_record(&self) -> String {
        self.fixed("migrationRecord")
    }

    #[must_use]
    pub fn migration_history(&self) -> String {
        self.fixed("migrationHistory")
    }

    /// Prefix shared by every backup snapshot key.
    #[must_use]
    pub fn backup_prefix(&self) -> String {
        self.fixed("migrationBackup_")
    }

    #[must_use]
    pub fn backup(&self, backup_id: &str) -> String {
        format!("{}{backup_id}", self.backup_prefix())
    }

    #[must_use]
    pub fn device_type(&self) -> String {
        self.fixed("deviceType")
    }

    #[must_use]
    pub fn remember_device(&self) -> String {
        self.fixed("rememberDevice")
    }

    #[must_use]
    pub fn public_mode_active(&self) -> String {
        self.fixed("publicModeActive")
    }
}
