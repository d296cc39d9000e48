//! Account types and input validation.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use keel_store::{Row, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{RepoError, Result};

static CURRENCY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

const MAX_EXTERNAL_ID_LEN: usize = 128;
const MAX_NAME_LEN: usize = 256;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Stored representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, String> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: '{other}'", stringify!($name))),
                }
            }
        }
    };
}

text_enum! {
    /// Kind of account.
    AccountType {
        /// Checking account.
        Checking => "checking",
        /// Savings account.
        Savings => "savings",
        /// Credit line.
        Credit => "credit",
        /// Loan.
        Loan => "loan",
        /// Investment account.
        Investment => "investment",
    }
}

text_enum! {
    /// Lifecycle status. Accounts are closed, never deleted.
    AccountStatus {
        /// Open for business.
        Active => "active",
        /// Temporarily blocked.
        Frozen => "frozen",
        /// Closed for good.
        Closed => "closed",
    }
}

/// A stored account.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// `acct_<uuid v7>`.
    pub id: String,
    /// Caller-supplied identifier. Immutable, unique.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Kind.
    pub account_type: AccountType,
    /// ISO-4217 code. Immutable.
    pub currency: String,
    /// Optional grouping key.
    pub group_id: Option<String>,
    /// Status.
    pub status: AccountStatus,
    /// Free-form JSON object.
    pub metadata: Map<String, Value>,
    /// Optimistic-lock token; 1 on create, +1 per update.
    pub version: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last successful write.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Decode a row selected with [`crate::repository::COLUMNS`].
    pub fn from_row(row: &Row) -> keel_store::Result<Self> {
        Ok(Self {
            id: row.get_str("id")?.to_string(),
            external_id: row.get_str("external_id")?.to_string(),
            name: row.get_str("name")?.to_string(),
            account_type: parse_column(row, "account_type")?,
            currency: row.get_str("currency")?.to_string(),
            group_id: row.get_opt_str("group_id")?.map(str::to_string),
            status: parse_column(row, "status")?,
            metadata: serde_json::from_str(row.get_str("metadata")?)
                .map_err(|e| StoreError::corrupt("metadata", e.to_string()))?,
            version: row.get_i64("version")?,
            created_at: row.get_timestamp("created_at")?,
            updated_at: row.get_timestamp("updated_at")?,
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &Row, column: &str) -> keel_store::Result<T> {
    row.get_str(column)?
        .parse()
        .map_err(|e: String| StoreError::corrupt(column, e))
}

/// Input for [`crate::AccountRepository::create`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    /// Explicit id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Caller-supplied unique identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Kind.
    pub account_type: AccountType,
    /// ISO-4217 code.
    pub currency: String,
    /// Optional grouping key.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Free-form JSON object.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewAccount {
    /// Minimal valid input.
    pub fn new(
        external_id: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            external_id: external_id.into(),
            name: name.into(),
            account_type,
            currency: currency.into(),
            group_id: None,
            metadata: Map::new(),
        }
    }

    /// Reject malformed input.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(RepoError::invalid("id must not be blank"));
            }
        }
        let external_id = self.external_id.trim();
        if external_id.is_empty() || external_id.len() > MAX_EXTERNAL_ID_LEN {
            return Err(RepoError::invalid(format!(
                "external_id must be 1..={MAX_EXTERNAL_ID_LEN} characters"
            )));
        }
        validate_name(&self.name)?;
        if !CURRENCY.is_match(&self.currency) {
            return Err(RepoError::invalid(format!(
                "currency '{}' is not a three-letter ISO-4217 code",
                self.currency
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(RepoError::invalid(format!(
            "name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Patch for [`crate::AccountRepository::update`]. `None` leaves a field
/// unchanged.
///
/// `external_id` and `currency` are accepted so a request that tries to
/// change them can be rejected with a precise error.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New kind.
    #[serde(default)]
    pub account_type: Option<AccountType>,
    /// `Some(None)` clears the group.
    #[serde(default)]
    pub group_id: Option<Option<String>>,
    /// New status.
    #[serde(default)]
    pub status: Option<AccountStatus>,
    /// Replacement metadata object.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Immutable; any value is rejected.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Immutable; any value is rejected.
    #[serde(default)]
    pub currency: Option<String>,
}

impl AccountUpdate {
    /// Whether the patch sets no mutable field.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.account_type.is_none()
            && self.group_id.is_none()
            && self.status.is_none()
            && self.metadata.is_none()
    }

    /// Reject immutable-field changes, empty patches, and malformed values.
    pub fn validate(&self) -> Result<()> {
        if self.external_id.is_some() {
            return Err(RepoError::invalid("external_id is immutable"));
        }
        if self.currency.is_some() {
            return Err(RepoError::invalid("currency is immutable"));
        }
        if self.is_empty() {
            return Err(RepoError::invalid("update sets no fields"));
        }
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        Ok(())
    }
}

/// Optional filters for [`crate::AccountRepository::list`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFilter {
    /// Exact kind.
    #[serde(default)]
    pub account_type: Option<AccountType>,
    /// Exact currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Exact group.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Case-insensitive substring of the name.
    #[serde(default)]
    pub name_contains: Option<String>,
}

/// One page of [`crate::AccountRepository::list`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPage {
    /// Accounts on this page.
    pub accounts: Vec<Account>,
    /// Token for the next page; empty when exhausted.
    pub next_page_token: String,
    /// Matches across all pages.
    pub total_count: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn enums_round_trip_text() {
        for t in [
            AccountType::Checking,
            AccountType::Savings,
            AccountType::Credit,
            AccountType::Loan,
            AccountType::Investment,
        ] {
            assert_eq!(t.as_str().parse::<AccountType>().unwrap(), t);
        }
        assert_eq!("frozen".parse::<AccountStatus>().unwrap(), AccountStatus::Frozen);
        assert!("FROZEN".parse::<AccountStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&AccountType::Investment).unwrap(),
            "\"investment\""
        );
    }

    #[test]
    fn new_account_validation() {
        let ok = NewAccount::new("ext-1", "Main", AccountType::Checking, "USD");
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.currency = "usd".into();
        assert_matches!(bad.validate(), Err(RepoError::InvalidArgument(_)));

        let mut bad = ok.clone();
        bad.external_id = "  ".into();
        assert_matches!(bad.validate(), Err(RepoError::InvalidArgument(_)));

        let mut bad = ok;
        bad.name = "x".repeat(MAX_NAME_LEN + 1);
        assert_matches!(bad.validate(), Err(RepoError::InvalidArgument(_)));
    }

    #[test]
    fn update_rejects_immutable_fields() {
        let patch = AccountUpdate {
            name: Some("New".into()),
            currency: Some("EUR".into()),
            ..Default::default()
        };
        let err = patch.validate().unwrap_err();
        assert!(err.to_string().contains("currency is immutable"));

        let patch = AccountUpdate {
            external_id: Some("other".into()),
            ..Default::default()
        };
        assert_matches!(patch.validate(), Err(RepoError::InvalidArgument(m)) if m.contains("external_id"));
    }

    #[test]
    fn empty_update_rejected() {
        assert_matches!(
            AccountUpdate::default().validate(),
            Err(RepoError::InvalidArgument(m)) if m.contains("no fields")
        );
    }

    #[test]
    fn update_deserializes_camel_case() {
        let patch: AccountUpdate = serde_json::from_str(r#"{"accountType": "loan"}"#).unwrap();
        assert_eq!(patch.account_type, Some(AccountType::Loan));

        let patch: AccountUpdate = serde_json::from_str(r#"{"groupId": "g1"}"#).unwrap();
        assert_eq!(patch.group_id, Some(Some("g1".into())));
    }
}
