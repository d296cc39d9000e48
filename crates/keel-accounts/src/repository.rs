//! Account repository.
//!
//! Every call borrows the manager's session for its duration; with no
//! session installed calls fail with an `Unavailable`-coded error, which is
//! how the service runs storage-degraded.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, SubsecRound, Utc};
use keel_core::ids::{new_token, prefixed_id};
use keel_store::{ConnectionManager, SessionLease, SqlValue, StoreError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{RepoError, Result};
use crate::model::{Account, AccountFilter, AccountPage, AccountStatus, AccountUpdate, NewAccount};
use crate::versioned::{VersionedUpdate, WriteOutcome};

/// Entity table.
pub const TABLE: &str = "accounts";

/// Columns selected for [`Account::from_row`].
pub const COLUMNS: &str = "id, external_id, name, account_type, currency, group_id, status, \
                           metadata, version, revision, created_at, updated_at";

/// Page size when the caller passes 0.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Largest page size honored.
pub const MAX_PAGE_SIZE: i64 = 200;

/// Create, read, update, and list accounts.
#[derive(Clone, Debug)]
pub struct AccountRepository {
    manager: Arc<ConnectionManager>,
}

impl AccountRepository {
    /// Repository over `manager`'s session.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    fn session(&self) -> Result<SessionLease> {
        Ok(self.manager.require_session()?)
    }

    /// Insert a new account at version 1.
    pub async fn create(&self, new: NewAccount) -> Result<Account> {
        new.validate()?;
        let session = self.session()?;

        let now = now();
        let account = Account {
            id: new.id.unwrap_or_else(|| prefixed_id("acct")),
            external_id: new.external_id.trim().to_string(),
            name: new.name.trim().to_string(),
            account_type: new.account_type,
            currency: new.currency,
            group_id: new.group_id,
            status: AccountStatus::Active,
            metadata: new.metadata,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let result = session
            .exec(
                &format!(
                    "INSERT INTO {TABLE} ({COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                &[
                    SqlValue::from(account.id.as_str()),
                    SqlValue::from(account.external_id.as_str()),
                    SqlValue::from(account.name.as_str()),
                    SqlValue::from(account.account_type.as_str()),
                    SqlValue::from(account.currency.as_str()),
                    SqlValue::from(account.group_id.as_deref()),
                    SqlValue::from(account.status.as_str()),
                    SqlValue::from(metadata_text(&account.metadata)),
                    SqlValue::from(account.version),
                    SqlValue::from(new_token()),
                    SqlValue::from(account.created_at),
                    SqlValue::from(account.updated_at),
                ],
            )
            .await;

        match result {
            Ok(summary) => {
                info!(id = %account.id, external_id = %account.external_id, tx_id = summary.tx_id, "account created");
                Ok(account)
            }
            Err(StoreError::UniqueViolation(detail)) => {
                debug!(external_id = %account.external_id, detail = %detail, "account create rejected");
                Err(RepoError::AlreadyExists(format!(
                    "account with id {} or external id {} already exists",
                    account.id, account.external_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Account by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Account> {
        self.get_by("id", id).await
    }

    /// Account by external id.
    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Account> {
        self.get_by("external_id", external_id).await
    }

    async fn get_by(&self, column: &'static str, value: &str) -> Result<Account> {
        let session = self.session()?;
        let row = session
            .query_opt(
                &format!("SELECT {COLUMNS} FROM {TABLE} WHERE {column} = ?1"),
                &[SqlValue::from(value)],
            )
            .await?;
        match row {
            Some(row) => Ok(Account::from_row(&row)?),
            None => Err(RepoError::NotFound(format!("account {column} = {value}"))),
        }
    }

    /// Apply `patch` if the account is still at `expected_version`.
    ///
    /// Returns the account at `expected_version + 1`. `Aborted` means
    /// another write got there first; re-read and retry.
    ///
    /// `Aborted` can also be reported for a write that did commit: the
    /// outcome is decided by reading the row back, and if a third writer
    /// moves the row on between this call's `UPDATE` and that read, this
    /// call's revision token is already gone. Re-read before retrying a
    /// patch that is not idempotent.
    pub async fn update(
        &self,
        id: &str,
        patch: AccountUpdate,
        expected_version: i64,
    ) -> Result<Account> {
        if expected_version < 1 {
            return Err(RepoError::invalid("expected_version must be at least 1"));
        }
        patch.validate()?;

        let mut update = VersionedUpdate::new(TABLE, id, expected_version);
        if let Some(name) = &patch.name {
            update.set("name", name.trim());
        }
        if let Some(account_type) = patch.account_type {
            update.set("account_type", account_type.as_str());
        }
        if let Some(group_id) = patch.group_id {
            update.set("group_id", group_id);
        }
        if let Some(status) = patch.status {
            update.set("status", status.as_str());
        }
        if let Some(metadata) = &patch.metadata {
            update.set("metadata", metadata_text(metadata));
        }

        let session = self.session()?;
        match update.execute(&*session, COLUMNS, now()).await? {
            WriteOutcome::Applied(row) => {
                let account = Account::from_row(&row)?;
                info!(id, version = account.version, "account updated");
                Ok(account)
            }
            WriteOutcome::Conflict { current_version } => {
                warn!(id, expected_version, current_version, "account update lost a version race");
                Err(RepoError::Aborted {
                    entity: "account",
                    id: id.to_string(),
                    expected_version,
                })
            }
            WriteOutcome::Missing => Err(RepoError::NotFound(format!("account id = {id}"))),
        }
    }

    /// One page of accounts matching `filter`, newest first.
    ///
    /// `page_size` 0 means [`DEFAULT_PAGE_SIZE`]; larger values are capped
    /// at [`MAX_PAGE_SIZE`]; negative values are rejected.
    pub async fn list(
        &self,
        filter: &AccountFilter,
        page_size: i64,
        page_token: &str,
    ) -> Result<AccountPage> {
        let limit = clamp_page_size(page_size)?;
        let offset = decode_page_token(page_token)?;
        let (where_clause, mut params) = filter_clause(filter);
        let session = self.session()?;

        let total_count = session
            .query_opt(
                &format!("SELECT COUNT(*) AS total FROM {TABLE}{where_clause}"),
                &params,
            )
            .await?
            .map_or(Ok(0), |row| row.get_i64("total"))?;

        params.push(SqlValue::from(limit));
        let limit_idx = params.len();
        params.push(SqlValue::from(offset));
        let offset_idx = params.len();
        let rows = session
            .query(
                &format!(
                    "SELECT {COLUMNS} FROM {TABLE}{where_clause} \
                     ORDER BY created_at DESC, id ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
                ),
                &params,
            )
            .await?;

        let accounts = rows
            .iter()
            .map(Account::from_row)
            .collect::<keel_store::Result<Vec<_>>>()?;
        let consumed = offset + i64::try_from(accounts.len()).unwrap_or(i64::MAX);
        let next_page_token = if !accounts.is_empty() && consumed < total_count {
            encode_page_token(consumed)
        } else {
            String::new()
        };
        debug!(offset, limit, returned = accounts.len(), total_count, "accounts listed");

        Ok(AccountPage {
            accounts,
            next_page_token,
            total_count,
        })
    }
}

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn metadata_text(metadata: &serde_json::Map<String, Value>) -> String {
    Value::Object(metadata.clone()).to_string()
}

fn clamp_page_size(page_size: i64) -> Result<i64> {
    match page_size {
        n if n < 0 => Err(RepoError::invalid(format!(
            "page_size must not be negative, got {n}"
        ))),
        0 => Ok(DEFAULT_PAGE_SIZE),
        n => Ok(n.min(MAX_PAGE_SIZE)),
    }
}

/// Opaque token for the page starting at `offset`.
pub fn encode_page_token(offset: i64) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

/// Offset encoded in `token`; the empty token is the first page.
pub fn decode_page_token(token: &str) -> Result<i64> {
    if token.is_empty() {
        return Ok(0);
    }
    let invalid = || RepoError::invalid(format!("invalid page token '{token}'"));
    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let offset: i64 = std::str::from_utf8(&bytes)
        .map_err(|_| invalid())?
        .parse()
        .map_err(|_| invalid())?;
    if offset < 0 {
        return Err(invalid());
    }
    Ok(offset)
}

fn filter_clause(filter: &AccountFilter) -> (String, Vec<SqlValue>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(account_type) = filter.account_type {
        params.push(account_type.as_str().into());
        conditions.push(format!("account_type = ?{}", params.len()));
    }
    if let Some(currency) = &filter.currency {
        params.push(currency.as_str().into());
        conditions.push(format!("currency = ?{}", params.len()));
    }
    if let Some(group_id) = &filter.group_id {
        params.push(group_id.as_str().into());
        conditions.push(format!("group_id = ?{}", params.len()));
    }
    if let Some(needle) = filter.name_contains.as_deref().filter(|n| !n.is_empty()) {
        params.push(format!("%{}%", escape_like(&needle.to_lowercase())).into());
        conditions.push(format!("LOWER(name) LIKE ?{} ESCAPE '\\'", params.len()));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountType;
    use assert_matches::assert_matches;

    #[test]
    fn page_size_clamping() {
        assert_eq!(clamp_page_size(0).unwrap(), 50);
        assert_eq!(clamp_page_size(1).unwrap(), 1);
        assert_eq!(clamp_page_size(200).unwrap(), 200);
        assert_eq!(clamp_page_size(5000).unwrap(), 200);
        assert_matches!(clamp_page_size(-1), Err(RepoError::InvalidArgument(_)));
    }

    #[test]
    fn page_tokens() {
        assert_eq!(decode_page_token("").unwrap(), 0);
        assert_eq!(decode_page_token(&encode_page_token(40)).unwrap(), 40);
        assert_matches!(decode_page_token("%%%"), Err(RepoError::InvalidArgument(_)));
        assert_matches!(
            decode_page_token(&URL_SAFE_NO_PAD.encode("ten")),
            Err(RepoError::InvalidArgument(_))
        );
        assert_matches!(
            decode_page_token(&URL_SAFE_NO_PAD.encode("-5")),
            Err(RepoError::InvalidArgument(_))
        );
    }

    #[test]
    fn filter_clause_numbers_params() {
        let (sql, params) = filter_clause(&AccountFilter::default());
        assert!(sql.is_empty());
        assert!(params.is_empty());

        let filter = AccountFilter {
            account_type: Some(AccountType::Savings),
            currency: None,
            group_id: Some("g1".into()),
            name_contains: Some("Main_%".into()),
        };
        let (sql, params) = filter_clause(&filter);
        assert_eq!(
            sql,
            " WHERE account_type = ?1 AND group_id = ?2 AND LOWER(name) LIKE ?3 ESCAPE '\\'"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::from("savings"),
                SqlValue::from("g1"),
                SqlValue::from("%main\\_\\%%"),
            ]
        );
    }

    #[test]
    fn now_is_microsecond_precision() {
        assert_eq!(now().timestamp_subsec_nanos() % 1000, 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn page_token_round_trips(offset in 0_i64..i64::MAX) {
                prop_assert_eq!(decode_page_token(&encode_page_token(offset)).unwrap(), offset);
            }

            #[test]
            fn page_size_always_in_range(size in 0_i64..100_000) {
                let clamped = clamp_page_size(size).unwrap();
                prop_assert!((1..=MAX_PAGE_SIZE).contains(&clamped));
            }
        }
    }
}
