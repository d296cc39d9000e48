#![allow(missing_docs, unused_results)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use async_trait::async_trait;
use keel_accounts::{
    AccountFilter, AccountRepository, AccountStatus, AccountType, AccountUpdate, NewAccount,
    RepoError,
};
use keel_core::ErrorCode;
use keel_migrate::{MigrationRunner, RunOptions};
use keel_store::{
    ConnectTarget, ConnectionManager, ExecSummary, LedgerEngine, ManagerConfig, Row, SqlValue,
    Statement, StoreConnector, StoreSession,
};
use serde_json::json;

// ─────────────────────────────────────────────────────────────────────────────
// Write-counting session
// ─────────────────────────────────────────────────────────────────────────────

struct CountingSession {
    inner: Arc<dyn StoreSession>,
    writes: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreSession for CountingSession {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn database(&self) -> &str {
        self.inner.database()
    }

    async fn exec(&self, sql: &str, params: &[SqlValue]) -> keel_store::Result<ExecSummary> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.exec(sql, params).await
    }

    async fn exec_batch(&self, statements: &[Statement]) -> keel_store::Result<ExecSummary> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.exec_batch(statements).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> keel_store::Result<Vec<Row>> {
        self.inner.query(sql, params).await
    }

    async fn health(&self) -> keel_store::Result<()> {
        self.inner.health().await
    }

    async fn close(&self) -> keel_store::Result<()> {
        self.inner.close().await
    }
}

struct CountingConnector {
    engine: LedgerEngine,
    writes: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreConnector for CountingConnector {
    async fn open_session(
        &self,
        target: &ConnectTarget,
    ) -> keel_store::Result<Arc<dyn StoreSession>> {
        let inner = self.engine.open_session(target).await?;
        Ok(Arc::new(CountingSession {
            inner,
            writes: Arc::clone(&self.writes),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    repo: AccountRepository,
    manager: Arc<ConnectionManager>,
    writes: Arc<AtomicUsize>,
}

impl Harness {
    async fn new() -> Self {
        let engine = LedgerEngine::in_memory();
        engine.add_user("keel", "pw");
        engine.create_database("defaultdb").unwrap();
        let writes = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(CountingConnector {
                engine,
                writes: Arc::clone(&writes),
            }),
            ManagerConfig::new(ConnectTarget {
                address: "memory".into(),
                username: "keel".into(),
                password: "pw".into(),
                database: "defaultdb".into(),
            }),
        ));
        manager.connect().await.unwrap();

        let migrations = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        MigrationRunner::new(Arc::clone(&manager), migrations, "accounts")
            .unwrap()
            .run(RunOptions::default())
            .await
            .unwrap();

        Self {
            repo: AccountRepository::new(Arc::clone(&manager)),
            manager,
            writes,
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn checking(external_id: &str, name: &str) -> NewAccount {
    NewAccount::new(external_id, name, AccountType::Checking, "USD")
}

fn rename(name: &str) -> AccountUpdate {
    AccountUpdate {
        name: Some(name.into()),
        ..Default::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Create / get
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_returns_version_one() {
    let h = Harness::new().await;
    let mut input = checking("ext-1", "Main");
    input.group_id = Some("household".into());
    input.metadata = json!({"branch": "north", "tier": 2}).as_object().unwrap().clone();

    let created = h.repo.create(input).await.unwrap();
    assert!(created.id.starts_with("acct_"));
    assert_eq!(created.version, 1);
    assert_eq!(created.status, AccountStatus::Active);
    assert_eq!(created.created_at, created.updated_at);

    let fetched = h.repo.get_by_id(&created.id).await.unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.metadata["branch"], "north");

    let by_external = h.repo.get_by_external_id("ext-1").await.unwrap();
    assert_eq!(by_external.id, created.id);
}

#[tokio::test]
async fn explicit_id_is_kept() {
    let h = Harness::new().await;
    let mut input = checking("ext-1", "Main");
    input.id = Some("acct_fixed".into());
    let created = h.repo.create(input).await.unwrap();
    assert_eq!(created.id, "acct_fixed");
}

#[tokio::test]
async fn duplicate_external_id_already_exists() {
    let h = Harness::new().await;
    h.repo.create(checking("ext-1", "Main")).await.unwrap();
    let err = h.repo.create(checking("ext-1", "Other")).await.unwrap_err();
    assert_matches!(err, RepoError::AlreadyExists(_));
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn invalid_create_never_writes() {
    let h = Harness::new().await;
    let before = h.writes();
    let err = h
        .repo
        .create(NewAccount::new("ext-1", "Main", AccountType::Loan, "usd"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(h.writes(), before);
}

#[tokio::test]
async fn unknown_ids_not_found() {
    let h = Harness::new().await;
    assert_matches!(h.repo.get_by_id("acct_nope").await, Err(RepoError::NotFound(_)));
    assert_matches!(
        h.repo.get_by_external_id("nope").await,
        Err(RepoError::NotFound(_))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Update
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_advances_version_by_one() {
    let h = Harness::new().await;
    let mut input = checking("ext-1", "Main");
    input.group_id = Some("g1".into());
    let created = h.repo.create(input).await.unwrap();

    let patch = AccountUpdate {
        name: Some("Primary".into()),
        status: Some(AccountStatus::Frozen),
        group_id: Some(None),
        ..Default::default()
    };
    let updated = h.repo.update(&created.id, patch, 1).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Primary");
    assert_eq!(updated.status, AccountStatus::Frozen);
    assert_eq!(updated.group_id, None);
    assert_eq!(updated.external_id, "ext-1");
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);

    let reread = h.repo.get_by_id(&created.id).await.unwrap();
    assert_eq!(reread, updated);

    let third = h.repo.update(&created.id, rename("Third"), 2).await.unwrap();
    assert_eq!(third.version, 3);
}

#[tokio::test]
async fn stale_version_is_aborted() {
    let h = Harness::new().await;
    let created = h.repo.create(checking("ext-1", "Main")).await.unwrap();
    h.repo.update(&created.id, rename("A"), 1).await.unwrap();

    let err = h.repo.update(&created.id, rename("B"), 1).await.unwrap_err();
    assert_matches!(err, RepoError::Aborted { expected_version: 1, .. });
    assert_eq!(err.code(), ErrorCode::Aborted);
    assert_eq!(h.repo.get_by_id(&created.id).await.unwrap().name, "A");
}

#[tokio::test]
async fn update_of_missing_row_not_found() {
    let h = Harness::new().await;
    assert_matches!(
        h.repo.update("acct_missing", rename("A"), 1).await,
        Err(RepoError::NotFound(_))
    );
}

#[tokio::test]
async fn immutable_field_change_performs_no_write() {
    let h = Harness::new().await;
    let created = h.repo.create(checking("ext-1", "Main")).await.unwrap();
    let before = h.writes();

    for patch in [
        AccountUpdate {
            currency: Some("EUR".into()),
            ..Default::default()
        },
        AccountUpdate {
            name: Some("Renamed".into()),
            external_id: Some("ext-2".into()),
            ..Default::default()
        },
    ] {
        let err = h.repo.update(&created.id, patch, 1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    assert_eq!(h.writes(), before);
    assert_eq!(h.repo.get_by_id(&created.id).await.unwrap().version, 1);
}

#[tokio::test]
async fn concurrent_updates_have_exactly_one_winner() {
    let h = Harness::new().await;
    for round in 0..10 {
        let created = h
            .repo
            .create(checking(&format!("ext-{round}"), "Race"))
            .await
            .unwrap();

        let a = tokio::spawn({
            let repo = h.repo.clone();
            let id = created.id.clone();
            async move { repo.update(&id, rename("from-a"), 1).await }
        });
        let b = tokio::spawn({
            let repo = h.repo.clone();
            let id = created.id.clone();
            async move { repo.update(&id, rename("from-b"), 1).await }
        });
        let (a, b) = futures::join!(a, b);
        let results = [a.unwrap(), b.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1, "round {round}: {results:?}");
        assert_eq!(winners[0].version, 2);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.code(), ErrorCode::Aborted);

        let stored = h.repo.get_by_id(&created.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.name, winners[0].name);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// List
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_through_twenty_five_accounts() {
    let h = Harness::new().await;
    for i in 0..25 {
        h.repo
            .create(checking(&format!("ext-{i:02}"), &format!("Account {i}")))
            .await
            .unwrap();
    }

    let first = h.repo.list(&AccountFilter::default(), 10, "").await.unwrap();
    assert_eq!(first.accounts.len(), 10);
    assert_eq!(first.total_count, 25);
    assert!(!first.next_page_token.is_empty());

    let mut seen: HashSet<String> = first.accounts.iter().map(|a| a.id.clone()).collect();
    let mut token = first.next_page_token;
    let mut pages = 1;
    while !token.is_empty() {
        let page = h.repo.list(&AccountFilter::default(), 10, &token).await.unwrap();
        assert_eq!(page.total_count, 25);
        seen.extend(page.accounts.iter().map(|a| a.id.clone()));
        token = page.next_page_token;
        pages += 1;
    }
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn list_orders_newest_first() {
    let h = Harness::new().await;
    let older = h.repo.create(checking("ext-1", "Older")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let newer = h.repo.create(checking("ext-2", "Newer")).await.unwrap();

    let page = h.repo.list(&AccountFilter::default(), 0, "").await.unwrap();
    let ids: Vec<&str> = page.accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
    assert!(page.next_page_token.is_empty());
}

#[tokio::test]
async fn list_filters() {
    let h = Harness::new().await;
    let mut savings = NewAccount::new("ext-1", "Holiday Fund", AccountType::Savings, "EUR");
    savings.group_id = Some("family".into());
    h.repo.create(savings).await.unwrap();
    h.repo.create(checking("ext-2", "Everyday")).await.unwrap();
    h.repo
        .create(NewAccount::new("ext-3", "holiday card", AccountType::Credit, "USD"))
        .await
        .unwrap();

    let by_type = AccountFilter {
        account_type: Some(AccountType::Savings),
        ..Default::default()
    };
    assert_eq!(h.repo.list(&by_type, 0, "").await.unwrap().total_count, 1);

    let by_currency = AccountFilter {
        currency: Some("USD".into()),
        ..Default::default()
    };
    assert_eq!(h.repo.list(&by_currency, 0, "").await.unwrap().total_count, 2);

    let by_group = AccountFilter {
        group_id: Some("family".into()),
        ..Default::default()
    };
    assert_eq!(h.repo.list(&by_group, 0, "").await.unwrap().total_count, 1);

    let by_name = AccountFilter {
        name_contains: Some("HOLIDAY".into()),
        ..Default::default()
    };
    let page = h.repo.list(&by_name, 0, "").await.unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.accounts.len(), 2);

    let wildcard = AccountFilter {
        name_contains: Some("%".into()),
        ..Default::default()
    };
    assert_eq!(h.repo.list(&wildcard, 0, "").await.unwrap().total_count, 0);
}

#[tokio::test]
async fn list_rejects_bad_paging_arguments() {
    let h = Harness::new().await;
    assert_matches!(
        h.repo.list(&AccountFilter::default(), -1, "").await,
        Err(RepoError::InvalidArgument(_))
    );
    assert_matches!(
        h.repo.list(&AccountFilter::default(), 10, "not a token!").await,
        Err(RepoError::InvalidArgument(_))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Degraded mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn without_session_calls_are_unavailable() {
    let h = Harness::new().await;
    h.manager.disconnect().await.unwrap();
    let err = h.repo.create(checking("ext-1", "Main")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unavailable);
    let err = h.repo.get_by_id("acct_1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unavailable);
}
