use crate::application::session::SessionManager;
use crate::application::sync::{SyncService, TodayProvider};
use crate::application::workflow::WorkflowCommand;
use crate::domain::models::{LinkTarget, RemoteCatalog};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mapping_cache::MappingCache;
use crate::infrastructure::remote_client::RemoteClient;
use crate::infrastructure::session_store::SessionStore;
use chrono::{Datelike, Local, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthBoundary {
    FirstDay,
    LastDay,
    Ordinary,
}

pub fn month_boundary(date: NaiveDate) -> MonthBoundary {
    if date.day() == 1 {
        return MonthBoundary::FirstDay;
    }
    let last_day = date
        .succ_opt()
        .is_none_or(|next| next.month() != date.month());
    if last_day {
        MonthBoundary::LastDay
    } else {
        MonthBoundary::Ordinary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<String>,
    pub revalidated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// Nothing stale and not a month end.
    Idle,
    Primed { marked: usize },
    Reconciled {
        report: ReconcileReport,
        catalog: RemoteCatalog,
    },
    ReauthenticationRequired,
}

pub struct InvalidationScheduler<S, C, M>
where
    S: SessionStore,
    C: RemoteClient,
    M: MappingCache,
{
    sessions: Arc<SessionManager<S, C>>,
    sync_service: Arc<SyncService<C, M>>,
    mapping_cache: Arc<M>,
    today_provider: TodayProvider,
}

impl<S, C, M> InvalidationScheduler<S, C, M>
where
    S: SessionStore,
    C: RemoteClient,
    M: MappingCache,
{
    pub fn new(
        sessions: Arc<SessionManager<S, C>>,
        sync_service: Arc<SyncService<C, M>>,
        mapping_cache: Arc<M>,
    ) -> Self {
        Self {
            sessions,
            sync_service,
            mapping_cache,
            today_provider: Arc::new(|| Local::now().date_naive()),
        }
    }

    pub fn with_today_provider(mut self, today_provider: TodayProvider) -> Self {
        self.today_provider = today_provider;
        self
    }

    /// True when stale links wait for revalidation and today does not prime them.
    pub fn needs_reconcile(&self) -> Result<bool, InfraError> {
        if month_boundary((self.today_provider)()) == MonthBoundary::LastDay {
            return Ok(false);
        }
        self.mapping_cache.has_stale()
    }

    /// Evaluates today's date once. The last day of a month marks every link stale;
    /// any other day reconciles stale links, so a missed first of month is caught up.
    pub async fn tick(&self) -> Result<InvalidationOutcome, InfraError> {
        let today = (self.today_provider)();
        let boundary = month_boundary(today);
        debug!(%today, ?boundary, "invalidation tick");

        if boundary == MonthBoundary::LastDay {
            let marked = self.mapping_cache.mark_all_stale()?;
            info!(marked, "project links marked stale for monthly revalidation");
            return Ok(InvalidationOutcome::Primed { marked });
        }
        if !self.mapping_cache.has_stale()? {
            return Ok(InvalidationOutcome::Idle);
        }

        let Some(session) = self.sessions.ensure_session().await?.session() else {
            info!("stale project links waiting for login");
            return Ok(InvalidationOutcome::ReauthenticationRequired);
        };
        let catalog = match self.sync_service.fetch_catalog(&session).await {
            Ok(catalog) => catalog,
            Err(error) if error.requires_reauthentication() => {
                warn!(error = %error, "session rejected during revalidation");
                self.sessions.invalidate()?;
                return Ok(InvalidationOutcome::ReauthenticationRequired);
            }
            Err(error) => return Err(error),
        };

        let report = self.reconcile(&catalog)?;
        Ok(InvalidationOutcome::Reconciled { report, catalog })
    }

    /// Deletes stale links whose task left the catalog and clears the flag on the rest.
    /// Declined links and links without a task reference nothing remote and are kept.
    pub fn reconcile(&self, catalog: &RemoteCatalog) -> Result<ReconcileReport, InfraError> {
        if catalog.is_empty() {
            return Err(InfraError::CatalogUnavailable(
                "refusing to revalidate against an empty task list".to_string(),
            ));
        }

        let mut report = ReconcileReport::default();
        for link in self.mapping_cache.list_all()? {
            if !link.stale {
                continue;
            }
            match link.task {
                Some(LinkTarget::Remote(task_id)) if catalog.task(task_id).is_none() => {
                    self.mapping_cache.remove(&link.project_code)?;
                    info!(
                        project_code = %link.project_code,
                        task_id,
                        "removed link to retired task"
                    );
                    report.removed.push(link.project_code);
                }
                _ => report.revalidated.push(link.project_code),
            }
        }
        self.mapping_cache.clear_stale(&report.revalidated)?;
        info!(
            removed = report.removed.len(),
            revalidated = report.revalidated.len(),
            "project links revalidated"
        );
        Ok(report)
    }
}

/// Sends `Tick` into the workflow channel every `period` until cancelled or the
/// receiver is gone.
pub fn spawn_invalidation_ticker(
    commands: mpsc::Sender<WorkflowCommand>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if commands.send(WorkflowCommand::Tick).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("invalidation ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Credentials;
    use crate::infrastructure::mapping_cache::InMemoryMappingCache;
    use crate::infrastructure::remote_status::RemoteStatus;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use crate::test_support::{catalog, date, FakeFailure, FakeRemoteClient};
    use std::sync::atomic::Ordering;

    type Scheduler =
        InvalidationScheduler<InMemorySessionStore, FakeRemoteClient, InMemoryMappingCache>;

    struct Fixture {
        client: Arc<FakeRemoteClient>,
        cache: Arc<InMemoryMappingCache>,
        sessions: Arc<SessionManager<InMemorySessionStore, FakeRemoteClient>>,
    }

    impl Fixture {
        fn new() -> Self {
            let client = Arc::new(FakeRemoteClient::with_catalog(catalog(&[43], &[7])));
            let cache = Arc::new(InMemoryMappingCache::default());
            let sessions = Arc::new(SessionManager::new(
                Arc::new(InMemorySessionStore::default()),
                client.clone(),
            ));
            Self {
                client,
                cache,
                sessions,
            }
        }

        async fn logged_in(self) -> Self {
            self.sessions
                .login(&Credentials::new("jane", "secret"))
                .await
                .expect("login");
            self
        }

        fn scheduler(&self, today: &'static str) -> Scheduler {
            let sync = Arc::new(SyncService::new(self.client.clone(), self.cache.clone()));
            InvalidationScheduler::new(self.sessions.clone(), sync, self.cache.clone())
                .with_today_provider(Arc::new(move || date(today)))
        }

        fn seed_links(&self) {
            self.cache.put("ABC", LinkTarget::Remote(42)).expect("abc");
            self.cache.put("KEEP", LinkTarget::Remote(43)).expect("keep");
            self.cache.put("SKIP", LinkTarget::Declined).expect("skip");
            self.cache
                .put_activity("HALF", LinkTarget::Remote(7))
                .expect("half");
        }
    }

    #[test]
    fn month_boundaries() {
        assert_eq!(month_boundary(date("2026-03-01")), MonthBoundary::FirstDay);
        assert_eq!(month_boundary(date("2026-02-28")), MonthBoundary::LastDay);
        assert_eq!(month_boundary(date("2028-02-28")), MonthBoundary::Ordinary);
        assert_eq!(month_boundary(date("2028-02-29")), MonthBoundary::LastDay);
        assert_eq!(month_boundary(date("2026-12-31")), MonthBoundary::LastDay);
        assert_eq!(month_boundary(date("2026-04-15")), MonthBoundary::Ordinary);
    }

    #[tokio::test]
    async fn last_day_marks_every_link_stale() {
        let fixture = Fixture::new();
        fixture.seed_links();

        let outcome = fixture.scheduler("2026-02-28").tick().await.expect("tick");
        assert_eq!(outcome, InvalidationOutcome::Primed { marked: 4 });
        assert!(fixture
            .cache
            .list_all()
            .expect("links")
            .iter()
            .all(|link| link.stale));
        assert_eq!(fixture.client.catalog_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_day_removes_retired_tasks_and_clears_the_rest() {
        let fixture = Fixture::new().logged_in().await;
        fixture.seed_links();
        fixture.cache.mark_all_stale().expect("stale");

        let outcome = fixture.scheduler("2026-03-01").tick().await.expect("tick");
        let (report, fetched) = match outcome {
            InvalidationOutcome::Reconciled { report, catalog } => (report, catalog),
            other => panic!("expected reconciliation, got {other:?}"),
        };
        assert_eq!(report.removed, vec!["ABC".to_string()]);
        assert_eq!(fetched, catalog(&[43], &[7]));

        assert!(fixture.cache.get("ABC").expect("get").is_none());
        for code in ["KEEP", "SKIP", "HALF"] {
            let link = fixture.cache.get(code).expect("get").expect("kept");
            assert!(!link.stale, "{code} should be revalidated");
        }
    }

    #[tokio::test]
    async fn ordinary_day_catches_up_on_stale_links() {
        let fixture = Fixture::new().logged_in().await;
        fixture.seed_links();
        fixture.cache.mark_all_stale().expect("stale");

        let outcome = fixture.scheduler("2026-03-04").tick().await.expect("tick");
        assert!(matches!(outcome, InvalidationOutcome::Reconciled { .. }));
        assert!(!fixture.cache.has_stale().expect("has stale"));
    }

    #[tokio::test]
    async fn nothing_stale_means_no_remote_calls() {
        let fixture = Fixture::new().logged_in().await;
        fixture.seed_links();

        let outcome = fixture.scheduler("2026-03-01").tick().await.expect("tick");
        assert_eq!(outcome, InvalidationOutcome::Idle);
        assert_eq!(fixture.client.catalog_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_links_without_session_wait_for_login() {
        let fixture = Fixture::new();
        fixture.seed_links();
        fixture.cache.mark_all_stale().expect("stale");

        let outcome = fixture.scheduler("2026-03-01").tick().await.expect("tick");
        assert_eq!(outcome, InvalidationOutcome::ReauthenticationRequired);
        assert_eq!(fixture.cache.list_all().expect("links").len(), 4);
    }

    #[test]
    fn reconcile_is_needed_only_for_stale_links_off_the_last_day() {
        let fixture = Fixture::new();
        fixture.seed_links();
        assert!(!fixture.scheduler("2026-03-01").needs_reconcile().expect("fresh"));

        fixture.cache.mark_all_stale().expect("stale");
        assert!(fixture.scheduler("2026-03-01").needs_reconcile().expect("first day"));
        assert!(fixture.scheduler("2026-03-17").needs_reconcile().expect("ordinary day"));
        assert!(!fixture.scheduler("2026-03-31").needs_reconcile().expect("last day"));
    }

    #[tokio::test]
    async fn rejected_session_is_dropped() {
        let fixture = Fixture::new().logged_in().await;
        fixture.seed_links();
        fixture.cache.mark_all_stale().expect("stale");
        fixture
            .client
            .fail_tasks(FakeFailure::Status(RemoteStatus::NoAuth));

        let outcome = fixture.scheduler("2026-03-01").tick().await.expect("tick");
        assert_eq!(outcome, InvalidationOutcome::ReauthenticationRequired);
        assert!(fixture.sessions.current().expect("current").is_none());
        assert!(fixture.cache.has_stale().expect("still stale"));
    }

    #[tokio::test]
    async fn empty_catalog_never_deletes_links() {
        let fixture = Fixture::new().logged_in().await;
        fixture.seed_links();
        fixture.cache.mark_all_stale().expect("stale");
        fixture.client.set_catalog(catalog(&[], &[]));

        let result = fixture.scheduler("2026-03-01").tick().await;
        assert!(matches!(result, Err(InfraError::CatalogUnavailable(_))));
        assert_eq!(fixture.cache.list_all().expect("links").len(), 4);

        let direct = fixture.scheduler("2026-03-01").reconcile(&RemoteCatalog::default());
        assert!(direct.is_err());
    }

    #[tokio::test]
    async fn ticker_sends_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = spawn_invalidation_ticker(tx, Duration::from_millis(5), cancel.clone());

        for _ in 0..2 {
            let command = rx.recv().await.expect("tick");
            assert!(matches!(command, WorkflowCommand::Tick));
        }
        cancel.cancel();
        handle.await.expect("ticker joins");
    }
}
