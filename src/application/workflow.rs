use crate::application::invalidation::{InvalidationOutcome, InvalidationScheduler};
use crate::application::resolution::{
    ActivityChoice, ResolutionController, ResolutionPrompt, ResolutionStep, TaskChoice,
};
use crate::application::session::SessionManager;
use crate::application::sync::{BatchReport, SyncService};
use crate::domain::models::{Credentials, Entry, RemoteCatalog, Session};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mapping_cache::MappingCache;
use crate::infrastructure::remote_client::RemoteClient;
use crate::infrastructure::session_store::SessionStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum WorkflowCommand {
    Submit(Vec<Entry>),
    ChooseTask(TaskChoice),
    ChooseActivity(ActivityChoice),
    CancelResolution,
    Login(Credentials),
    Tick,
    Shutdown,
}

#[derive(Debug)]
pub enum WorkflowEvent {
    Prompt(ResolutionPrompt),
    LoginRequired,
    LoginFailed(String),
    LoggedIn { user_id: i64 },
    BatchSubmitted(BatchReport),
    ResolutionCancelled,
    Invalidation(InvalidationOutcome),
    InvalidationFailed(String),
    Error(String),
}

/// Owns every piece of interactive state. Commands are handled one at a time, so the
/// resolution flow, submissions, and scheduler ticks never interleave.
pub struct Workflow<S, C, M>
where
    S: SessionStore,
    C: RemoteClient,
    M: MappingCache,
{
    sessions: Arc<SessionManager<S, C>>,
    sync_service: Arc<SyncService<C, M>>,
    scheduler: InvalidationScheduler<S, C, M>,
    resolution: ResolutionController<M>,
    pending: Option<Vec<Entry>>,
    catalog: Option<RemoteCatalog>,
}

impl<S, C, M> Workflow<S, C, M>
where
    S: SessionStore,
    C: RemoteClient,
    M: MappingCache,
{
    pub fn new(
        sessions: Arc<SessionManager<S, C>>,
        sync_service: Arc<SyncService<C, M>>,
        scheduler: InvalidationScheduler<S, C, M>,
        mapping_cache: Arc<M>,
    ) -> Self {
        Self {
            sessions,
            sync_service,
            scheduler,
            resolution: ResolutionController::new(mapping_cache),
            pending: None,
            catalog: None,
        }
    }

    pub fn has_pending_batch(&self) -> bool {
        self.pending.is_some()
    }

    /// Handles commands until `Shutdown` or the sender drops. Each command's events are
    /// delivered together as one batch.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkflowCommand>,
        events: mpsc::Sender<Vec<WorkflowEvent>>,
    ) {
        while let Some(command) = commands.recv().await {
            if matches!(command, WorkflowCommand::Shutdown) {
                debug!("workflow shutting down");
                break;
            }
            let batch = self.handle(command).await;
            if batch.is_empty() {
                continue;
            }
            if events.send(batch).await.is_err() {
                return;
            }
        }
    }

    pub async fn handle(&mut self, command: WorkflowCommand) -> Vec<WorkflowEvent> {
        match command {
            WorkflowCommand::Submit(entries) => {
                if self.resolution.is_busy() {
                    return self.rejected(InfraError::ResolutionInProgress);
                }
                if entries.is_empty() {
                    return vec![WorkflowEvent::Error("no entries to submit".to_string())];
                }
                self.pending = Some(entries);
                self.drive_submission().await
            }
            WorkflowCommand::ChooseTask(choice) => match self.resolution.choose_task(choice) {
                Ok(step) => self.after_step(step).await,
                Err(error) => self.rejected(error),
            },
            WorkflowCommand::ChooseActivity(choice) => {
                match self.resolution.choose_activity(choice) {
                    Ok(step) => self.after_step(step).await,
                    Err(error) => self.rejected(error),
                }
            }
            WorkflowCommand::CancelResolution => {
                self.resolution.cancel();
                self.pending = None;
                vec![WorkflowEvent::ResolutionCancelled]
            }
            WorkflowCommand::Login(credentials) => self.login(credentials).await,
            WorkflowCommand::Tick => self.tick().await,
            WorkflowCommand::Shutdown => Vec::new(),
        }
    }

    async fn login(&mut self, credentials: Credentials) -> Vec<WorkflowEvent> {
        match self.sessions.login(&credentials).await {
            Ok(session) => {
                self.catalog = None;
                let mut events = vec![WorkflowEvent::LoggedIn {
                    user_id: session.user_id,
                }];
                if self.pending.is_some() && !self.resolution.is_busy() {
                    events.extend(self.drive_submission().await);
                } else {
                    match self.scheduler.needs_reconcile() {
                        Ok(true) => events.extend(self.tick().await),
                        Ok(false) => {}
                        Err(error) => events.push(error_event(error)),
                    }
                }
                events
            }
            Err(error) => {
                info!(error = %error, "login failed");
                vec![WorkflowEvent::LoginFailed(error.to_string())]
            }
        }
    }

    async fn tick(&mut self) -> Vec<WorkflowEvent> {
        match self.scheduler.tick().await {
            Ok(InvalidationOutcome::ReauthenticationRequired) => {
                self.catalog = None;
                vec![WorkflowEvent::LoginRequired]
            }
            Ok(outcome) => {
                if let InvalidationOutcome::Reconciled { catalog, .. } = &outcome {
                    self.catalog = Some(catalog.clone());
                }
                vec![WorkflowEvent::Invalidation(outcome)]
            }
            Err(error) => {
                warn!(error = %error, "invalidation tick failed");
                vec![WorkflowEvent::InvalidationFailed(error.to_string())]
            }
        }
    }

    /// Reports a refused command and repeats the open prompt, if any.
    fn rejected(&self, error: InfraError) -> Vec<WorkflowEvent> {
        let mut events = vec![error_event(error)];
        events.extend(self.resolution.prompt().map(WorkflowEvent::Prompt));
        events
    }

    async fn after_step(&mut self, step: ResolutionStep) -> Vec<WorkflowEvent> {
        match step {
            ResolutionStep::Prompt(prompt) => vec![WorkflowEvent::Prompt(prompt)],
            ResolutionStep::Complete { all_resolved: true } => self.drive_submission().await,
            ResolutionStep::Complete {
                all_resolved: false,
            } => {
                self.pending = None;
                vec![WorkflowEvent::ResolutionCancelled]
            }
        }
    }

    /// Advances the pending batch as far as it can go without user input: session,
    /// then resolution, then submission.
    async fn drive_submission(&mut self) -> Vec<WorkflowEvent> {
        let Some(entries) = self.pending.clone() else {
            return Vec::new();
        };

        let session = match self.sessions.ensure_session().await {
            Ok(result) => match result.session() {
                Some(session) => session,
                None => return vec![WorkflowEvent::LoginRequired],
            },
            Err(error) => return vec![error_event(error)],
        };

        // Stale links are revalidated first so a retired task is never submitted.
        // The batch stays pending when revalidation cannot finish.
        let mut events = Vec::new();
        match self.scheduler.needs_reconcile() {
            Ok(true) => {
                events = self.tick().await;
                if events
                    .iter()
                    .any(|event| matches!(event, WorkflowEvent::LoginRequired))
                {
                    return events;
                }
                if events
                    .iter()
                    .any(|event| matches!(event, WorkflowEvent::InvalidationFailed(_)))
                {
                    events.push(WorkflowEvent::Error(
                        "batch held until project links can be revalidated".to_string(),
                    ));
                    return events;
                }
            }
            Ok(false) => {}
            Err(error) => return vec![error_event(error)],
        }
        events.extend(self.resolve_and_submit(&session, entries).await);
        events
    }

    async fn resolve_and_submit(
        &mut self,
        session: &Session,
        entries: Vec<Entry>,
    ) -> Vec<WorkflowEvent> {
        let unresolved = match self.resolution.unresolved_codes(&entries) {
            Ok(codes) => codes,
            Err(error) => return vec![error_event(error)],
        };
        if !unresolved.is_empty() {
            let catalog = match self.catalog_for(session).await {
                Ok(catalog) => catalog,
                Err(error) => return self.reroute_to_login(error),
            };
            return match self.resolution.begin(&entries, &catalog) {
                Ok(ResolutionStep::Prompt(prompt)) => vec![WorkflowEvent::Prompt(prompt)],
                Ok(ResolutionStep::Complete { .. }) => self.submit(session, entries).await,
                Err(error @ InfraError::CatalogUnavailable(_)) => self.reroute_to_login(error),
                Err(error) => vec![error_event(error)],
            };
        }

        self.submit(session, entries).await
    }

    async fn submit(&mut self, session: &Session, entries: Vec<Entry>) -> Vec<WorkflowEvent> {
        self.pending = None;
        let report = self.sync_service.submit_batch(session, &entries).await;
        info!(
            submitted = report.submitted_count(),
            declined = report.declined_count(),
            unresolved = report.unresolved_count(),
            failed = report.failed_count(),
            "batch finished"
        );

        let reauthenticate = report.requires_reauthentication();
        let mut events = vec![WorkflowEvent::BatchSubmitted(report)];
        if reauthenticate {
            if let Err(error) = self.sessions.invalidate() {
                events.push(error_event(error));
            }
            self.catalog = None;
            events.push(WorkflowEvent::LoginRequired);
        }
        events
    }

    async fn catalog_for(&mut self, session: &Session) -> Result<RemoteCatalog, InfraError> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }
        let catalog = self.sync_service.fetch_catalog(session).await?;
        self.catalog = Some(catalog.clone());
        Ok(catalog)
    }

    /// A catalog that cannot be fetched is treated like a rejected session: drop it and
    /// ask for a fresh login. The pending batch is kept for after the login.
    fn reroute_to_login(&mut self, cause: InfraError) -> Vec<WorkflowEvent> {
        error!(error = %cause, "catalog unavailable, login required");
        self.catalog = None;
        let mut events = Vec::new();
        if let Err(error) = self.sessions.invalidate() {
            events.push(error_event(error));
        }
        events.push(WorkflowEvent::Error(cause.to_string()));
        events.push(WorkflowEvent::LoginRequired);
        events
    }
}

fn error_event(error: InfraError) -> WorkflowEvent {
    error!(error = %error, "workflow command failed");
    WorkflowEvent::Error(error.to_string())
}
