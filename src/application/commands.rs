use crate::application::bootstrap::bootstrap_workspace;
use crate::application::invalidation::InvalidationScheduler;
use crate::application::session::{CredentialSource, SessionManager};
use crate::application::sync::SyncService;
use crate::application::workflow::Workflow;
use crate::domain::models::{summarize, DaySummary, Entry, EntryDraft, ProjectLink};
use crate::infrastructure::config::{
    environment_lookup, load_credentials_from_lookup, AppConfig, USER_ENV_FILE,
};
use crate::infrastructure::entry_repository::{EntryRepository, SqliteEntryRepository};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mapping_cache::{MappingCache, SqliteMappingCache};
use crate::infrastructure::remote_client::ReqwestRemoteClient;
use crate::infrastructure::session_store::InMemorySessionStore;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const DEFAULT_LIST_LIMIT: usize = 20;

pub type LiveWorkflow = Workflow<InMemorySessionStore, ReqwestRemoteClient, SqliteMappingCache>;

pub struct AppState {
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    config: AppConfig,
    entries: Arc<SqliteEntryRepository>,
    mapping_cache: Arc<SqliteMappingCache>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self {
            workspace_root,
            logs_dir: bootstrap.logs_dir,
            entries: Arc::new(SqliteEntryRepository::new(&bootstrap.database_path)),
            mapping_cache: Arc::new(SqliteMappingCache::new(&bootstrap.database_path)),
            config: bootstrap.config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Wires the live remote client, session manager, sync service and scheduler into
    /// a workflow. Environment credentials are read from the process and `user.env`.
    pub fn build_workflow(&self) -> Result<LiveWorkflow, InfraError> {
        let remote_client = Arc::new(ReqwestRemoteClient::new(self.config.remote_config()?));
        let lookup = environment_lookup(&self.workspace_root.join(USER_ENV_FILE))?;
        let credential_source: CredentialSource =
            Arc::new(move || load_credentials_from_lookup(&lookup));

        let sessions = Arc::new(
            SessionManager::new(Arc::new(InMemorySessionStore::default()), remote_client.clone())
                .with_credential_source(credential_source),
        );

        let mut sync_service = SyncService::new(remote_client, self.mapping_cache.clone());
        if let Some(zone) = self.config.timezone()? {
            sync_service = sync_service.with_timezone(zone);
        }
        let sync_service = Arc::new(sync_service);

        let scheduler = InvalidationScheduler::new(
            sessions.clone(),
            sync_service.clone(),
            self.mapping_cache.clone(),
        );
        Ok(Workflow::new(
            sessions,
            sync_service,
            scheduler,
            self.mapping_cache.clone(),
        ))
    }
}

/// Raw user input for an entry; every field is optional so the same shape serves
/// both add and modify.
#[derive(Debug, Clone, Default)]
pub struct EntryInput {
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub duration: Option<String>,
    pub project_code: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
}

pub fn add_entry_impl(state: &AppState, input: EntryInput) -> Result<Entry, InfraError> {
    let today = Local::now().date_naive();
    let mut draft = EntryDraft {
        date: Some(today),
        ..EntryDraft::default()
    };
    apply_input(&mut draft, input, today)?;

    let entry = draft.into_entry(None).map_err(InfraError::Validation)?;
    let created = state.entries.create(&entry)?;
    info!(entry_id = ?created.id, project_code = %created.project_code, "entry added");
    Ok(created)
}

pub fn list_entries_impl(
    state: &AppState,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Vec<Entry>, InfraError> {
    state
        .entries
        .list_recent(limit.unwrap_or(DEFAULT_LIST_LIMIT), offset.unwrap_or(0))
}

pub fn list_entries_between_impl(
    state: &AppState,
    from: &str,
    to: &str,
) -> Result<Vec<Entry>, InfraError> {
    let today = Local::now().date_naive();
    let start = parse_date_input(from, today)?;
    let end = parse_date_input(to, today)?;
    state.entries.list_between(start, end)
}

/// Per-day project totals for the inclusive range, newest day first.
pub fn summary_impl(state: &AppState, from: &str, to: &str) -> Result<Vec<DaySummary>, InfraError> {
    let entries = list_entries_between_impl(state, from, to)?;
    Ok(summarize(&entries))
}

pub fn get_entries_impl(state: &AppState, ids: &[i64]) -> Result<Vec<Entry>, InfraError> {
    ids.iter()
        .map(|id| {
            state
                .entries
                .get(*id)?
                .ok_or(InfraError::EntryNotFound(*id))
        })
        .collect()
}

pub fn modify_entry_impl(
    state: &AppState,
    id: i64,
    input: EntryInput,
) -> Result<Entry, InfraError> {
    let existing = state
        .entries
        .get(id)?
        .ok_or(InfraError::EntryNotFound(id))?;

    let mut draft = EntryDraft::from(&existing);
    apply_input(&mut draft, input, Local::now().date_naive())?;
    let entry = draft.into_entry(Some(id)).map_err(InfraError::Validation)?;
    state.entries.update(&entry)?;
    info!(entry_id = id, "entry modified");
    Ok(entry)
}

pub fn delete_entry_impl(state: &AppState, id: i64) -> Result<bool, InfraError> {
    let deleted = state.entries.delete(id)?;
    if deleted {
        info!(entry_id = id, "entry deleted");
    }
    Ok(deleted)
}

pub fn list_links_impl(state: &AppState) -> Result<Vec<ProjectLink>, InfraError> {
    state.mapping_cache.list_all()
}

/// Forgets a project link so the next submission prompts for it again.
pub fn unlink_impl(state: &AppState, project_code: &str) -> Result<bool, InfraError> {
    let removed = state.mapping_cache.remove(project_code)?;
    if removed {
        info!(project_code = %project_code.trim(), "project link removed");
    }
    Ok(removed)
}

fn apply_input(
    draft: &mut EntryDraft,
    input: EntryInput,
    today: NaiveDate,
) -> Result<(), InfraError> {
    if let Some(date) = input.date {
        draft.date = Some(parse_date_input(&date, today)?);
    }
    let times_given = input.start.is_some() || input.end.is_some();
    if let Some(start) = input.start {
        draft.start_time = parse_optional_time(&start, "start")?;
    }
    if let Some(end) = input.end {
        draft.end_time = parse_optional_time(&end, "end")?;
    }
    if let Some(duration) = input.duration {
        draft.duration = Some(parse_duration_input(&duration)?);
        if !times_given {
            // An explicit duration replaces a previously derived one.
            draft.start_time = None;
            draft.end_time = None;
        }
    }
    if let Some(project_code) = input.project_code {
        draft.project_code = project_code;
    }
    if let Some(description) = input.description {
        draft.description = description;
    }
    if let Some(notes) = input.notes {
        draft.notes = notes;
    }
    Ok(())
}

/// Accepts `today`, `DD/MM/YYYY` or `YYYY-MM-DD`.
pub fn parse_date_input(value: &str, today: NaiveDate) -> Result<NaiveDate, InfraError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("today") {
        return Ok(today);
    }
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| {
            InfraError::Validation(format!(
                "date '{value}' must be DD/MM/YYYY, YYYY-MM-DD or today"
            ))
        })
}

fn parse_optional_time(value: &str, field_name: &str) -> Result<Option<NaiveTime>, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(value, "%H:%M")
        .map(Some)
        .map_err(|_| InfraError::Validation(format!("{field_name} time '{value}' must be HH:MM")))
}

/// Accepts `2h`, `1h30m`, `45m` or `H:MM`.
pub fn parse_duration_input(value: &str) -> Result<Duration, InfraError> {
    let raw = value.trim().to_ascii_lowercase();
    let invalid = || {
        InfraError::Validation(format!(
            "duration '{}' must look like 2h, 1h30m, 45m or 1:30",
            value.trim()
        ))
    };

    if let Some((hours, minutes)) = raw.split_once(':') {
        let hours: i64 = hours.parse().map_err(|_| invalid())?;
        let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
        if hours < 0 || !(0..60).contains(&minutes) {
            return Err(invalid());
        }
        return Ok(Duration::hours(hours) + Duration::minutes(minutes));
    }

    let (hours, rest) = match raw.split_once('h') {
        Some((hours, rest)) => (Some(hours), rest),
        None => (None, raw.as_str()),
    };
    let minutes = match rest {
        "" => None,
        rest => Some(rest.strip_suffix('m').ok_or_else(invalid)?),
    };
    if hours.is_none() && minutes.is_none() {
        return Err(invalid());
    }

    let hours: i64 = hours.map(str::parse).transpose().map_err(|_| invalid())?.unwrap_or(0);
    let minutes: i64 = minutes
        .map(str::parse)
        .transpose()
        .map_err(|_| invalid())?
        .unwrap_or(0);
    if hours < 0 || minutes < 0 {
        return Err(invalid());
    }
    Ok(Duration::hours(hours) + Duration::minutes(minutes))
}
