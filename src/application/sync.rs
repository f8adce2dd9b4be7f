use crate::domain::models::{
    completed_timestamp, format_duration, Entry, LinkTarget, RemoteCatalog, Session,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mapping_cache::MappingCache;
use crate::infrastructure::remote_client::{RemoteClient, TimeEntryReceipt, TimeEntryRequest};
use chrono::{FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

pub type TodayProvider = Arc<dyn Fn() -> NaiveDate + Send + Sync>;
pub type OffsetProvider = Arc<dyn Fn(NaiveDate) -> FixedOffset + Send + Sync>;

#[derive(Debug)]
pub enum SubmissionStatus {
    Submitted(TimeEntryReceipt),
    /// The project code is linked to the decline sentinel; nothing was sent.
    Declined,
    /// No usable task link; the entry must pass through resolution first.
    Unresolved,
    Failed(InfraError),
}

#[derive(Debug)]
pub struct EntryOutcome {
    pub entry_id: Option<i64>,
    pub project_code: String,
    pub status: SubmissionStatus,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<EntryOutcome>,
}

impl BatchReport {
    pub fn submitted_count(&self) -> usize {
        self.count(|status| matches!(status, SubmissionStatus::Submitted(_)))
    }

    pub fn declined_count(&self) -> usize {
        self.count(|status| matches!(status, SubmissionStatus::Declined))
    }

    pub fn unresolved_count(&self) -> usize {
        self.count(|status| matches!(status, SubmissionStatus::Unresolved))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|status| matches!(status, SubmissionStatus::Failed(_)))
    }

    /// Failures worth sending again later without user action.
    pub fn retryable_count(&self) -> usize {
        self.count(
            |status| matches!(status, SubmissionStatus::Failed(error) if error.is_transient()),
        )
    }

    pub fn requires_reauthentication(&self) -> bool {
        self.outcomes.iter().any(|outcome| match &outcome.status {
            SubmissionStatus::Failed(error) => error.requires_reauthentication(),
            _ => false,
        })
    }

    fn count(&self, predicate: impl Fn(&SubmissionStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

fn submission_wall_clock() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn local_offset(date: NaiveDate) -> FixedOffset {
    Local
        .offset_from_local_datetime(&date.and_time(submission_wall_clock()))
        .earliest()
        .unwrap_or_else(|| Utc.fix())
}

fn zone_offset(zone: Tz, date: NaiveDate) -> FixedOffset {
    let naive = date.and_time(submission_wall_clock());
    zone.offset_from_local_datetime(&naive)
        .earliest()
        .map(|offset| offset.fix())
        .unwrap_or_else(|| zone.offset_from_utc_datetime(&naive).fix())
}

pub struct SyncService<C, M>
where
    C: RemoteClient,
    M: MappingCache,
{
    remote_client: Arc<C>,
    mapping_cache: Arc<M>,
    today_provider: TodayProvider,
    offset_provider: OffsetProvider,
}

impl<C, M> SyncService<C, M>
where
    C: RemoteClient,
    M: MappingCache,
{
    pub fn new(remote_client: Arc<C>, mapping_cache: Arc<M>) -> Self {
        Self {
            remote_client,
            mapping_cache,
            today_provider: Arc::new(|| Local::now().date_naive()),
            offset_provider: Arc::new(local_offset),
        }
    }

    pub fn with_today_provider(mut self, today_provider: TodayProvider) -> Self {
        self.today_provider = today_provider;
        self
    }

    pub fn with_offset_provider(mut self, offset_provider: OffsetProvider) -> Self {
        self.offset_provider = offset_provider;
        self
    }

    pub fn with_timezone(self, zone: Tz) -> Self {
        self.with_offset_provider(Arc::new(move |date| zone_offset(zone, date)))
    }

    /// Tasks and activities for `session`. Auth rejections pass through unchanged so the
    /// caller can prompt for a login; any other failure, or an empty task list, is a
    /// catalog failure.
    pub async fn fetch_catalog(&self, session: &Session) -> Result<RemoteCatalog, InfraError> {
        let tasks = self
            .remote_client
            .list_tasks(session)
            .await
            .map_err(Self::catalog_error)?;
        let activities = self
            .remote_client
            .list_activities(session)
            .await
            .map_err(Self::catalog_error)?;

        let catalog = RemoteCatalog { tasks, activities };
        if catalog.is_empty() {
            return Err(InfraError::CatalogUnavailable(
                "remote task list is empty".to_string(),
            ));
        }
        info!(
            tasks = catalog.tasks.len(),
            activities = catalog.activities.len(),
            "fetched remote catalog"
        );
        Ok(catalog)
    }

    fn catalog_error(error: InfraError) -> InfraError {
        if error.requires_reauthentication() {
            error
        } else {
            InfraError::CatalogUnavailable(error.to_string())
        }
    }

    pub fn build_request(&self, entry: &Entry, task_id: i64, activity_id: i64) -> TimeEntryRequest {
        let today = (self.today_provider)();
        let timestamp = completed_timestamp(entry.date, (self.offset_provider)(entry.date));
        TimeEntryRequest {
            event_id: task_id,
            activity_id,
            description: entry.description.clone(),
            time_entry_date: entry.date.format("%Y-%m-%d").to_string(),
            completed_datetime: timestamp.clone(),
            submitted_date: timestamp.clone(),
            start_datetime: timestamp,
            duration: format_duration(entry.duration),
            is_completed: entry.date <= today,
            title: entry.description.clone(),
        }
    }

    /// Looks up the entry's link and submits it when a concrete task is mapped.
    pub async fn submit_entry(&self, session: &Session, entry: &Entry) -> SubmissionStatus {
        let link = match self.mapping_cache.get(&entry.project_code) {
            Ok(link) => link,
            Err(error) => return SubmissionStatus::Failed(error),
        };
        let Some(link) = link else {
            return SubmissionStatus::Unresolved;
        };
        let task_id = match link.task {
            None => return SubmissionStatus::Unresolved,
            Some(LinkTarget::Declined) => return SubmissionStatus::Declined,
            Some(LinkTarget::Remote(task_id)) => task_id,
        };

        let request = self.build_request(entry, task_id, link.activity_for_submission());
        match self.remote_client.create_time_entry(session, &request).await {
            Ok(receipt) => SubmissionStatus::Submitted(receipt),
            Err(error) => SubmissionStatus::Failed(error),
        }
    }

    /// Sends entries one at a time, in order. A failed entry never stops the rest.
    pub async fn submit_batch(&self, session: &Session, entries: &[Entry]) -> BatchReport {
        let mut report = BatchReport::default();
        for entry in entries {
            let status = self.submit_entry(session, entry).await;
            match &status {
                SubmissionStatus::Submitted(receipt) => info!(
                    entry_id = ?entry.id,
                    project_code = %entry.project_code,
                    time_entry_id = ?receipt.time_entry_id,
                    "entry submitted"
                ),
                SubmissionStatus::Declined => info!(
                    entry_id = ?entry.id,
                    project_code = %entry.project_code,
                    "entry skipped, project declined"
                ),
                SubmissionStatus::Unresolved => warn!(
                    entry_id = ?entry.id,
                    project_code = %entry.project_code,
                    "entry skipped, project not linked"
                ),
                SubmissionStatus::Failed(error) => warn!(
                    entry_id = ?entry.id,
                    project_code = %entry.project_code,
                    transient = error.is_transient(),
                    error = %error,
                    "entry submission failed"
                ),
            }
            report.outcomes.push(EntryOutcome {
                entry_id: entry.id,
                project_code: entry.project_code.clone(),
                status,
            });
        }
        report
    }
}
