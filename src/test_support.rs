use crate::domain::models::{
    Credentials, Entry, RemoteActivity, RemoteCatalog, RemoteTask, Session,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_client::{RemoteClient, TimeEntryReceipt, TimeEntryRequest};
use crate::infrastructure::remote_status::RemoteStatus;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Status(RemoteStatus),
    Network,
}

impl FakeFailure {
    fn to_error(self) -> InfraError {
        match self {
            Self::Status(status) => match status.into_result() {
                Err(error) => error,
                Ok(()) => InfraError::Protocol("fake configured with a success status".to_string()),
            },
            Self::Network => InfraError::Network("connection reset by fake".to_string()),
        }
    }
}

pub fn session(token: &str) -> Session {
    Session {
        token: token.to_string(),
        user_id: 42,
        master_account_id: "acme".to_string(),
    }
}

pub fn task(id: i64, name: &str) -> RemoteTask {
    RemoteTask {
        id,
        name: name.to_string(),
        project: "Atlas".to_string(),
    }
}

pub fn activity(id: i64, name: &str) -> RemoteActivity {
    RemoteActivity {
        id,
        name: name.to_string(),
        parent: "Admin".to_string(),
        active: true,
    }
}

pub fn catalog(task_ids: &[i64], activity_ids: &[i64]) -> RemoteCatalog {
    RemoteCatalog {
        tasks: task_ids
            .iter()
            .map(|id| task(*id, &format!("Task {id}")))
            .collect(),
        activities: activity_ids
            .iter()
            .map(|id| activity(*id, &format!("Activity {id}")))
            .collect(),
    }
}

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
}

pub fn entry(id: i64, day: &str, project_code: &str) -> Entry {
    Entry {
        id: Some(id),
        date: date(day),
        start_time: None,
        end_time: None,
        duration: Duration::hours(2),
        project_code: project_code.to_string(),
        description: format!("work on {project_code}"),
        notes: String::new(),
    }
}

/// Scriptable remote. Unscripted calls succeed with a fixed session and the configured catalog.
#[derive(Debug)]
pub struct FakeRemoteClient {
    auth_responses: Mutex<VecDeque<Result<Session, FakeFailure>>>,
    tasks: Mutex<Result<Vec<RemoteTask>, FakeFailure>>,
    activities: Mutex<Result<Vec<RemoteActivity>, FakeFailure>>,
    submit_failures: Mutex<HashMap<i64, FakeFailure>>,
    submitted: Mutex<Vec<TimeEntryRequest>>,
    auth_gate: Mutex<Option<Arc<Notify>>>,
    pub auth_entered: Notify,
    pub auth_calls: AtomicUsize,
    pub catalog_calls: AtomicUsize,
}

impl Default for FakeRemoteClient {
    fn default() -> Self {
        Self {
            auth_responses: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Ok(Vec::new())),
            activities: Mutex::new(Ok(Vec::new())),
            submit_failures: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            auth_gate: Mutex::new(None),
            auth_entered: Notify::new(),
            auth_calls: AtomicUsize::new(0),
            catalog_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeRemoteClient {
    pub fn with_catalog(catalog: RemoteCatalog) -> Self {
        let fake = Self::default();
        fake.set_catalog(catalog);
        fake
    }

    pub fn set_catalog(&self, catalog: RemoteCatalog) {
        *self.tasks.lock().expect("tasks lock") = Ok(catalog.tasks);
        *self.activities.lock().expect("activities lock") = Ok(catalog.activities);
    }

    pub fn fail_tasks(&self, failure: FakeFailure) {
        *self.tasks.lock().expect("tasks lock") = Err(failure);
    }

    pub fn push_auth(&self, response: Result<Session, FakeFailure>) {
        self.auth_responses
            .lock()
            .expect("auth lock")
            .push_back(response);
    }

    pub fn fail_submission_for(&self, event_id: i64, failure: FakeFailure) {
        self.submit_failures
            .lock()
            .expect("submit lock")
            .insert(event_id, failure);
    }

    /// Makes `authenticate` wait until the returned handle is notified.
    pub fn gate_auth(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.auth_gate.lock().expect("gate lock") = Some(gate.clone());
        gate
    }

    pub fn submitted(&self) -> Vec<TimeEntryRequest> {
        self.submitted.lock().expect("submitted lock").clone()
    }

    fn submission_result(&self, request: &TimeEntryRequest) -> Result<(), InfraError> {
        match self
            .submit_failures
            .lock()
            .expect("submit lock")
            .get(&request.event_id)
        {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemoteClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, InfraError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.auth_entered.notify_one();
        let gate = self.auth_gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        credentials.validate().map_err(InfraError::Validation)?;

        let response = self
            .auth_responses
            .lock()
            .expect("auth lock")
            .pop_front()
            .unwrap_or_else(|| Ok(session("token-default")));
        response.map_err(FakeFailure::to_error)
    }

    async fn list_tasks(&self, _session: &Session) -> Result<Vec<RemoteTask>, InfraError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        self.tasks
            .lock()
            .expect("tasks lock")
            .clone()
            .map_err(FakeFailure::to_error)
    }

    async fn list_activities(&self, _session: &Session) -> Result<Vec<RemoteActivity>, InfraError> {
        self.activities
            .lock()
            .expect("activities lock")
            .clone()
            .map_err(FakeFailure::to_error)
    }

    async fn create_time_entry(
        &self,
        _session: &Session,
        request: &TimeEntryRequest,
    ) -> Result<TimeEntryReceipt, InfraError> {
        self.submission_result(request)?;
        let mut submitted = self.submitted.lock().expect("submitted lock");
        submitted.push(request.clone());
        Ok(TimeEntryReceipt {
            time_entry_id: Some(900 + submitted.len() as i64),
        })
    }
}
