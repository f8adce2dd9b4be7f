use crate::domain::models::{Credentials, Session};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_client::RemoteClient;
use crate::infrastructure::session_store::SessionStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureSessionResult {
    Existing(Session),
    LoggedIn(Session),
    ReauthenticationRequired,
}

impl EnsureSessionResult {
    pub fn session(self) -> Option<Session> {
        match self {
            Self::Existing(session) | Self::LoggedIn(session) => Some(session),
            Self::ReauthenticationRequired => None,
        }
    }
}

pub type CredentialSource = Arc<dyn Fn() -> Option<Credentials> + Send + Sync>;

/// Clears the in-flight flag when a login attempt ends, whichever way it ends.
struct LoginGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoginGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, InfraError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| InfraError::ReauthenticationInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SessionManager<S, C>
where
    S: SessionStore,
    C: RemoteClient,
{
    session_store: Arc<S>,
    remote_client: Arc<C>,
    credential_source: CredentialSource,
    environment_rejected: AtomicBool,
    login_in_flight: AtomicBool,
}

impl<S, C> SessionManager<S, C>
where
    S: SessionStore,
    C: RemoteClient,
{
    pub fn new(session_store: Arc<S>, remote_client: Arc<C>) -> Self {
        Self {
            session_store,
            remote_client,
            credential_source: Arc::new(|| None),
            environment_rejected: AtomicBool::new(false),
            login_in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_credential_source(mut self, credential_source: CredentialSource) -> Self {
        self.credential_source = credential_source;
        self
    }

    pub fn current(&self) -> Result<Option<Session>, InfraError> {
        self.session_store.load_session()
    }

    /// One authentication attempt. A rejection is returned as-is; nothing here retries.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, InfraError> {
        let _guard = LoginGuard::acquire(&self.login_in_flight)?;
        credentials.validate().map_err(InfraError::Validation)?;

        let session = self.remote_client.authenticate(credentials).await?;
        self.session_store.save_session(&session)?;
        info!(user_id = session.user_id, "remote session established");
        Ok(session)
    }

    pub async fn ensure_session(&self) -> Result<EnsureSessionResult, InfraError> {
        if let Some(session) = self.session_store.load_session()? {
            return Ok(EnsureSessionResult::Existing(session));
        }
        if self.environment_rejected.load(Ordering::Acquire) {
            return Ok(EnsureSessionResult::ReauthenticationRequired);
        }
        let Some(credentials) = (self.credential_source)() else {
            return Ok(EnsureSessionResult::ReauthenticationRequired);
        };

        match self.login(&credentials).await {
            Ok(session) => Ok(EnsureSessionResult::LoggedIn(session)),
            Err(error) if error.requires_reauthentication() => {
                warn!(
                    error = %error,
                    "environment credentials rejected, interactive login required"
                );
                self.environment_rejected.store(true, Ordering::Release);
                Ok(EnsureSessionResult::ReauthenticationRequired)
            }
            Err(error) => Err(error),
        }
    }

    /// Drops the held session, typically after the remote answered NoAuth or Forbidden.
    pub fn invalidate(&self) -> Result<(), InfraError> {
        self.session_store.clear_session()
    }
}
