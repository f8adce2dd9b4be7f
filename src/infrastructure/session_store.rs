use crate::domain::models::Session;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Holder for the authenticated remote session. Sessions live for the process only.
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<(), InfraError>;
    fn load_session(&self) -> Result<Option<Session>, InfraError>;
    fn clear_session(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl InMemorySessionStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>, InfraError> {
        self.session
            .lock()
            .map_err(|error| InfraError::LockPoisoned(format!("session store: {error}")))
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&self, session: &Session) -> Result<(), InfraError> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn load_session(&self) -> Result<Option<Session>, InfraError> {
        Ok(self.lock()?.clone())
    }

    fn clear_session(&self) -> Result<(), InfraError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_and_clear() {
        let store = InMemorySessionStore::default();
        assert!(store.load_session().expect("load").is_none());

        let session = Session {
            token: "token-1".to_string(),
            user_id: 7,
            master_account_id: "acme".to_string(),
        };
        store.save_session(&session).expect("save");
        assert_eq!(store.load_session().expect("load"), Some(session));

        store.clear_session().expect("clear");
        assert!(store.load_session().expect("load").is_none());
    }
}
