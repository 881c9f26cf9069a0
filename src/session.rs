//! Authenticated session lifecycle.
//!
//! The store is the sole owner of the credential: login/register set it
//! atomically (user and token together), logout tears it down without any
//! network dependency, and restore re-validates the persisted token against
//! the service before trusting it.

use crate::api::{ApiError, OptimizeApi};
use crate::history::HistoryStore;
use crate::model::{AuthError, Session};
use crate::storage::{CredentialStore, StoredCredential};
use std::sync::Arc;

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

pub struct SessionStore {
    api: Arc<dyn OptimizeApi>,
    creds: CredentialStore,
    session: Option<Session>,
}

impl SessionStore {
    pub fn new(api: Arc<dyn OptimizeApi>, creds: CredentialStore) -> Self {
        Self {
            api,
            creds,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    fn auth_error(e: ApiError) -> AuthError {
        match e {
            ApiError::Rejected(detail) => AuthError(detail),
            other => {
                tracing::warn!(error = %other, "auth request did not reach the service");
                AuthError("could not reach the service".into())
            }
        }
    }

    /// Log in. On failure the current session, if any, is left untouched.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<(), AuthError> {
        let resp = self
            .api
            .login(email, password)
            .await
            .map_err(Self::auth_error)?;
        let session = Session {
            user: resp.user,
            token: resp.access_token,
            issued_at: now_rfc3339(),
        };
        self.persist(&session);
        self.session = Some(session);
        Ok(())
    }

    /// Register a new account. The register endpoint returns no token, so a
    /// login is chained immediately; the caller ends authenticated or with
    /// an error to show on the auth screen.
    pub async fn register(&mut self, email: &str, password: &str) -> Result<(), AuthError> {
        self.api
            .register(email, password)
            .await
            .map_err(Self::auth_error)?;
        self.login(email, password).await
    }

    /// Tear the session down: in-memory state, persisted credential, and the
    /// history store all clear before this returns. No network call is made,
    /// so logging out works offline.
    pub fn logout(&mut self, history: &mut HistoryStore) {
        self.session = None;
        self.creds.clear();
        history.clear();
    }

    /// Run once at startup. Resolves to authenticated or unauthenticated
    /// within one round trip; never surfaces an error to the user.
    pub async fn restore(&mut self) -> bool {
        let Some(stored) = self.creds.load() else {
            return false;
        };
        match self.api.me(&stored.token).await {
            Ok(user) => {
                self.session = Some(Session {
                    user,
                    token: stored.token,
                    issued_at: stored.issued_at,
                });
                true
            }
            Err(ApiError::Rejected(detail)) => {
                // The service no longer accepts this token: same clearing
                // behavior as logout, silently.
                tracing::debug!(detail, "persisted credential rejected; clearing");
                self.creds.clear();
                false
            }
            Err(e) => {
                // Transient failure: start unauthenticated but keep the
                // credential on disk for the next launch.
                tracing::warn!(error = %e, "session restore could not reach the service");
                false
            }
        }
    }

    fn persist(&self, session: &Session) {
        let stored = StoredCredential {
            token: session.token.clone(),
            user: session.user.clone(),
            issued_at: session.issued_at.clone(),
        };
        if let Err(e) = self.creds.save(&stored) {
            tracing::warn!(error = %e, "could not persist credential; session is memory-only");
        }
    }
}
