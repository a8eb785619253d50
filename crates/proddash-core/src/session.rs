use std::sync::Arc;

use parking_lot::RwLock;
use proddash_shared::{Identity, RegisterRequest, Role};
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::http::{ApiClient, CredentialSource};
use crate::storage::{ROLE_KEY, Storage, TOKEN_KEY, USER_KEY};

/// An authenticated identity with the credential that proves it. Holding
/// both in one value keeps "token iff identity" true by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated(Session),
    Anonymous,
}

impl SessionStatus {
    /// Neither authenticated nor anonymous yet; views must wait.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Initializing)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Shared session state: the store mutates it, the HTTP client reads the
/// bearer from it and revokes it on 401.
pub struct SessionCell {
    storage: Arc<dyn Storage>,
    status: RwLock<SessionStatus>,
    handshake_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for SessionCell {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionCell")
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl SessionCell {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            status: RwLock::new(SessionStatus::Uninitialized),
            handshake_token: RwLock::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    fn begin_handshake(&self, token: &str) {
        *self.handshake_token.write() = Some(token.to_string());
    }

    fn end_handshake(&self) {
        *self.handshake_token.write() = None;
    }

    fn persist(&self, session: &Session) {
        let user = match serde_json::to_string(&session.identity) {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "failed serializing identity for storage");
                return;
            }
        };
        for (key, value) in [
            (TOKEN_KEY, session.token.as_str()),
            (USER_KEY, user.as_str()),
            (ROLE_KEY, session.role.as_str()),
        ] {
            if let Err(err) = self.storage.set(key, value) {
                warn!(key, error = %err, "failed persisting session");
            }
        }
    }

    fn clear_persisted(&self) {
        for key in [TOKEN_KEY, USER_KEY, ROLE_KEY] {
            if let Err(err) = self.storage.remove(key) {
                warn!(key, error = %err, "failed clearing persisted session");
            }
        }
    }

    fn read_persisted(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|value| !value.is_empty()),
            Err(err) => {
                warn!(key, error = %err, "failed reading persisted session");
                None
            }
        }
    }

    fn teardown(&self) {
        self.end_handshake();
        self.clear_persisted();
        self.set_status(SessionStatus::Anonymous);
    }
}

impl CredentialSource for SessionCell {
    /// A token mid-handshake outranks the session it is about to replace.
    fn bearer_token(&self) -> Option<String> {
        if let Some(token) = self.handshake_token.read().clone() {
            return Some(token);
        }
        match &*self.status.read() {
            SessionStatus::Authenticated(session) => Some(session.token.clone()),
            _ => None,
        }
    }

    fn revoke(&self) {
        self.teardown();
    }
}

/// Holds the authenticated identity, persists it, and exposes the
/// login/register/logout/update operations.
#[derive(Debug, Clone)]
pub struct SessionStore {
    api: Arc<ApiClient>,
    cell: Arc<SessionCell>,
}

impl SessionStore {
    pub fn new(api: Arc<ApiClient>, cell: Arc<SessionCell>) -> Self {
        Self { api, cell }
    }

    pub fn status(&self) -> SessionStatus {
        self.cell.status()
    }

    pub fn current(&self) -> Option<Session> {
        self.cell.status().session().cloned()
    }

    /// Restores a persisted session and validates it against the backend.
    /// Runs once; later calls return the settled status.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> SessionStatus {
        {
            let mut status = self.cell.status.write();
            if *status != SessionStatus::Uninitialized {
                return status.clone();
            }
            *status = SessionStatus::Initializing;
        }

        let token = self.cell.read_persisted(TOKEN_KEY);
        let user = self.cell.read_persisted(USER_KEY);
        let stored_role = self
            .cell
            .read_persisted(ROLE_KEY)
            .and_then(|raw| raw.parse::<Role>().ok());

        let (Some(token), Some(user)) = (token, user) else {
            debug!("no persisted session");
            self.cell.teardown();
            return self.cell.status();
        };

        if let Err(err) = serde_json::from_str::<Identity>(&user) {
            warn!(error = %err, "persisted identity is unreadable; discarding session");
            self.cell.teardown();
            return self.cell.status();
        }

        self.cell.begin_handshake(&token);
        match self.api.current_identity().await {
            Ok(identity) => {
                let role = stored_role.unwrap_or_else(|| identity.effective_role());
                let session = Session {
                    identity,
                    token,
                    role,
                };
                self.cell.persist(&session);
                self.cell.end_handshake();
                info!(role = %session.role, "restored session");
                self.cell.set_status(SessionStatus::Authenticated(session));
            }
            Err(err) => {
                info!(error = %err, "persisted session rejected");
                self.cell.teardown();
            }
        }
        self.cell.status()
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let token = self.api.login(email, password).await?;
        self.establish(token).await
    }

    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Session, ApiError> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        let token = self.api.register(&request).await?;
        self.establish(token).await
    }

    async fn establish(&self, token: String) -> Result<Session, ApiError> {
        self.cell.begin_handshake(&token);
        if let Err(err) = self.cell.storage.set(TOKEN_KEY, &token) {
            warn!(error = %err, "failed persisting token");
        }

        let identity = match self.api.current_identity().await {
            Ok(identity) => identity,
            Err(err) => {
                self.cell.teardown();
                return Err(err);
            }
        };

        let session = Session {
            role: identity.effective_role(),
            identity,
            token,
        };
        self.cell.persist(&session);
        self.cell.end_handshake();
        self.cell
            .set_status(SessionStatus::Authenticated(session.clone()));
        info!(user = %session.identity.email, role = %session.role, "signed in");
        Ok(session)
    }

    #[instrument(skip(self))]
    pub fn logout(&self) {
        self.cell.teardown();
        info!("logged out");
    }

    /// Optimistic local role change; billing confirmation happens elsewhere.
    #[instrument(skip(self))]
    pub fn update_subscription(&self, role: Role) -> Option<Session> {
        let mut status = self.cell.status.write();
        let SessionStatus::Authenticated(session) = &mut *status else {
            warn!("subscription update without a session");
            return None;
        };
        session.role = role;
        session.identity.role = Some(role);
        let updated = session.clone();
        drop(status);

        self.cell.persist(&updated);
        info!(%role, "subscription updated");
        Some(updated)
    }

    /// Re-fetches the identity; on failure nothing is mutated.
    #[instrument(skip(self))]
    pub async fn refresh_user_profile(&self) -> Result<Identity, ApiError> {
        let identity = self.api.current_identity().await?;

        let updated = {
            let mut status = self.cell.status.write();
            match &mut *status {
                SessionStatus::Authenticated(session) => {
                    session.identity = identity.clone();
                    Some(session.clone())
                }
                _ => None,
            }
        };
        if let Some(session) = updated {
            self.cell.persist(&session);
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_support::{StubTransport, session_with, status_error};

    fn persisted(storage: &MemoryStorage) -> (Option<String>, Option<String>, Option<String>) {
        (
            storage.get(TOKEN_KEY).expect("get"),
            storage.get(USER_KEY).expect("get"),
            storage.get(ROLE_KEY).expect("get"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn restore_with_rejected_token_ends_anonymous() {
        let transport = StubTransport::new();
        transport.push_err(status_error(401, json!({ "detail": "expired" })));
        let storage = Arc::new(MemoryStorage::with_entries([
            (TOKEN_KEY, "stale"),
            (USER_KEY, r#"{"id":"1","name":"Ada","email":"ada@example.com"}"#),
            (ROLE_KEY, "pro"),
        ]));
        let (store, redirect) = session_with(&transport, storage.clone());

        let status = store.initialize().await;

        assert_eq!(status, SessionStatus::Anonymous);
        assert_eq!(persisted(&storage), (None, None, None));
        assert_eq!(transport.requests()[0].bearer.as_deref(), Some("stale"));
        assert_eq!(redirect.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_with_valid_token_authenticates() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "id": 1, "name": "Ada", "email": "ada@example.com", "role": "free" }));
        let storage = Arc::new(MemoryStorage::with_entries([
            (TOKEN_KEY, "good"),
            (USER_KEY, r#"{"id":"1","name":"Ada","email":"ada@example.com"}"#),
            (ROLE_KEY, "pro"),
        ]));
        let (store, _) = session_with(&transport, storage);

        let status = store.initialize().await;

        let session = status.session().expect("authenticated");
        assert_eq!(session.token, "good");
        assert_eq!(session.role, Role::Pro);
        assert_eq!(session.identity.name, "Ada");
        assert_eq!(store.initialize().await, status);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_without_persisted_state_skips_network() {
        let transport = StubTransport::new();
        let storage = Arc::new(MemoryStorage::with_entries([(TOKEN_KEY, "orphan")]));
        let (store, _) = session_with(&transport, storage.clone());

        assert_eq!(store.status(), SessionStatus::Uninitialized);
        assert!(store.status().is_indeterminate());
        assert_eq!(store.initialize().await, SessionStatus::Anonymous);
        assert_eq!(transport.request_count(), 0);
        assert!(storage.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn login_issues_token_then_fetches_identity() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "fresh" } }));
        transport.push_ok(json!({ "id": 7, "name": "Grace", "email": "grace@example.com", "role": "enterprise" }));
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = session_with(&transport, storage.clone());
        store.initialize().await;

        let session = store.login("grace@example.com", "pw").await.expect("login");

        assert_eq!(session.role, Role::Enterprise);
        let requests = transport.requests();
        assert_eq!(requests[0].bearer, None);
        assert_eq!(requests[1].path, "/api/v1/auth/me");
        assert_eq!(requests[1].bearer.as_deref(), Some("fresh"));
        let (token, user, role) = persisted(&storage);
        assert_eq!(token.as_deref(), Some("fresh"));
        assert!(user.expect("user").contains("grace@example.com"));
        assert_eq!(role.as_deref(), Some("enterprise"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_login_fetches_identity_with_new_token() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "tok-a" } }));
        transport.push_ok(json!({ "id": 1, "name": "Ada", "email": "ada@example.com", "role": "pro" }));
        transport.push_ok(json!({ "data": { "access_token": "tok-b" } }));
        transport.push_ok(json!({ "id": 2, "name": "Bob", "email": "bob@example.com", "role": "free" }));
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = session_with(&transport, storage.clone());
        store.initialize().await;

        store.login("ada@example.com", "pw").await.expect("first login");
        let session = store.login("bob@example.com", "pw").await.expect("second login");

        let requests = transport.requests();
        assert_eq!(requests[3].path, "/api/v1/auth/me");
        assert_eq!(requests[3].bearer.as_deref(), Some("tok-b"));
        assert_eq!(session.token, "tok-b");
        assert_eq!(session.identity.email, "bob@example.com");
        assert_eq!(session.role, Role::Free);
        assert_eq!(store.current(), Some(session));
        let (token, user, role) = persisted(&storage);
        assert_eq!(token.as_deref(), Some("tok-b"));
        assert!(user.expect("user").contains("bob@example.com"));
        assert_eq!(role.as_deref(), Some("free"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_identity_fetch_leaves_no_token_behind() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "fresh" } }));
        transport.push_err(status_error(500, json!({})));
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = session_with(&transport, storage.clone());
        store.initialize().await;

        let err = store.login("a@b.c", "pw").await.expect_err("me fails");

        assert_eq!(err.to_string(), "Failed to get user profile");
        assert_eq!(store.status(), SessionStatus::Anonymous);
        assert!(storage.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn login_failure_carries_backend_detail() {
        let transport = StubTransport::new();
        transport.push_err(status_error(400, json!({ "detail": "Invalid credentials" })));
        let (store, _) = session_with(&transport, Arc::new(MemoryStorage::new()));

        let err = store.login("a@b.c", "nope").await.expect_err("rejected");
        assert_eq!(err.to_string(), "Invalid credentials");
    }

    #[tokio::test(start_paused = true)]
    async fn register_sends_split_name_fields() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "t" } }));
        transport.push_ok(json!({ "id": "9", "name": "Ada Lovelace", "email": "ada@example.com" }));
        let (store, _) = session_with(&transport, Arc::new(MemoryStorage::new()));

        let session = store
            .register("ada@example.com", "longpassword", "Ada", "Lovelace")
            .await
            .expect("register");

        assert_eq!(session.role, Role::Free);
        let body = transport.requests()[0].body.clone().expect("body");
        assert_eq!(body["first_name"], "Ada");
        assert_eq!(body["last_name"], "Lovelace");
    }

    #[tokio::test(start_paused = true)]
    async fn logout_and_subscription_updates_touch_storage() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "t" } }));
        transport.push_ok(json!({ "id": "1", "email": "a@b.c" }));
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = session_with(&transport, storage.clone());
        store.login("a@b.c", "pw").await.expect("login");

        let updated = store.update_subscription(Role::Pro).expect("session");
        assert_eq!(updated.role, Role::Pro);
        assert_eq!(updated.identity.role, Some(Role::Pro));
        assert_eq!(storage.get(ROLE_KEY).expect("get").as_deref(), Some("pro"));
        assert_eq!(transport.request_count(), 2);

        store.logout();
        assert_eq!(store.status(), SessionStatus::Anonymous);
        assert!(storage.is_empty());
        assert!(store.update_subscription(Role::Enterprise).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_keeps_cached_identity() {
        let transport = StubTransport::new();
        transport.push_ok(json!({ "data": { "access_token": "t" } }));
        transport.push_ok(json!({ "id": "1", "name": "Old", "email": "a@b.c" }));
        transport.push_err(status_error(503, json!({})));
        transport.push_ok(json!({ "id": "1", "name": "New", "email": "a@b.c" }));
        let storage = Arc::new(MemoryStorage::new());
        let (store, _) = session_with(&transport, storage.clone());
        store.login("a@b.c", "pw").await.expect("login");

        assert!(store.refresh_user_profile().await.is_err());
        assert_eq!(store.current().expect("session").identity.name, "Old");

        let fresh = store.refresh_user_profile().await.expect("refresh");
        assert_eq!(fresh.name, "New");
        assert_eq!(store.current().expect("session").identity.name, "New");
        assert!(storage.get(USER_KEY).expect("get").expect("user").contains("New"));
    }
}
