use std::sync::Arc;

use chrono::Utc;
use proddash_shared::{
    AnalyticsPayload, CheckoutSessionRequest, Identity, LoginRequest, PasswordChange,
    PaymentIntentRequest, PaymentIntentResponse, PlansEnvelope, ProfileUpdate, RedirectUrl,
    RegisterRequest, Role, TaskListParams, TaskRecord, TaskWrite, TokenEnvelope,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{ApiRequest, ApiResponse, Method, Transport};
use crate::config::ClientConfig;
use crate::error::{ApiError, ErrorKind, TransportError};

const LOGIN_PATH: &str = "/api/v1/auth/login";
const REGISTER_PATH: &str = "/api/v1/auth/register";
const ME_PATH: &str = "/api/v1/auth/me";
const TASKS_PATH: &str = "/api/v1/dashboard/tasks";
const ANALYTICS_PATH: &str = "/api/v1/dashboard/analytics";
const PLANS_PATH: &str = "/api/v1/billing/plans";
const PAYMENT_INTENT_PATH: &str = "/billing/create-payment-intent";
const CHECKOUT_SESSION_PATH: &str = "/api/v1/billing/create-checkout-session";
const CUSTOMER_PORTAL_PATH: &str = "/api/v1/billing/customer-portal";
const USER_PROFILE_PATH: &str = "/api/v1/users/me";
const HEALTH_PATH: &str = "/health";

/// Where the client reads the bearer credential from, and how it tears the
/// session down when the backend rejects that credential.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn revoke(&self);
}

/// Forced navigation to the unauthenticated entry point.
pub trait AuthRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

/// Terminal stand-in for navigating to the login screen.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoginNotice;

impl AuthRedirect for LoginNotice {
    fn redirect_to_login(&self) {
        warn!("session rejected by backend; redirecting to login");
        eprintln!("session expired; run `proddash login` to sign in again");
    }
}

/// Single choke point for backend calls: rate limiting, bearer attachment,
/// retry for wrapped calls, 401 teardown, and error normalization.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    credentials: Arc<dyn CredentialSource>,
    redirect: Arc<dyn AuthRedirect>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ApiClient")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
        credentials: Arc<dyn CredentialSource>,
        redirect: Arc<dyn AuthRedirect>,
    ) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(config.rate_limit),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.retry_delay,
            },
            credentials,
            redirect,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn issue(&self, mut request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.limiter.acquire().await;
        request.bearer = self.credentials.bearer_token();

        let method = request.method;
        let path = request.path.clone();
        let payload = request.body.as_ref().map(redact).unwrap_or(Value::Null);
        debug!(
            timestamp = %Utc::now().to_rfc3339(),
            %method,
            path = %path,
            authenticated = request.bearer.is_some(),
            payload = %payload,
            "API request"
        );

        let result = self.transport.send(request).await;
        match &result {
            Ok(response) => debug!(
                timestamp = %Utc::now().to_rfc3339(),
                status = response.status,
                %method,
                path = %path,
                payload = %redact(&response.body),
                "API response"
            ),
            Err(err) => {
                let body = match err {
                    TransportError::Status {
                        body: Some(body), ..
                    } => redact(body),
                    _ => Value::Null,
                };
                warn!(
                    timestamp = %Utc::now().to_rfc3339(),
                    %method,
                    path = %path,
                    error = %err,
                    payload = %body,
                    "API error"
                );
                if err.kind() == ErrorKind::Unauthorized {
                    info!("credential rejected; tearing down session");
                    self.credentials.revoke();
                    self.redirect.redirect_to_login();
                }
            }
        }
        result
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        fallback: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .issue(request)
            .await
            .map_err(|err| ApiError::normalize(&err, fallback))?;
        decode(response.body, fallback)
    }

    async fn call_with_retry<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        fallback: &str,
    ) -> Result<T, ApiError> {
        let response = self
            .retry
            .run(|| self.issue(request.clone()))
            .await
            .map_err(|err| ApiError::normalize(&err, fallback))?;
        decode(response.body, fallback)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let body = encode(&LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        });
        let envelope: TokenEnvelope = self
            .call(ApiRequest::new(Method::Post, LOGIN_PATH).with_body(body), "Login failed")
            .await?;
        token_from_envelope(envelope, "Login failed")
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, ApiError> {
        let envelope: TokenEnvelope = self
            .call(
                ApiRequest::new(Method::Post, REGISTER_PATH).with_body(encode(request)),
                "Registration failed",
            )
            .await?;
        token_from_envelope(envelope, "Registration failed")
    }

    #[instrument(skip(self))]
    pub async fn current_identity(&self) -> Result<Identity, ApiError> {
        self.call(ApiRequest::new(Method::Get, ME_PATH), "Failed to get user profile")
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_tasks(&self, params: &TaskListParams) -> Result<Vec<TaskRecord>, ApiError> {
        let request =
            ApiRequest::new(Method::Get, TASKS_PATH).with_query(params.to_query_pairs());
        let tasks: Option<Vec<TaskRecord>> = self
            .call_with_retry(request, "Failed to fetch tasks")
            .await?;
        Ok(tasks.unwrap_or_default())
    }

    #[instrument(skip(self))]
    pub async fn create_task(&self, task: &TaskWrite) -> Result<TaskRecord, ApiError> {
        self.call(
            ApiRequest::new(Method::Post, TASKS_PATH).with_body(encode(task)),
            "Failed to create task",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_task(&self, id: &str, task: &TaskWrite) -> Result<Value, ApiError> {
        self.call(
            ApiRequest::new(Method::Put, format!("{TASKS_PATH}/{id}")).with_body(encode(task)),
            "Failed to update task",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        let _: Value = self
            .call(
                ApiRequest::new(Method::Delete, format!("{TASKS_PATH}/{id}")),
                "Failed to delete task",
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn plans(&self) -> Result<PlansEnvelope, ApiError> {
        self.call(
            ApiRequest::new(Method::Get, PLANS_PATH),
            "Failed to fetch subscription plans",
        )
        .await
    }

    #[instrument(skip(self, request), fields(amount = request.amount))]
    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntentResponse, ApiError> {
        self.call(
            ApiRequest::new(Method::Post, PAYMENT_INTENT_PATH).with_body(encode(request)),
            "Failed to create payment intent",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn create_checkout_session(&self, plan: Role) -> Result<RedirectUrl, ApiError> {
        self.call(
            ApiRequest::new(Method::Post, CHECKOUT_SESSION_PATH)
                .with_body(encode(&CheckoutSessionRequest { plan })),
            "Failed to create checkout session",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn customer_portal(&self) -> Result<RedirectUrl, ApiError> {
        self.call(
            ApiRequest::new(Method::Get, CUSTOMER_PORTAL_PATH),
            "Failed to create customer portal session",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn analytics(&self) -> Result<AnalyticsPayload, ApiError> {
        self.call(
            ApiRequest::new(Method::Get, ANALYTICS_PATH),
            "Failed to fetch analytics data",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn user_profile(&self) -> Result<Identity, ApiError> {
        self.call(
            ApiRequest::new(Method::Get, USER_PROFILE_PATH),
            "Failed to fetch user profile",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Value, ApiError> {
        self.call(
            ApiRequest::new(Method::Put, USER_PROFILE_PATH).with_body(encode(update)),
            "Failed to update user profile",
        )
        .await
    }

    #[instrument(skip(self, change))]
    pub async fn change_password(&self, change: &PasswordChange) -> Result<Value, ApiError> {
        self.call(
            ApiRequest::new(Method::Put, USER_PROFILE_PATH).with_body(encode(change)),
            "Failed to change password",
        )
        .await
    }

    /// Bypasses the rate limiter and credentials.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<Value, ApiError> {
        let fallback = "Backend is not responding";
        let response = self
            .transport
            .send(ApiRequest::new(Method::Get, HEALTH_PATH))
            .await
            .map_err(|err| ApiError::new(err.kind(), fallback))?;
        Ok(response.body)
    }
}

fn encode<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn decode<T: DeserializeOwned>(body: Value, fallback: &str) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|err| {
        warn!(error = %err, "unexpected response shape");
        ApiError::new(ErrorKind::Decode, fallback)
    })
}

fn token_from_envelope(envelope: TokenEnvelope, fallback: &str) -> Result<String, ApiError> {
    if envelope.error {
        let message = envelope
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        return Err(ApiError::new(ErrorKind::Rejected, message));
    }
    envelope
        .data
        .map(|data| data.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::Decode, fallback))
}

/// Copy of `value` with password and token fields masked, for logging.
pub(crate) fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let lowered = key.to_ascii_lowercase();
                    if lowered.contains("password") || lowered.contains("token") {
                        (key.clone(), Value::String("<redacted>".to_string()))
                    } else {
                        (key.clone(), redact(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
