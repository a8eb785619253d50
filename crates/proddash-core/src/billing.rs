use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use proddash_shared::{PaymentIntentRequest, Role};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::{ApiError, ErrorKind};
use crate::http::ApiClient;
use crate::session::{Session, SessionStore};

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub id: Role,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub features: Vec<String>,
}

impl Plan {
    /// Charge for the plan in cents.
    pub fn amount_cents(&self) -> u64 {
        (self.price * 100.0).round() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanCatalogue {
    pub plans: Vec<Plan>,
    /// Set when the backend listing failed and the built-in plans are shown.
    pub fallback: bool,
}

/// Reduces a currency-formatted price (`"$9"`, `"1,299.50"`, `9`) to a
/// non-negative number. Anything unreadable counts as 0.
pub fn normalize_price(raw: &Value) -> f64 {
    let price = match raw {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => {
            let cleaned: String = text
                .chars()
                .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
                .collect();
            leading_number(&cleaned).unwrap_or(0.0)
        }
        _ => 0.0,
    };
    if price.is_finite() && price > 0.0 {
        price
    } else {
        0.0
    }
}

static LEADING_NUMBER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)").ok());

fn leading_number(text: &str) -> Option<f64> {
    let number_re = LEADING_NUMBER_RE.as_ref()?;
    number_re.find(text)?.as_str().parse().ok()
}

fn plan_from_value(raw: &Value) -> Option<Plan> {
    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let id = match text("id").parse::<Role>() {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "skipping plan with unknown id");
            return None;
        }
    };
    let features = raw
        .get("features")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Plan {
        id,
        name: text("name"),
        description: text("description"),
        price: raw.get("price").map(normalize_price).unwrap_or(0.0),
        features,
    })
}

pub fn fallback_plans() -> Vec<Plan> {
    let plan = |id, name: &str, description: &str, price, features: &[&str]| Plan {
        id,
        name: name.to_string(),
        description: description.to_string(),
        price,
        features: features.iter().map(|f| f.to_string()).collect(),
    };
    vec![
        plan(
            Role::Free,
            "Free",
            "Perfect for getting started",
            0.0,
            &["50 tasks/month", "Basic analytics", "Community support"],
        ),
        plan(
            Role::Pro,
            "Pro",
            "For power users",
            9.0,
            &[
                "Unlimited tasks",
                "Advanced analytics",
                "Priority support",
                "Custom reports",
            ],
        ),
        plan(
            Role::Enterprise,
            "Enterprise",
            "For teams",
            29.0,
            &[
                "Everything in Pro",
                "Team collaboration",
                "API access",
                "Dedicated support",
            ],
        ),
    ]
}

/// Plan listing plus the redirect-based subscription flows.
#[derive(Debug, Clone)]
pub struct Billing {
    api: Arc<ApiClient>,
}

impl Billing {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    #[instrument(skip(self))]
    pub async fn load_plans(&self) -> PlanCatalogue {
        match self.api.plans().await {
            Ok(envelope) => PlanCatalogue {
                plans: envelope.plans.iter().filter_map(plan_from_value).collect(),
                fallback: false,
            },
            Err(err) => {
                warn!(error = %err, "failed to load subscription plans; using built-in catalogue");
                PlanCatalogue {
                    plans: fallback_plans(),
                    fallback: true,
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn checkout_url(&self, plan: Role) -> Result<String, ApiError> {
        let redirect = self.api.create_checkout_session(plan).await?;
        redirect
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ApiError::new(ErrorKind::Decode, "No checkout URL received"))
    }

    #[instrument(skip(self))]
    pub async fn portal_url(&self) -> Result<String, ApiError> {
        let redirect = self.api.customer_portal().await?;
        redirect.url.filter(|url| !url.is_empty()).ok_or_else(|| {
            ApiError::new(ErrorKind::Decode, "Failed to create customer portal session")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct GatewayError(pub String);

/// Card SDK collaborator: tokenizes a card and runs secondary (3-D Secure)
/// confirmation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_method(&self) -> Result<String, GatewayError>;
    async fn confirm_card_payment(&self, client_secret: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded,
    RequiresAction,
    RequiresPaymentMethod,
    Failed,
    Canceled,
    Other(String),
}

impl PaymentStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "succeeded" => Self::Succeeded,
            "requires_action" => Self::RequiresAction,
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("User email not found. Please log in again.")]
    MissingEmail,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Payment method was declined. Please try a different card.")]
    Declined,
    #[error("Payment failed. Please try again.")]
    Failed,
    #[error("Payment was canceled.")]
    Canceled,
    #[error("Payment {0}. Please try again or contact support.")]
    Unknown(String),
    #[error("Payment authentication failed")]
    AuthenticationFailed,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Card checkout for a single plan.
pub struct Checkout {
    api: Arc<ApiClient>,
    session: SessionStore,
    gateway: Arc<dyn PaymentGateway>,
}

impl Checkout {
    pub fn new(api: Arc<ApiClient>, session: SessionStore, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            api,
            session,
            gateway,
        }
    }

    #[instrument(skip(self, plan), fields(plan = %plan.id, amount = plan.amount_cents()))]
    pub async fn pay(&self, plan: &Plan) -> Result<Session, PaymentError> {
        let email = self
            .session
            .current()
            .map(|session| session.identity.email)
            .filter(|email| !email.is_empty())
            .ok_or(PaymentError::MissingEmail)?;

        let payment_method_id = self.gateway.create_payment_method().await?;
        let intent = self
            .api
            .create_payment_intent(&PaymentIntentRequest {
                amount: plan.amount_cents(),
                payment_method_id,
                email,
            })
            .await?;

        match PaymentStatus::from_wire(&intent.status) {
            PaymentStatus::Succeeded => self.activate(plan.id).await,
            PaymentStatus::RequiresAction => {
                let secret = intent
                    .client_secret
                    .filter(|secret| !secret.is_empty())
                    .ok_or(PaymentError::AuthenticationFailed)?;
                debug!("payment requires secondary confirmation");
                self.gateway
                    .confirm_card_payment(&secret)
                    .await
                    .map_err(|err| {
                        warn!(error = %err, "card confirmation failed");
                        PaymentError::AuthenticationFailed
                    })?;
                self.activate(plan.id).await
            }
            PaymentStatus::RequiresPaymentMethod => Err(PaymentError::Declined),
            PaymentStatus::Failed => Err(PaymentError::Failed),
            PaymentStatus::Canceled => Err(PaymentError::Canceled),
            PaymentStatus::Other(status) => Err(PaymentError::Unknown(status)),
        }
    }

    async fn activate(&self, role: Role) -> Result<Session, PaymentError> {
        let session = self
            .session
            .update_subscription(role)
            .ok_or(PaymentError::MissingEmail)?;
        info!(%role, "payment successful; subscription activated");

        if let Err(err) = self.session.refresh_user_profile().await {
            warn!(error = %err, "failed to refresh user after payment");
        }
        Ok(self.session.current().unwrap_or(session))
    }
}
