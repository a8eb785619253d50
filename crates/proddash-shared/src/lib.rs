use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{
  Deserialize,
  Serialize
};

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[default]
  Free,
  Pro,
  Enterprise
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      | Role::Free => "free",
      | Role::Pro => "pro",
      | Role::Enterprise => "enterprise"
    }
  }
}

impl fmt::Display for Role {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Role {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "free" => Ok(Role::Free),
      | "pro" => Ok(Role::Pro),
      | "enterprise" => {
        Ok(Role::Enterprise)
      }
      | other => Err(format!(
        "unknown plan: {other}"
      ))
    }
  }
}

/// Record identifiers arrive as either
/// JSON strings or integers; both are
/// kept as strings client-side.
pub mod id_serde {
  use serde::{
    Deserialize,
    Deserializer
  };

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Text(String),
    Int(i64),
    Uint(u64)
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<String, D::Error>
  where
    D: Deserializer<'de>
  {
    Ok(
      match RawId::deserialize(
        deserializer
      )? {
        | RawId::Text(text) => text,
        | RawId::Int(value) => {
          value.to_string()
        }
        | RawId::Uint(value) => {
          value.to_string()
        }
      }
    )
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
pub struct Identity {
  #[serde(deserialize_with = "id_serde::deserialize")]
  pub id:    String,
  #[serde(default)]
  pub name:  String,
  #[serde(default)]
  pub email: String,
  #[serde(
    default,
    deserialize_with = "lenient_role"
  )]
  pub role:  Option<Role>,
  #[serde(flatten)]
  pub extra:
    BTreeMap<String, serde_json::Value>
}

fn lenient_role<'de, D>(
  deserializer: D
) -> Result<Option<Role>, D::Error>
where
  D: serde::Deserializer<'de>
{
  let raw =
    Option::<String>::deserialize(
      deserializer
    )?;
  Ok(raw.and_then(|value| {
    value.parse::<Role>().ok()
  }))
}

impl Identity {
  pub fn effective_role(&self) -> Role {
    self.role.unwrap_or_default()
  }
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct LoginRequest {
  pub email:    String,
  pub password: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct RegisterRequest {
  pub email:      String,
  pub password:   String,
  pub first_name: String,
  pub last_name:  String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct AccessTokenData {
  pub access_token: String
}

/// Login and register wrap the issued
/// credential; a 2xx body may still
/// carry `error: true`.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct TokenEnvelope {
  #[serde(default)]
  pub error:   bool,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub data:    Option<AccessTokenData>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskRecord {
  #[serde(deserialize_with = "id_serde::deserialize")]
  pub id:          String,
  pub title:       String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub completed:   bool
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TaskWrite {
  pub title:       String,
  pub description: String,
  pub completed:   bool
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
  Eq,
)]
pub struct TaskListParams {
  pub completed: Option<bool>,
  pub search:    Option<String>
}

impl TaskListParams {
  pub fn to_query_pairs(
    &self
  ) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(completed) =
      self.completed
    {
      pairs.push((
        "completed".to_string(),
        completed.to_string()
      ));
    }
    if let Some(search) =
      self.search.as_ref()
      && !search.trim().is_empty()
    {
      pairs.push((
        "search".to_string(),
        search.trim().to_string()
      ));
    }
    pairs
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct PlansEnvelope {
  #[serde(default)]
  pub plans: Vec<serde_json::Value>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct PaymentIntentRequest {
  pub amount:            u64,
  pub payment_method_id: String,
  pub email:             String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct PaymentIntentResponse {
  pub status:        String,
  #[serde(default)]
  pub client_secret: Option<String>
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct CheckoutSessionRequest {
  pub plan: Role
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct RedirectUrl {
  #[serde(default)]
  pub url: Option<String>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct DayBucket {
  pub day:       String,
  #[serde(default)]
  pub completed: u64,
  #[serde(default)]
  pub pending:   u64
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
#[serde(untagged)]
pub enum AnalyticsPayload {
  Buckets {
    data: Vec<DayBucket>
  },
  Totals {
    completed: u64,
    pending:   u64
  }
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct ProfileUpdate {
  pub name:  String,
  pub email: String
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct PasswordChange {
  pub current_password: String,
  pub new_password:     String
}

/// Error bodies; `detail` may be a
/// string or a structured validation
/// list.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct ErrorBody {
  #[serde(default)]
  pub detail:  Option<serde_json::Value>,
  #[serde(default)]
  pub message: Option<String>
}

impl ErrorBody {
  pub fn detail_text(
    &self
  ) -> Option<&str> {
    self
      .detail
      .as_ref()
      .and_then(|value| value.as_str())
      .map(str::trim)
      .filter(|text| !text.is_empty())
  }
}
