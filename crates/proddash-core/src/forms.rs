use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use proddash_shared::{Identity, PasswordChange, ProfileUpdate, RegisterRequest};
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::ApiError;
use crate::http::ApiClient;
use crate::session::SessionStore;

pub const MIN_PASSWORD_CHARS: usize = 8;

/// Field name to message. An empty map means the form may be submitted.
pub type FieldErrors = BTreeMap<&'static str, &'static str>;

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").ok());

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

/// Splits at the first run of whitespace; the remainder is the last name.
pub fn split_full_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn describe(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("{}", describe(.0))]
    Invalid(FieldErrors),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.insert("name", "Name is required");
        }
        if !is_valid_email(&self.email) {
            errors.insert("email", "Invalid email address");
        }
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            errors.insert("password", "Password must be at least 8 characters");
        }
        if self.password != self.confirm_password {
            errors.insert("confirm_password", "Passwords don't match");
        }
        errors
    }

    pub fn to_request(&self) -> RegisterRequest {
        let (first_name, last_name) = split_full_name(&self.name);
        RegisterRequest {
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            first_name,
            last_name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if !is_valid_email(&self.email) {
            errors.insert("email", "Invalid email address");
        }
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            errors.insert("password", "Password must be at least 8 characters");
        }
        errors
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub name: String,
    pub email: String,
}

impl ProfileForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.name.trim().is_empty() {
            errors.insert("name", "Name is required");
        }
        if self.email.trim().is_empty() {
            errors.insert("email", "Email is required");
        } else if !is_valid_email(&self.email) {
            errors.insert("email", "Email is invalid");
        }
        errors
    }
}

#[derive(Debug, Clone, Default)]
pub struct PasswordForm {
    pub current: String,
    pub new: String,
    pub confirm: String,
}

impl PasswordForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.current.is_empty() {
            errors.insert("current_password", "Current password is required");
        }
        if self.new.is_empty() {
            errors.insert("new_password", "New password is required");
        } else if self.new.chars().count() < MIN_PASSWORD_CHARS {
            errors.insert("new_password", "Password must be at least 8 characters");
        }
        if self.confirm.is_empty() {
            errors.insert("confirm_password", "Please confirm your password");
        } else if self.new != self.confirm {
            errors.insert("confirm_password", "Passwords do not match");
        }
        errors
    }
}

fn ensure_valid(errors: FieldErrors) -> Result<(), FormError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(FormError::Invalid(errors))
    }
}

/// Account settings: profile and password updates.
#[derive(Debug, Clone)]
pub struct Settings {
    api: Arc<ApiClient>,
    session: SessionStore,
}

impl Settings {
    pub fn new(api: Arc<ApiClient>, session: SessionStore) -> Self {
        Self { api, session }
    }

    /// Saves the profile, then refreshes the cached identity.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn save_profile(&self, form: &ProfileForm) -> Result<Option<Identity>, FormError> {
        ensure_valid(form.validate())?;
        self.api
            .update_profile(&ProfileUpdate {
                name: form.name.trim().to_string(),
                email: form.email.trim().to_string(),
            })
            .await?;
        info!("profile updated");

        match self.session.refresh_user_profile().await {
            Ok(identity) => Ok(Some(identity)),
            Err(err) => {
                warn!(error = %err, "profile saved but refresh failed");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, form))]
    pub async fn change_password(&self, form: &PasswordForm) -> Result<(), FormError> {
        ensure_valid(form.validate())?;
        self.api
            .change_password(&PasswordChange {
                current_password: form.current.clone(),
                new_password: form.new.clone(),
            })
            .await?;
        info!("password changed");
        Ok(())
    }
}
