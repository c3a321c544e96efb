use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::user::User;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Text fields of the multipart registration form.
#[derive(Debug, Clone, Default, Validate)]
pub struct RegisterForm {
    #[validate(length(min = 2, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "crate::utils::validation::validate_password"))]
    pub password: String,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
    #[validate(length(max = 100))]
    pub country: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    pub consent: bool,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub country: Option<String>,
    pub kyc_status: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            full_name: u.full_name,
            email: u.email,
            role: u.role,
            country: u.country,
            kyc_status: u.kyc_status,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub user: UserSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> RegisterForm {
        RegisterForm {
            full_name: "Ana Lopez".into(),
            email: "ana@example.com".into(),
            password: "Str0ngPass".into(),
            consent: true,
            ..Default::default()
        }
    }

    #[test]
    fn valid_form_passes() {
        assert!(form().validate().is_ok());
    }

    #[test]
    fn weak_password_fails() {
        let mut f = form();
        f.password = "weakpass".into();
        assert!(f.validate().is_err());
    }

    #[test]
    fn short_name_and_bad_email_fail() {
        let mut f = form();
        f.full_name = "A".into();
        f.email = "nope".into();
        let errors = f.validate().unwrap_err();
        let fields: Vec<String> = errors.errors().keys().map(|k| k.to_string()).collect();
        assert!(fields.contains(&"full_name".to_string()));
        assert!(fields.contains(&"email".to_string()));
    }
}
