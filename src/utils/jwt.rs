use chrono::Duration;
use jsonwebtoken::{encode, EncodingKey, Header};

use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::models::user::User;

pub fn sign_session_token(user: &User, secret: &str, ttl_minutes: i64) -> Result<String> {
    let exp = (chrono::Utc::now() + Duration::minutes(ttl_minutes)).timestamp();
    let claims = Claims {
        sub: user.id.to_string(),
        exp: exp.max(0) as usize,
        role: user.role.clone(),
        email: user.email.clone(),
        name: user.full_name.clone(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("failed to sign token: {}", e)))
}
