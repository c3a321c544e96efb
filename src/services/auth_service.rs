use bytes::Bytes;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::config::get_config;
use crate::dto::auth_dto::{AuthResponse, LoginRequest, RegisterForm, UserSummary};
use crate::error::{Error, Result};
use crate::models::agent::Agent;
use crate::models::user::{User, ROLE_ADMIN, ROLE_CANDIDATE};
use crate::utils::crypto::{hash_password, verify_password};
use crate::utils::jwt::sign_session_token;
use crate::utils::token::is_agent_code;
use crate::utils::uploads::save_kyc_file;

#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
}

impl AuthService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_user(&self, id: Uuid) -> Result<User> {
        sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".into()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE email = $1"#)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Creates a candidate with KYC documents and signs them in. A valid
    /// referral code links the candidate to that agent.
    pub async fn register(&self, mut form: RegisterForm, selfie: Bytes, id_doc: Bytes) -> Result<AuthResponse> {
        form.email = form.email.trim().to_lowercase();
        form.full_name = form.full_name.trim().to_string();
        form.validate()?;
        if !form.consent {
            return Err(Error::Invalid("Consent is required".into()));
        }

        if self.find_by_email(&form.email).await?.is_some() {
            return Err(Error::Conflict("Email already registered".into()));
        }

        let referral_agent = match form
            .referral_code
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
        {
            Some(code) => Some(self.active_agent_by_code(&code).await?.ok_or_else(|| {
                Error::Invalid("Referral code is not valid".into())
            })?),
            None => None,
        };

        let config = get_config();
        let selfie_path = save_kyc_file(&config.uploads_dir, "selfies", "selfie", &selfie).await?;
        let id_doc_path = save_kyc_file(&config.uploads_dir, "id-docs", "id_doc", &id_doc).await?;
        let password_hash = hash_password(&form.password)?;

        let mut tx = self.pool.begin().await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (full_name, email, password_hash, role, phone, country, city)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&form.full_name)
        .bind(&form.email)
        .bind(&password_hash)
        .bind(ROLE_CANDIDATE)
        .bind(form.phone.as_deref().map(str::trim))
        .bind(form.country.as_deref().map(str::trim))
        .bind(form.city.as_deref().map(str::trim))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::Conflict("Email already registered".into()))?;

        sqlx::query(
            r#"INSERT INTO identity_verifications (user_id, selfie_path, id_doc_path, consent) VALUES ($1, $2, $3, TRUE)"#,
        )
        .bind(user.id)
        .bind(&selfie_path)
        .bind(&id_doc_path)
        .execute(&mut *tx)
        .await?;

        if let Some(agent) = &referral_agent {
            sqlx::query(
                r#"INSERT INTO candidate_agent_links (candidate_id, agent_id) VALUES ($1, $2) ON CONFLICT (candidate_id) DO NOTHING"#,
            )
            .bind(user.id)
            .bind(agent.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %user.id,
            referred_by = ?referral_agent.as_ref().map(|a| a.id),
            "candidate registered"
        );
        self.session_for(user)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse> {
        req.validate()?;
        let email = req.email.trim().to_lowercase();
        let Some(user) = self.find_by_email(&email).await? else {
            return Err(Error::Unauthorized("Invalid email or password".into()));
        };
        if !verify_password(&req.password, &user.password_hash) {
            tracing::warn!(user_id = %user.id, "failed login attempt");
            return Err(Error::Unauthorized("Invalid email or password".into()));
        }
        self.session_for(user)
    }

    /// Creates the administrator account when it does not exist yet.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<()> {
        let email = email.trim().to_lowercase();
        if self.find_by_email(&email).await?.is_some() {
            return Ok(());
        }
        let password_hash = hash_password(password)?;
        sqlx::query(
            r#"
            INSERT INTO users (full_name, email, password_hash, role, kyc_status)
            VALUES ('Administrator', $1, $2, $3, 'APPROVED')
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(&email)
        .bind(&password_hash)
        .bind(ROLE_ADMIN)
        .execute(&self.pool)
        .await?;
        tracing::info!(%email, "administrator account created");
        Ok(())
    }

    pub async fn active_agent_by_code(&self, code: &str) -> Result<Option<Agent>> {
        if !is_agent_code(code) {
            return Ok(None);
        }
        let agent = sqlx::query_as::<_, Agent>(
            r#"SELECT * FROM agents WHERE code = $1 AND status = 'ACTIVE'"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    fn session_for(&self, user: User) -> Result<AuthResponse> {
        let config = get_config();
        let token = sign_session_token(&user, &config.jwt_secret, config.jwt_expiration_minutes)?;
        Ok(AuthResponse {
            token,
            token_type: "Bearer".to_string(),
            user: UserSummary::from(user),
        })
    }
}
