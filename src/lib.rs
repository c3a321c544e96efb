pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::services::{
    agent_service::AgentService, analytics_service::AnalyticsService,
    attempt_service::AttemptService, auth_service::AuthService,
    certificate_service::CertificateService, clock::{Clock, SystemClock},
    payment_service::PaymentService, question_service::QuestionService,
    settings_service::SettingsService,
};
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub clock: Arc<dyn Clock>,
    pub auth_service: AuthService,
    pub question_service: QuestionService,
    pub settings_service: SettingsService,
    pub attempt_service: AttemptService,
    pub payment_service: PaymentService,
    pub agent_service: AgentService,
    pub certificate_service: CertificateService,
    pub analytics_service: AnalyticsService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        let agent_service = AgentService::new(pool.clone());

        Self {
            auth_service: AuthService::new(pool.clone()),
            question_service: QuestionService::new(pool.clone()),
            settings_service: SettingsService::new(pool.clone()),
            attempt_service: AttemptService::new(pool.clone(), clock.clone()),
            payment_service: PaymentService::new(pool.clone(), agent_service.clone(), clock.clone()),
            certificate_service: CertificateService::new(pool.clone()),
            analytics_service: AnalyticsService::new(pool.clone(), clock.clone()),
            agent_service,
            clock,
            pool,
        }
    }
}
