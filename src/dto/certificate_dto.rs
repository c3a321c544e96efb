use serde::Serialize;
use uuid::Uuid;

use crate::models::level::Level;
use crate::services::grading_service::LadderStep;

pub const DEFAULT_REGION: &str = "European Union";

/// Everything the PDF renderer needs to lay out one certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateDocument {
    pub holder_name: String,
    pub level: Level,
    pub label: &'static str,
    pub descriptor: &'static str,
    pub ladder: Vec<LadderStep>,
    pub certificate_id: String,
    pub attempt_id: Uuid,
    /// `DD/MM/YYYY`
    pub issue_date: String,
    pub region: String,
    pub verify_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyCertificateResponse {
    pub valid: bool,
    pub holder_name: String,
    pub level: Level,
    pub label: &'static str,
    pub attempt_id: Uuid,
    pub certificate_id: String,
    pub issue_date: String,
    pub region: String,
}
