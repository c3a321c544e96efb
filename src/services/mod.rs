pub mod agent_service;
pub mod analytics_service;
pub mod attempt_service;
pub mod audit_service;
pub mod auth_service;
pub mod certificate_service;
pub mod clock;
pub mod grading_service;
pub mod payment_service;
pub mod question_service;
pub mod sampling_service;
pub mod settings_service;
