pub mod agent_dto;
pub mod analytics_dto;
pub mod attempt_dto;
pub mod auth_dto;
pub mod certificate_dto;
pub mod checkout_dto;
pub mod pagination;
pub mod question_dto;
pub mod settings_dto;
