pub mod agent;
pub mod attempt;
pub mod level;
pub mod option_set;
pub mod question;
pub mod settings;
pub mod user;
