pub mod crypto;
pub mod jwt;
pub mod stripe_signature;
pub mod time;
pub mod token;
pub mod uploads;
pub mod validation;
