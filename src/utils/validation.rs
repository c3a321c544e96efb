use validator::ValidationError;

/// At least eight characters with a lower-case letter, an upper-case
/// letter and a digit.
pub fn validate_password(value: &str) -> Result<(), ValidationError> {
    let long_enough = value.chars().count() >= 8;
    let has_lower = value.chars().any(|c| c.is_lowercase());
    let has_upper = value.chars().any(|c| c.is_uppercase());
    let has_digit = value.chars().any(|c| c.is_ascii_digit());
    if long_enough && has_lower && has_upper && has_digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("weak_password");
        err.message = Some("Password must be at least 8 characters and contain upper-case, lower-case and a digit".into());
        Err(err)
    }
}

pub fn validate_currency(value: &str) -> Result<(), ValidationError> {
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_currency"))
    }
}

pub fn validate_agent_status(value: &str) -> Result<(), ValidationError> {
    match value {
        crate::models::agent::AGENT_ACTIVE | crate::models::agent::AGENT_INACTIVE => Ok(()),
        _ => Err(ValidationError::new("invalid_status")),
    }
}

pub fn is_valid_email(value: &str) -> bool {
    use validator::ValidateEmail;
    value.validate_email()
}

/// "jOHN   o'neil smith" -> "John O'neil Smith".
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy() {
        assert!(validate_password("Passw0rd").is_ok());
        assert!(validate_password("password1").is_err());
        assert!(validate_password("PASSWORD1").is_err());
        assert!(validate_password("Password").is_err());
        assert!(validate_password("Pw0rd").is_err());
    }

    #[test]
    fn currency_codes() {
        assert!(validate_currency("EUR").is_ok());
        assert!(validate_currency("eu").is_err());
        assert!(validate_currency("US1").is_err());
    }

    #[test]
    fn title_cases_names() {
        assert_eq!(title_case("  maria   DE la cruz "), "Maria De La Cruz");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn emails() {
        assert!(is_valid_email("a@example.com"));
        assert!(!is_valid_email("not-an-email"));
    }
}
