use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Loose syntactic check: `local@domain.tld`, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Trims `value` and rejects it when empty.
pub fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Trims optional text, mapping blank to `None`.
pub fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("teacher@school.test"));
        assert!(is_valid_email("a.b+c@mail.school.in"));
        assert!(!is_valid_email("teacher"));
        assert!(!is_valid_email("@school.test"));
        assert!(!is_valid_email("teacher@school"));
        assert!(!is_valid_email("teacher@@school.test"));
        assert!(!is_valid_email("tea cher@school.test"));
        assert!(!is_valid_email("teacher@.test"));
    }

    #[test]
    fn required_and_optional_text() {
        assert_eq!(required("Name", "  Asha ").unwrap(), "Asha");
        assert!(required("Name", "   ").is_err());
        assert_eq!(optional(Some("  ")), None);
        assert_eq!(optional(Some(" 10A ")), Some("10A".to_string()));
        assert_eq!(optional(None), None);
    }

    #[test]
    fn password_length() {
        assert!(check_password("12345").is_err());
        assert!(check_password("123456").is_ok());
    }
}
