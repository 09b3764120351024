//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_ID_LENGTH: usize = 64;

/// Validates identifiers that end up in storage keys: 1-64 characters of `[A-Za-z0-9_-]`.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("living-room_2") // Ok
/// validate_identifier("a/b")           // Err - separator
/// validate_identifier("")              // Err - empty
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(
            format!(
                "Identifier must be 1 to {MAX_ID_LENGTH} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("identifier_format");
        err.message =
            Some("Identifier must contain only ASCII letters, digits, '-' or '_'".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects strings made only of whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("r1").is_ok());
        assert!(validate_identifier("living-room_2").is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid_length() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_identifier_invalid_format() {
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("room 1").is_err());
        assert!(validate_identifier("room.1").is_err());
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("Ada").is_ok());
        assert!(validate_not_blank("   ").is_err());
    }
}
