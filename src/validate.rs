use std::borrow::Cow;

use validator::ValidationError;

/// Loose BCP-47 check: rejects empty strings and anything containing
/// whitespace, without trying to fully validate subtags.
pub fn language_code(code: &str) -> Result<(), ValidationError> {
    if code.is_empty() || code.len() > 35 || code.chars().any(char::is_whitespace) {
        Err(ValidationError::new("language_code").with_message(Cow::Borrowed(
            "Must be a non-empty BCP-47 language tag.",
        )))
    } else {
        Ok(())
    }
}

pub fn non_empty_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        Err(ValidationError::new("non_empty")
            .with_message(Cow::Borrowed("Must not be empty.")))
    } else {
        Ok(())
    }
}
