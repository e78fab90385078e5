use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

static DOCUMENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{8,12}$").unwrap());

/// Personal data collected in the first checkout step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PersonalData {
    #[validate(length(max = 120), custom = "non_blank")]
    pub first_name: String,

    #[validate(length(max = 120), custom = "non_blank")]
    pub surnames: String,

    /// National document or tax id used to identify the buyer.
    #[validate(custom = "validate_document_id")]
    pub document_id: String,

    #[validate(length(max = 254), email)]
    pub email: String,

    #[validate(custom = "validate_phone")]
    pub phone: String,
}

impl PersonalData {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.surnames.trim())
    }
}

fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

fn validate_document_id(value: &str) -> Result<(), ValidationError> {
    non_blank(value)?;
    if !DOCUMENT_ID_RE.is_match(value.trim()) {
        let mut err = ValidationError::new("document_id");
        err.message = Some("must be 8 to 12 letters or digits".into());
        return Err(err);
    }
    Ok(())
}

fn validate_phone(value: &str) -> Result<(), ValidationError> {
    non_blank(value)?;
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.'));
    let digit_count = value.chars().filter(|c| c.is_ascii_digit()).count();
    if !allowed || !(7..=16).contains(&digit_count) {
        let mut err = ValidationError::new("phone");
        err.message = Some("is not a valid phone number".into());
        return Err(err);
    }
    Ok(())
}
