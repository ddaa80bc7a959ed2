//! Helper validators for common patterns. Each returns the [`ErrorEntry`] to collect on failure.

use std::fmt;
use validator::{ValidateEmail, ValidateUrl};

use crate::errors::ErrorEntry;

/// Longest accepted email address.
const MAX_EMAIL_LENGTH: usize = 255;

/// Validate string length (in characters) is within range
pub fn validate_length(
    field: &str,
    value: &str,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), ErrorEntry> {
    let len = value.chars().count();

    if let Some(min_len) = min
        && len < min_len
    {
        return Err(ErrorEntry::for_field(
            field,
            "stringMin",
            format!("The '{field}' field length must be greater than or equal to {min_len} characters long."),
        ));
    }

    if let Some(max_len) = max
        && len > max_len
    {
        return Err(ErrorEntry::for_field(
            field,
            "stringMax",
            format!("The '{field}' field length must be less than or equal to {max_len} characters long."),
        ));
    }

    Ok(())
}

/// Validate number is within range
pub fn validate_range<T: PartialOrd + fmt::Display>(
    field: &str,
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), ErrorEntry> {
    if let Some(min_val) = min
        && value < min_val
    {
        return Err(ErrorEntry::for_field(
            field,
            "numberMin",
            format!("The '{field}' field must be greater than or equal to {min_val}."),
        ));
    }

    if let Some(max_val) = max
        && value > max_val
    {
        return Err(ErrorEntry::for_field(
            field,
            "numberMax",
            format!("The '{field}' field must be less than or equal to {max_val}."),
        ));
    }

    Ok(())
}

pub fn validate_email(field: &str, value: &str) -> Result<(), ErrorEntry> {
    if value.len() > MAX_EMAIL_LENGTH || !value.validate_email() {
        return Err(ErrorEntry::for_field(
            field,
            "email",
            format!("The '{field}' field must be a valid e-mail."),
        ));
    }
    Ok(())
}

pub fn validate_url(field: &str, value: &str) -> Result<(), ErrorEntry> {
    if !value.validate_url() {
        return Err(ErrorEntry::for_field(
            field,
            "url",
            format!("The '{field}' field must be a valid URL."),
        ));
    }
    Ok(())
}

/// Entry for a missing or null required value.
#[must_use]
pub fn required(field: &str) -> ErrorEntry {
    ErrorEntry::for_field(field, "required", format!("The '{field}' field is required."))
}

/// Entry for a value of the wrong JSON type.
#[must_use]
pub fn wrong_type(field: &str, kind: &str, expected: &str) -> ErrorEntry {
    ErrorEntry::for_field(field, kind, format!("The '{field}' field must be {expected}."))
}
