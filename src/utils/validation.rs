use validator::Validate;

use crate::errors::AppError;

pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), AppError> {
    payload.validate().map_err(AppError::from)
}

pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn require(value: &str, field: &str) -> Result<String, AppError> {
    non_blank(Some(value)).ok_or_else(|| AppError::BadRequest(format!("{} is required", field)))
}
