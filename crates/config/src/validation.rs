use crate::{ConfigError, ConfigResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a count is within `1..=max`
    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that `min <= max` for a pair of range bounds
    pub fn validate_range(min: u64, max: u64, field_name: &str) -> ConfigResult<()> {
        if min > max {
            return Err(ConfigError::Validation(format!(
                "{field_name}: min ({min}) must not exceed max ({max})"
            )));
        }
        Ok(())
    }

    /// Validate that a URL carries one of the given schemes
    pub fn validate_url(url: &str, field_name: &str, schemes: &[&str]) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !schemes
            .iter()
            .any(|scheme| url.starts_with(&format!("{scheme}://")))
        {
            return Err(ConfigError::Validation(format!(
                "{field_name} must use one of the schemes {schemes:?}"
            )));
        }
        Ok(())
    }
}
