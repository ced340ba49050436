use crate::error::{Error, Result};
use crate::types::KEY_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

const MAX_PERMISSION_LEN: usize = 128;

/// Atomic capability identifier, e.g. `VIEW_PROJECTS`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    /// Parses and validates a permission using the default validator.
    ///
    /// Surrounding whitespace is trimmed. Case is preserved, so `VIEW` and
    /// `view` are distinct capabilities.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        Self::new_with(value, &DefaultPermissionValidator)
    }

    /// Parses and validates a permission with a custom validator.
    ///
    /// The separator check runs regardless of the validator because
    /// permissions are embedded in composite cache keys.
    pub fn new_with(value: impl AsRef<str>, validator: &dyn PermissionValidator) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPermission(
                "permission must not be empty".to_string(),
            ));
        }
        if trimmed.contains(KEY_SEPARATOR) {
            return Err(Error::InvalidPermission(format!(
                "permission must not contain '{KEY_SEPARATOR}'"
            )));
        }
        validator.validate(trimmed)?;
        Ok(Self(trimmed.to_string()))
    }

    /// Creates a permission from a trusted string without validation.
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Permission {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Permission {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

/// Permission validator interface for custom naming rules.
pub trait PermissionValidator: Send + Sync {
    /// Validates a trimmed permission string.
    fn validate(&self, value: &str) -> Result<()>;
}

/// Default validator: ASCII letters, digits, `_`, `-` and `.`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPermissionValidator;

impl PermissionValidator for DefaultPermissionValidator {
    fn validate(&self, value: &str) -> Result<()> {
        if value.len() > MAX_PERMISSION_LEN {
            return Err(Error::InvalidPermission(format!(
                "permission length must be <= {MAX_PERMISSION_LEN}"
            )));
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        {
            return Err(Error::InvalidPermission(
                "permission contains invalid characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseOnly;

    impl PermissionValidator for UppercaseOnly {
        fn validate(&self, value: &str) -> Result<()> {
            if value.chars().all(|ch| ch.is_ascii_uppercase() || ch == '_') {
                Ok(())
            } else {
                Err(Error::InvalidPermission("must be upper case".to_string()))
            }
        }
    }

    #[test]
    fn try_from_should_trim_and_keep_case() {
        let permission = Permission::try_from(" VIEW_Projects ").unwrap();
        assert_eq!(permission.as_str(), "VIEW_Projects");
    }

    #[test]
    fn try_from_should_reject_separator() {
        let result = Permission::try_from("invoice:read");
        assert!(matches!(result, Err(Error::InvalidPermission(_))));
    }

    #[test]
    fn try_from_should_reject_whitespace_inside() {
        assert!(Permission::try_from("VIEW ALL").is_err());
    }

    #[test]
    fn custom_validator_should_still_reject_separator() {
        assert!(Permission::new_with("EDIT", &UppercaseOnly).is_ok());
        assert!(Permission::new_with("edit", &UppercaseOnly).is_err());
        assert!(Permission::new_with("A:B", &UppercaseOnly).is_err());
    }
}
