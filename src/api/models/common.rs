use crate::core::error::{ApiError, Result};
use crate::core::pagination::PageQuery;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex");
    static ref USERNAME_RE: Regex =
        Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").expect("valid username regex");
}

/// Request bodies check themselves before touching the database
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`)
///
/// Use together with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// `?page=&page_size=` plus an optional free-text `search`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> PageQuery {
        let defaults = PageQuery::default();
        PageQuery::new(
            self.page.unwrap_or(defaults.page),
            self.page_size.unwrap_or(defaults.page_size),
        )
    }
}

pub fn require_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::ValidationError(format!("{} is required", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(ApiError::ValidationError(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<()> {
    if EMAIL_RE.is_match(value.trim()) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!("Invalid email address: {}", value)))
    }
}

pub fn validate_username(value: &str) -> Result<()> {
    if USERNAME_RE.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(
            "Username must be 3-32 characters of letters, digits, '.', '_' or '-'".to_string(),
        ))
    }
}

/// ISBN-10 or ISBN-13, hyphens and spaces allowed
/// ISBN without separators, check digit `X` upper-cased
pub fn compact_isbn(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Stored form of an optional ISBN; blank becomes NULL
pub fn normalize_isbn(value: Option<String>) -> Option<String> {
    normalize_optional(value).map(|isbn| compact_isbn(&isbn))
}

pub fn validate_isbn(value: &str) -> Result<()> {
    let compact = compact_isbn(value);
    let valid = match compact.len() {
        10 => {
            let (body, check) = compact.split_at(9);
            body.chars().all(|c| c.is_ascii_digit())
                && check.chars().all(|c| c.is_ascii_digit() || c == 'X')
        }
        13 => compact.chars().all(|c| c.is_ascii_digit()),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!("Invalid ISBN: {}", value)))
    }
}

/// Empty strings in optional text fields are stored as NULL
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        field: Option<Option<String>>,
    }

    #[test]
    fn test_double_option() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.field, None);

        let null: Patch = serde_json::from_str(r#"{"field":null}"#).unwrap();
        assert_eq!(null.field, Some(None));

        let set: Patch = serde_json::from_str(r#"{"field":"x"}"#).unwrap();
        assert_eq!(set.field, Some(Some("x".to_string())));
    }

    #[test]
    fn test_isbn_validation() {
        assert!(validate_isbn("978-0-306-40615-7").is_ok());
        assert!(validate_isbn("0-306-40615-X").is_ok());
        assert!(validate_isbn("12345").is_err());
        assert!(validate_isbn("978-0-306-4061A-7").is_err());
    }

    #[test]
    fn test_isbn_is_stored_compact() {
        assert_eq!(
            normalize_isbn(Some(" 978-0-306-40615-7 ".to_string())).as_deref(),
            Some("9780306406157")
        );
        assert_eq!(normalize_isbn(Some("0 306 40615 x".to_string())).as_deref(), Some("030640615X"));
        assert_eq!(normalize_isbn(Some("  ".to_string())), None);
    }

    #[test]
    fn test_email_and_username() {
        assert!(validate_email("reader@example.com").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_username("jane.doe").is_ok());
        assert!(validate_username("x").is_err());
        assert!(validate_username("has space").is_err());
    }

    #[test]
    fn test_list_query_defaults() {
        let page = ListQuery::default().page();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, crate::core::pagination::DEFAULT_PAGE_SIZE);

        let clamped = ListQuery {
            page: Some(0),
            page_size: Some(10_000),
            search: None,
        }
        .page();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.page_size, crate::core::pagination::MAX_PAGE_SIZE);
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("title", "  ", 10).is_err());
        assert!(require_text("title", "abcdefghijk", 10).is_err());
        assert!(require_text("title", "Dune", 10).is_ok());
    }
}
