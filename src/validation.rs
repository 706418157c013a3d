//! Boundary validation for everything accepted off the wire.

use crate::error::AppError;

const RESERVED_FILE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3",
];

pub fn validate_username(name: &str) -> Result<(), AppError> {
    let len = name.chars().count();
    if !(3..=20).contains(&len) {
        return Err(AppError::Validation(
            "username must be 3-20 characters".into(),
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if first.is_ascii_digit() {
        return Err(AppError::Validation(
            "username must not start with a digit".into(),
        ));
    }
    if !name.chars().all(is_username_char) {
        return Err(AppError::Validation(
            "username may only contain letters, digits, underscore, or CJK characters".into(),
        ));
    }
    Ok(())
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || is_cjk(c)
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0xAC00..=0xD7AF)
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if !(6..=50).contains(&len) {
        return Err(AppError::Validation(
            "password must be 6-50 characters".into(),
        ));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(AppError::Validation(
            "password must contain at least one letter and one digit".into(),
        ));
    }
    Ok(())
}

pub fn validate_group_name(name: &str) -> Result<(), AppError> {
    let len = name.chars().count();
    if !(2..=30).contains(&len) {
        return Err(AppError::Validation(
            "group name must be 2-30 characters".into(),
        ));
    }
    if name.trim().is_empty() {
        return Err(AppError::Validation(
            "group name must not be whitespace-only".into(),
        ));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || is_cjk(c);
    if !name.chars().all(allowed) {
        return Err(AppError::Validation("group name contains invalid characters".into()));
    }
    Ok(())
}

/// Strip control characters (except `\n`/`\t`), cap length, trim. Returns an
/// error if the result is empty.
pub fn sanitize_message_content(raw: &str) -> Result<String, AppError> {
    let stripped: String = raw
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("message content must not be empty".into()));
    }
    let capped: String = trimmed.chars().take(1000).collect();
    Ok(capped)
}

pub fn validate_file_name(name: &str, allowed_extensions: &[String]) -> Result<(), AppError> {
    if name.is_empty() || name.chars().count() > 255 {
        return Err(AppError::Validation("file name length is invalid".into()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(AppError::Validation("file name contains control characters".into()));
    }
    const FORBIDDEN: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];
    if name.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(AppError::Validation("file name contains forbidden characters".into()));
    }
    let stem = name.split('.').next().unwrap_or("").to_ascii_uppercase();
    if RESERVED_FILE_NAMES.contains(&stem.as_str()) {
        return Err(AppError::Validation("file name is a reserved system name".into()));
    }
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    if !allowed_extensions.iter().any(|e| e == &ext) {
        return Err(AppError::Validation(format!(
            "file extension '{ext}' is not allowed"
        )));
    }
    Ok(())
}

pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), AppError> {
    if size > max_size {
        return Err(AppError::FileTooLarge);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rejects_leading_digit() {
        assert!(validate_username("1abc").is_err());
    }

    #[test]
    fn username_accepts_underscore_and_cjk() {
        assert!(validate_username("alice_田中").is_ok());
    }

    #[test]
    fn password_requires_letter_and_digit() {
        assert!(validate_password("123456").is_err());
        assert!(validate_password("abcdef").is_err());
        assert!(validate_password("abc123").is_ok());
    }

    #[test]
    fn sanitize_strips_control_chars_and_trims() {
        let sanitized = sanitize_message_content("  hi\x07 there\n  ").unwrap();
        assert_eq!(sanitized, "hi there");
    }

    #[test]
    fn sanitize_rejects_empty_after_trim() {
        assert!(sanitize_message_content("   \x07  ").is_err());
    }

    #[test]
    fn file_name_rejects_forbidden_chars() {
        let allowed = vec!["txt".to_string()];
        assert!(validate_file_name("a/b.txt", &allowed).is_err());
    }

    #[test]
    fn file_name_enforces_extension_allow_list() {
        let allowed = vec!["txt".to_string()];
        assert!(validate_file_name("a.exe", &allowed).is_err());
        assert!(validate_file_name("a.txt", &allowed).is_ok());
    }
}
