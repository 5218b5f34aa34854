//! Users

use chrono::DateTime;
use chrono::Utc;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// A registered user
#[derive(Clone, Debug)]
pub struct User {
    /// User ID, the owner ID of their capsules
    pub id: Uuid,

    /// Session ID, rotated to invalidate all issued tokens
    pub session_id: Uuid,

    /// Normalized email address
    pub email: String,

    /// Argon2 hash of the password
    pub hashed_password: String,

    /// Creation date
    pub created_at: DateTime<Utc>,

    /// Last updated at
    pub updated_at: DateTime<Utc>,
}

/// Normalize an email address for storage and lookup
///
/// Trimmed, NFC normalized and lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().nfc().collect::<String>().to_lowercase()
}

/// Rough shape check of a (normalized) email address
///
/// Delivery is the real check, this only keeps obvious typos out
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!("someone@example.com", normalize_email("  SomeOne@Example.com "));
        // decomposed "é" becomes the composed form
        assert_eq!("\u{e9}@example.com", normalize_email("e\u{301}@example.com"));
    }

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("someone@example.com"));
        assert!(is_valid_email("some.one+tag@mail.example.com"));

        assert!(!is_valid_email(""));
        assert!(!is_valid_email("someone"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("someone@example"));
        assert!(!is_valid_email("someone@.com"));
        assert!(!is_valid_email("some one@example.com"));
        assert!(!is_valid_email("someone@example@com.com"));
    }
}
