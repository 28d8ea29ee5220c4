//! Identity field validation.
//!
//! These checks gate the connect intents: a queue connection needs a valid
//! username, and jumping straight into a room needs a valid room ID and an
//! optional player token.

use thiserror::Error;

/// Maximum username length, in characters.
pub const MAX_USERNAME_LEN: usize = 20;

/// Exact length of a server-issued player token.
pub const PLAYER_TOKEN_LEN: usize = 32;

/// Why an identity field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The username is empty.
    #[error("username must not be empty")]
    EmptyUsername,

    /// The username is longer than [`MAX_USERNAME_LEN`] characters.
    #[error("username must be at most {MAX_USERNAME_LEN} characters, got {0}")]
    UsernameTooLong(usize),

    /// The room ID is not a non-negative integer.
    #[error("room id must be a non-negative integer, got {0:?}")]
    InvalidRoomId(String),

    /// The player token is neither empty nor exactly 32 letters.
    #[error("player token must be empty or exactly {PLAYER_TOKEN_LEN} letters")]
    InvalidPlayerToken,
}

/// Check that `username` is between 1 and [`MAX_USERNAME_LEN`] characters.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if len == 0 {
        return Err(ValidationError::EmptyUsername);
    }
    if len > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong(len));
    }
    Ok(())
}

/// Parse a room ID typed by the user.
///
/// Surrounding whitespace is ignored; anything else that is not a
/// non-negative integer is rejected.
pub fn parse_room_id(input: &str) -> Result<u64, ValidationError> {
    input
        .trim()
        .parse::<u64>()
        .map_err(|_| ValidationError::InvalidRoomId(input.to_string()))
}

/// Check that `token` is empty or exactly [`PLAYER_TOKEN_LEN`] ASCII letters.
pub fn validate_player_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Ok(());
    }
    if token.len() == PLAYER_TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPlayerToken)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn username_bounds() {
        assert_eq!(validate_username(""), Err(ValidationError::EmptyUsername));
        assert!(validate_username("a").is_ok());
        assert!(validate_username("ab").is_ok());
        assert!(validate_username(&"x".repeat(20)).is_ok());
        assert_eq!(
            validate_username(&"x".repeat(21)),
            Err(ValidationError::UsernameTooLong(21))
        );
    }

    #[test]
    fn username_counts_characters_not_bytes() {
        // 20 two-byte characters is still 20 characters.
        assert!(validate_username(&"é".repeat(20)).is_ok());
    }

    #[test]
    fn room_id_accepts_non_negative_integers() {
        assert_eq!(parse_room_id("7").unwrap(), 7);
        assert_eq!(parse_room_id("0").unwrap(), 0);
        assert_eq!(parse_room_id(" 42 ").unwrap(), 42);
    }

    #[test]
    fn room_id_rejects_garbage() {
        for bad in ["", "-1", "abc", "1.5", "7a"] {
            assert!(
                matches!(parse_room_id(bad), Err(ValidationError::InvalidRoomId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn player_token_rules() {
        assert!(validate_player_token("").is_ok());
        assert!(validate_player_token(&"a".repeat(32)).is_ok());
        assert!(validate_player_token("abcdefghijklmnopqrstuvwxyzABCDEF").is_ok());
        assert_eq!(
            validate_player_token(&"a".repeat(31)),
            Err(ValidationError::InvalidPlayerToken)
        );
        assert_eq!(
            validate_player_token(&format!("{}1", "a".repeat(31))),
            Err(ValidationError::InvalidPlayerToken)
        );
    }
}
