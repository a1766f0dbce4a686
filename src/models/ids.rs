//! Entity ID aliases. Users are keyed by a database-assigned BIGSERIAL; validation happens at parse boundaries.

pub type UserId = i64;

/// Parse a path segment into a user id or return an error message. Use at API boundaries.
pub fn parse_user_id(id: &str) -> Result<UserId, String> {
    id.trim()
        .parse::<UserId>()
        .map_err(|e| format!("Invalid user id '{}': {}", id, e))
}
