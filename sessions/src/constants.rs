//! Session store constants.

/// Reserved value key that overrides the persisted `modified` timestamp.
///
/// When present it must hold a [`SessionValue::Timestamp`](crate::SessionValue::Timestamp).
pub const MODIFIED_KEY: &str = "modified";

/// Document field the TTL index is built on.
pub const MODIFIED_FIELD: &str = "modified";

/// Fixed name of the TTL index, stable across restarts.
pub const TTL_INDEX_NAME: &str = "modified_at_TTL";

/// Default maximum length of an encoded cookie value.
pub const DEFAULT_MAX_COOKIE_LENGTH: usize = 4096;

/// Default session lifetime in seconds (30 days).
pub const DEFAULT_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert_eq!(MODIFIED_KEY, "modified");
        assert_eq!(MODIFIED_FIELD, MODIFIED_KEY);
        assert_eq!(TTL_INDEX_NAME, "modified_at_TTL");
    }

    #[test]
    fn test_default_max_age_is_thirty_days() {
        assert_eq!(DEFAULT_MAX_AGE_SECS, 2_592_000);
    }
}
