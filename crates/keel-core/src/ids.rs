//! Prefixed, time-ordered identifiers.
//!
//! All IDs are UUID v7 (time-ordered) generated via [`uuid::Uuid::now_v7`],
//! prefixed with a short entity tag (`acct_`, `sess_`, ...) so an ID is
//! self-describing in logs.

use uuid::Uuid;

/// Generate `"{prefix}_{uuid-v7}"`.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

/// Generate a bare UUID v7 string.
pub fn new_token() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_id_has_prefix() {
        let id = prefixed_id("acct");
        assert!(id.starts_with("acct_"));
        assert_eq!(id.len(), "acct_".len() + 36);
    }

    #[test]
    fn ids_are_unique() {
        let a = prefixed_id("x");
        let b = prefixed_id("x");
        assert_ne!(a, b);
    }

    #[test]
    fn tokens_sort_by_creation_time() {
        let a = new_token();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_token();
        assert!(a < b);
    }
}
