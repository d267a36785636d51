//! Run identifier generation.

use uuid::Uuid;

/// Generates a short identifier for correlating the log lines of one run.
#[must_use]
pub fn generate_run_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_short_hex() {
        let id = generate_run_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_run_ids_differ() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
