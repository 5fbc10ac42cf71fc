//! Inbox projection: descriptors addressed to one receiver.

use super::error::Result;
use super::service::StorageService;
use super::types::FileDescriptor;

impl StorageService {
    /// Lists descriptors whose receiver matches `receiver`, newest first.
    ///
    /// Matching compares Unicode lowercase forms. An empty receiver matches
    /// nothing; no match is an empty list, never an error.
    ///
    /// # Errors
    ///
    /// Returns `ReadFailed` if the index cannot be enumerated.
    pub async fn list_for_receiver(&self, receiver: &str) -> Result<Vec<FileDescriptor>> {
        if receiver.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.index.scan().await?;
        Ok(filter_by_receiver(all, receiver))
    }
}

/// Keeps descriptors addressed to `receiver`, preserving order.
pub(crate) fn filter_by_receiver(
    descriptors: Vec<FileDescriptor>,
    receiver: &str,
) -> Vec<FileDescriptor> {
    if receiver.is_empty() {
        return Vec::new();
    }
    let wanted = receiver.to_lowercase();
    descriptors
        .into_iter()
        .filter(|d| {
            d.receiver
                .as_deref()
                .is_some_and(|r| r.to_lowercase() == wanted)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::storage::index::test_support::descriptor;

    fn addressed(name: &str, receiver: Option<&str>, age: i64) -> FileDescriptor {
        let mut d = descriptor(name, Utc::now(), age);
        d.receiver = receiver.map(str::to_string);
        d
    }

    #[test]
    fn test_filter_is_case_insensitive_and_ordered() {
        let all = vec![
            addressed("1.txt", Some("Bob"), 0),
            addressed("2.txt", Some("alice"), 10),
            addressed("3.txt", Some("BOB"), 20),
            addressed("4.txt", None, 30),
        ];

        let names: Vec<String> = filter_by_receiver(all, "bob")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["1.txt", "3.txt"]);
    }

    #[test]
    fn test_filter_uses_unicode_lowercase() {
        let all = vec![addressed("1.txt", Some("ÉLODIE"), 0)];
        assert_eq!(filter_by_receiver(all, "élodie").len(), 1);
    }

    #[test]
    fn test_empty_receiver_matches_nothing() {
        let all = vec![addressed("1.txt", Some(""), 0), addressed("2.txt", None, 0)];
        assert!(filter_by_receiver(all, "").is_empty());
    }
}
