//! Recipient records and the directory boundary.
//!
//! The learning platform owns the real user store; the engine only needs a
//! queryable view of it. `RecipientDirectory` is that view, with an
//! in-memory implementation for wiring and tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sendable user record as seen by the mail engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Free-form tags; compliance-suppression facts live here too
    /// (e.g. "bounced", "unsubscribed").
    pub tags: Vec<String>,
    /// Extra merge variables for template rendering.
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Declarative recipient filter used by bulk enrollment
/// (e.g. "everyone tagged `onboarding_done` but not `purchased`").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientFilter {
    #[serde(default)]
    pub required_tags: Vec<String>,
    #[serde(default)]
    pub excluded_tags: Vec<String>,
}

impl RecipientFilter {
    pub fn matches(&self, recipient: &Recipient) -> bool {
        self.required_tags.iter().all(|t| recipient.has_tag(t))
            && !self.excluded_tags.iter().any(|t| recipient.has_tag(t))
    }
}

/// Read-only view of the platform's user store.
pub trait RecipientDirectory: Send + Sync {
    fn get(&self, id: &Uuid) -> Option<Recipient>;
    fn find(&self, filter: &RecipientFilter) -> Vec<Recipient>;
}

/// Thread-safe in-memory directory backed by `DashMap`.
pub struct InMemoryRecipientDirectory {
    recipients: DashMap<Uuid, Recipient>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self {
            recipients: DashMap::new(),
        }
    }

    pub fn insert(&self, recipient: Recipient) {
        self.recipients.insert(recipient.id, recipient);
    }

    /// Append a tag to a recipient if not already present.
    pub fn add_tag(&self, id: &Uuid, tag: &str) -> bool {
        match self.recipients.get_mut(id) {
            Some(mut r) => {
                if !r.has_tag(tag) {
                    r.tags.push(tag.to_string());
                }
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.recipients.len()
    }

    /// Seeds a handful of demo recipients for development and testing.
    pub fn seed_demo_recipients(&self) {
        let demo = [
            ("ada@example.com", "Ada", "Lovelace", vec!["onboarding_done"]),
            ("grace@example.com", "Grace", "Hopper", vec![]),
            ("edsger@example.com", "Edsger", "Dijkstra", vec!["purchased"]),
            ("bounce@example.com", "Bounce", "Test", vec!["bounced"]),
        ];
        for (email, first, last, tags) in demo {
            self.insert(Recipient {
                id: Uuid::new_v4(),
                email: email.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                tags: tags.into_iter().map(String::from).collect(),
                attributes: HashMap::new(),
                created_at: Utc::now(),
            });
        }
        tracing::info!(count = self.recipients.len(), "demo recipients seeded");
    }
}

impl Default for InMemoryRecipientDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RecipientDirectory for InMemoryRecipientDirectory {
    fn get(&self, id: &Uuid) -> Option<Recipient> {
        self.recipients.get(id).map(|r| r.clone())
    }

    fn find(&self, filter: &RecipientFilter) -> Vec<Recipient> {
        self.recipients
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(email: &str, tags: &[&str]) -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            attributes: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let r = recipient("a@x.com", &["onboarding_done", "newsletter"]);

        let all = RecipientFilter::default();
        assert!(all.matches(&r));

        let required = RecipientFilter {
            required_tags: vec!["onboarding_done".to_string()],
            excluded_tags: vec![],
        };
        assert!(required.matches(&r));

        let excluded = RecipientFilter {
            required_tags: vec![],
            excluded_tags: vec!["newsletter".to_string()],
        };
        assert!(!excluded.matches(&r));
    }

    #[test]
    fn test_directory_find() {
        let dir = InMemoryRecipientDirectory::new();
        dir.insert(recipient("a@x.com", &["purchased"]));
        dir.insert(recipient("b@x.com", &[]));
        dir.insert(recipient("c@x.com", &[]));

        let non_purchasers = RecipientFilter {
            required_tags: vec![],
            excluded_tags: vec!["purchased".to_string()],
        };
        assert_eq!(dir.find(&non_purchasers).len(), 2);
        assert_eq!(dir.find(&RecipientFilter::default()).len(), 3);
    }

    #[test]
    fn test_add_tag_idempotent() {
        let dir = InMemoryRecipientDirectory::new();
        let r = recipient("a@x.com", &[]);
        let id = r.id;
        dir.insert(r);

        assert!(dir.add_tag(&id, "bounced"));
        assert!(dir.add_tag(&id, "bounced"));
        assert_eq!(dir.get(&id).map(|r| r.tags.len()), Some(1));
        assert!(!dir.add_tag(&Uuid::new_v4(), "bounced"));
    }
}
