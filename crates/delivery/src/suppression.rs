//! Compliance suppression — answers "may we still email this person?".
//!
//! Suppression facts arrive as tags on the recipient record (the platform
//! writes them from bounce webhooks, unsubscribe links, and support
//! tooling). The filter is a pure predicate and is re-evaluated every time
//! a send is considered, never cached at enrollment time.

use coursedrip_core::types::Recipient;
use serde::{Deserialize, Serialize};

/// Tags that always block marketing email, regardless of configuration.
pub const COMPLIANCE_TAGS: [&str; 4] = ["bounced", "complained", "unsubscribed", "do_not_contact"];

/// Why a recipient is not sendable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Bounced,
    Complained,
    Unsubscribed,
    DoNotContact,
    Blocked { tag: String },
}

impl SuppressionReason {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "bounced" => SuppressionReason::Bounced,
            "complained" => SuppressionReason::Complained,
            "unsubscribed" => SuppressionReason::Unsubscribed,
            "do_not_contact" => SuppressionReason::DoNotContact,
            other => SuppressionReason::Blocked {
                tag: other.to_string(),
            },
        }
    }
}

/// Pure sendability predicate over recipient tags.
#[derive(Debug, Clone)]
pub struct SuppressionFilter {
    blocked_tags: Vec<String>,
}

impl SuppressionFilter {
    /// Filter blocking only the standard compliance tags.
    pub fn new() -> Self {
        Self {
            blocked_tags: COMPLIANCE_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Filter blocking the compliance tags plus operator-configured extras
    /// (e.g. an "internal_test" tag).
    pub fn with_extra_tags(extra: &[String]) -> Self {
        let mut filter = Self::new();
        for tag in extra {
            if !filter.blocked_tags.contains(tag) {
                filter.blocked_tags.push(tag.clone());
            }
        }
        filter
    }

    pub fn is_sendable(&self, recipient: &Recipient) -> bool {
        self.suppression_reason(recipient).is_none()
    }

    /// First blocking tag found, for logs and skip accounting.
    pub fn suppression_reason(&self, recipient: &Recipient) -> Option<SuppressionReason> {
        self.blocked_tags
            .iter()
            .find(|t| recipient.has_tag(t))
            .map(|t| SuppressionReason::from_tag(t))
    }
}

impl Default for SuppressionFilter {
    fn default() -> Self {
        Self::new()
    }
}
