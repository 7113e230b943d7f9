//! The metric domain.
//!
//! Metrics form the closed, k-valued domain over which client-side randomized
//! response operates. Adding a variant changes `k` and therefore the
//! perturbation probabilities, so clients and the service must agree on the
//! exact list.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What happened (one increment of one metric).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// A template was opened.
    TemplateView,
    /// A template was used to start a message.
    TemplateUse,
    /// A template link was shared.
    TemplateShare,
    /// AI-assisted content was generated.
    MessageGenerated,
    /// A message was submitted for delivery.
    MessageSent,
    /// A message was confirmed delivered.
    MessageDelivered,
    /// Delivery failed.
    DeliveryFailed,
    /// An OAuth flow was started.
    OauthStarted,
    /// An OAuth flow completed.
    OauthCompleted,
    /// A categorized error was reported.
    ErrorReported,
}

impl Metric {
    /// Every metric, in domain order. The index of a metric in this slice is
    /// its position in the randomized-response domain.
    pub const ALL: [Self; 10] = [
        Self::TemplateView,
        Self::TemplateUse,
        Self::TemplateShare,
        Self::MessageGenerated,
        Self::MessageSent,
        Self::MessageDelivered,
        Self::DeliveryFailed,
        Self::OauthStarted,
        Self::OauthCompleted,
        Self::ErrorReported,
    ];

    /// Size of the randomized-response domain (`k`).
    pub const DOMAIN_SIZE: usize = Self::ALL.len();

    /// Position of this metric in [`Metric::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Metric at a domain position.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Wire name of the metric.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemplateView => "template_view",
            Self::TemplateUse => "template_use",
            Self::TemplateShare => "template_share",
            Self::MessageGenerated => "message_generated",
            Self::MessageSent => "message_sent",
            Self::MessageDelivered => "message_delivered",
            Self::DeliveryFailed => "delivery_failed",
            Self::OauthStarted => "oauth_started",
            Self::OauthCompleted => "oauth_completed",
            Self::ErrorReported => "error_reported",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
