//! Topic helpers: subtree subscriptions and base-prefix rewriting.

/// Subscription pattern covering `base` and all of its descendants.
pub fn subtree_pattern(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        "#".to_string()
    } else {
        format!("{base}/#")
    }
}

/// Replaces a recorded base-topic prefix with the replay prefix.
///
/// Only a leading occurrence is substituted, once. Topics that do not start
/// with the recorded base are returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRewrite {
    from: String,
    to: String,
}

impl TopicRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn apply(&self, topic: &str) -> String {
        match topic.strip_prefix(self.from.as_str()) {
            Some(rest) if !self.from.is_empty() => format!("{}{}", self.to, rest),
            _ => topic.to_string(),
        }
    }
}
