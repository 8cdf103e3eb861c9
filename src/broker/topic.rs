use crate::config::HubSettings;

/// Maps client identities onto broker topic names.
///
/// Direct messages for a primary identity travel on
/// `direct_prefix + primary_id`; group messages on `group_prefix + group_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    pub direct_prefix: String,
    pub group_prefix: String,
}

impl TopicScheme {
    pub fn new(direct_prefix: impl Into<String>, group_prefix: impl Into<String>) -> Self {
        Self {
            direct_prefix: direct_prefix.into(),
            group_prefix: group_prefix.into(),
        }
    }

    /// Topic carrying messages addressed to one primary identity.
    pub fn direct(&self, primary_id: &str) -> String {
        format!("{}{}", self.direct_prefix, primary_id)
    }

    /// Topic carrying messages broadcast to a whole group.
    pub fn group(&self, group_id: &str) -> String {
        format!("{}{}", self.group_prefix, group_id)
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for TopicScheme {
    fn from(settings: &HubSettings) -> Self {
        Self::new(
            settings.direct_topic_prefix.clone(),
            settings.group_topic_prefix.clone(),
        )
    }
}
