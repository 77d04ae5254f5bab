use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use crate::mqtt::filter::Filter;
use crate::policy::Policy;

/// Client and topic permissions read from `permissions.toml`.
///
/// ```toml
/// allowed-clients = ["abc"]
///
/// [[permissions."*".topic]]
/// filter = "sensors/#"
/// allowed = ["publish", "subscribe"]
/// ```
#[derive(serde::Deserialize, Default, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct PermissionsConfig {
    /// If set, only these client IDs may connect.
    #[serde(default)]
    pub allowed_clients: Option<HashSet<String>>,

    /// Topic rules keyed by client ID; `"*"` applies to clients without their own entry.
    #[serde(default)]
    pub permissions: HashMap<String, TopicsConfig>,
}

#[derive(serde::Deserialize, Debug)]
pub struct TopicsConfig {
    pub topic: Vec<TopicPermissions>,
}

#[derive(serde::Deserialize, Debug)]
pub struct TopicPermissions {
    #[serde(deserialize_with = "from_str")]
    pub filter: Filter,
    #[serde(default)]
    pub allowed: Vec<TransactionType>,
    #[serde(default)]
    pub denied: Vec<TransactionType>,
}

fn from_str<'de, D>(deserializer: D) -> Result<Filter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;

    Filter::from_str(&s).map_err(serde::de::Error::custom)
}

#[derive(serde::Deserialize, PartialEq, Eq, Debug, Copy, Clone)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Subscribe,
    Publish,
}

impl TopicPermissions {
    fn permits(&self, transaction_type: TransactionType) -> bool {
        !self.denied.contains(&transaction_type)
            && (self.allowed.is_empty() || self.allowed.contains(&transaction_type))
    }
}

impl PermissionsConfig {
    pub fn get_topics_acl_config(&self, client_id: &str) -> Option<&TopicsConfig> {
        match self.permissions.get(client_id) {
            Some(permission) => Some(permission),
            None => self.permissions.get("*"),
        }
    }

    /// The first rule whose filter matches `topic_name` decides; no matching rule allows.
    pub fn check_acl_config(
        &self,
        client_id: &str,
        topic_name: &str,
        transaction_type: TransactionType,
    ) -> bool {
        // Allows everything if no topics config was found.
        self.get_topics_acl_config(client_id).map_or(true, |perms| {
            perms
                .topic
                .iter()
                .find(|k| k.filter.matches_topic(topic_name))
                .map_or(true, |k| k.permits(transaction_type))
        })
    }

    /// Like [`Self::check_acl_config()`] for every topic `filter` can match.
    ///
    /// Each rule overlapping `filter` must permit subscribing, up to the first one covering it.
    /// An invalid filter is refused.
    pub fn check_subscribe_acl_config(&self, client_id: &str, filter: &str) -> bool {
        let Ok(filter) = Filter::from_str(filter) else {
            return false;
        };

        let Some(perms) = self.get_topics_acl_config(client_id) else {
            return true;
        };

        for rule in perms.topic.iter().filter(|k| k.filter.overlaps(&filter)) {
            if !rule.permits(TransactionType::Subscribe) {
                return false;
            }

            if rule.filter.covers(&filter) {
                return true;
            }
        }

        true
    }
}

impl Policy for PermissionsConfig {
    fn authorize_client(&self, client_id: &str) -> bool {
        self.allowed_clients
            .as_ref()
            .map_or(true, |allowed| allowed.contains(client_id))
    }

    fn authorize_subscribe(&self, client_id: &str, topics: &[String]) -> bool {
        topics
            .iter()
            .all(|filter| self.check_subscribe_acl_config(client_id, filter))
    }

    fn authorize_publish(&self, client_id: &str, topic: &str) -> bool {
        self.check_acl_config(client_id, topic, TransactionType::Publish)
    }

    fn on_ping(&self, client_id: &str) {
        tracing::trace!(client_id, "PINGREQ");
    }
}

/// Returns `None` if the file does not exist.
///
/// NOTE: uses blocking I/O internally.
pub fn read(path: &Path) -> crate::Result<Option<PermissionsConfig>> {
    let config = super::read_toml_optional("permissions", path)?;

    if config.is_none() {
        tracing::debug!(
            "permissions file not found at {}; any client can do anything with the topics.",
            path.display()
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{read, PermissionsConfig};
    use crate::policy::Policy;

    const PERMISSIONS: &str = r##"
        allowed-clients = ["abc", "dashboard"]

        [[permissions."*".topic]]
        filter = "sensors/#"
        allowed = ["publish", "subscribe"]

        [[permissions."*".topic]]
        filter = "#"
        denied = ["publish", "subscribe"]

        [[permissions.dashboard.topic]]
        filter = "sensors/#"
        allowed = ["subscribe"]

        [[permissions.dashboard.topic]]
        filter = "admin/+"
        denied = ["publish"]
    "##;

    fn permissions() -> PermissionsConfig {
        toml::from_str(PERMISSIONS).unwrap()
    }

    #[test]
    fn clients() {
        let permissions = permissions();

        assert!(permissions.authorize_client("abc"));
        assert!(permissions.authorize_client("dashboard"));
        assert!(!permissions.authorize_client("mallory"));
        assert!(!permissions.authorize_client(""));

        // No list means anyone.
        assert!(PermissionsConfig::default().authorize_client("mallory"));
    }

    #[test]
    fn publish() {
        let permissions = permissions();

        assert!(permissions.authorize_publish("abc", "sensors/1"));
        assert!(!permissions.authorize_publish("abc", "admin/reboot"));

        // `dashboard` has its own rules and does not fall back to `*`.
        assert!(!permissions.authorize_publish("dashboard", "sensors/1"));
        assert!(!permissions.authorize_publish("dashboard", "admin/reboot"));
        assert!(permissions.authorize_publish("dashboard", "other/topic"));
    }

    #[test]
    fn subscribe() {
        let permissions = permissions();

        assert!(permissions.authorize_subscribe("abc", &["sensors/#".to_string()]));
        assert!(permissions.authorize_subscribe(
            "abc",
            &["sensors/1".to_string(), "sensors/2".to_string()]
        ));
        assert!(!permissions.authorize_subscribe(
            "abc",
            &["sensors/1".to_string(), "admin/+".to_string()]
        ));
        assert!(permissions.authorize_subscribe("dashboard", &["sensors/+/temp".to_string()]));
        assert!(permissions.authorize_subscribe("dashboard", &["admin/+".to_string()]));
    }

    #[test]
    fn subscribe_wildcards() {
        let permissions: PermissionsConfig = toml::from_str(
            r##"
            [[permissions."*".topic]]
            filter = "secret/#"
            denied = ["subscribe"]

            [[permissions."*".topic]]
            filter = "public/#"
            allowed = ["subscribe"]
            "##,
        )
        .unwrap();

        assert!(!permissions.authorize_subscribe("abc", &["secret/x".to_string()]));
        assert!(!permissions.authorize_subscribe("abc", &["#".to_string()]));
        assert!(!permissions.authorize_subscribe("abc", &["+/x".to_string()]));
        assert!(!permissions.authorize_subscribe("abc", &["+".to_string()]));

        assert!(permissions.authorize_subscribe("abc", &["public/#".to_string()]));
        assert!(permissions.authorize_subscribe("abc", &["public/+/x".to_string()]));
        assert!(permissions.authorize_subscribe("abc", &["other/+".to_string()]));

        // The deny rule does not reach `$` topics.
        assert!(permissions.authorize_subscribe("abc", &["$SYS/#".to_string()]));

        assert!(!permissions.authorize_subscribe("abc", &["public/#/x".to_string()]));
    }

    #[test]
    fn invalid_filter_is_a_parse_error() {
        let res = toml::from_str::<PermissionsConfig>(
            r##"
            [[permissions."*".topic]]
            filter = "sensors/#/temp"
            allowed = ["publish"]
            "##,
        );

        assert!(res.is_err());
    }

    #[test]
    fn read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.toml");

        assert!(read(&path).unwrap().is_none());

        fs::write(&path, PERMISSIONS).unwrap();

        let permissions = read(&path).unwrap().unwrap();
        assert!(permissions.authorize_client("abc"));
        assert!(!permissions.authorize_client("mallory"));
    }
}
