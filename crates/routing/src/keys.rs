//! Store key layout and record encoding.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Names of the maps, sets and lease scopes under one namespace.
///
/// | key                 | kind       | field / member → value      |
/// |---------------------|------------|-----------------------------|
/// | `<ns>:messages`       | map        | fingerprint → `Message` JSON |
/// | `<ns>:agents`         | map        | agent id → `AgentRecord` JSON |
/// | `<ns>:active_sessions`| map        | customer id → agent id      |
/// | `<ns>:online_agents`  | sorted set | agent id, score = sessions  |
#[derive(Debug, Clone)]
pub struct Keyspace {
    namespace: String,
    messages: String,
    agents: String,
    sessions: String,
    online: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = |name: &str| {
            if namespace.is_empty() {
                name.to_string()
            } else {
                format!("{namespace}:{name}")
            }
        };
        Self {
            messages: key("messages"),
            agents: key("agents"),
            sessions: key("active_sessions"),
            online: key("online_agents"),
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn messages(&self) -> &str {
        &self.messages
    }

    pub fn agents(&self) -> &str {
        &self.agents
    }

    pub fn sessions(&self) -> &str {
        &self.sessions
    }

    pub fn online(&self) -> &str {
        &self.online
    }

    /// Lease scope serializing all routing for one customer.
    pub fn customer_scope(&self, customer_id: &str) -> String {
        format!("{}:customer:{customer_id}", self.namespace)
    }

    /// Lease scope serializing writes to one agent record.
    pub fn agent_scope(&self, agent_id: &str) -> String {
        format!("{}:agent:{agent_id}", self.namespace)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new("switchboard")
    }
}

pub(crate) fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| Error::Corrupt {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| Error::Corrupt {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("support", "support:messages", "support:online_agents")]
    #[case("", "messages", "online_agents")]
    fn map_and_set_names(#[case] ns: &str, #[case] messages: &str, #[case] online: &str) {
        let keys = Keyspace::new(ns);
        assert_eq!(keys.messages(), messages);
        assert_eq!(keys.online(), online);
    }

    #[test]
    fn lease_scopes_do_not_collide() {
        let keys = Keyspace::new("support");
        assert_eq!(keys.customer_scope("7"), "support:customer:7");
        assert_eq!(keys.agent_scope("7"), "support:agent:7");
        assert_eq!(keys.sessions(), "support:active_sessions");
    }
}
