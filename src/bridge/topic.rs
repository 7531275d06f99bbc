//! Topic and payload conventions shared with the openHASP firmware
//!
//! Everything in here is pure string formatting and parsing. The exact shapes
//! must match what the display firmware expects:
//!
//! ```text
//! outbound  hasp/<node>/command         "jsonl <pages>" | "<keyword>=<value>"
//! inbound   <action>/signalk/<id>/<sub...>
//! ```

/// Domain literal expected as the second segment of inbound topics
pub const SIGNALK_DOMAIN: &str = "signalk";

/// Topic the display node listens on for commands
pub fn command_topic(node_name: &str) -> String {
    format!("hasp/{}/command", node_name)
}

/// Stable MQTT client identifier for a bridge instance
pub fn client_id(system_id: &str) -> String {
    format!("{}/{}", SIGNALK_DOMAIN, system_id)
}

/// Subscription filter matching every inbound topic addressed to this system
pub fn inbound_filter(system_id: &str) -> String {
    format!("+/{}/{}/#", SIGNALK_DOMAIN, system_id)
}

/// Payload that loads a full page definition on a node
pub fn page_load_payload(pages: &str) -> String {
    format!("jsonl {}", pages)
}

/// Payload that sets a single object property on a node
pub fn value_update_payload(keyword: &str, value: &str) -> String {
    format!("{}={}", keyword, value)
}

/// Components of an inbound topic
///
/// `domain` and `system_id` are `None` when the topic has fewer than three
/// segments; such topics never match any system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTopic {
    pub action: String,
    pub domain: Option<String>,
    pub system_id: Option<String>,
    pub sub_path: String,
}

impl InboundTopic {
    pub fn parse(topic: &str) -> Self {
        let parts: Vec<&str> = topic.split('/').collect();
        let action = parts.first().copied().unwrap_or_default().to_string();

        if parts.len() < 3 {
            return Self {
                action,
                domain: None,
                system_id: None,
                sub_path: String::new(),
            };
        }

        Self {
            action,
            domain: parts.get(1).map(|s| s.to_string()),
            system_id: parts.get(2).map(|s| s.to_string()),
            sub_path: parts.get(3..).map(|rest| rest.join("/")).unwrap_or_default(),
        }
    }

    /// Whether the topic is addressed to the given system
    pub fn is_for(&self, system_id: &str) -> bool {
        self.domain.as_deref() == Some(SIGNALK_DOMAIN)
            && self.system_id.as_deref() == Some(system_id)
    }
}
