//! Topic layout under a configurable base
//!
//! ```text
//! {base}/services/{service}/{method}   requests
//! {base}/responses/{message_id}        correlated replies
//! {base}/events/{service}/{event}      fire-and-forget events
//! {base}/health/{service}              health checks
//! {base}/health/{service}/response     uncorrelated health replies
//! {base}/discovery                     service announcements
//! ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
}

impl TopicScheme {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn service_request(&self, service: &str, method: &str) -> String {
        format!("{}/services/{}/{}", self.base, service, method)
    }

    /// Filter matching every method of one service
    pub fn service_requests(&self, service: &str) -> String {
        format!("{}/services/{}/+", self.base, service)
    }

    pub fn response(&self, message_id: &str) -> String {
        format!("{}/responses/{}", self.base, message_id)
    }

    pub fn event(&self, service: &str, event: &str) -> String {
        format!("{}/events/{}/{}", self.base, service, event)
    }

    pub fn health(&self, service: &str) -> String {
        format!("{}/health/{}", self.base, service)
    }

    pub fn health_response(&self, service: &str) -> String {
        format!("{}/health/{}/response", self.base, service)
    }

    pub fn discovery(&self) -> String {
        format!("{}/discovery", self.base)
    }

    /// The four families every bus listens on
    pub fn subscriptions(&self) -> [String; 4] {
        [
            format!("{}/services/+/+", self.base),
            format!("{}/responses/+", self.base),
            format!("{}/events/+/+", self.base),
            format!("{}/health/+", self.base),
        ]
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("motospect")
    }
}

/// MQTT-style filter match: `+` is one level, a trailing `#` is any remainder
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics_under_base() {
        let topics = TopicScheme::new("motospect/");
        assert_eq!(
            topics.service_request("vin", "decode"),
            "motospect/services/vin/decode"
        );
        assert_eq!(topics.response("abc"), "motospect/responses/abc");
        assert_eq!(topics.event("vin", "decoded"), "motospect/events/vin/decoded");
        assert_eq!(topics.health_response("vin"), "motospect/health/vin/response");
        assert_eq!(topics.discovery(), "motospect/discovery");
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("m/services/+/+", "m/services/vin/decode"));
        assert!(!topic_matches("m/services/+/+", "m/services/vin"));
        assert!(!topic_matches("m/services/+/+", "m/services/vin/decode/extra"));
        assert!(topic_matches("m/health/+", "m/health/vin"));
        assert!(!topic_matches("m/health/+", "m/health/vin/response"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("m/#", "m/services/vin/decode"));
        assert!(topic_matches("m/#", "m"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("m/#/x", "m/a/x"));
        assert!(!topic_matches("n/#", "m/a"));
    }

    #[test]
    fn exact_match() {
        assert!(topic_matches("m/discovery", "m/discovery"));
        assert!(!topic_matches("m/discovery", "m/discovery/x"));
        assert!(!topic_matches("m/discovery/x", "m/discovery"));
    }
}
