//! Interception Rule Definitions
//!
//! This module defines the four rule kinds the proxy applies to traffic and the
//! `RuleSet` snapshot the evaluator matches flows against. Every collection keeps
//! insertion order; when several rules match a flow, the earliest one wins.

use crate::timestr;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Status code applied by a custom response when the caller gives none.
pub const DEFAULT_STATUS_CODE: u16 = 200;

/// Common view over rules that are matched by URL fragment.
pub trait UrlRule {
    fn url_fragment(&self) -> &str;

    /// Substring containment against the request's full URL
    fn matches_url(&self, url: &str) -> bool {
        url.contains(self.url_fragment())
    }
}

/// Rules that carry a caller-chosen alias for later removal.
pub trait AliasedRule: UrlRule {
    fn alias(&self) -> &str;
}

/// Custom response: replaces status, headers and body of matching responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub alias: String,
    pub url: String,
    /// Replacement headers. `None` (or an empty map) keeps the upstream headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderList>,
    /// Replacement body. `None` delivers an empty body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
}

impl OverrideEntry {
    pub fn new(alias: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            url: url.into(),
            headers: None,
            body: None,
            status_code: DEFAULT_STATUS_CODE,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HeaderList::default)
            .push(name, value);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }
}

fn default_status_code() -> u16 {
    DEFAULT_STATUS_CODE
}

/// Header name/value pairs, kept in the order the caller wrote them.
///
/// Serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for HeaderList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for HeaderList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(HeaderListVisitor)
    }
}

struct HeaderListVisitor;

impl<'de> Visitor<'de> for HeaderListVisitor {
    type Value = HeaderList;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of header names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<HeaderList, A::Error> {
        let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(pair) = access.next_entry::<String, String>()? {
            pairs.push(pair);
        }
        Ok(HeaderList(pairs))
    }
}

/// Custom status code: only the status line of matching responses changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub alias: String,
    pub url: String,
    pub status_code: u16,
}

impl StatusEntry {
    pub fn new(alias: impl Into<String>, url: impl Into<String>, status_code: u16) -> Self {
        Self {
            alias: alias.into(),
            url: url.into(),
            status_code,
        }
    }
}

/// Response delay: holds matching responses back before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayEntry {
    pub alias: String,
    pub url: String,
    pub delay: DelaySpec,
}

impl DelayEntry {
    /// Fails with `InvalidDuration` when `delay` does not resolve.
    pub fn new(
        alias: impl Into<String>,
        url: impl Into<String>,
        delay: &str,
    ) -> crate::Result<Self> {
        Ok(Self {
            alias: alias.into(),
            url: url.into(),
            delay: DelaySpec::parse(delay)?,
        })
    }
}

/// A delay as the caller wrote it, together with its resolved duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DelaySpec {
    text: String,
    duration: Duration,
}

impl DelaySpec {
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(Self {
            duration: timestr::parse_duration(text)?,
            text: text.trim().to_string(),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl TryFrom<String> for DelaySpec {
    type Error = crate::MitmError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        DelaySpec::parse(&text)
    }
}

impl From<DelaySpec> for String {
    fn from(spec: DelaySpec) -> Self {
        spec.text
    }
}

impl fmt::Display for DelaySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl UrlRule for String {
    fn url_fragment(&self) -> &str {
        self
    }
}

macro_rules! aliased_rule {
    ($($entry:ty),+) => {
        $(
            impl UrlRule for $entry {
                fn url_fragment(&self) -> &str {
                    &self.url
                }
            }

            impl AliasedRule for $entry {
                fn alias(&self) -> &str {
                    &self.alias
                }
            }
        )+
    };
}

aliased_rule!(OverrideEntry, StatusEntry, DelayEntry);

/// First rule in insertion order whose fragment occurs in `url`.
pub fn first_match<'a, R: UrlRule>(rules: &'a [R], url: &str) -> Option<&'a R> {
    rules.iter().find(|rule| rule.matches_url(url))
}

/// Index of the first rule carrying `alias`.
pub fn position_of_alias<R: AliasedRule>(rules: &[R], alias: &str) -> Option<usize> {
    rules.iter().position(|rule| rule.alias() == alias)
}

/// Immutable view of every rule collection.
///
/// The rule store hands out `Arc<RuleSet>` snapshots; a snapshot never changes
/// after it has been published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// URL fragments whose requests are blocked
    #[serde(default)]
    pub block_list: Vec<String>,

    #[serde(default)]
    pub custom_responses: Vec<OverrideEntry>,

    #[serde(default)]
    pub custom_statuses: Vec<StatusEntry>,

    #[serde(default)]
    pub response_delays: Vec<DelayEntry>,
}

impl RuleSet {
    /// Block entry that terminates a request for `url` on `host`.
    ///
    /// A fragment has to occur in the full URL and in the host.
    pub fn blocking_fragment(&self, url: &str, host: &str) -> Option<&str> {
        self.block_list
            .iter()
            .find(|fragment| url.contains(fragment.as_str()) && host.contains(fragment.as_str()))
            .map(String::as_str)
    }

    pub fn custom_response_for(&self, url: &str) -> Option<&OverrideEntry> {
        first_match(&self.custom_responses, url)
    }

    pub fn custom_status_for(&self, url: &str) -> Option<&StatusEntry> {
        first_match(&self.custom_statuses, url)
    }

    pub fn delay_for(&self, url: &str) -> Option<&DelayEntry> {
        first_match(&self.response_delays, url)
    }

    pub fn is_empty(&self) -> bool {
        self.block_list.is_empty()
            && self.custom_responses.is_empty()
            && self.custom_statuses.is_empty()
            && self.response_delays.is_empty()
    }

    /// Total number of rules across all collections
    pub fn len(&self) -> usize {
        self.block_list.len()
            + self.custom_responses.len()
            + self.custom_statuses.len()
            + self.response_delays.len()
    }

    /// Human-readable listing of the loaded rules, one line per collection.
    pub fn summary(&self) -> Vec<String> {
        let join = |items: Vec<String>| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join(", ")
            }
        };
        vec![
            format!(
                "URLs containing any of the following will be blocked: {}",
                join(self.block_list.clone())
            ),
            format!(
                "Custom responses: {}",
                join(
                    self.custom_responses
                        .iter()
                        .map(|e| format!("{} [{}] -> {}", e.alias, e.url, e.status_code))
                        .collect()
                )
            ),
            format!(
                "Custom status codes: {}",
                join(
                    self.custom_statuses
                        .iter()
                        .map(|e| format!("{} [{}] -> {}", e.alias, e.url, e.status_code))
                        .collect()
                )
            ),
            format!(
                "Delayed responses: {}",
                join(
                    self.response_delays
                        .iter()
                        .map(|e| format!("{} [{}] {}", e.alias, e.url, e.delay))
                        .collect()
                )
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_requires_url_and_host_match() {
        let rules = RuleSet {
            block_list: vec!["blocked.example".to_string(), "/admin".to_string()],
            ..Default::default()
        };

        assert_eq!(
            rules.blocking_fragment("http://blocked.example/x", "blocked.example"),
            Some("blocked.example")
        );
        // path-only fragments never fire, the host has to contain them too
        assert_eq!(
            rules.blocking_fragment("http://other.example/admin", "other.example"),
            None
        );
        assert_eq!(
            rules.blocking_fragment("http://other.example/x", "other.example"),
            None
        );
    }

    #[test]
    fn test_first_match_follows_insertion_order() {
        let rules = RuleSet {
            custom_responses: vec![
                OverrideEntry::new("first", "api.example").with_body("one"),
                OverrideEntry::new("second", "api.example/v1").with_body("two"),
            ],
            ..Default::default()
        };

        let hit = rules
            .custom_response_for("http://api.example/v1/users")
            .unwrap();
        assert_eq!(hit.alias, "first");
        assert!(rules.custom_response_for("http://other.example/").is_none());
    }

    #[test]
    fn test_position_of_alias_finds_first_duplicate() {
        let statuses = vec![
            StatusEntry::new("S1", "a", 500),
            StatusEntry::new("S1", "b", 503),
        ];
        assert_eq!(position_of_alias(&statuses, "S1"), Some(0));
        assert_eq!(position_of_alias(&statuses, "S2"), None);
    }

    #[test]
    fn test_rule_set_json_shape() {
        let json = r#"{
            "block_list": ["ads.example"],
            "custom_responses": [
                {"alias": "A1", "url": "api.example/v1", "body": "OK", "status_code": 201},
                {"alias": "A2", "url": "api.example/v2", "headers": {"x-mock": "yes"}}
            ],
            "response_delays": [{"alias": "D1", "url": "slow.example", "delay": "1.5s"}]
        }"#;

        let rules: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rules.block_list, vec!["ads.example".to_string()]);
        assert_eq!(rules.custom_responses[1].status_code, DEFAULT_STATUS_CODE);
        assert!(rules.custom_statuses.is_empty());
        assert_eq!(
            rules.response_delays[0].delay.duration(),
            Duration::from_millis(1500)
        );

        let back = serde_json::to_value(&rules).unwrap();
        assert_eq!(back["response_delays"][0]["delay"], "1.5s");
    }

    #[test]
    fn test_override_headers_keep_caller_order() {
        let json = r#"{"alias": "A1", "url": "x", "headers": {"x-zeta": "1", "content-type": "text/plain", "x-alpha": "2"}}"#;
        let entry: OverrideEntry = serde_json::from_str(json).unwrap();

        let names: Vec<&str> = entry.headers.as_ref().unwrap().iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x-zeta", "content-type", "x-alpha"]);

        let back = serde_json::to_string(&entry).unwrap();
        let zeta = back.find("x-zeta").unwrap();
        let alpha = back.find("x-alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_invalid_delay_rejected_on_deserialize() {
        let json = r#"{"response_delays": [{"alias": "D1", "url": "x", "delay": "soon"}]}"#;
        assert!(serde_json::from_str::<RuleSet>(json).is_err());
        assert!(DelayEntry::new("D1", "x", "-1s").is_err());
    }

    #[test]
    fn test_summary_lists_every_collection() {
        let mut rules = RuleSet::default();
        assert!(rules.summary().iter().all(|line| line.ends_with("(none)")));

        rules.block_list.push("ads.example".to_string());
        rules
            .response_delays
            .push(DelayEntry::new("D1", "slow.example", "2s").unwrap());
        let summary = rules.summary();
        assert_eq!(summary.len(), 4);
        assert!(summary[0].contains("ads.example"));
        assert!(summary[3].contains("D1 [slow.example] 2s"));
    }
}
