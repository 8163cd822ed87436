//! Webhook Manager (spec.md §4.7 "Webhook hooks"): an event bus over
//! mux lifecycle events, filtered by method pattern and an optional
//! dotted-key params predicate, dispatched as outbound HTTP POSTs.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

const DEFAULT_BEFORE_EVENT_TIMEOUT: Duration = Duration::from_secs(2);
const AFTER_EVENT_RETRIES: u32 = 2;
const AFTER_EVENT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Which mux lifecycle point a rule fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    /// Pre-dispatch, client -> upstream.
    CdpCommand,
    /// Post-receive, upstream -> clients.
    CdpEvent,
    ClientConnected,
    ClientDisconnected,
}

/// Whether a rule may block the triggering command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookTiming {
    /// May block the command briefly, bounded by a timeout.
    BeforeEvent,
    /// Fire-and-forget with retry.
    AfterEvent,
}

/// An equality predicate on `params.<dotted.key>`.
#[derive(Debug, Clone)]
pub struct ParamPredicate {
    pub dotted_key: String,
    pub expected: Value,
}

#[derive(Debug, Clone)]
pub struct WebhookRule {
    pub kind: WebhookKind,
    /// `"*"` matches any method; anything else must match exactly.
    pub method_pattern: String,
    pub param_predicate: Option<ParamPredicate>,
    pub timing: WebhookTiming,
    pub url: String,
    pub timeout: Duration,
}

impl WebhookRule {
    #[must_use]
    pub fn new(kind: WebhookKind, method_pattern: impl Into<String>, timing: WebhookTiming, url: impl Into<String>) -> Self {
        Self {
            kind,
            method_pattern: method_pattern.into(),
            param_predicate: None,
            timing,
            url: url.into(),
            timeout: DEFAULT_BEFORE_EVENT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_param_predicate(mut self, dotted_key: impl Into<String>, expected: Value) -> Self {
        self.param_predicate = Some(ParamPredicate { dotted_key: dotted_key.into(), expected });
        self
    }

    fn method_matches(&self, method: Option<&str>) -> bool {
        if self.method_pattern == "*" {
            return true;
        }
        method.is_some_and(|m| m == self.method_pattern)
    }

    fn params_match(&self, params: Option<&Value>) -> bool {
        let Some(predicate) = &self.param_predicate else {
            return true;
        };
        let Some(params) = params else {
            return false;
        };
        dotted_get(params, &predicate.dotted_key) == Some(&predicate.expected)
    }
}

/// Walks `value` by splitting `dotted_key` on `.`, descending through
/// nested objects (spec.md §8 "Webhook param filter with dotted key
/// matches nested JSON").
#[must_use]
pub fn dotted_get<'a>(value: &'a Value, dotted_key: &str) -> Option<&'a Value> {
    dotted_key.split('.').try_fold(value, |cur, segment| cur.get(segment))
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    kind: &'static str,
    method: Option<&'a str>,
    params: Option<&'a Value>,
    data: &'a Value,
}

impl WebhookKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CdpCommand => "cdp.command",
            Self::CdpEvent => "cdp.event",
            Self::ClientConnected => "client.connected",
            Self::ClientDisconnected => "client.disconnected",
        }
    }
}

pub struct WebhookManager {
    rules: RwLock<Vec<WebhookRule>>,
    client: reqwest::Client,
}

impl Default for WebhookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            client: reqwest::Client::new(),
        }
    }

    pub async fn register(&self, rule: WebhookRule) {
        self.rules.write().await.push(rule);
    }

    /// Dispatches `kind`/`method`/`params` to every matching rule.
    /// `before_event` rules are awaited (bounded by their timeout) before
    /// returning; `after_event` rules are spawned and retried
    /// independently of the caller.
    pub async fn dispatch(self: &Arc<Self>, kind: WebhookKind, method: Option<&str>, params: Option<&Value>, data: &Value) {
        let rules = self.rules.read().await;
        let matching: Vec<WebhookRule> = rules
            .iter()
            .filter(|r| r.kind == kind && r.method_matches(method) && r.params_match(params))
            .cloned()
            .collect();
        drop(rules);

        let payload = WebhookPayload { kind: kind.as_str(), method, params, data };
        let body = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "webhook: failed to serialize payload");
                return;
            }
        };

        for rule in matching {
            match rule.timing {
                WebhookTiming::BeforeEvent => {
                    if let Err(e) = self.deliver_once(&rule, &body).await {
                        tracing::warn!(url = %rule.url, error = %e, "webhook: before_event delivery failed");
                    }
                }
                WebhookTiming::AfterEvent => {
                    let manager = Arc::clone(self);
                    let rule = rule.clone();
                    let body = body.clone();
                    tokio::spawn(async move { manager.deliver_with_retry(&rule, &body).await });
                }
            }
        }
    }

    async fn deliver_once(&self, rule: &WebhookRule, body: &Value) -> Result<(), reqwest::Error> {
        self.client
            .post(&rule.url)
            .timeout(rule.timeout)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn deliver_with_retry(&self, rule: &WebhookRule, body: &Value) {
        for attempt in 0..=AFTER_EVENT_RETRIES {
            match self.deliver_once(rule, body).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(url = %rule.url, attempt, error = %e, "webhook: after_event delivery failed");
                    if attempt < AFTER_EVENT_RETRIES {
                        tokio::time::sleep(AFTER_EVENT_RETRY_DELAY).await;
                    }
                }
            }
        }
        tracing::error!(url = %rule.url, "webhook: after_event delivery exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_method_pattern_matches_anything() {
        let rule = WebhookRule::new(WebhookKind::CdpCommand, "*", WebhookTiming::AfterEvent, "http://example.test");
        assert!(rule.method_matches(Some("Page.enable")));
        assert!(rule.method_matches(None));
    }

    #[test]
    fn exact_method_pattern_requires_match() {
        let rule = WebhookRule::new(WebhookKind::CdpCommand, "Page.enable", WebhookTiming::AfterEvent, "http://example.test");
        assert!(rule.method_matches(Some("Page.enable")));
        assert!(!rule.method_matches(Some("Page.disable")));
    }

    #[test]
    fn dotted_get_descends_nested_objects() {
        let value = serde_json::json!({"frame": {"url": "https://example.com"}});
        assert_eq!(dotted_get(&value, "frame.url"), Some(&serde_json::json!("https://example.com")));
        assert_eq!(dotted_get(&value, "frame.missing"), None);
    }

    #[test]
    fn param_predicate_matches_nested_equality() {
        let rule = WebhookRule::new(WebhookKind::CdpEvent, "*", WebhookTiming::AfterEvent, "http://example.test")
            .with_param_predicate("frame.url", serde_json::json!("https://example.com"));
        let params = serde_json::json!({"frame": {"url": "https://example.com"}});
        assert!(rule.params_match(Some(&params)));

        let other = serde_json::json!({"frame": {"url": "https://other.example"}});
        assert!(!rule.params_match(Some(&other)));
    }
}
