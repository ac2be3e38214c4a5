//! XMTP gateway adapter.
//!
//! The gateway sidecar owns the XMTP identity, sessions and encryption; this
//! crate consumes its HTTP feed (long-poll with an after-seq cursor) and
//! posts replies back into conversations. Transient poll failures are
//! retried with exponential backoff up to a cap; past the cap the stream is
//! reported as fatally lost and restart is left to the process supervisor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use chatsafe_core::{
    domain::{ConversationId, InboundMessage, SenderId},
    errors::Error,
    messaging::{MessageStream, ReplySink},
    Result,
};

#[derive(Clone, Debug)]
pub struct XmtpGatewayConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Server-side long-poll wait hint.
    pub poll_wait: Duration,
    /// Consecutive poll failures tolerated before the stream counts as lost.
    pub max_retries: u32,
}

impl XmtpGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            poll_wait: Duration::from_secs(30),
            max_retries: 5,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }
}

pub struct XmtpGateway {
    cfg: XmtpGatewayConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
    /// Set when the gateway is shutting the feed down for good.
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    seq: u64,
    sender: String,
    #[serde(default)]
    content: String,
    conversation: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    conversation: &'a str,
    content: &'a str,
}

impl From<WireMessage> for InboundMessage {
    fn from(w: WireMessage) -> Self {
        Self {
            seq: w.seq,
            sender: SenderId(w.sender),
            content: w.content,
            conversation: ConversationId(w.conversation),
        }
    }
}

impl XmtpGateway {
    pub fn new(cfg: XmtpGatewayConfig) -> Self {
        // The HTTP timeout sits above the long-poll window so an idle poll
        // returns empty instead of erroring.
        let http = reqwest::Client::builder()
            .timeout(cfg.poll_wait + Duration::from_secs(15))
            .build()
            .expect("reqwest client build");
        Self { cfg, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.cfg.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// The address the gateway speaks as; also the agent's own identity for
    /// the self-message filter.
    pub async fn identity(&self) -> Result<SenderId> {
        let resp = self
            .authorize(self.http.get(self.url("/v1/identity")))
            .send()
            .await
            .map_err(|e| Error::Stream(format!("gateway identity error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Stream(format!("gateway identity failed: {status}")));
        }

        let parsed: IdentityResponse = resp
            .json()
            .await
            .map_err(|e| Error::Stream(format!("gateway identity json error: {e}")))?;
        Ok(SenderId(parsed.address))
    }

    async fn poll_batch(&self, after_seq: Option<u64>) -> Result<PollResponse> {
        let mut query: Vec<(&str, String)> =
            vec![("wait_ms", self.cfg.poll_wait.as_millis().to_string())];
        if let Some(seq) = after_seq {
            query.push(("after_seq", seq.to_string()));
        }

        let resp = self
            .authorize(self.http.get(self.url("/v1/messages")).query(&query))
            .send()
            .await
            .map_err(|e| Error::Stream(format!("gateway poll error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Stream(format!("gateway poll failed: {status}")));
        }

        resp.json()
            .await
            .map_err(|e| Error::Stream(format!("gateway poll json error: {e}")))
    }
}

#[async_trait]
impl ReplySink for XmtpGateway {
    async fn reply(&self, conversation: &ConversationId, text: &str) -> Result<()> {
        let body = SendRequest {
            conversation: &conversation.0,
            content: text,
        };

        let resp = self
            .authorize(self.http.post(self.url("/v1/messages")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("gateway send error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "gateway send failed: {status} {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        Ok(())
    }
}

/// Cursor-driven view of the gateway feed.
///
/// Keeps an internal batch buffer; the cursor only advances as messages are
/// handed out, so a reconnect re-requests anything not yet consumed.
pub struct GatewayStream {
    gateway: Arc<XmtpGateway>,
    cursor: Option<u64>,
    buffer: VecDeque<InboundMessage>,
    failures: u32,
    closed: bool,
}

impl GatewayStream {
    pub fn new(gateway: Arc<XmtpGateway>, after_seq: Option<u64>) -> Self {
        Self {
            gateway,
            cursor: after_seq,
            buffer: VecDeque::new(),
            failures: 0,
            closed: false,
        }
    }
}

#[async_trait]
impl MessageStream for GatewayStream {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        loop {
            if let Some(msg) = self.buffer.pop_front() {
                self.cursor = Some(msg.seq);
                return Ok(Some(msg));
            }
            if self.closed {
                return Ok(None);
            }

            match self.gateway.poll_batch(self.cursor).await {
                Ok(batch) => {
                    self.failures = 0;
                    self.closed = batch.closed;
                    self.buffer
                        .extend(batch.messages.into_iter().map(InboundMessage::from));
                    // An empty, still-open batch is just a long-poll window
                    // expiring; loop and poll again.
                }
                Err(e) => {
                    self.failures += 1;
                    if self.failures > self.gateway.cfg.max_retries {
                        return Err(Error::Stream(format!(
                            "gateway unreachable after {} attempts: {e}",
                            self.failures
                        )));
                    }
                    let delay = backoff_delay(self.failures);
                    warn!(
                        attempt = self.failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "gateway poll failed, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// 500ms, 1s, 2s, 4s, ... capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    Duration::from_millis(500u64 << exp).min(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(6), Duration::from_secs(16));
        assert_eq!(backoff_delay(7), Duration::from_secs(30));
        assert_eq!(backoff_delay(100), Duration::from_secs(30));
    }

    #[test]
    fn poll_response_parses_messages() {
        let body = r#"{
            "messages": [
                {"seq": 12, "sender": "0xA", "content": "hi", "conversation": "/xmtp/0/dm-abc"},
                {"seq": 13, "sender": "0xB", "conversation": "/xmtp/0/dm-def"}
            ]
        }"#;
        let parsed: PollResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.messages.len(), 2);
        assert!(!parsed.closed);

        let msg: InboundMessage = parsed.messages.into_iter().next().unwrap().into();
        assert_eq!(msg.seq, 12);
        assert_eq!(msg.sender, SenderId("0xA".to_string()));
        assert_eq!(msg.conversation, ConversationId("/xmtp/0/dm-abc".to_string()));
    }

    #[test]
    fn poll_response_defaults_to_open_and_empty() {
        let parsed: PollResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.messages.is_empty());
        assert!(!parsed.closed);
    }

    #[test]
    fn missing_content_becomes_empty_string() {
        let body = r#"{"messages":[{"seq":1,"sender":"0xA","conversation":"c"}]}"#;
        let parsed: PollResponse = serde_json::from_str(body).unwrap();
        let msg: InboundMessage = parsed.messages.into_iter().next().unwrap().into();
        assert_eq!(msg.content, "");
    }

    #[test]
    fn send_request_carries_conversation_in_body() {
        let body = SendRequest {
            conversation: "/xmtp/0/dm-abc",
            content: "warning",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["conversation"], "/xmtp/0/dm-abc");
        assert_eq!(json["content"], "warning");
    }

    #[test]
    fn gateway_urls_strip_trailing_slash() {
        let gw = XmtpGateway::new(XmtpGatewayConfig::new("http://gateway.local:7700/"));
        assert_eq!(gw.url("/v1/messages"), "http://gateway.local:7700/v1/messages");
    }
}
