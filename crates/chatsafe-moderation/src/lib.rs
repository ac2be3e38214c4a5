//! Moderation adapter (OpenAI `moderations` endpoint).
//!
//! Implements the classifier port of `chatsafe-core`. A missing API key puts
//! the client into degraded mode (every call short-circuits to a fail-open
//! verdict) instead of failing construction: message flow must not halt
//! because moderation is unavailable.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use chatsafe_core::{classify::ClassifierPort, domain::Verdict, errors::Error, Result};

const MODERATION_URL: &str = "https://api.openai.com/v1/moderations";

#[derive(Clone, Debug)]
pub struct OpenAiModerationClient {
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiModerationClient {
    pub fn new(api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client build");
        Self { api_key, http }
    }
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
}

/// Map one service result onto a verdict. The reason is the comma-joined,
/// sorted set of category names the service marked true; a flagged result
/// with no true category falls back to a generic reason.
fn verdict_from(result: &ModerationResult) -> Verdict {
    let categories: BTreeSet<String> = result
        .categories
        .iter()
        .filter(|(_, &hit)| hit)
        .map(|(name, _)| name.clone())
        .collect();

    if !result.flagged {
        return Verdict {
            flagged: false,
            reason: String::new(),
            categories,
        };
    }

    let reason = if categories.is_empty() {
        "General policy violation".to_string()
    } else {
        categories.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    Verdict {
        flagged: true,
        reason,
        categories,
    }
}

#[async_trait]
impl ClassifierPort for OpenAiModerationClient {
    fn is_degraded(&self) -> bool {
        self.api_key.is_none()
    }

    async fn classify(&self, content: &str) -> Result<Verdict> {
        if content.trim().is_empty() {
            // Nothing to moderate; skip the paid call entirely.
            return Ok(Verdict::clean("empty content"));
        }

        let Some(api_key) = &self.api_key else {
            return Ok(Verdict::clean("classifier unavailable"));
        };

        let resp = self
            .http
            .post(MODERATION_URL)
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "input": content }))
            .send()
            .await
            .map_err(|e| Error::Classification(format!("moderation request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Classification(format!(
                "moderation request failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ModerationResponse = resp
            .json()
            .await
            .map_err(|e| Error::Classification(format!("moderation json error: {e}")))?;

        let Some(first) = parsed.results.first() else {
            return Err(Error::Classification(
                "moderation response had no results".to_string(),
            ));
        };

        Ok(verdict_from(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(flagged: bool, hits: &[(&str, bool)]) -> ModerationResult {
        ModerationResult {
            flagged,
            categories: hits
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    #[test]
    fn reason_joins_true_categories_sorted() {
        let v = verdict_from(&result(
            true,
            &[("violence", true), ("harassment", true), ("self-harm", false)],
        ));
        assert!(v.flagged);
        assert_eq!(v.reason, "harassment, violence");
        assert_eq!(v.categories.len(), 2);
    }

    #[test]
    fn flagged_without_categories_gets_generic_reason() {
        let v = verdict_from(&result(true, &[("violence", false)]));
        assert!(v.flagged);
        assert_eq!(v.reason, "General policy violation");
    }

    #[test]
    fn unflagged_result_has_empty_reason() {
        let v = verdict_from(&result(false, &[("violence", false)]));
        assert!(!v.flagged);
        assert_eq!(v.reason, "");
    }

    #[test]
    fn response_parsing_tolerates_missing_categories() {
        let parsed: ModerationResponse =
            serde_json::from_str(r#"{"results":[{"flagged":true}]}"#).unwrap();
        let v = verdict_from(&parsed.results[0]);
        assert_eq!(v.reason, "General policy violation");
    }

    #[test]
    fn response_parsing_matches_service_shape() {
        let body = r#"{
            "id": "modr-123",
            "model": "omni-moderation-latest",
            "results": [{
                "flagged": true,
                "categories": {"harassment": true, "hate": false},
                "category_scores": {"harassment": 0.98, "hate": 0.02}
            }]
        }"#;
        let parsed: ModerationResponse = serde_json::from_str(body).unwrap();
        let v = verdict_from(&parsed.results[0]);
        assert_eq!(v.reason, "harassment");
    }

    #[tokio::test]
    async fn degraded_client_short_circuits_fail_open() {
        let client = OpenAiModerationClient::new(None);
        assert!(client.is_degraded());

        let v = client.classify("arbitrary text").await.unwrap();
        assert!(!v.flagged);
        assert_eq!(v.reason, "classifier unavailable");
    }

    #[tokio::test]
    async fn empty_content_never_reaches_the_service() {
        // The key is set but the URL would be unreachable; an early return is
        // the only way this resolves without error.
        let client = OpenAiModerationClient::new(Some("sk-test".to_string()));

        let v = client.classify("   ").await.unwrap();
        assert!(!v.flagged);
        assert_eq!(v.reason, "empty content");
    }
}
