//! Ledger adapter over the transaction signer sidecar.
//!
//! The sidecar owns the wallet and chain connectivity; this crate only knows
//! "submit one append against the contract, then poll the returned handle
//! until the chain accepts it". All submissions ride one signing identity,
//! whose nonces must increase strictly, so concurrent appends are serialized
//! through a single submission queue even when the pipeline dispatches
//! several messages at once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use chatsafe_core::{
    domain::{Infraction, LedgerRecord, RecordReceipt},
    errors::Error,
    ledger::LedgerPort,
    Result,
};

#[derive(Clone, Debug)]
pub struct SignerLedgerConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub contract_address: String,
    /// Spacing between confirmation polls.
    pub poll_interval: Duration,
}

impl SignerLedgerConfig {
    pub fn new(base_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            contract_address: contract_address.into(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

pub struct SignerLedger {
    cfg: SignerLedgerConfig,
    http: reqwest::Client,
    submit_queue: Mutex<()>,
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    subject: &'a str,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    tx_hash: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct TxStatusResponse {
    status: TxStatus,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    infractions: Vec<WireRecord>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    subject: String,
    reason: String,
    recorded_at: u64,
}

impl SignerLedger {
    pub fn new(cfg: SignerLedgerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client build");
        Self {
            cfg,
            http,
            submit_queue: Mutex::new(()),
        }
    }

    fn infractions_url(&self) -> String {
        format!(
            "{}/v1/contracts/{}/infractions",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.contract_address
        )
    }

    fn transaction_url(&self, tx_hash: &str) -> String {
        format!(
            "{}/v1/transactions/{}",
            self.cfg.base_url.trim_end_matches('/'),
            tx_hash
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn submit(&self, infraction: &Infraction) -> Result<String> {
        let body = AppendRequest {
            // Subject and reason go through exactly as given; the signer owns
            // any transport-level encoding.
            subject: &infraction.subject.0,
            reason: &infraction.reason,
        };

        let resp = self
            .authorize(self.http.post(self.infractions_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Ledger(format!("signer request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Ledger(format!(
                "signer rejected submission: {status} {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: AppendResponse = resp
            .json()
            .await
            .map_err(|e| Error::Ledger(format!("signer json error: {e}")))?;
        Ok(parsed.tx_hash)
    }

    /// Poll the pending-transaction handle until the chain settles it. The
    /// loop itself is unbounded; callers own the overall deadline.
    async fn wait_confirmed(&self, tx_hash: &str) -> Result<()> {
        loop {
            let resp = self
                .authorize(self.http.get(self.transaction_url(tx_hash)))
                .send()
                .await
                .map_err(|e| Error::Ledger(format!("confirmation poll error: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                return Err(Error::Ledger(format!(
                    "confirmation poll failed: {status}"
                )));
            }

            let parsed: TxStatusResponse = resp
                .json()
                .await
                .map_err(|e| Error::Ledger(format!("confirmation json error: {e}")))?;

            match parsed.status {
                TxStatus::Confirmed => return Ok(()),
                TxStatus::Failed => {
                    return Err(Error::Ledger(format!(
                        "transaction failed: {}",
                        parsed.detail.unwrap_or_else(|| "no detail".to_string())
                    )));
                }
                TxStatus::Pending => {
                    debug!(tx = %tx_hash, "transaction pending");
                    sleep(self.cfg.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl LedgerPort for SignerLedger {
    async fn append_infraction(&self, infraction: &Infraction) -> Result<RecordReceipt> {
        // One signing identity: submissions must reach the signer strictly in
        // sequence or nonces collide. Confirmation waits can overlap, so the
        // slot is released as soon as the submission is accepted.
        let tx_hash = {
            let _slot = self.submit_queue.lock().await;
            self.submit(infraction).await?
        };

        self.wait_confirmed(&tx_hash).await?;

        Ok(RecordReceipt {
            transaction_ref: tx_hash,
            confirmed: true,
        })
    }

    async fn list_infractions(&self) -> Result<Vec<LedgerRecord>> {
        let resp = self
            .authorize(self.http.get(self.infractions_url()))
            .send()
            .await
            .map_err(|e| Error::Ledger(format!("ledger read error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Ledger(format!("ledger read failed: {status}")));
        }

        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| Error::Ledger(format!("ledger read json error: {e}")))?;

        Ok(parsed
            .infractions
            .into_iter()
            .map(|r| LedgerRecord {
                subject: r.subject,
                reason: r.reason,
                recorded_at: r.recorded_at,
            })
            .collect())
    }
}
