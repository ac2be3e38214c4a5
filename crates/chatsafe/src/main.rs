use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chatsafe_core::{
    checkpoint::CheckpointStore,
    classify::ClassifierPort,
    config::Config,
    logging,
    pipeline::{Pipeline, PipelineTimeouts},
};
use chatsafe_ledger::{SignerLedger, SignerLedgerConfig};
use chatsafe_moderation::OpenAiModerationClient;
use chatsafe_xmtp::{GatewayStream, XmtpGateway, XmtpGatewayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("chatsafe");

    let cfg = Config::load().context("invalid configuration")?;

    let gateway = Arc::new(XmtpGateway::new(
        XmtpGatewayConfig::new(cfg.gateway_url.clone())
            .with_token(cfg.gateway_token.clone())
            .with_retries(cfg.stream_max_retries)
            .with_poll_wait(cfg.stream_poll_wait),
    ));
    let own_identity = gateway
        .identity()
        .await
        .context("failed to resolve agent identity from gateway")?;

    let classifier = Arc::new(OpenAiModerationClient::new(cfg.openai_api_key.clone()));
    if classifier.is_degraded() {
        warn!("OPENAI_API_KEY not set: moderation runs fail-open, messages pass unchecked");
    }

    let ledger = Arc::new(SignerLedger::new(
        SignerLedgerConfig::new(cfg.signer_url.clone(), cfg.contract_address.clone())
            .with_token(cfg.signer_token.clone()),
    ));

    info!(
        agent = %own_identity.0,
        contract = %cfg.contract_address,
        "ChatSafe agent starting"
    );

    let checkpoint = CheckpointStore::new(cfg.checkpoint_file.clone());
    let resume_after = checkpoint.load();
    match resume_after {
        Some(seq) => info!(after_seq = seq, "resuming stream after checkpoint"),
        None => info!("no checkpoint found, consuming from the present"),
    }

    let pipeline = Arc::new(
        Pipeline::new(classifier, ledger, gateway.clone(), own_identity)
            .with_timeouts(PipelineTimeouts {
                classify: cfg.classify_timeout,
                reply: cfg.reply_timeout,
                ledger: cfg.ledger_timeout,
            })
            .with_checkpoint(checkpoint),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                shutdown.cancel();
            }
        });
    }

    let mut stream = GatewayStream::new(gateway, resume_after);
    let stats = pipeline
        .run(&mut stream, shutdown)
        .await
        .context("message stream failed")?;

    info!(
        processed = stats.processed,
        flagged = stats.flagged,
        "agent stopped"
    );
    Ok(())
}
