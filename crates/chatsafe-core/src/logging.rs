use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing for the agent.
///
/// Default: info for our crates, warn for everything else. Can be overridden
/// with `RUST_LOG`. Calling twice is a no-op so tests can init freely.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,chatsafe=info,chatsafe_core=info,chatsafe_moderation=info,\
             chatsafe_ledger=info,chatsafe_xmtp=info,{service_name}=info"
        ))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();
}
