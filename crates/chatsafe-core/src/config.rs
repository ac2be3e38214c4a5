use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the agent.
///
/// The gateway and signer endpoints are fatal when absent: the pipeline
/// cannot run without a stream or a ledger. The classification credential is
/// optional and its absence degrades moderation to fail-open instead.
#[derive(Clone, Debug)]
pub struct Config {
    // Stream
    pub gateway_url: String,
    pub gateway_token: Option<String>,

    // Ledger
    pub signer_url: String,
    pub signer_token: Option<String>,
    pub contract_address: String,

    // Classification
    pub openai_api_key: Option<String>,

    // Per-call bounds
    pub classify_timeout: Duration,
    pub reply_timeout: Duration,
    pub ledger_timeout: Duration,

    // Stream hardening
    pub stream_max_retries: u32,
    pub stream_poll_wait: Duration,

    // Durability
    pub checkpoint_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let gateway_url = env_str("XMTP_GATEWAY_URL").and_then(non_empty).ok_or_else(|| {
            Error::Config("XMTP_GATEWAY_URL environment variable is required".to_string())
        })?;
        let gateway_token = env_str("XMTP_GATEWAY_TOKEN").and_then(non_empty);

        let signer_url = env_str("CHATSAFE_SIGNER_URL").and_then(non_empty).ok_or_else(|| {
            Error::Config("CHATSAFE_SIGNER_URL environment variable is required".to_string())
        })?;
        let signer_token = env_str("CHATSAFE_SIGNER_TOKEN").and_then(non_empty);

        let contract_address = env_str("CHATSAFE_CONTRACT_ADDRESS")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config(
                    "CHATSAFE_CONTRACT_ADDRESS environment variable is required".to_string(),
                )
            })?;
        if !is_valid_contract_address(&contract_address) {
            return Err(Error::Config(format!(
                "CHATSAFE_CONTRACT_ADDRESS is not a valid address: {contract_address}"
            )));
        }

        let openai_api_key = env_str("OPENAI_API_KEY").and_then(non_empty);

        let classify_timeout =
            Duration::from_millis(env_u64("CLASSIFY_TIMEOUT_MS").unwrap_or(8_000));
        let reply_timeout = Duration::from_millis(env_u64("REPLY_TIMEOUT_MS").unwrap_or(10_000));
        let ledger_timeout = Duration::from_millis(env_u64("LEDGER_TIMEOUT_MS").unwrap_or(90_000));

        let stream_max_retries = env_u32("STREAM_MAX_RETRIES").unwrap_or(5);
        let stream_poll_wait =
            Duration::from_millis(env_u64("STREAM_POLL_WAIT_MS").unwrap_or(30_000));

        let checkpoint_file = PathBuf::from(
            env_str("CHECKPOINT_FILE").unwrap_or("/tmp/chatsafe-checkpoint.json".to_string()),
        );

        Ok(Self {
            gateway_url,
            gateway_token,
            signer_url,
            signer_token,
            contract_address,
            openai_api_key,
            classify_timeout,
            reply_timeout,
            ledger_timeout,
            stream_max_retries,
            stream_poll_wait,
            checkpoint_file,
        })
    }
}

/// A ledger address is `0x` followed by 40 hex characters.
pub fn is_valid_contract_address(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("0x") else {
        return false;
    };
    hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_address_validation() {
        assert!(is_valid_contract_address(
            "0x8ba1f109551bD432803012645Ac136ddd64DBA72"
        ));
        assert!(!is_valid_contract_address(
            "8ba1f109551bD432803012645Ac136ddd64DBA72"
        ));
        assert!(!is_valid_contract_address("0x1234"));
        assert!(!is_valid_contract_address(
            "0xZZa1f109551bD432803012645Ac136ddd64DBA72"
        ));
        assert!(!is_valid_contract_address(""));
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty("x".to_string()), Some("x".to_string()));
    }
}
