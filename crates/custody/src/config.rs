//! Vault configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when evidence cannot be issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidencePolicy {
    /// Signing failure aborts the ingest.
    Required,
    /// Signing failure stores the document flagged as unsigned.
    #[default]
    BestEffort,
    /// Never sign.
    Disabled,
}

/// Configuration for the [`Vault`](crate::Vault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub evidence: EvidencePolicy,
    /// Chain every new document into the ledger.
    pub ledger_enabled: bool,
    /// Upper bound on the database part of an ingest.
    pub db_timeout_ms: u64,
    /// Largest accepted document.
    pub max_document_bytes: usize,
}

impl VaultConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            evidence: EvidencePolicy::BestEffort,
            ledger_enabled: true,
            db_timeout_ms: 10_000,
            max_document_bytes: 50 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: VaultConfig =
            serde_json::from_str(r#"{"evidence": "required", "db_timeout_ms": 2000}"#).unwrap();
        assert_eq!(config.evidence, EvidencePolicy::Required);
        assert_eq!(config.db_timeout(), Duration::from_secs(2));
        assert!(config.ledger_enabled);
        assert_eq!(config.max_document_bytes, VaultConfig::default().max_document_bytes);
    }
}
