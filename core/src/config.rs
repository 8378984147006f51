use crate::{redemption::RedemptionDisposal, rng::DEFAULT_CODE_LENGTH};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shared administrator password. Required; there is no built-in default.
    pub admin_password:      String,
    /// Whether a redeemed code is kept (marked used) or removed.
    pub redemption_disposal: RedemptionDisposal,
    /// Origin used to build customer-facing feedback links.
    pub public_base_url:     String,
    /// Characters per generated code token.
    pub code_length:         usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            admin_password:      String::new(),
            redemption_disposal: RedemptionDisposal::Mark,
            public_base_url:     "http://localhost:8080".into(),
            code_length:         DEFAULT_CODE_LENGTH,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file.
    /// In tests, use AppConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.admin_password.trim().is_empty() {
            anyhow::bail!("admin_password must be set");
        }
        if !(4..=32).contains(&self.code_length) {
            anyhow::bail!("code_length must be between 4 and 32, got {}", self.code_length);
        }
        if !self.public_base_url.starts_with("http://") && !self.public_base_url.starts_with("https://") {
            anyhow::bail!("public_base_url must be an http(s) URL, got {}", self.public_base_url);
        }
        Ok(())
    }

    /// Config with hardcoded values for use in tests.
    pub fn default_test() -> Self {
        Self {
            admin_password: "admin-test-password".into(),
            public_base_url: "https://feedback.test".into(),
            ..Self::default()
        }
    }
}
