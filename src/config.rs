// ⚙️ Matcher configuration
// Loaded from <state-dir>/matcher.toml when present, defaults otherwise.

use crate::entities::SLOTS_PER_RECIPIENT;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "matcher.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Cards each recipient needs. Fixed by the program; only 10 is accepted.
    pub slots_per_recipient: usize,

    /// Distinct stores a donor may use before an extra store is an exception
    pub preferred_store_limit: usize,

    /// Distinct stores a donor may never exceed
    pub store_hard_limit: usize,

    /// Face value of one card, in dollars
    pub card_value_usd: u32,

    /// Name recorded as the actor of audit events
    pub actor: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            slots_per_recipient: SLOTS_PER_RECIPIENT,
            preferred_store_limit: 2,
            store_hard_limit: 3,
            card_value_usd: 20,
            actor: "donation-match".to_string(),
        }
    }
}

impl MatcherConfig {
    /// Read `matcher.toml` from the state directory, falling back to defaults
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(MatcherConfig::default());
        }

        let text = fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded matcher config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: MatcherConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots_per_recipient != SLOTS_PER_RECIPIENT {
            return Err(Error::Config(format!(
                "slots_per_recipient must be {}, got {}",
                SLOTS_PER_RECIPIENT, self.slots_per_recipient
            )));
        }
        if self.preferred_store_limit == 0 {
            return Err(Error::Config(
                "preferred_store_limit must be at least 1".to_string(),
            ));
        }
        if self.store_hard_limit < self.preferred_store_limit {
            return Err(Error::Config(format!(
                "store_hard_limit ({}) is below preferred_store_limit ({})",
                self.store_hard_limit, self.preferred_store_limit
            )));
        }
        if self.card_value_usd == 0 {
            return Err(Error::Config("card_value_usd must be positive".to_string()));
        }
        Ok(())
    }
}
