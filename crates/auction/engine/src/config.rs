//! Engine configuration

use auction_types::Amount;
use serde::{Deserialize, Serialize};

/// Tunables shared by every engine component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Smallest amount a sealed bid may carry
    #[serde(default = "default_min_bid_amount")]
    pub min_bid_amount: Amount,

    /// Window length of a freshly opened fixed-window tiebreaker
    #[serde(default = "default_tiebreaker_minutes")]
    pub default_tiebreaker_minutes: u32,

    /// Inactivity after which a continuous tiebreaker closes
    #[serde(default = "default_continuous_inactivity_secs")]
    pub continuous_inactivity_secs: u64,

    /// Broadcast buffer for round and tiebreaker events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_min_bid_amount() -> Amount {
    10
}

fn default_tiebreaker_minutes() -> u32 {
    60
}

fn default_continuous_inactivity_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_bid_amount: default_min_bid_amount(),
            default_tiebreaker_minutes: default_tiebreaker_minutes(),
            continuous_inactivity_secs: default_continuous_inactivity_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"min_bid_amount": 25}"#).unwrap();
        assert_eq!(config.min_bid_amount, 25);
        assert_eq!(config.default_tiebreaker_minutes, 60);
        assert_eq!(config.continuous_inactivity_secs, 300);
    }
}
