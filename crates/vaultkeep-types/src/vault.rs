//! Vault registry entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, TypeError};

/// Length of a fully expanded Sui object/address id in hex characters.
const ADDRESS_HEX_LEN: usize = 64;

/// A normalized on-chain vault address (`0x` + 64 lowercase hex chars).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultAddress(String);

impl VaultAddress {
    /// Parse and normalize an address.
    ///
    /// Accepts short forms (`0x2`) and left-pads them to the full width.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TypeError::InvalidAddress(raw.to_string()))?;

        if hex_part.is_empty()
            || hex_part.len() > ADDRESS_HEX_LEN
            || !hex_part.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(TypeError::InvalidAddress(raw.to_string()));
        }

        Ok(Self(format!(
            "0x{:0>width$}",
            hex_part.to_ascii_lowercase(),
            width = ADDRESS_HEX_LEN
        )))
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines (`0x1234…abcd`).
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for VaultAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VaultAddress {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VaultAddress {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VaultAddress> for String {
    fn from(value: VaultAddress) -> Self {
        value.0
    }
}

/// Compounding status of a vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// Waiting for its interval to elapse; last cycle succeeded (or none ran).
    Idle,
    /// A compound cycle is running.
    InProgress,
    /// The last cycle failed; the on-chain action did not happen.
    Failed,
    /// The last cycle compounded on-chain but could not be fully recorded.
    Degraded,
}

impl VaultStatus {
    /// Stable string form used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
            Self::Degraded => "degraded",
        }
    }
}

impl FromStr for VaultStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "in_progress" => Ok(Self::InProgress),
            "failed" => Ok(Self::Failed),
            "degraded" => Ok(Self::Degraded),
            other => Err(TypeError::UnknownStatus(other.to_string())),
        }
    }
}

/// A vault under management.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Store row id.
    pub id: i64,
    pub address: VaultAddress,
    /// Compounding interval in seconds.
    pub interval_secs: u64,
    /// `None` until the first successful compound.
    pub last_compounded_at: Option<Timestamp>,
    /// Start time of the most recent cycle, whatever its outcome.
    pub last_attempt_at: Option<Timestamp>,
    pub status: VaultStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Vault {
    /// Whether the compounding interval has elapsed at `now`.
    ///
    /// A vault that never compounded is always past its interval.
    pub fn interval_elapsed(&self, now: Timestamp) -> bool {
        match self.last_compounded_at {
            Some(last) => now.saturating_sub(last) >= self.interval_secs,
            None => true,
        }
    }

    /// Whether the vault is due at `now`.
    ///
    /// Failed and degraded vaults additionally wait `failure_cooldown`
    /// seconds after their last attempt.
    pub fn is_due(&self, now: Timestamp, failure_cooldown: u64) -> bool {
        match self.status {
            VaultStatus::InProgress => false,
            VaultStatus::Idle => self.interval_elapsed(now),
            VaultStatus::Failed | VaultStatus::Degraded => {
                let cooled = self
                    .last_attempt_at
                    .map_or(true, |at| now.saturating_sub(at) >= failure_cooldown);
                cooled && self.interval_elapsed(now)
            }
        }
    }
}
