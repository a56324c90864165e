/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain-level configuration consulted by the chained-BFT core.
//!
//! [`ChainConfig`] is built with a [`TypedBuilder`] and implements the
//! [`ChainConf`](crate::pluggables::ChainConf) trait, which is how every component reads it. The
//! Pacemaker's timeouts live in a separate [`TimeoutConfiguration`], which can be read from the
//! consensus extension key/value pairs of a chain configuration file.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{pluggables::ChainConf, types::crypto_primitives::HashType};

/// Extension config key for the base proposal timeout, in milliseconds.
pub const PROPOSER_TIMEOUT_MILL: &str = "ProposerTimeoutMill";
/// Extension config key for the per-round increment of the proposal timeout, in milliseconds.
pub const PROPOSER_TIMEOUT_INTERVAL_MILL: &str = "ProposerTimeoutIntervalMill";
/// Extension config key for the base round timeout, in milliseconds.
pub const ROUND_TIMEOUT_MILL: &str = "RoundTimeoutMill";
/// Extension config key for the per-round increment of the round timeout, in milliseconds.
pub const ROUND_TIMEOUT_INTERVAL_MILL: &str = "RoundTimeoutIntervalMill";

const DEFAULT_PROPOSAL_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_PROPOSAL_TIMEOUT_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_millis(6000);
const DEFAULT_ROUND_TIMEOUT_INTERVAL: Duration = Duration::from_millis(500);

/// Consensus algorithm a chain runs. The core mostly distinguishes single-node chains from the
/// rest.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConsensusType {
    Solo,
    Raft,
    Tbft,
    Hotstuff,
}

/// Base durations and linear increments for the two kinds of timeouts the
/// [Pacemaker](crate::pacemaker) arms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeoutConfiguration {
    pub proposal_timeout: Duration,
    pub proposal_timeout_interval: Duration,
    pub round_timeout: Duration,
    pub round_timeout_interval: Duration,
}

impl Default for TimeoutConfiguration {
    fn default() -> Self {
        Self {
            proposal_timeout: DEFAULT_PROPOSAL_TIMEOUT,
            proposal_timeout_interval: DEFAULT_PROPOSAL_TIMEOUT_INTERVAL,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            round_timeout_interval: DEFAULT_ROUND_TIMEOUT_INTERVAL,
        }
    }
}

impl TimeoutConfiguration {
    /// Build a `TimeoutConfiguration` from the consensus extension config of a chain.
    ///
    /// Keys other than the four timeout keys are ignored. A timeout key whose value fails
    /// [`parse_timeout_millis`] is logged and leaves its default in place.
    pub fn from_ext_config<'a, I>(ext_config: I) -> TimeoutConfiguration
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut timeouts = TimeoutConfiguration::default();
        for (key, value) in ext_config {
            let slot = match key {
                PROPOSER_TIMEOUT_MILL => &mut timeouts.proposal_timeout,
                PROPOSER_TIMEOUT_INTERVAL_MILL => &mut timeouts.proposal_timeout_interval,
                ROUND_TIMEOUT_MILL => &mut timeouts.round_timeout,
                ROUND_TIMEOUT_INTERVAL_MILL => &mut timeouts.round_timeout_interval,
                _ => continue,
            };
            match parse_timeout_millis(key, value) {
                Ok(duration) => *slot = duration,
                Err(err) => log::warn!("ignoring consensus ext config: {:?}", err),
            }
        }
        timeouts
    }
}

/// Parse a millisecond count from the consensus extension config.
///
/// The value must be a positive integer small enough that its nanosecond count still fits in an
/// `i64`.
pub fn parse_timeout_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let millis: i64 = value.trim().parse().map_err(|_| ConfigError::NotAnInteger {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    if millis <= 0 {
        return Err(ConfigError::NotPositive {
            key: key.to_string(),
            value: millis,
        });
    }
    if millis > i64::MAX / 1_000_000 {
        return Err(ConfigError::Overflow {
            key: key.to_string(),
            value: millis,
        });
    }
    Ok(Duration::from_millis(millis as u64))
}

/// How a node handles proposals that arrive with their transactions stripped to ids.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MessageTurbo {
    pub enabled: bool,
    /// How many times to ask the pool for missing transactions before giving up.
    pub retry_time: u32,
    /// How long to wait between asks.
    pub retry_interval: Duration,
}

impl Default for MessageTurbo {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_time: 500,
            retry_interval: Duration::from_millis(20),
        }
    }
}

/// Static configuration of a chain, as seen by the chained-BFT core.
#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainConfig]. On the builder call the following methods to construct a valid [ChainConfig].

    Required:
    - `.chain_id(...)`
    - `.consensus_type(...)`

    Optional:
    - `.hash_type(...)`
    - `.block_tx_capacity(...)`
    - `.sql_enabled(...)`
    - `.message_turbo(...)`
    - `.timeouts(...)`
"))]
pub struct ChainConfig {
    #[builder(setter(into, doc = "Set the chain ID of the blockchain. Required."))]
    pub chain_id: String,
    #[builder(setter(doc = "Set the consensus algorithm the chain runs. Required."))]
    pub consensus_type: ConsensusType,
    #[builder(default = HashType::Sha256, setter(doc = "Set the hash algorithm blocks are hashed with. Defaults to SHA-256."))]
    pub hash_type: HashType,
    #[builder(default = 1000, setter(doc = "Set the maximum number of transactions a block may carry. Defaults to 1000."))]
    pub block_tx_capacity: u32,
    #[builder(default = false, setter(doc = "Set whether contract state is kept in a SQL database. Defaults to false."))]
    pub sql_enabled: bool,
    #[builder(default, setter(doc = "Set the message turbo settings. Turbo is off by default."))]
    pub message_turbo: MessageTurbo,
    #[builder(default, setter(doc = "Set the Pacemaker's timeouts. Optional."))]
    pub timeouts: TimeoutConfiguration,
}

impl ChainConf for ChainConfig {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn consensus_type(&self) -> ConsensusType {
        self.consensus_type
    }

    fn hash_type(&self) -> HashType {
        self.hash_type
    }

    fn block_tx_capacity(&self) -> u32 {
        self.block_tx_capacity
    }

    fn sql_enabled(&self) -> bool {
        self.sql_enabled
    }

    fn message_turbo(&self) -> MessageTurbo {
        self.message_turbo
    }
}

/// Enumerates the ways a configuration value can be rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    NotAnInteger { key: String, value: String },
    NotPositive { key: String, value: i64 },
    Overflow { key: String, value: i64 },
}

#[test]
fn parse_timeout_millis_test() {
    assert_eq!(
        parse_timeout_millis(ROUND_TIMEOUT_MILL, "10"),
        Ok(Duration::from_millis(10))
    );
    assert!(matches!(
        parse_timeout_millis(ROUND_TIMEOUT_MILL, "-1"),
        Err(ConfigError::NotPositive { .. })
    ));
    assert!(matches!(
        parse_timeout_millis(ROUND_TIMEOUT_MILL, "0"),
        Err(ConfigError::NotPositive { .. })
    ));
    assert!(matches!(
        parse_timeout_millis(ROUND_TIMEOUT_MILL, "ten"),
        Err(ConfigError::NotAnInteger { .. })
    ));
    assert!(matches!(
        parse_timeout_millis(ROUND_TIMEOUT_MILL, &i64::MAX.to_string()),
        Err(ConfigError::Overflow { .. })
    ));
}

#[test]
fn timeouts_from_ext_config_test() {
    let ext_config = [
        (ROUND_TIMEOUT_MILL, "3000"),
        (PROPOSER_TIMEOUT_INTERVAL_MILL, "-5"),
        ("SomeOtherKey", "1"),
        (ROUND_TIMEOUT_INTERVAL_MILL, "250"),
    ];
    let timeouts = TimeoutConfiguration::from_ext_config(ext_config);

    assert_eq!(timeouts.round_timeout, Duration::from_millis(3000));
    assert_eq!(timeouts.round_timeout_interval, Duration::from_millis(250));
    assert_eq!(timeouts.proposal_timeout, DEFAULT_PROPOSAL_TIMEOUT);
    assert_eq!(timeouts.proposal_timeout_interval, DEFAULT_PROPOSAL_TIMEOUT_INTERVAL);
}
