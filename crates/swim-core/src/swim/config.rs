//! Protocol configuration.
//!
//! Durations are written as plain millisecond integers so config files stay
//! readable (`probeInterval: 1000`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for every SWIM controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwimConfig {
    /// How often to probe the next member (default: 1s)
    #[serde(default = "default_probe_interval", with = "duration_ms")]
    pub probe_interval: Duration,

    /// How long to wait for a direct ack (default: 500ms)
    #[serde(default = "default_probe_timeout", with = "duration_ms")]
    pub probe_timeout: Duration,

    /// Number of members asked to probe indirectly (default: 3)
    #[serde(default = "default_probe_indirect_nodes")]
    pub probe_indirect_nodes: usize,

    /// How long to wait for any relayed ack (default: 1s)
    #[serde(default = "default_probe_indirect_timeout", with = "duration_ms")]
    pub probe_indirect_timeout: Duration,

    /// Scales the suspicion timeout, in probe intervals (default: 5)
    #[serde(default = "default_suspicion_multiplier")]
    pub suspicion_multiplier: u32,

    /// How often to pull a full snapshot from a peer (default: 10s)
    #[serde(default = "default_sync_interval", with = "duration_ms")]
    pub sync_interval: Duration,

    /// How long to wait for a sync response (default: 2s)
    #[serde(default = "default_sync_timeout", with = "duration_ms")]
    pub sync_timeout: Duration,

    /// How long to wait for any contact point to answer a join (default: 1s)
    #[serde(default = "default_join_timeout", with = "duration_ms")]
    pub join_timeout: Duration,

    /// Delay before retrying a failed join (default: 1s)
    #[serde(default = "default_join_interval", with = "duration_ms")]
    pub join_interval: Duration,

    /// Upper bound on how long leave() waits for acks (default: 1s)
    #[serde(default = "default_leave_timeout", with = "duration_ms")]
    pub leave_timeout: Duration,

    /// Controls gossip retransmissions and the leave sample size (default: 3)
    #[serde(default = "default_retransmission_multiplier")]
    pub retransmission_multiplier: u32,

    /// Maximum events piggybacked on one message (default: 8)
    #[serde(default = "default_max_gossip_per_message")]
    pub max_gossip_per_message: usize,

    /// How long removed members are remembered (default: 60s)
    #[serde(default = "default_tombstone_timeout", with = "duration_ms")]
    pub tombstone_timeout: Duration,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            probe_indirect_nodes: default_probe_indirect_nodes(),
            probe_indirect_timeout: default_probe_indirect_timeout(),
            suspicion_multiplier: default_suspicion_multiplier(),
            sync_interval: default_sync_interval(),
            sync_timeout: default_sync_timeout(),
            join_timeout: default_join_timeout(),
            join_interval: default_join_interval(),
            leave_timeout: default_leave_timeout(),
            retransmission_multiplier: default_retransmission_multiplier(),
            max_gossip_per_message: default_max_gossip_per_message(),
            tombstone_timeout: default_tombstone_timeout(),
        }
    }
}

impl SwimConfig {
    /// Number of times one event is piggybacked before it is dropped.
    ///
    /// `multiplier * ceil(log10(n + 1))`, never below one.
    pub fn retransmit_limit(&self, cluster_size: usize) -> u32 {
        gossip_spread(self.retransmission_multiplier, cluster_size) as u32
    }

    /// How many members receive a leave notification directly.
    pub fn leave_sample_size(&self, cluster_size: usize) -> usize {
        gossip_spread(self.retransmission_multiplier, cluster_size).min(cluster_size)
    }

    /// Time a member stays suspect before it is confirmed dead.
    ///
    /// Grows with log10 of the cluster size, so larger clusters, which need
    /// more rounds to spread a refutation, wait longer.
    pub fn suspicion_timeout(&self, cluster_size: usize) -> Duration {
        let scale = (cluster_size.max(1) as f64).log10().max(1.0);
        let secs = self.probe_interval.as_secs_f64() * self.suspicion_multiplier as f64 * scale;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Gossip fanout for a cluster of `cluster_size` members.
pub fn gossip_spread(multiplier: u32, cluster_size: usize) -> usize {
    let rounds = ((cluster_size as f64) + 1.0).log10().ceil() as usize;
    (multiplier as usize * rounds).max(1)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_probe_indirect_nodes() -> usize {
    3
}

fn default_probe_indirect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_suspicion_multiplier() -> u32 {
    5
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_join_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_join_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_leave_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_retransmission_multiplier() -> u32 {
    3
}

fn default_max_gossip_per_message() -> usize {
    8
}

fn default_tombstone_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Serde adapter: `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
