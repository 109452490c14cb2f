//! Defaults for beacon cadence and peer liveness timers.

use std::time::Duration;

/// UDP broadcast port for presence beacons.
pub const BEACON_PORT: u16 = 5670;
/// Broadcast cadence for this node's own beacon.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(1);
/// How long after the last observed activity a peer is PINGed to confirm liveness.
pub const EVASIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long after the last observed activity a peer is considered gone.
pub const EXPIRED_TIMEOUT: Duration = Duration::from_secs(30);
/// Cadence of the liveness sweep.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// IANA dynamic/private port range the inbound socket binds into.
pub const DYNAMIC_PORT_LOW: u16 = 0xC000;
pub const DYNAMIC_PORT_HIGH: u16 = 0xFFFF;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub beacon_port: u16,
    pub beacon_interval: Duration,
    pub evasive_timeout: Duration,
    pub expired_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            beacon_port: BEACON_PORT,
            beacon_interval: BEACON_INTERVAL,
            evasive_timeout: EVASIVE_TIMEOUT,
            expired_timeout: EXPIRED_TIMEOUT,
            reap_interval: REAP_INTERVAL,
        }
    }
}
