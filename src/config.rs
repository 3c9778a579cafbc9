//! Host-wide and per-connection configuration (`SPEC_FULL.md` §4.10), grounded on
//! `original_source/lib/rudp/network_config.cc`'s clamp-and-bundle role ahead of host
//! construction.

use crate::error::{Error, Result};
use crate::{
    HOST_DEFAULT_MAXIMUM_SEGMENT_SIZE, HOST_DEFAULT_MTU, PEER_MAXIMUM_WINDOW_SIZE, PROTOCOL_MAXIMUM_CHANNEL_COUNT,
    PROTOCOL_MAXIMUM_MTU, PROTOCOL_MAXIMUM_PEER_ID, PROTOCOL_MINIMUM_CHANNEL_COUNT, PROTOCOL_MINIMUM_MTU,
};

/// Host-wide constructor parameters (spec.md §3's Host attributes). The bind address is supplied
/// separately to the socket, not bundled here.
#[derive(Clone)]
pub struct HostConfig {
    pub peer_count: usize,
    pub channel_limit: u32,
    pub incoming_bandwidth: u32,
    pub outgoing_bandwidth: u32,
    pub mtu: u32,
    pub maximum_segment_size: u32,
    pub checksum: Option<crate::ChecksumFn>,
    pub compressor: Option<std::rc::Rc<dyn crate::Compressor>>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            peer_count: 32,
            channel_limit: PROTOCOL_MAXIMUM_CHANNEL_COUNT,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            mtu: HOST_DEFAULT_MTU,
            maximum_segment_size: HOST_DEFAULT_MAXIMUM_SEGMENT_SIZE,
            checksum: None,
            compressor: None,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.peer_count == 0 || self.peer_count > PROTOCOL_MAXIMUM_PEER_ID as usize {
            return Err(Error::InputInvalid(format!(
                "peer_count {} out of range 1..={}",
                self.peer_count, PROTOCOL_MAXIMUM_PEER_ID
            )));
        }
        if self.channel_limit < PROTOCOL_MINIMUM_CHANNEL_COUNT || self.channel_limit > PROTOCOL_MAXIMUM_CHANNEL_COUNT {
            return Err(Error::InputInvalid(format!(
                "channel_limit {} out of range {}..={}",
                self.channel_limit, PROTOCOL_MINIMUM_CHANNEL_COUNT, PROTOCOL_MAXIMUM_CHANNEL_COUNT
            )));
        }
        if self.mtu < PROTOCOL_MINIMUM_MTU || self.mtu > PROTOCOL_MAXIMUM_MTU {
            return Err(Error::InputInvalid(format!(
                "mtu {} out of range {}..={}",
                self.mtu, PROTOCOL_MINIMUM_MTU, PROTOCOL_MAXIMUM_MTU
            )));
        }
        Ok(())
    }
}

/// Per-connection parameters passed to `Host::connect` (spec.md §6's `Connect(addr,
/// channel_count, user_data)`).
#[derive(Clone, Copy)]
pub struct PeerConfig {
    pub channel_count: u32,
    pub window_size: u32,
    pub user_data: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self { channel_count: PROTOCOL_MAXIMUM_CHANNEL_COUNT, window_size: PEER_MAXIMUM_WINDOW_SIZE, user_data: 0 }
    }
}

impl PeerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_count < PROTOCOL_MINIMUM_CHANNEL_COUNT || self.channel_count > PROTOCOL_MAXIMUM_CHANNEL_COUNT {
            return Err(Error::InputInvalid(format!(
                "channel_count {} out of range {}..={}",
                self.channel_count, PROTOCOL_MINIMUM_CHANNEL_COUNT, PROTOCOL_MAXIMUM_CHANNEL_COUNT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host_config_validates() {
        assert!(HostConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_peer_count_is_rejected() {
        let mut cfg = HostConfig::default();
        cfg.peer_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mtu_below_minimum_is_rejected() {
        let mut cfg = HostConfig::default();
        cfg.mtu = 100;
        assert!(cfg.validate().is_err());
    }
}
