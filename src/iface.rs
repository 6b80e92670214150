use std::fmt;

use sysinfo::Networks;

/// Which cumulative counter of an interface a tap follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "rx"),
            Direction::Tx => write!(f, "tx"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IfaceInfo {
    pub name: String,
    pub mac: String,
    pub total_received: u64,
    pub total_transmitted: u64,
}

pub fn list_interfaces() -> Vec<IfaceInfo> {
    let networks = Networks::new_with_refreshed_list();
    let mut out: Vec<IfaceInfo> = networks
        .iter()
        .map(|(name, data)| IfaceInfo {
            name: name.clone(),
            mac: data.mac_address().to_string(),
            total_received: data.total_received(),
            total_transmitted: data.total_transmitted(),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

pub fn interface_exists(name: &str) -> bool {
    let networks = Networks::new_with_refreshed_list();
    networks.iter().any(|(n, _)| n == name)
}
