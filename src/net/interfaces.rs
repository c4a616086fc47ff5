use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use log::{debug, warn};
use sysinfo::Networks;

use crate::config::InterfaceMode;

/// Public address the primary-route probe connects to. A UDP `connect` sends
/// no packets; it only asks the OS which local address the default route
/// would use.
const PROBE_TARGET: &str = "8.8.8.8:80";
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Case-insensitive substring match against the exclusion set
/// (loopback, vpn, vmware, ...).
pub fn is_excluded(name: &str, exclusions: &[String]) -> bool {
    let lowered = name.to_lowercase();
    exclusions
        .iter()
        .any(|pattern| lowered.contains(&pattern.to_lowercase()))
}

/// Interface name -> assigned addresses, from the OS interface table.
pub fn interface_addrs(networks: &Networks) -> Vec<(String, Vec<IpAddr>)> {
    networks
        .iter()
        .map(|(name, data)| {
            let addrs = data
                .ip_networks()
                .iter()
                .map(|network| network.addr)
                .collect();
            (name.clone(), addrs)
        })
        .collect()
}

/// Local address the default route binds, if determinable.
pub fn local_probe_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.set_read_timeout(Some(PROBE_TIMEOUT)).ok()?;
    if let Err(err) = socket.connect(PROBE_TARGET) {
        warn!("could not probe default route: {err}");
        return None;
    }
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        warn!("default-route probe returned an unspecified address");
        return None;
    }
    Some(addr.ip())
}

/// Maps a probed local address back to the interface that owns it.
pub fn match_primary(iface_addrs: &[(String, Vec<IpAddr>)], local: IpAddr) -> Option<String> {
    iface_addrs
        .iter()
        .find(|(_, addrs)| addrs.contains(&local))
        .map(|(name, _)| name.clone())
}

/// The NIC bound to the default route, by local-IP probing.
pub fn primary_interface_name(iface_addrs: &[(String, Vec<IpAddr>)]) -> Option<String> {
    let local = local_probe_ip()?;
    let name = match_primary(iface_addrs, local);
    match &name {
        Some(name) => debug!("primary interface: '{name}' ({local})"),
        None => warn!("no interface owns the probed local address {local}"),
    }
    name
}

/// Decides which interfaces the controller monitors, per the configured
/// mode. Exactly one mode is active at a time.
#[derive(Debug, Clone)]
pub struct InterfaceSelector {
    mode: InterfaceMode,
    selected: Vec<String>,
    exclusions: Vec<String>,
    primary: Option<String>,
}

impl InterfaceSelector {
    pub fn new(mode: InterfaceMode, selected: Vec<String>, exclusions: Vec<String>) -> Self {
        Self {
            mode,
            selected,
            exclusions,
            primary: None,
        }
    }

    pub fn mode(&self) -> InterfaceMode {
        self.mode
    }

    /// Re-resolves the primary interface from a fresh address table. Cheap
    /// enough to call periodically; the probe itself sends nothing.
    pub fn refresh_primary(&mut self, iface_addrs: &[(String, Vec<IpAddr>)]) {
        self.primary = primary_interface_name(iface_addrs);
    }

    /// Test/offline seam: sets the primary without probing.
    pub fn set_primary(&mut self, primary: Option<String>) {
        self.primary = primary;
    }

    pub fn is_monitored(&self, iface_name: &str) -> bool {
        match self.mode {
            InterfaceMode::Auto => self
                .primary
                .as_deref()
                .is_some_and(|primary| primary == iface_name),
            InterfaceMode::AllPhysical => !is_excluded(iface_name, &self.exclusions),
            InterfaceMode::AllVirtual => is_excluded(iface_name, &self.exclusions),
            InterfaceMode::Selected => self.selected.iter().any(|name| name == iface_name),
        }
    }
}
