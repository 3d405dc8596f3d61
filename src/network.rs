//! Network link boundary: join the configured network and report whether an
//! address has been obtained.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use thiserror::Error;
use tokio::net::lookup_host;

use crate::config::NetworkConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Association or addressing still in progress.
    Connecting,
    /// Link is up with the given local address.
    Up(IpAddr),
    /// The driver reported a transient error; joining again may help.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no network credentials configured")]
    NoCredentials,

    #[error("network driver error: {0}")]
    Driver(String),
}

/// Whatever owns the radio or the host's interfaces.
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    /// Start joining the network. Returns once the request is issued; progress
    /// is observed through [`NetworkLink::status`].
    async fn join(&mut self, config: &NetworkConfig) -> Result<(), LinkError>;

    /// Non-blocking status poll.
    fn status(&mut self) -> LinkStatus;
}

/// Host network stack.
///
/// The operating system owns association, so "joining" only records the
/// requested addressing and resolves the probe host once. Status routes a UDP
/// socket toward the resolved probe (nothing is sent) and reads back the chosen
/// local address. With a static address the socket is bound to it, so the link
/// only comes up if the host owns it.
#[derive(Debug, Clone)]
pub struct HostLink {
    probe_host: String,
    probe_port: u16,
    bind: Option<Ipv4Addr>,
    probe: Option<SocketAddr>,
}

impl HostLink {
    pub fn new(probe_host: impl Into<String>, probe_port: u16) -> Self {
        Self {
            probe_host: probe_host.into(),
            probe_port,
            bind: None,
            probe: None,
        }
    }

    /// IPv4 preferred, since a static address is always IPv4.
    async fn resolve(&self) -> std::io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = lookup_host((self.probe_host.as_str(), self.probe_port))
            .await?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("{} has no addresses", self.probe_host),
                )
            })
    }

    fn local_address(&self, probe: SocketAddr) -> std::io::Result<IpAddr> {
        let bind_ip = match (self.bind, probe) {
            (Some(ip), _) => IpAddr::V4(ip),
            (None, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (None, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind((bind_ip, 0))?;
        socket.connect(probe)?;
        Ok(socket.local_addr()?.ip())
    }
}

impl NetworkLink for HostLink {
    async fn join(&mut self, config: &NetworkConfig) -> Result<(), LinkError> {
        if config.ssid.trim().is_empty() {
            return Err(LinkError::NoCredentials);
        }
        self.bind = config.static_ip.map(|s| s.ip);
        self.probe = None;
        let probe = self
            .resolve()
            .await
            .map_err(|e| LinkError::Driver(format!("resolving {}: {e}", self.probe_host)))?;
        log::debug!("link probe {} resolved to {probe}", self.probe_host);
        self.probe = Some(probe);
        match self.bind {
            Some(ip) => log::info!("joining {} with static address {ip}", config.ssid),
            None => log::info!("joining {} with dynamic addressing", config.ssid),
        }
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        let Some(probe) = self.probe else {
            return LinkStatus::Connecting;
        };
        match self.local_address(probe) {
            Ok(ip) if ip.is_unspecified() => LinkStatus::Connecting,
            Ok(ip) => LinkStatus::Up(ip),
            Err(e) if e.kind() == ErrorKind::AddrNotAvailable => {
                LinkStatus::Failed(format!("address not available: {e}"))
            }
            Err(e) => {
                log::debug!("link probe: {e}");
                LinkStatus::Connecting
            }
        }
    }
}
