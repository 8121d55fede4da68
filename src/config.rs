use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::router::RouterConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "hub-rtc",
    version,
    about = "Signaling and media relay hub: clients join named rooms and every \
             participant's published content is relayed to every other participant."
)]
pub struct Settings {
    /// WebSocket signaling port
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// UDP port for media, 0 picks an ephemeral one
    #[arg(long, default_value_t = 0)]
    pub rtc_port: u16,

    /// Address advertised in the host candidate. The media socket still
    /// binds to the detected interface address; this only changes what
    /// peers are told, e.g. behind a 1:1 NAT.
    #[arg(long)]
    pub public_ip: Option<IpAddr>,

    /// Forward IPv6 local candidates to clients
    #[arg(long, default_value_t = false)]
    pub allow_ipv6: bool,

    /// Do not greet new connections with their session id
    #[arg(long, default_value_t = false)]
    pub no_hello: bool,

    /// Output debug logs
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,
}

impl Settings {
    pub fn signaling_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            send_hello: !self.no_hello,
            allow_ipv6: self.allow_ipv6,
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "hub_rtc=debug"
        } else {
            "hub_rtc=info"
        }
    }
}
