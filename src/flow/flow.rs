use std::fmt;
use std::net::IpAddr;
use pnet::util::MacAddr;
use serde::{Serialize, Deserialize};

/// One observed network conversation sample, as reported by a capture
/// probe. Counters are deltas for the reporting interval; the flow table
/// accumulates them per key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub ts:        u64,
    pub ethernet:  Ethernet,
    pub protocol:  Protocol,
    pub src:       Addr,
    pub dst:       Addr,
    pub bytes:     u64,
    pub packets:   u64,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub src_node:  Option<String>,
    #[serde(default)]
    pub dst_node:  Option<String>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Ethernet {
    pub src:  MacAddr,
    pub dst:  MacAddr,
    pub vlan: Option<u16>,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    SCTP,
    Other(u16),
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Addr {
    pub addr: IpAddr,
    pub port: u16,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Direction {
    In, Out, Unknown
}

/// Stable flow identity: protocol plus both endpoints.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Key(pub Protocol, pub Addr, pub Addr);

/// Endpoint layer selecting how a flow contributes to the conversation
/// view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layer {
    Ethernet,
    Ipv4,
    Tcp,
    Udp,
    Sctp,
}

/// Counter selecting what the discovery view aggregates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Metric {
    Bytes,
    Packets,
}

impl Flow {
    pub fn key(&self) -> Key {
        Key(self.protocol, self.src, self.dst)
    }

    /// Accumulate another sample for the same key. Merging is associative:
    /// counters add, the timestamp advances, enrichment keeps the latest
    /// known value.
    pub fn merge(&mut self, other: &Flow) {
        self.bytes   += other.bytes;
        self.packets += other.packets;

        if other.ts > self.ts {
            self.ts = other.ts;
        }

        if other.direction != Direction::Unknown {
            self.direction = other.direction;
        }
        if other.src_node.is_some() {
            self.src_node = other.src_node.clone();
        }
        if other.dst_node.is_some() {
            self.dst_node = other.dst_node.clone();
        }
    }

    /// Endpoint pair at the given layer, or None when the flow has no
    /// presence there (e.g. a UDP flow at the tcp layer).
    pub fn endpoints(&self, layer: Layer) -> Option<(String, String)> {
        match layer {
            Layer::Ethernet => {
                Some((self.ethernet.src.to_string(), self.ethernet.dst.to_string()))
            },
            Layer::Ipv4 => match (self.src.addr, self.dst.addr) {
                (IpAddr::V4(s), IpAddr::V4(d)) => Some((s.to_string(), d.to_string())),
                _                              => None,
            },
            Layer::Tcp  if self.protocol == Protocol::TCP => {
                Some((self.src.to_string(), self.dst.to_string()))
            },
            Layer::Udp  if self.protocol == Protocol::UDP => {
                Some((self.src.to_string(), self.dst.to_string()))
            },
            Layer::Sctp if self.protocol == Protocol::SCTP => {
                Some((self.src.to_string(), self.dst.to_string()))
            },
            _ => None,
        }
    }
}

impl Layer {
    /// Unrecognized values fall back to ethernet.
    pub fn from_param(s: &str) -> Self {
        match s {
            "ethernet" => Layer::Ethernet,
            "ipv4"     => Layer::Ipv4,
            "tcp"      => Layer::Tcp,
            "udp"      => Layer::Udp,
            "sctp"     => Layer::Sctp,
            _          => Layer::Ethernet,
        }
    }
}

impl Metric {
    /// Unrecognized values fall back to bytes.
    pub fn from_param(s: &str) -> Self {
        match s {
            "bytes"   => Metric::Bytes,
            "packets" => Metric::Packets,
            _         => Metric::Bytes,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Unknown
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::ICMP     => write!(f, "ICMP"),
            Protocol::TCP      => write!(f, "TCP"),
            Protocol::UDP      => write!(f, "UDP"),
            Protocol::SCTP     => write!(f, "SCTP"),
            Protocol::Other(n) => write!(f, "P{}", n),
        }
    }
}
