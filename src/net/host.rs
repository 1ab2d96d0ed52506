//! Host Address: parses `scheme://authority` strings into an immutable, validated value.
//!
//! Two families exist because the grammars don't overlap in any useful way: a [`RemoteAddress`]
//! names where to forward to, a [`ListenAddress`] names where to accept datagrams from. Both are
//! parsed once at startup and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use super::error::HostAddressError;

fn split_scheme(s: &str) -> Result<(&str, &str), HostAddressError> {
    if s.is_empty() {
        return Err(HostAddressError::Empty);
    }
    let (scheme, rest) = s
        .split_once("://")
        .ok_or_else(|| HostAddressError::MissingSeparator(s.to_string()))?;
    if rest.is_empty() {
        return Err(HostAddressError::EmptyAuthority(s.to_string()));
    }
    Ok((scheme, rest))
}

/// Which connectionless transport a [`ListenAddress`] names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTransport {
    Udp,
    Udp4,
    Udp6,
    Unixgram,
    /// A raw IP socket. `version` is `Some(4)`/`Some(6)` when the scheme pinned a family
    /// (`ip4:`/`ip6:`), `None` for the unqualified `ip:` form.
    RawIp {
        version: Option<u8>,
        protocol: String,
    },
}

/// A parsed `(udp|udp4|udp6|unixgram|ip[4|6]?:<proto>)://<authority>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    transport: ListenTransport,
    authority: String,
}

impl ListenAddress {
    pub fn transport(&self) -> &ListenTransport {
        &self.transport
    }

    /// The authority component: `host:port` for the UDP variants, a filesystem path for
    /// `unixgram`, a bindable local address for raw IP.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl FromStr for ListenAddress {
    type Err = HostAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, authority) = split_scheme(s)?;
        let transport = match scheme {
            "udp" => ListenTransport::Udp,
            "udp4" => ListenTransport::Udp4,
            "udp6" => ListenTransport::Udp6,
            "unixgram" => ListenTransport::Unixgram,
            _ if scheme.starts_with("ip4:") => ListenTransport::RawIp {
                version: Some(4),
                protocol: protocol_suffix(scheme, "ip4:")?,
            },
            _ if scheme.starts_with("ip6:") => ListenTransport::RawIp {
                version: Some(6),
                protocol: protocol_suffix(scheme, "ip6:")?,
            },
            _ if scheme.starts_with("ip:") => ListenTransport::RawIp {
                version: None,
                protocol: protocol_suffix(scheme, "ip:")?,
            },
            other => return Err(HostAddressError::UnknownScheme(other.to_string())),
        };
        Ok(ListenAddress {
            transport,
            authority: authority.to_string(),
        })
    }
}

fn protocol_suffix(scheme: &str, prefix: &str) -> Result<String, HostAddressError> {
    let proto = &scheme[prefix.len()..];
    if proto.is_empty() {
        Err(HostAddressError::MissingProtocol(scheme.to_string()))
    } else {
        Ok(proto.to_string())
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            ListenTransport::Udp => write!(f, "udp://{}", self.authority),
            ListenTransport::Udp4 => write!(f, "udp4://{}", self.authority),
            ListenTransport::Udp6 => write!(f, "udp6://{}", self.authority),
            ListenTransport::Unixgram => write!(f, "unixgram://{}", self.authority),
            ListenTransport::RawIp {
                version: Some(v),
                protocol,
            } => write!(f, "ip{}:{}://{}", v, protocol, self.authority),
            ListenTransport::RawIp {
                version: None,
                protocol,
            } => write!(f, "ip:{}://{}", protocol, self.authority),
        }
    }
}

/// Which remote transport a [`RemoteAddress`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTransport {
    Tcp,
    Tcp4,
    Tcp6,
    Http,
    Https,
}

/// A parsed `(tcp[4|6]?(\+tls)?|https?)://<authority>` address. `secure` is true iff the scheme
/// carried `+tls` or was `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    transport: RemoteTransport,
    secure: bool,
    authority: String,
}

impl RemoteAddress {
    pub fn transport(&self) -> RemoteTransport {
        self.transport
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl FromStr for RemoteAddress {
    type Err = HostAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, authority) = split_scheme(s)?;
        let (base, secure) = match scheme.split_once('+') {
            Some((base, "tls")) => (base, true),
            Some((base, other)) => return Err(HostAddressError::UnknownScheme(format!("{}+{}", base, other))),
            None => (scheme, false),
        };
        let (transport, secure) = match base {
            "tcp" => (RemoteTransport::Tcp, secure),
            "tcp4" => (RemoteTransport::Tcp4, secure),
            "tcp6" => (RemoteTransport::Tcp6, secure),
            "http" => (RemoteTransport::Http, false),
            "https" => (RemoteTransport::Https, true),
            other => return Err(HostAddressError::UnknownScheme(other.to_string())),
        };
        Ok(RemoteAddress {
            transport,
            secure,
            authority: authority.to_string(),
        })
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match (self.transport, self.secure) {
            (RemoteTransport::Tcp, true) => "tcp+tls",
            (RemoteTransport::Tcp, false) => "tcp",
            (RemoteTransport::Tcp4, true) => "tcp4+tls",
            (RemoteTransport::Tcp4, false) => "tcp4",
            (RemoteTransport::Tcp6, true) => "tcp6+tls",
            (RemoteTransport::Tcp6, false) => "tcp6",
            (RemoteTransport::Http, _) => "http",
            (RemoteTransport::Https, _) => "https",
        };
        write!(f, "{}://{}", scheme, self.authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_variants() {
        assert_eq!(
            "udp://127.0.0.1:12201".parse::<ListenAddress>().unwrap().transport(),
            &ListenTransport::Udp
        );
        assert_eq!(
            "udp6://[::1]:12201".parse::<ListenAddress>().unwrap().transport(),
            &ListenTransport::Udp6
        );
    }

    #[test]
    fn parses_unixgram() {
        let addr: ListenAddress = "unixgram:///tmp/gelf.sock".parse().unwrap();
        assert_eq!(addr.transport(), &ListenTransport::Unixgram);
        assert_eq!(addr.authority(), "/tmp/gelf.sock");
    }

    #[test]
    fn parses_raw_ip_with_family() {
        let addr: ListenAddress = "ip4:icmp://0.0.0.0".parse().unwrap();
        assert_eq!(
            addr.transport(),
            &ListenTransport::RawIp {
                version: Some(4),
                protocol: "icmp".to_string()
            }
        );
    }

    #[test]
    fn parses_raw_ip_without_family() {
        let addr: ListenAddress = "ip:47://0.0.0.0".parse().unwrap();
        assert_eq!(
            addr.transport(),
            &ListenTransport::RawIp {
                version: None,
                protocol: "47".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_listen_scheme() {
        assert!("carrier-pigeon://nest".parse::<ListenAddress>().is_err());
    }

    #[test]
    fn parses_remote_tcp_tls() {
        let addr: RemoteAddress = "tcp+tls://graylog.example.com:12201".parse().unwrap();
        assert_eq!(addr.transport(), RemoteTransport::Tcp);
        assert!(addr.secure());
    }

    #[test]
    fn parses_remote_https() {
        let addr: RemoteAddress = "https://graylog.example.com/gelf".parse().unwrap();
        assert_eq!(addr.transport(), RemoteTransport::Https);
        assert!(addr.secure());
    }

    #[test]
    fn plain_tcp_is_not_secure() {
        let addr: RemoteAddress = "tcp://127.0.0.1:9001".parse().unwrap();
        assert!(!addr.secure());
    }

    #[test]
    fn rejects_missing_authority() {
        assert!("tcp://".parse::<RemoteAddress>().is_err());
    }
}
