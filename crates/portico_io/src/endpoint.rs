// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::Error;

/// An IPv4 address and port pair, the addressing unit of the socket transport.
///
/// The value is plain data with no ownership semantics: it is copied freely
/// into and out of operation contexts (as the send-to destination, the
/// receive-from source, or the peer of an accepted connection).
///
/// # Thread safety
///
/// This type is thread-safe.
///
/// # Examples
///
/// ```
/// use portico_io::IpEndpoint;
///
/// let endpoint: IpEndpoint = "127.0.0.1:8080".parse().unwrap();
/// assert_eq!(endpoint.port(), 8080);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{address}:{port}")]
pub struct IpEndpoint {
    address: Ipv4Addr,
    port: u16,
}

impl IpEndpoint {
    /// The wildcard endpoint (`0.0.0.0:0`): any address, kernel-chosen port.
    pub const ANY: Self = Self {
        address: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    /// Creates an endpoint from an address and a port.
    #[must_use]
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Creates a loopback (`127.0.0.1`) endpoint on the given port. Port zero
    /// asks the kernel to choose a free port at bind time.
    #[must_use]
    pub const fn loopback(port: u16) -> Self {
        Self {
            address: Ipv4Addr::LOCALHOST,
            port,
        }
    }

    /// The IPv4 address half of the endpoint.
    #[must_use]
    pub const fn address(self) -> Ipv4Addr {
        self.address
    }

    /// The port half of the endpoint.
    #[must_use]
    pub const fn port(self) -> u16 {
        self.port
    }
}

impl From<(Ipv4Addr, u16)> for IpEndpoint {
    fn from((address, port): (Ipv4Addr, u16)) -> Self {
        Self { address, port }
    }
}

impl FromStr for IpEndpoint {
    type Err = Error;

    /// Parses dotted-quad-plus-port text such as `"10.0.0.1:443"`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (address, port) = text.split_once(':').ok_or_else(|| {
            Error::ContractViolation(format!("endpoint '{text}' is missing the ':port' part"))
        })?;

        let address = Ipv4Addr::from_str(address).map_err(|_| {
            Error::ContractViolation(format!("endpoint '{text}' has a malformed address"))
        })?;
        let port = u16::from_str(port).map_err(|_| {
            Error::ContractViolation(format!("endpoint '{text}' has a malformed port"))
        })?;

        Ok(Self { address, port })
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(IpEndpoint: Send, Sync);
    }

    #[test]
    fn parses_dotted_quad_with_port() {
        let endpoint: IpEndpoint = "192.168.1.20:9000".parse().unwrap();
        assert_eq!(endpoint.address(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(endpoint.port(), 9000);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(IpEndpoint::from_str("no-port-here").is_err());
        assert!(IpEndpoint::from_str("1.2.3:80").is_err());
        assert!(IpEndpoint::from_str("1.2.3.4:notaport").is_err());
        assert!(IpEndpoint::from_str("1.2.3.4:70000").is_err());
    }

    #[test]
    fn displays_as_parseable_text() {
        let endpoint = IpEndpoint::loopback(8080);
        let round_tripped: IpEndpoint = endpoint.to_string().parse().unwrap();
        assert_eq!(round_tripped, endpoint);
    }

    #[test]
    fn any_is_all_zeroes() {
        assert_eq!(IpEndpoint::ANY.address(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(IpEndpoint::ANY.port(), 0);
    }
}
