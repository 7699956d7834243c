//! Shared DNS resolver.
//!
//! Resolution order: the user-configured server when set (`:53` appended if
//! no port was given), otherwise `1.1.1.1:53` with `223.5.5.5:53` as a
//! fallback when the primary cannot be reached. Queries are raw UDP DNS
//! packets; each round trip is bounded by a 2 second inner timeout.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

const INNER_TIMEOUT: Duration = Duration::from_secs(2);
const PRIMARY_DNS: &str = "1.1.1.1:53";
const FALLBACK_DNS: &str = "223.5.5.5:53";

const QTYPE_A: u16 = 1;
const QTYPE_AAAA: u16 = 28;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no such host")]
    NotFound,
    #[error("timeout")]
    Timeout,
    #[error("server failure")]
    ServerFailure,
    #[error("dns i/o error: {0}")]
    Io(String),
    #[error("malformed dns response: {0}")]
    Malformed(String),
}

/// Process-wide resolver handle.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Configured upstream as `ip:port`, or `None` for the fallback chain.
    server: Option<String>,
}

impl Resolver {
    /// `dns_server` is `"ip"` or `"ip:port"`; empty selects the default chain.
    pub fn new(dns_server: &str) -> Self {
        let server = if dns_server.is_empty() {
            None
        } else if dns_server.contains(':') {
            Some(dns_server.to_string())
        } else {
            Some(format!("{}:53", dns_server))
        };
        Self { server }
    }

    /// Resolve A and AAAA records for `host`. IP literals short-circuit.
    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        match &self.server {
            Some(server) => self.query_host(server, host).await,
            None => match self.query_host(PRIMARY_DNS, host).await {
                Err(ResolveError::Io(_)) | Err(ResolveError::Timeout) => {
                    self.query_host(FALLBACK_DNS, host).await
                }
                other => other,
            },
        }
    }

    async fn query_host(&self, server: &str, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let mut ips = self.query(server, host, QTYPE_A).await?;
        // AAAA failures do not mask a working A answer.
        if let Ok(v6) = self.query(server, host, QTYPE_AAAA).await {
            ips.extend(v6);
        }
        if ips.is_empty() {
            return Err(ResolveError::NotFound);
        }
        Ok(ips)
    }

    async fn query(
        &self,
        server: &str,
        host: &str,
        qtype: u16,
    ) -> Result<Vec<IpAddr>, ResolveError> {
        let tx_id: u16 = rand::random();
        let packet = encode_query(host, qtype, tx_id);

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ResolveError::Io(format!("bind failed: {}", e)))?;
        socket
            .connect(server)
            .await
            .map_err(|e| ResolveError::Io(format!("connect failed: {}", e)))?;

        let mut response = [0u8; 512];
        let n = tokio::time::timeout(INNER_TIMEOUT, async {
            socket
                .send(&packet)
                .await
                .map_err(|e| ResolveError::Io(format!("send failed: {}", e)))?;
            socket
                .recv(&mut response)
                .await
                .map_err(|e| ResolveError::Io(format!("recv failed: {}", e)))
        })
        .await
        .map_err(|_| ResolveError::Timeout)??;

        parse_answers(&response[..n], tx_id, qtype)
    }
}

/// Wire a resolver into reqwest so HTTP probes use the same policy.
pub struct SharedResolver(pub Arc<Resolver>);

impl reqwest::dns::Resolve for SharedResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let resolver = self.0.clone();
        Box::pin(async move {
            let ips = resolver
                .lookup(name.as_str())
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            let addrs: reqwest::dns::Addrs =
                Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// Build a single-question DNS query packet.
fn encode_query(host: &str, qtype: u16, tx_id: u16) -> Vec<u8> {
    let flags: u16 = 0x0100; // standard query, recursion desired

    let mut packet = Vec::with_capacity(32 + host.len());
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    // Length-prefixed labels.
    for label in host.trim_end_matches('.').split('.') {
        let bytes = label.as_bytes();
        packet.push(bytes.len().min(63) as u8);
        packet.extend_from_slice(&bytes[..bytes.len().min(63)]);
    }
    packet.push(0);

    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN

    packet
}

/// Extract addresses of `qtype` from a DNS response.
fn parse_answers(resp: &[u8], tx_id: u16, qtype: u16) -> Result<Vec<IpAddr>, ResolveError> {
    if resp.len() < 12 {
        return Err(ResolveError::Malformed(format!(
            "response too short: {} bytes",
            resp.len()
        )));
    }

    let resp_tx_id = u16::from_be_bytes([resp[0], resp[1]]);
    if resp_tx_id != tx_id {
        return Err(ResolveError::Malformed("transaction id mismatch".into()));
    }

    match resp[3] & 0x0F {
        0 => {}
        2 => return Err(ResolveError::ServerFailure),
        3 => return Err(ResolveError::NotFound),
        rcode => return Err(ResolveError::Malformed(format!("rcode {}", rcode))),
    }

    let qd_count = u16::from_be_bytes([resp[4], resp[5]]) as usize;
    let an_count = u16::from_be_bytes([resp[6], resp[7]]) as usize;

    let mut pos = 12;
    for _ in 0..qd_count {
        pos = skip_name(resp, pos)?;
        pos += 4; // QTYPE + QCLASS
    }

    let mut ips = Vec::new();
    for _ in 0..an_count {
        pos = skip_name(resp, pos)?;
        if pos + 10 > resp.len() {
            return Err(ResolveError::Malformed("truncated answer".into()));
        }
        let rtype = u16::from_be_bytes([resp[pos], resp[pos + 1]]);
        let rdlength = u16::from_be_bytes([resp[pos + 8], resp[pos + 9]]) as usize;
        pos += 10;
        if pos + rdlength > resp.len() {
            return Err(ResolveError::Malformed("truncated rdata".into()));
        }
        if rtype == qtype {
            match (rtype, rdlength) {
                (QTYPE_A, 4) => {
                    let octets: [u8; 4] = resp[pos..pos + 4].try_into().unwrap();
                    ips.push(IpAddr::V4(Ipv4Addr::from(octets)));
                }
                (QTYPE_AAAA, 16) => {
                    let octets: [u8; 16] = resp[pos..pos + 16].try_into().unwrap();
                    ips.push(IpAddr::V6(Ipv6Addr::from(octets)));
                }
                _ => {}
            }
        }
        pos += rdlength;
    }

    Ok(ips)
}

/// Advance past an encoded name, following a compression pointer if present.
fn skip_name(resp: &[u8], mut pos: usize) -> Result<usize, ResolveError> {
    loop {
        if pos >= resp.len() {
            return Err(ResolveError::Malformed("truncated name".into()));
        }
        let len = resp[pos];
        if len & 0xC0 == 0xC0 {
            // Pointer: two bytes, ends the name.
            return Ok(pos + 2);
        }
        if len == 0 {
            return Ok(pos + 1);
        }
        pos += 1 + len as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query_layout() {
        let packet = encode_query("example.com", QTYPE_A, 0x1234);
        // Header 12 + "example"(8) + "com"(4) + null(1) + type/class(4)
        assert_eq!(packet.len(), 29);
        assert_eq!(&packet[0..2], &[0x12, 0x34]);
        assert_eq!(packet[12], 7);
        assert_eq!(&packet[13..20], b"example");
        assert_eq!(packet[20], 3);
    }

    #[test]
    fn test_parse_a_answer() {
        let query = encode_query("example.com", QTYPE_A, 0xBEEF);
        let mut resp = query.clone();
        resp[2] = 0x81; // response, recursion desired
        resp[3] = 0x80; // recursion available, rcode 0
        resp[7] = 1; // ANCOUNT = 1
        // Answer: pointer to name at offset 12, A IN, TTL 60, 4-byte rdata.
        resp.extend_from_slice(&[0xC0, 0x0C]);
        resp.extend_from_slice(&QTYPE_A.to_be_bytes());
        resp.extend_from_slice(&1u16.to_be_bytes());
        resp.extend_from_slice(&60u32.to_be_bytes());
        resp.extend_from_slice(&4u16.to_be_bytes());
        resp.extend_from_slice(&[93, 184, 216, 34]);

        let ips = parse_answers(&resp, 0xBEEF, QTYPE_A).unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]);
    }

    #[test]
    fn test_parse_nxdomain() {
        let query = encode_query("nope.invalid", QTYPE_A, 0x0101);
        let mut resp = query;
        resp[2] = 0x81;
        resp[3] = 0x83; // rcode 3: NXDOMAIN
        assert!(matches!(
            parse_answers(&resp, 0x0101, QTYPE_A),
            Err(ResolveError::NotFound)
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_tx_id() {
        let query = encode_query("example.com", QTYPE_A, 0x1111);
        assert!(matches!(
            parse_answers(&query, 0x2222, QTYPE_A),
            Err(ResolveError::Malformed(_))
        ));
    }

    #[test]
    fn test_ip_literal_short_circuits() {
        let resolver = Resolver::new("");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ips = rt.block_on(resolver.lookup("127.0.0.1")).unwrap();
        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[test]
    fn test_configured_server_gets_default_port() {
        let resolver = Resolver::new("10.0.0.2");
        assert_eq!(resolver.server.as_deref(), Some("10.0.0.2:53"));
        let resolver = Resolver::new("10.0.0.2:5353");
        assert_eq!(resolver.server.as_deref(), Some("10.0.0.2:5353"));
        assert!(Resolver::new("").server.is_none());
    }
}
