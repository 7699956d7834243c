//! ICMP ping probe.
//!
//! Sends three echo requests spaced 100 ms apart and reports average RTT and
//! loss. Sockets are created unprivileged (DGRAM) first, falling back to RAW
//! where DGRAM ICMP is unavailable. The blocking socket work runs in
//! `spawn_blocking` to keep RTT timing tight.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::db::models::{STATUS_DOWN, STATUS_UP};

const ECHO_COUNT: u32 = 3;
const ECHO_SPACING: Duration = Duration::from_millis(100);
const DEFAULT_PING_TIMEOUT: i64 = 5;

/// Sequence counter so concurrent pings to the same host stay distinguishable.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

struct PingStats {
    sent: u32,
    received: u32,
    total_rtt: Duration,
}

/// Probe `addr` with ICMP echoes. Returns `(status, message, avg_rtt_ms)`.
pub async fn check_ping(addr: &str, timeout_secs: i64) -> (i64, String, i64) {
    let timeout_secs = if timeout_secs > 0 {
        timeout_secs
    } else {
        DEFAULT_PING_TIMEOUT
    };
    let timeout = Duration::from_secs(timeout_secs as u64);

    let ip = match resolve_address(addr).await {
        Ok(ip) => ip,
        Err(e) => return (STATUS_DOWN, format!("Ping failed: {}", e), 0),
    };

    let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout)).await;
    let stats = match result {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => return (STATUS_DOWN, format!("Ping failed: {}", e), 0),
        Err(e) => return (STATUS_DOWN, format!("Ping failed: {}", e), 0),
    };

    if stats.received == 0 {
        return (STATUS_DOWN, "100% packet loss".to_string(), 0);
    }

    let avg = stats.total_rtt / stats.received;
    let mut msg = format!("{:.2} ms", avg.as_micros() as f64 / 1000.0);
    let loss = (stats.sent - stats.received) * 100 / stats.sent;
    if loss > 0 {
        msg.push_str(&format!(" ({}% loss)", loss));
    }

    (STATUS_UP, msg, avg.as_millis() as i64)
}

async fn resolve_address(addr: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", addr))
        .await
        .map_err(|e| format!("DNS resolution failed: {}", e))?
        .collect();
    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| format!("no addresses found for {}", addr))
}

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<PingStats, String> {
    let socket = open_icmp_socket(ip)?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| format!("connect failed: {}", e))?;

    let identifier: u16 = rand::random();
    let deadline = Instant::now() + timeout;

    let mut sent = 0u32;
    let mut received = 0u32;
    let mut total_rtt = Duration::ZERO;

    for i in 0..ECHO_COUNT {
        let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let packet = match ip {
            IpAddr::V4(_) => build_echo_request(8, identifier, sequence, true),
            IpAddr::V6(_) => build_echo_request(128, identifier, sequence, false),
        };

        let sent_at = Instant::now();
        socket
            .send(&packet)
            .map_err(|e| format!("send failed: {}", e))?;
        sent += 1;

        if let Some(rtt) =
            wait_for_reply(&socket, ip.is_ipv4(), identifier, sequence, sent_at, deadline)?
        {
            received += 1;
            total_rtt += rtt;
        }

        if i + 1 < ECHO_COUNT {
            let since_send = sent_at.elapsed();
            if since_send < ECHO_SPACING {
                std::thread::sleep(ECHO_SPACING - since_send);
            }
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    Ok(PingStats {
        sent,
        received,
        total_rtt,
    })
}

/// Unprivileged DGRAM first; RAW needs CAP_NET_RAW or root.
fn open_icmp_socket(ip: IpAddr) -> Result<Socket, String> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    Socket::new(domain, Type::DGRAM, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::RAW, Some(protocol)))
        .map_err(|e| format!("failed to create ICMP socket: {}", e))
}

/// Block until our echo reply arrives or the overall deadline passes.
fn wait_for_reply(
    socket: &Socket,
    is_v4: bool,
    identifier: u16,
    sequence: u16,
    sent_at: Instant,
    deadline: Instant,
) -> Result<Option<Duration>, String> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        socket
            .set_read_timeout(Some(deadline - now))
            .map_err(|e| format!("set timeout failed: {}", e))?;

        let mut buf: [MaybeUninit<u8>; 1500] = [MaybeUninit::uninit(); 1500];
        match socket.recv(&mut buf) {
            Ok(len) => {
                // SAFETY: recv initialized `len` bytes.
                let data: &[u8] =
                    unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
                if matches_reply(data, is_v4, identifier, sequence) {
                    return Ok(Some(sent_at.elapsed()));
                }
                // Someone else's packet; keep waiting.
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(None);
            }
            Err(e) => return Err(format!("receive failed: {}", e)),
        }
    }
}

/// Check a received packet for our echo reply. RAW IPv4 sockets deliver the
/// IP header in front of the ICMP payload; DGRAM sockets do not.
fn matches_reply(data: &[u8], is_v4: bool, identifier: u16, sequence: u16) -> bool {
    if data.len() < 8 {
        return false;
    }
    let (reply_type, offset) = if is_v4 {
        let offset = if data[0] >> 4 == 4 { 20 } else { 0 };
        if data.len() < offset + 8 {
            return false;
        }
        (data[offset], offset)
    } else {
        (data[0], 0)
    };

    let expected_type = if is_v4 { 0 } else { 129 };
    if reply_type != expected_type {
        return false;
    }

    let reply_id = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
    let reply_seq = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
    reply_id == identifier && reply_seq == sequence
}

/// Build an echo request: 8-byte header plus a 56-byte timestamp payload.
/// The ICMPv6 checksum is computed by the kernel, v4 by us.
fn build_echo_request(icmp_type: u8, identifier: u16, sequence: u16, checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = icmp_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// RFC 1071 ones-complement checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_request_layout() {
        let packet = build_echo_request(8, 0x1234, 0x0001, true);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0x00, 0x01]);
        assert_ne!(u16::from_be_bytes([packet[2], packet[3]]), 0);
    }

    #[test]
    fn test_checksum_verifies() {
        let packet = build_echo_request(8, 0xABCD, 7, true);
        // Summing a packet with a correct checksum yields all ones.
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_matches_reply_dgram() {
        let mut reply = vec![0u8; 16];
        reply[0] = 0; // echo reply
        reply[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        reply[6..8].copy_from_slice(&0x0005u16.to_be_bytes());
        assert!(matches_reply(&reply, true, 0x1234, 0x0005));
        assert!(!matches_reply(&reply, true, 0x1234, 0x0006));
        assert!(!matches_reply(&reply, true, 0x9999, 0x0005));
    }

    #[test]
    fn test_matches_reply_raw_v4_skips_ip_header() {
        let mut reply = vec![0u8; 28];
        reply[0] = 0x45; // IPv4, IHL 5
        reply[20] = 0; // echo reply after the 20-byte IP header
        reply[24..26].copy_from_slice(&0x0042u16.to_be_bytes());
        reply[26..28].copy_from_slice(&0x0002u16.to_be_bytes());
        assert!(matches_reply(&reply, true, 0x0042, 0x0002));
    }

    #[test]
    fn test_matches_reply_v6() {
        let mut reply = vec![0u8; 8];
        reply[0] = 129;
        reply[4..6].copy_from_slice(&0x0007u16.to_be_bytes());
        reply[6..8].copy_from_slice(&0x0009u16.to_be_bytes());
        assert!(matches_reply(&reply, false, 0x0007, 0x0009));
        assert!(!matches_reply(&reply, false, 0x0007, 0x0008));
    }
}
