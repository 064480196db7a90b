use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Determine this host's LAN IPv4 address.
///
/// Connects a datagram socket to a public address and reads the local
/// socket name; no packet is ever sent. Falls back to loopback when the
/// host has no route.
pub fn local_ipv4() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
        return fallback;
    };
    if socket.connect("8.8.8.8:80").is_err() {
        return fallback;
    }
    socket.local_addr().map(|addr| addr.ip()).unwrap_or(fallback)
}

/// Strip the last octet: "192.168.1.17" -> "192.168.1".
/// The worker scans every host on this /24 prefix during discovery.
pub fn subnet_prefix(ip: &IpAddr) -> String {
    let s = ip.to_string();
    match s.rfind('.') {
        Some(pos) => s[..pos].to_string(),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ipv4_is_v4() {
        assert!(local_ipv4().is_ipv4());
    }

    #[test]
    fn test_subnet_prefix() {
        let ip: IpAddr = "192.168.1.17".parse().unwrap();
        assert_eq!(subnet_prefix(&ip), "192.168.1");
        let lo: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(subnet_prefix(&lo), "127.0.0");
    }
}
