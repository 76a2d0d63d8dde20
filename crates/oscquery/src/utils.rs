//! Free ephemeral ports on loopback.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

const LOOPBACK_ANY_PORT: SocketAddr = SocketAddr::V4(std::net::SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

/// A TCP port that was free a moment ago.
pub fn available_tcp_port() -> std::io::Result<u16> {
    let socket = TcpListener::bind(LOOPBACK_ANY_PORT)?;
    Ok(socket.local_addr()?.port())
}

/// A UDP port that was free a moment ago.
pub fn available_udp_port() -> std::io::Result<u16> {
    let socket = UdpSocket::bind(LOOPBACK_ANY_PORT)?;
    Ok(socket.local_addr()?.port())
}
