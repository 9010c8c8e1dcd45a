//! Outbound dialer (C4): opens the destination named in a parsed VLESS
//! header, and chooses a fallback ("proxy IP") destination when configured.

use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens outbound TCP connections and picks a fallback destination.
#[derive(Debug, Clone)]
pub struct OutboundDialer {
    fallback_hosts: Vec<String>,
    connect_timeout: Duration,
}

impl OutboundDialer {
    pub fn new(fallback_hosts: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            fallback_hosts,
            connect_timeout,
        }
    }

    /// Open a TCP connection to `address:port`, bounded by the configured
    /// connect timeout. `address` may be a numeric literal or a domain
    /// name; DNS resolution is the runtime's responsibility.
    pub async fn dial(&self, address: &str, port: u16) -> Result<TcpStream, DialError> {
        let target = format!("{address}:{port}");
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DialError::Timeout),
        }
    }

    /// The configured fallback destination, chosen uniformly at random
    /// among the configured hosts when more than one is set (spec §6).
    pub fn fallback_address(&self) -> Option<&str> {
        self.fallback_hosts
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    pub fn has_fallback(&self) -> bool {
        !self.fallback_hosts.is_empty()
    }
}

/// DNS-over-UDP specialisation (spec §4.4): frames DNS queries per the
/// VLESS UDP convention, a 2-byte big-endian length prefix per message.
pub mod dns {
    use std::time::Duration;

    use tokio::net::UdpSocket;

    use super::DialError;

    /// A UDP "connection" to a DNS resolver, framed per VLESS UDP rules.
    pub struct DnsChannel {
        socket: UdpSocket,
    }

    impl DnsChannel {
        pub async fn connect(address: &str, port: u16, timeout: Duration) -> Result<Self, DialError> {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            let target = format!("{address}:{port}");
            match tokio::time::timeout(timeout, socket.connect(&target)).await {
                Ok(result) => result?,
                Err(_) => return Err(DialError::Timeout),
            }
            Ok(Self { socket })
        }

        /// Strip the 2-byte length prefix from a client chunk and send
        /// each framed query as its own UDP datagram.
        pub async fn send_framed(&self, chunk: &[u8]) -> std::io::Result<()> {
            let mut offset = 0;
            while offset + 2 <= chunk.len() {
                let len = u16::from_be_bytes([chunk[offset], chunk[offset + 1]]) as usize;
                let start = offset + 2;
                let end = start + len;
                if end > chunk.len() {
                    break;
                }
                self.socket.send(&chunk[start..end]).await?;
                offset = end;
            }
            Ok(())
        }

        /// Receive one DNS response and re-frame it with the 2-byte
        /// length prefix expected downstream.
        pub async fn recv_framed(&self) -> std::io::Result<Vec<u8>> {
            let mut buf = vec![0u8; 65535];
            let n = self.socket.recv(&mut buf).await?;
            let mut out = Vec::with_capacity(n + 2);
            out.extend_from_slice(&(n as u16).to_be_bytes());
            out.extend_from_slice(&buf[..n]);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fallback_when_unconfigured() {
        let dialer = OutboundDialer::new(Vec::new(), Duration::from_secs(1));
        assert!(!dialer.has_fallback());
        assert!(dialer.fallback_address().is_none());
    }

    #[test]
    fn single_fallback_is_always_chosen() {
        let dialer = OutboundDialer::new(vec!["cdn.example".to_string()], Duration::from_secs(1));
        assert_eq!(dialer.fallback_address(), Some("cdn.example"));
    }

    #[tokio::test]
    async fn dial_unreachable_port_fails() {
        let dialer = OutboundDialer::new(Vec::new(), Duration::from_millis(200));
        let result = dialer.dial("127.0.0.1", 1).await;
        assert!(result.is_err());
    }
}
