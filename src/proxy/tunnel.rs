//! SOCKS4/5 (RFC 1928, incl. auth negotiation and no-auth) and HTTP CONNECT
//! (RFC 7231 §4.3.6) tunnel handshakes. Written directly against
//! `tokio::io::{AsyncReadExt, AsyncWriteExt}` the way the teacher's SMTP
//! connection handler frames raw protocol bytes by hand instead of reaching
//! for a higher-level client crate.

use crate::model::{Proxy, ProxyAuth, ProxyKind};
use std::io;
use std::net::Ipv4Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tcp connect to proxy failed: {0}")]
    Connect(#[source] io::Error),
    #[error("tunnel io error: {0}")]
    Io(#[source] io::Error),
    #[error("proxy rejected the request: {0}")]
    Rejected(String),
    #[error("proxy returned an unsupported or malformed response")]
    Protocol,
    #[error("target host is not representable by this proxy protocol: {0}")]
    UnsupportedAddress(String),
}

impl From<io::Error> for TunnelError {
    fn from(e: io::Error) -> Self {
        TunnelError::Io(e)
    }
}

/// Connects to `proxy` and performs the protocol-appropriate handshake so the
/// returned stream is ready to speak the target protocol (SMTP/IMAP) directly.
pub async fn open_tunnel(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: std::time::Duration,
) -> Result<TcpStream, TunnelError> {
    let stream = tokio::time::timeout(
        timeout,
        TcpStream::connect((proxy.host.as_str(), proxy.port)),
    )
    .await
    .map_err(|_| TunnelError::Connect(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
    .map_err(TunnelError::Connect)?;

    let mut stream = stream;
    match proxy.kind {
        ProxyKind::Socks5 => socks5_handshake(&mut stream, target_host, target_port, proxy.auth.as_ref()).await?,
        ProxyKind::Socks4 => socks4_handshake(&mut stream, target_host, target_port).await?,
        ProxyKind::Http => http_connect_handshake(&mut stream, target_host, target_port, proxy.auth.as_ref()).await?,
    }

    Ok(stream)
}

async fn socks5_handshake(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    auth: Option<&ProxyAuth>,
) -> Result<(), TunnelError> {
    // Greeting: version 5, offer no-auth and username/password methods.
    let methods: &[u8] = if auth.is_some() { &[0x00, 0x02] } else { &[0x00] };
    let mut greeting = vec![0x05, methods.len() as u8];
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 {
        return Err(TunnelError::Protocol);
    }

    match reply[1] {
        0x00 => {}
        0x02 => {
            let auth = auth.ok_or(TunnelError::Protocol)?;
            let mut req = vec![0x01, auth.username.len() as u8];
            req.extend_from_slice(auth.username.as_bytes());
            req.push(auth.password.len() as u8);
            req.extend_from_slice(auth.password.as_bytes());
            stream.write_all(&req).await?;

            let mut auth_reply = [0u8; 2];
            stream.read_exact(&mut auth_reply).await?;
            if auth_reply[1] != 0x00 {
                return Err(TunnelError::Rejected("SOCKS5 authentication failed".into()));
            }
        }
        0xFF => return Err(TunnelError::Rejected("no acceptable SOCKS5 auth method".into())),
        _ => return Err(TunnelError::Protocol),
    }

    // CONNECT request. Prefer the domain-name address type so the proxy performs
    // its own DNS resolution (keeps resolution inside the tunnel too).
    let mut req = vec![0x05, 0x01, 0x00];
    if host.len() > 255 {
        return Err(TunnelError::UnsupportedAddress(host.to_string()));
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        req.push(0x01);
        req.extend_from_slice(&ip.octets());
    } else {
        req.push(0x03);
        req.push(host.len() as u8);
        req.extend_from_slice(host.as_bytes());
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != 0x05 {
        return Err(TunnelError::Protocol);
    }
    if head[1] != 0x00 {
        return Err(TunnelError::Rejected(format!("SOCKS5 CONNECT failed, reply code {}", head[1])));
    }

    // Skip the bound address the proxy reports (we don't need it).
    match head[3] {
        0x01 => {
            let mut rest = [0u8; 4 + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut rest).await?;
        }
        0x04 => {
            let mut rest = [0u8; 16 + 2];
            stream.read_exact(&mut rest).await?;
        }
        _ => return Err(TunnelError::Protocol),
    }

    Ok(())
}

async fn socks4_handshake(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), TunnelError> {
    let ip = host
        .parse::<Ipv4Addr>()
        .map_err(|_| TunnelError::UnsupportedAddress("SOCKS4 requires a pre-resolved IPv4 target".into()))?;

    let mut req = vec![0x04, 0x01];
    req.extend_from_slice(&port.to_be_bytes());
    req.extend_from_slice(&ip.octets());
    req.push(0x00); // empty userid, null-terminated
    stream.write_all(&req).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x00 {
        return Err(TunnelError::Protocol);
    }
    if reply[1] != 0x5A {
        return Err(TunnelError::Rejected(format!("SOCKS4 request rejected, code {}", reply[1])));
    }
    Ok(())
}

async fn http_connect_handshake(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    auth: Option<&ProxyAuth>,
) -> Result<(), TunnelError> {
    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(auth) = auth {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read the status line and headers until the blank line, byte-by-byte to
    // avoid reading past the CONNECT response into the tunneled stream.
    let mut buf = Vec::with_capacity(256);
    let mut last_four = [0u8; 4];
    loop {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TunnelError::Protocol);
        }
        buf.push(byte[0]);
        last_four.rotate_left(1);
        last_four[3] = byte[0];
        if &last_four == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 8192 {
            return Err(TunnelError::Protocol);
        }
    }

    let status_line = buf
        .split(|&b| b == b'\n')
        .next()
        .ok_or(TunnelError::Protocol)?;
    let status_line = String::from_utf8_lossy(status_line);
    let code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or(TunnelError::Protocol)?;

    if !(200..300).contains(&code) {
        return Err(TunnelError::Rejected(format!(
            "HTTP CONNECT failed: {}",
            status_line.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::SessionId;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn http_connect_rejects_non_2xx() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = Proxy::new(SessionId::new(), ProxyKind::Http, addr.ip().to_string(), addr.port());
        let err = open_tunnel(&proxy, "mail.example.com", 25, std::time::Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Rejected(_)));
    }

    #[tokio::test]
    async fn socks5_no_auth_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 2];
            sock.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            sock.read_exact(&mut methods).await.unwrap();
            sock.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            sock.read_exact(&mut head).await.unwrap();
            match head[3] {
                0x01 => {
                    let mut rest = [0u8; 6];
                    sock.read_exact(&mut rest).await.unwrap();
                }
                0x03 => {
                    let mut len = [0u8; 1];
                    sock.read_exact(&mut len).await.unwrap();
                    let mut rest = vec![0u8; len[0] as usize + 2];
                    sock.read_exact(&mut rest).await.unwrap();
                }
                _ => panic!("unexpected addr type"),
            }
            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let proxy = Proxy::new(SessionId::new(), ProxyKind::Socks5, addr.ip().to_string(), addr.port());
        open_tunnel(&proxy, "mail.example.com", 25, std::time::Duration::from_secs(2))
            .await
            .unwrap();
    }
}
