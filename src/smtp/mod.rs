//! SMTP Dispatcher (spec §4.5): delivers a single message via a chosen
//! account and proxy. The line-oriented command/response handling follows
//! the teacher's buffered `read_until`/`write_all` framing in
//! `smtp/connection.rs`, adapted from an inbound server session to an
//! outbound client.

pub mod auth;
pub mod host;
pub mod message;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{Credential, Proxy, SmtpAccount};
use crate::store::{DirectSocketFactory, EngineSocket, SocketFactory, TokenProvider};
use message::PreparedMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

const LINE_LIMIT: usize = 8192;

pub struct SendOutcome {
    pub message_id: String,
    pub response_time_ms: u32,
    pub server_banner: Option<String>,
}

/// Classification surfaced to the caller per spec §4.5 step 6; carried inside
/// [`EngineError`] via the `Network`/`Auth`/`Policy`/`ProtocolViolation`
/// variants, kept here only as a label for attempt logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpErrorKind {
    Auth,
    Timeout,
    Connect,
    Tls,
    Policy,
    Transient,
    Unknown,
}

pub struct SmtpDispatcher {
    sockets: Arc<dyn SocketFactory>,
    tokens: Arc<dyn TokenProvider>,
    host_resolver: host::HostResolver,
    tls_config: Arc<ClientConfig>,
}

impl SmtpDispatcher {
    pub fn new(sockets: Arc<dyn SocketFactory>, tokens: Arc<dyn TokenProvider>, host_resolver: host::HostResolver) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

        Self {
            sockets,
            tokens,
            host_resolver,
            tls_config: Arc::new(tls_config),
        }
    }

    /// Resolves a target host:port for `account`, preferring its explicit
    /// host if set (spec §4.5 "Host discovery").
    pub async fn resolve_target(&self, account: &SmtpAccount) -> EngineResult<(String, u16)> {
        if let Some(host) = &account.host {
            return Ok((host.clone(), account.port));
        }
        let domain = account.domain();
        let candidates = self
            .host_resolver
            .candidates(domain)
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        candidates
            .into_iter()
            .next()
            .map(|(h, _)| (h, account.port))
            .ok_or_else(|| EngineError::Network(format!("no SMTP host found for {domain}")))
    }

    pub async fn send(
        &self,
        account: &SmtpAccount,
        proxy: Option<&Proxy>,
        recipient_email: &str,
        message: &PreparedMessage,
        config: &EngineConfig,
    ) -> EngineResult<SendOutcome> {
        let started = tokio::time::Instant::now();
        let (host, port) = self.resolve_target(account).await?;

        let result = tokio::time::timeout(
            config.smtp_default_timeout,
            self.send_inner(account, proxy, &host, port, recipient_email, message),
        )
        .await;

        let response_time_ms = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        match result {
            Ok(Ok(server_banner)) => Ok(SendOutcome {
                message_id: message.message_id.clone(),
                response_time_ms,
                server_banner,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Network(format!("SMTP send to {host}:{port} timed out"))),
        }
    }

    async fn send_inner(
        &self,
        account: &SmtpAccount,
        proxy: Option<&Proxy>,
        host: &str,
        port: u16,
        recipient_email: &str,
        message: &PreparedMessage,
    ) -> EngineResult<Option<String>> {
        let socket = self
            .sockets
            .connect(proxy, host, port, Duration::from_secs(30))
            .await?;

        if port == 465 {
            let tls = self.upgrade_tls(socket, host).await?;
            self.run_session(tls, true, account, host, recipient_email, message).await
        } else {
            self.run_session(socket, false, account, host, recipient_email, message).await
        }
    }

    async fn upgrade_tls(&self, socket: Box<dyn EngineSocket>, host: &str) -> EngineResult<Box<dyn EngineSocket>> {
        let connector = TlsConnector::from(self.tls_config.clone());
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| EngineError::Configuration(format!("invalid TLS server name: {host}")))?;
        let tls_stream = connector
            .connect(server_name, socket)
            .await
            .map_err(|e| EngineError::Network(format!("TLS handshake failed: {e}")))?;
        Ok(Box::new(tls_stream))
    }

    async fn run_session(
        &self,
        socket: Box<dyn EngineSocket>,
        already_tls: bool,
        account: &SmtpAccount,
        ehlo_host: &str,
        recipient_email: &str,
        message: &PreparedMessage,
    ) -> EngineResult<Option<String>> {
        let (read_half, mut write_half) = tokio::io::split(socket);
        let mut reader = BufReader::new(read_half);

        let banner = read_multiline_reply(&mut reader).await?;
        expect_code(&banner, 220)?;

        let mut caps = send_command(&mut reader, &mut write_half, &format!("EHLO {ehlo_host}\r\n")).await?;
        expect_code(&caps, 250)?;

        if !already_tls {
            let starttls_advertised = caps.iter().any(|l| l.to_ascii_uppercase().contains("STARTTLS"));
            if !starttls_advertised {
                return Err(EngineError::Policy("server does not support STARTTLS".into()));
            }

            let reply = send_command(&mut reader, &mut write_half, "STARTTLS\r\n").await?;
            expect_code(&reply, 220)?;
            let plain_socket = reader.into_inner().unsplit(write_half);
            let tls_socket = self.upgrade_tls(plain_socket, ehlo_host).await?;
            let (read_half, new_write_half) = tokio::io::split(tls_socket);
            reader = BufReader::new(read_half);
            write_half = new_write_half;
            caps = send_command(&mut reader, &mut write_half, &format!("EHLO {ehlo_host}\r\n")).await?;
            expect_code(&caps, 250)?;
        }

        self.authenticate(&mut reader, &mut write_half, account).await?;

        let reply = send_command(&mut reader, &mut write_half, &format!("MAIL FROM:<{}>\r\n", account.email)).await?;
        expect_code(&reply, 250)?;

        let reply = send_command(&mut reader, &mut write_half, &format!("RCPT TO:<{recipient_email}>\r\n")).await?;
        expect_code(&reply, 250)?;

        let reply = send_command(&mut reader, &mut write_half, "DATA\r\n").await?;
        expect_code(&reply, 354)?;

        write_half
            .write_all(&dot_stuff(&message.raw))
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        write_half
            .write_all(b"\r\n.\r\n")
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let reply = read_multiline_reply(&mut reader).await?;
        expect_code(&reply, 250)?;

        let _ = send_command(&mut reader, &mut write_half, "QUIT\r\n").await;

        Ok(banner.first().cloned())
    }

    /// Mock pre-flight connectivity check (spec §4.9): a direct (non-proxied)
    /// `EHLO`+`STARTTLS`+`LOGIN`+`QUIT` walk against the account's own server,
    /// stopping before `MAIL FROM` since no message is actually sent.
    pub async fn check_connection(&self, account: &SmtpAccount, timeout: Duration) -> EngineResult<()> {
        let (host, port) = self.resolve_target(account).await?;
        let already_tls = port == 465;

        tokio::time::timeout(timeout, async {
            let socket = DirectSocketFactory.connect(None, &host, port, timeout).await?;
            let socket = if already_tls { self.upgrade_tls(socket, &host).await? } else { socket };

            let (read_half, mut write_half) = tokio::io::split(socket);
            let mut reader = BufReader::new(read_half);

            let banner = read_multiline_reply(&mut reader).await?;
            expect_code(&banner, 220)?;

            let mut caps = send_command(&mut reader, &mut write_half, &format!("EHLO {host}\r\n")).await?;
            expect_code(&caps, 250)?;

            if !already_tls {
                let starttls_advertised = caps.iter().any(|l| l.to_ascii_uppercase().contains("STARTTLS"));
                if starttls_advertised {
                    let reply = send_command(&mut reader, &mut write_half, "STARTTLS\r\n").await?;
                    expect_code(&reply, 220)?;
                    let plain_socket = reader.into_inner().unsplit(write_half);
                    let tls_socket = self.upgrade_tls(plain_socket, &host).await?;
                    let (read_half, new_write_half) = tokio::io::split(tls_socket);
                    reader = BufReader::new(read_half);
                    write_half = new_write_half;
                    caps = send_command(&mut reader, &mut write_half, &format!("EHLO {host}\r\n")).await?;
                    expect_code(&caps, 250)?;
                }
            }

            self.authenticate(&mut reader, &mut write_half, account).await?;
            let _ = send_command(&mut reader, &mut write_half, "QUIT\r\n").await;
            Ok(())
        })
        .await
        .map_err(|_| EngineError::Network(format!("connectivity check to {host}:{port} timed out")))?
    }

    async fn authenticate<R, W>(&self, reader: &mut BufReader<R>, writer: &mut W, account: &SmtpAccount) -> EngineResult<()>
    where
        R: AsyncReadExt + Unpin,
        W: AsyncWriteExt + Unpin,
    {
        match &account.credential {
            Credential::Password(password) => {
                let reply = send_command(reader, writer, "AUTH LOGIN\r\n").await?;
                expect_code(&reply, 334)?;
                let reply = send_command(reader, writer, &format!("{}\r\n", auth::login_username_line(&account.email))).await?;
                expect_code(&reply, 334)?;
                let reply = send_command(reader, writer, &format!("{}\r\n", auth::login_password_line(password))).await?;
                expect_code(&reply, 235).map_err(|_| EngineError::Auth {
                    permanent: true,
                    reason: "LOGIN authentication rejected".into(),
                })
            }
            Credential::OAuth { refresh_token, client_id } => {
                let token = self
                    .tokens
                    .access_token(refresh_token, client_id)
                    .await
                    .map_err(|e| EngineError::Auth {
                        permanent: false,
                        reason: format!("token refresh failed: {e}"),
                    })?;
                let line = auth::xoauth2_line(&account.email, &token);
                let reply = send_command(reader, writer, &format!("AUTH XOAUTH2 {line}\r\n")).await?;
                expect_code(&reply, 235).map_err(|_| EngineError::Auth {
                    permanent: false,
                    reason: "XOAUTH2 authentication rejected".into(),
                })
            }
        }
    }
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> EngineResult<String> {
    let mut buffer = Vec::with_capacity(256);
    let n = reader
        .take(LINE_LIMIT as u64)
        .read_until(b'\n', &mut buffer)
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;
    if n == 0 {
        return Err(EngineError::Network("connection closed by peer".into()));
    }
    Ok(String::from_utf8_lossy(&buffer).trim_end().to_string())
}

async fn read_multiline_reply<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> EngineResult<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let continues = line.len() > 3 && line.as_bytes()[3] == b'-';
        lines.push(line);
        if !continues {
            break;
        }
    }
    Ok(lines)
}

async fn send_command<R, W>(reader: &mut BufReader<R>, writer: &mut W, command: &str) -> EngineResult<Vec<String>>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(command.as_bytes()).await.map_err(|e| EngineError::Network(e.to_string()))?;
    read_multiline_reply(reader).await
}

fn expect_code(lines: &[String], expected: u16) -> EngineResult<()> {
    let code = lines
        .first()
        .and_then(|l| l.get(0..3))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or(EngineError::ProtocolViolation("malformed SMTP reply".into()))?;
    if code == expected || (expected == 250 && code / 100 == 2) {
        Ok(())
    } else if code / 100 == 5 {
        Err(EngineError::Policy(format!("SMTP permanent failure {code}: {}", lines.join(" "))))
    } else {
        Err(EngineError::Network(format!("SMTP reply {code}, expected {expected}: {}", lines.join(" "))))
    }
}

fn dot_stuff(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut at_line_start = true;
    for &b in raw {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dot_stuffing_escapes_leading_dots() {
        let raw = b"Subject: hi\r\n.start of body\r\nnormal line\r\n..double\r\n";
        let stuffed = dot_stuff(raw);
        assert_eq!(
            String::from_utf8(stuffed).unwrap(),
            "Subject: hi\r\n..start of body\r\nnormal line\r\n...double\r\n"
        );
    }

    #[test]
    fn expect_code_accepts_2xx_family_for_250() {
        assert!(expect_code(&["250 OK".to_string()], 250).is_ok());
        assert!(expect_code(&["251 forwarded".to_string()], 250).is_ok());
        assert!(expect_code(&["550 no such user".to_string()], 250).is_err());
    }
}
