//! IMAP Prober (spec §4.6): authenticates, discovers folders, selects them,
//! and fetches message metadata through the same [`SocketFactory`] the SMTP
//! Dispatcher uses. Connection framing is handed off to `async-imap`, wrapped
//! over our boxed socket via `tokio_util::compat` the way the closest example
//! in the retrieval pack (`flowDesk`'s `imap/connection.rs`) bridges tokio
//! streams into `async-imap`'s futures-io world; unlike that example we never
//! own the raw `TcpStream` ourselves, since every socket must come from the
//! Proxy Pool when leak-prevention is on.

pub mod discovery;
pub mod fetch;
pub mod utf7;

use crate::error::{EngineError, EngineResult};
use crate::model::{Credential, ImapAccount, Proxy};
use crate::store::{EngineSocket, SocketFactory, TokenProvider};
use async_imap::{Authenticator, Client, Session};
use discovery::FolderMap;
use fetch::{MessageSummary, RawMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

type ImapStream = Compat<Box<dyn EngineSocket>>;

pub struct FolderReport {
    pub folder_map: FolderMap,
    pub created_folders: Vec<String>,
}

pub struct ImapProber {
    sockets: Arc<dyn SocketFactory>,
    tokens: Arc<dyn TokenProvider>,
    tls_config: Arc<ClientConfig>,
}

struct XOAuth2Authenticator(String);

impl Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        self.0.clone()
    }
}

impl ImapProber {
    pub fn new(sockets: Arc<dyn SocketFactory>, tokens: Arc<dyn TokenProvider>) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        Self {
            sockets,
            tokens,
            tls_config: Arc::new(tls_config),
        }
    }

    fn target_host(account: &ImapAccount) -> EngineResult<String> {
        if let Some(host) = &account.host {
            return Ok(host.clone());
        }
        let domain = account.domain();
        if domain.is_empty() {
            return Err(EngineError::Configuration("IMAP account email has no domain".into()));
        }
        Ok(format!("imap.{domain}"))
    }

    /// Opens the socket, performs the implicit-TLS handshake, and authenticates
    /// (spec: "Implicit TLS only (IMAPS)").
    async fn connect(&self, account: &ImapAccount, proxy: Option<&Proxy>, timeout: Duration) -> EngineResult<Session<ImapStream>> {
        let host = Self::target_host(account)?;
        let socket = self.sockets.connect(proxy, &host, account.port, timeout).await?;

        let connector = TlsConnector::from(self.tls_config.clone());
        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| EngineError::Configuration(format!("invalid TLS server name: {host}")))?;
        let tls_stream = connector
            .connect(server_name, socket)
            .await
            .map_err(|e| EngineError::Network(format!("TLS handshake failed: {e}")))?;

        let boxed: Box<dyn EngineSocket> = Box::new(tls_stream);
        let client = Client::new(boxed.compat());

        match &account.credential {
            Credential::Password(password) => client
                .login(&account.email, password)
                .await
                .map_err(|(e, _)| EngineError::Auth { permanent: true, reason: e.to_string() }),
            Credential::OAuth { refresh_token, client_id } => {
                let token = self.tokens.access_token(refresh_token, client_id).await.map_err(|e| EngineError::Auth {
                    permanent: false,
                    reason: format!("token refresh failed: {e}"),
                })?;
                let sasl = format!("user={}\x01auth=Bearer {}\x01\x01", account.email, token);
                client
                    .authenticate("XOAUTH2", XOAuth2Authenticator(sasl))
                    .await
                    .map_err(|(e, _)| EngineError::Auth { permanent: false, reason: e.to_string() })
            }
        }
    }

    /// Discovers the folder map and, when `create_missing` is set, creates any
    /// missing required logical folders (spec step 6).
    pub async fn discover_folders(
        &self,
        account: &ImapAccount,
        proxy: Option<&Proxy>,
        create_missing: bool,
        timeout: Duration,
    ) -> EngineResult<FolderReport> {
        let mut session = self.connect(account, proxy, timeout).await?;
        let mut folder_map = discovery::discover(&mut session)
            .await
            .map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        let created = discovery::ensure_required_folders(&mut session, &mut folder_map, create_missing)
            .await
            .map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        let _ = session.logout().await;
        Ok(FolderReport { folder_map, created_folders: created })
    }

    /// Selects `folder`, falling back through the discovered map and then
    /// through known aliases of its normalized logical name (spec
    /// "Selection").
    async fn select_with_fallback(&self, session: &mut Session<ImapStream>, folder: &str, folder_map: &FolderMap) -> EngineResult<String> {
        if session.select(folder).await.is_ok() {
            return Ok(folder.to_string());
        }
        if let Some(entry) = folder_map.find_by_display_name(folder) {
            if session.select(&entry.raw_name).await.is_ok() {
                return Ok(entry.raw_name.clone());
            }
        }
        let normalized = folder.to_ascii_lowercase();
        let aliases = discovery::required_folder_aliases(&normalized);
        for alias in aliases {
            if session.select(alias).await.is_ok() {
                return Ok(alias.to_string());
            }
        }
        Err(EngineError::ProtocolViolation(format!("could not select folder {folder}")))
    }

    /// Fetches up to `limit` most recent message summaries for `folder`.
    pub async fn fetch_folder_summaries(
        &self,
        account: &ImapAccount,
        proxy: Option<&Proxy>,
        folder: &str,
        limit: usize,
        timeout: Duration,
    ) -> EngineResult<Vec<MessageSummary>> {
        let mut session = self.connect(account, proxy, timeout).await?;
        let folder_map = discovery::discover(&mut session).await.map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        let selected = self.select_with_fallback(&mut session, folder, &folder_map).await?;
        let summaries = fetch::list_envelopes(&mut session, &selected, limit)
            .await
            .map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        let _ = session.logout().await;
        Ok(summaries)
    }

    /// Bulk raw dump (spec "Raw dump"): enumerates every selectable folder and
    /// fetches up to `per_folder_limit` most recent messages each.
    pub async fn dump_all_folders(
        &self,
        account: &ImapAccount,
        proxy: Option<&Proxy>,
        per_folder_limit: usize,
        timeout: Duration,
    ) -> EngineResult<Vec<(String, u32, RawMessage)>> {
        let mut session = self.connect(account, proxy, timeout).await?;
        let folder_map = discovery::discover(&mut session).await.map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;

        let mut dumped = Vec::new();
        let selectable: Vec<String> = folder_map.selectable().map(|e| e.raw_name.clone()).collect();
        for raw_name in selectable {
            if session.select(&raw_name).await.is_err() {
                continue;
            }
            let summaries = fetch::list_envelopes(&mut session, &raw_name, per_folder_limit)
                .await
                .unwrap_or_default();
            for summary in summaries {
                if let Ok(raw) = fetch::fetch_raw(&mut session, summary.uid).await {
                    dumped.push((raw_name.clone(), summary.uid, raw));
                }
            }
        }
        let _ = session.logout().await;
        Ok(dumped)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn target_host_falls_back_to_imap_subdomain() {
        let account = ImapAccount::new(crate::ids::SessionId::new(), "user@example.com", Credential::Password("x".into()));
        assert_eq!(ImapProber::target_host(&account).unwrap(), "imap.example.com");
    }

    #[test]
    fn target_host_prefers_explicit_host() {
        let mut account = ImapAccount::new(crate::ids::SessionId::new(), "user@example.com", Credential::Password("x".into()));
        account.host = Some("mail.internal".to_string());
        assert_eq!(ImapProber::target_host(&account).unwrap(), "mail.internal");
    }
}
