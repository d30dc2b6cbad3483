//! JSON-file-backed implementations of the `store` traits (spec §6: "Persisted
//! state (abstract schemas — any store)"). A production deployment swaps these
//! for its own database; this is the minimal concrete backend the reference
//! CLIs in `src/bin` need to actually run end to end.

use crate::error::EngineResult;
use crate::ids::{CampaignId, ImapAccountId, ProxyId, SessionId, SmtpAccountId};
use crate::model::{Campaign, DeadLetterRecord, ImapAccount, Proxy, RecipientTarget, SendAttempt, SmtpAccount};
use crate::store::{AccountStore, CampaignStore, ProxyStore, RecipientSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileDocument {
    #[serde(default)]
    smtp_accounts: Vec<SmtpAccount>,
    #[serde(default)]
    imap_accounts: Vec<ImapAccount>,
    #[serde(default)]
    proxies: Vec<Proxy>,
    #[serde(default)]
    campaigns: Vec<Campaign>,
    #[serde(default)]
    send_attempts: Vec<SendAttempt>,
    #[serde(default)]
    dead_letters: Vec<DeadLetterRecord>,
    #[serde(default)]
    recipients: Vec<RecipientTarget>,
}

/// One JSON document on disk holding every entity the engine touches, rewritten
/// wholesale on each mutation. Fine for the single-process, single-campaign use
/// the bundled CLIs make of it; not a concurrent multi-writer store.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<FileDocument>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, doc: Mutex::new(doc) })
    }

    async fn persist(&self, doc: &FileDocument) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Seeds recipients for a one-shot campaign run; the bundled CLIs call
    /// this once at startup rather than exposing a write path through
    /// `RecipientSource`, which is read-only by design (spec §4.7 step 1).
    pub async fn seed_recipients(&self, recipients: Vec<RecipientTarget>) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        doc.recipients = recipients;
        self.persist(&doc).await
    }

    pub async fn seed_accounts(&self, smtp: Vec<SmtpAccount>, imap: Vec<ImapAccount>, proxies: Vec<Proxy>) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        doc.smtp_accounts = smtp;
        doc.imap_accounts = imap;
        doc.proxies = proxies;
        self.persist(&doc).await
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.doc.lock().await.dead_letters.clone()
    }

    pub async fn send_attempts(&self) -> Vec<SendAttempt> {
        self.doc.lock().await.send_attempts.clone()
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
    async fn list_smtp_accounts(&self, session: SessionId) -> anyhow::Result<Vec<SmtpAccount>> {
        Ok(self.doc.lock().await.smtp_accounts.iter().filter(|a| a.session_id == session).cloned().collect())
    }

    async fn get_smtp_account(&self, id: SmtpAccountId) -> anyhow::Result<Option<SmtpAccount>> {
        Ok(self.doc.lock().await.smtp_accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn update_smtp_account(&self, account: &SmtpAccount) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        match doc.smtp_accounts.iter_mut().find(|a| a.id == account.id) {
            Some(slot) => *slot = account.clone(),
            None => doc.smtp_accounts.push(account.clone()),
        }
        self.persist(&doc).await
    }

    async fn list_imap_accounts(&self, session: SessionId) -> anyhow::Result<Vec<ImapAccount>> {
        Ok(self.doc.lock().await.imap_accounts.iter().filter(|a| a.session_id == session).cloned().collect())
    }

    async fn get_imap_account(&self, id: ImapAccountId) -> anyhow::Result<Option<ImapAccount>> {
        Ok(self.doc.lock().await.imap_accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn update_imap_account(&self, account: &ImapAccount) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        match doc.imap_accounts.iter_mut().find(|a| a.id == account.id) {
            Some(slot) => *slot = account.clone(),
            None => doc.imap_accounts.push(account.clone()),
        }
        self.persist(&doc).await
    }
}

#[async_trait]
impl ProxyStore for JsonFileStore {
    async fn list_proxies(&self, session: SessionId) -> anyhow::Result<Vec<Proxy>> {
        Ok(self.doc.lock().await.proxies.iter().filter(|p| p.session_id == session).cloned().collect())
    }

    async fn get_proxy(&self, id: ProxyId) -> anyhow::Result<Option<Proxy>> {
        Ok(self.doc.lock().await.proxies.iter().find(|p| p.id == id).cloned())
    }

    async fn update_proxy(&self, proxy: &Proxy) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        match doc.proxies.iter_mut().find(|p| p.id == proxy.id) {
            Some(slot) => *slot = proxy.clone(),
            None => doc.proxies.push(proxy.clone()),
        }
        self.persist(&doc).await
    }
}

#[async_trait]
impl CampaignStore for JsonFileStore {
    async fn get_campaign(&self, id: CampaignId) -> anyhow::Result<Option<Campaign>> {
        Ok(self.doc.lock().await.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn update_campaign(&self, campaign: &Campaign) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        match doc.campaigns.iter_mut().find(|c| c.id == campaign.id) {
            Some(slot) => *slot = campaign.clone(),
            None => doc.campaigns.push(campaign.clone()),
        }
        self.persist(&doc).await
    }

    async fn append_send_attempt(&self, attempt: &SendAttempt) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        doc.send_attempts.push(attempt.clone());
        self.persist(&doc).await
    }

    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        doc.dead_letters.push(record.clone());
        self.persist(&doc).await
    }
}

#[async_trait]
impl RecipientSource for JsonFileStore {
    async fn next_batch(&self, offset: usize, batch_size: usize) -> anyhow::Result<Vec<RecipientTarget>> {
        let doc = self.doc.lock().await;
        if offset >= doc.recipients.len() {
            return Ok(Vec::new());
        }
        let end = (offset + batch_size).min(doc.recipients.len());
        Ok(doc.recipients[offset..end].to_vec())
    }
}
