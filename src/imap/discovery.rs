//! Folder discovery (spec §4.6 steps 1-6): NAMESPACE, LIST/LSUB fallback
//! chain, `\Noselect`/`\HasChildren` recursion, and required-folder aliasing.

use super::utf7;
use async_imap::types::{Name, NameAttribute};
use async_imap::Session;
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FolderEntry {
    pub raw_name: String,
    pub display_name: String,
    pub delimiter: Option<String>,
    pub selectable: bool,
    pub has_children: bool,
}

#[derive(Debug, Default)]
pub struct FolderMap {
    pub namespace_prefix: String,
    pub namespace_delimiter: String,
    pub entries: Vec<FolderEntry>,
}

impl FolderMap {
    /// Selectable entries only (spec step 5: "exclude `\Noselect` entries").
    pub fn selectable(&self) -> impl Iterator<Item = &FolderEntry> {
        self.entries.iter().filter(|e| e.selectable)
    }

    /// Finds the raw (server-side, UTF-7 encoded) name for a logical alias
    /// name, matching case-insensitively against the decoded display name.
    pub fn find_by_display_name(&self, display_name: &str) -> Option<&FolderEntry> {
        self.entries
            .iter()
            .find(|e| e.display_name.eq_ignore_ascii_case(display_name))
    }
}

/// Logical folder name -> candidate server-side aliases, checked in order
/// (spec step 6: "logical names map to sets of aliases").
pub fn required_folder_aliases(logical: &str) -> &'static [&'static str] {
    match logical {
        "inbox" => &["INBOX"],
        "sent" => &["Sent", "Sent Items", "Sent Mail", "INBOX.Sent", "[Gmail]/Sent Mail"],
        "drafts" => &["Drafts", "INBOX.Drafts", "[Gmail]/Drafts"],
        "trash" => &["Trash", "Deleted Items", "INBOX.Trash", "[Gmail]/Trash"],
        "spam" => &["Spam", "Junk", "Junk E-mail", "[Gmail]/Spam"],
        "archive" => &["Archive", "All Mail", "[Gmail]/All Mail"],
        _ => &[],
    }
}

pub const REQUIRED_LOGICAL_FOLDERS: &[&str] = &["inbox", "sent", "drafts", "trash", "spam", "archive"];

fn to_entry(name: Name) -> FolderEntry {
    let raw_name = name.name().to_string();
    let has_children = name.attributes().iter().any(|a| matches!(a, NameAttribute::HasChildren));
    let selectable = !name.attributes().iter().any(|a| matches!(a, NameAttribute::NoSelect));
    FolderEntry {
        display_name: utf7::decode(&raw_name),
        delimiter: name.delimiter().map(str::to_string),
        raw_name,
        selectable,
        has_children,
    }
}

async fn list<T>(session: &mut Session<T>, reference: &str, pattern: &str) -> anyhow::Result<Vec<FolderEntry>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let names: Vec<Name> = session.list(Some(reference), Some(pattern)).await?.try_collect().await?;
    Ok(names.into_iter().map(to_entry).collect())
}

async fn lsub<T>(session: &mut Session<T>, reference: &str, pattern: &str) -> anyhow::Result<Vec<FolderEntry>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let names: Vec<Name> = session.lsub(Some(reference), Some(pattern)).await?.try_collect().await?;
    Ok(names.into_iter().map(to_entry).collect())
}

/// Runs the discovery algorithm to build the full selectable folder map.
pub async fn discover<T>(session: &mut Session<T>) -> anyhow::Result<FolderMap>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (namespace_prefix, namespace_delimiter) = match session.namespace().await {
        Ok(ns) => ns
            .personal
            .and_then(|items| items.into_iter().next())
            .map(|item| (item.prefix, item.delimiter.unwrap_or_else(|| "/".into())))
            .unwrap_or_else(|| (String::new(), "/".to_string())),
        Err(_) => (String::new(), "/".to_string()),
    };

    let mut entries = list(session, "", "*").await.unwrap_or_default();

    if entries.is_empty() {
        for (reference, pattern) in [("", ""), ("", "%")] {
            entries = list(session, reference, pattern).await.unwrap_or_default();
            if !entries.is_empty() {
                break;
            }
        }
    }
    if entries.is_empty() {
        entries = lsub(session, "", "*").await.unwrap_or_default();
    }
    if entries.is_empty() {
        for reference in ["INBOX", "INBOX.", "INBOX/"] {
            entries = list(session, reference, "*").await.unwrap_or_default();
            if !entries.is_empty() {
                break;
            }
        }
    }

    let mut seen: HashMap<String, FolderEntry> = HashMap::new();
    let mut to_recurse: Vec<String> = Vec::new();
    for entry in entries {
        if !entry.selectable && entry.has_children {
            to_recurse.push(entry.raw_name.clone());
        }
        seen.insert(entry.raw_name.clone(), entry);
    }

    while let Some(raw_name) = to_recurse.pop() {
        let children = list(session, &raw_name, "*").await.unwrap_or_default();
        for child in children {
            if !seen.contains_key(&child.raw_name) {
                if !child.selectable && child.has_children {
                    to_recurse.push(child.raw_name.clone());
                }
                seen.insert(child.raw_name.clone(), child);
            }
        }
    }

    Ok(FolderMap {
        namespace_prefix,
        namespace_delimiter,
        entries: seen.into_values().collect(),
    })
}

/// Ensures each required logical folder has a matching alias, `CREATE`-ing the
/// canonical name when the create policy is enabled and none match.
pub async fn ensure_required_folders<T>(
    session: &mut Session<T>,
    folder_map: &mut FolderMap,
    create_missing: bool,
) -> anyhow::Result<Vec<String>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut created = Vec::new();
    for logical in REQUIRED_LOGICAL_FOLDERS {
        let aliases = required_folder_aliases(logical);
        let present = aliases.iter().any(|alias| folder_map.find_by_display_name(alias).is_some());
        if present || !create_missing {
            continue;
        }
        let canonical = aliases[0];
        match session.create(canonical).await {
            Ok(_) => {
                created.push(canonical.to_string());
                folder_map.entries.push(FolderEntry {
                    raw_name: canonical.to_string(),
                    display_name: canonical.to_string(),
                    delimiter: Some(folder_map.namespace_delimiter.clone()),
                    selectable: true,
                    has_children: false,
                });
            }
            Err(async_imap::error::Error::No(msg)) if msg.to_ascii_uppercase().contains("ALREADYEXISTS") => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn required_aliases_cover_six_logical_folders() {
        assert_eq!(REQUIRED_LOGICAL_FOLDERS.len(), 6);
        for logical in REQUIRED_LOGICAL_FOLDERS {
            assert!(!required_folder_aliases(logical).is_empty());
        }
    }

    #[test]
    fn folder_map_finds_by_display_name_case_insensitively() {
        let map = FolderMap {
            namespace_prefix: String::new(),
            namespace_delimiter: "/".into(),
            entries: vec![FolderEntry {
                raw_name: "INBOX".into(),
                display_name: "INBOX".into(),
                delimiter: Some("/".into()),
                selectable: true,
                has_children: false,
            }],
        };
        assert!(map.find_by_display_name("inbox").is_some());
        assert!(map.find_by_display_name("missing").is_none());
    }
}
