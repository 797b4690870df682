//! Conversation reference registry.
//!
//! A JSON object keyed by responsible id, each value a Bot Framework
//! conversation reference captured when that person last talked to the bot.
//! Capture happens elsewhere; this module only reads the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NotifyError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    pub service_url: String,
    pub conversation: ConversationAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

fn normalize_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Read-only view of the conversation reference file.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    path: Option<PathBuf>,
    references: HashMap<String, ConversationReference>,
    test_recipient: Option<String>,
}

impl SessionRegistry {
    /// Load the registry. A missing file is an empty registry; entries that
    /// do not parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is not a JSON object.
    pub fn load(path: &Path, test_recipient: Option<String>) -> Result<Self> {
        let mut registry = Self {
            path: Some(path.to_path_buf()),
            references: HashMap::new(),
            test_recipient: test_recipient
                .map(|r| normalize_id(&r))
                .filter(|r| !r.is_empty()),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn from_references<I>(references: I, test_recipient: Option<String>) -> Self
    where
        I: IntoIterator<Item = (String, ConversationReference)>,
    {
        Self {
            path: None,
            references: references
                .into_iter()
                .map(|(id, reference)| (normalize_id(&id), reference))
                .collect(),
            test_recipient: test_recipient.map(|r| normalize_id(&r)),
        }
    }

    /// Re-read the backing file, replacing the in-memory references.
    pub fn reload(&mut self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "no session registry file; stateful delivery disabled");
            self.references.clear();
            return Ok(());
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| NotifyError::Config(format!("invalid session registry {}: {e}", path.display())))?;

        let mut references = HashMap::with_capacity(entries.len());
        for (id, value) in entries {
            match serde_json::from_value::<ConversationReference>(value) {
                Ok(reference) => {
                    references.insert(normalize_id(&id), reference);
                }
                Err(err) => tracing::warn!(responsible = %id, error = %err, "skipping invalid conversation reference"),
            }
        }
        tracing::debug!(count = references.len(), "session registry loaded");
        self.references = references;
        Ok(())
    }

    /// Responsible id actually addressed for `responsible`.
    pub fn recipient_for<'a>(&'a self, responsible: &'a str) -> &'a str {
        self.test_recipient.as_deref().unwrap_or(responsible)
    }

    pub fn lookup(&self, responsible: &str) -> Option<&ConversationReference> {
        self.references.get(&normalize_id(self.recipient_for(responsible)))
    }

    pub fn contains(&self, responsible: &str) -> bool {
        self.lookup(responsible).is_some()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}
