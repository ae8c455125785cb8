//! Special-use folder resolution.
//!
//! Discovers language-agnostic names for special-use mailboxes from the
//! LIST response, using RFC 6154 SPECIAL-USE attributes first and a fallback
//! name table (then substring search) when the server does not advertise
//! them.

use std::collections::HashMap;

use mailloom_types::error::MailError;

/// One mailbox from the LIST response.
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    /// Attributes as sent by the server, e.g. `\Sent`, `\HasNoChildren`.
    pub attributes: Vec<String>,
}

const SPECIAL_USE_ATTRIBUTES: [&str; 5] = ["\\All", "\\Drafts", "\\Sent", "\\Junk", "\\Trash"];

/// Fallback folder names per attribute, checked in order.
fn fallback_names(attribute: &str) -> &'static [&'static str] {
    match attribute {
        "\\Sent" => &["Sent", "[Gmail]/Sent Mail", "Sent Items"],
        "\\Drafts" => &["Drafts", "[Gmail]/Drafts"],
        "\\All" => &["All Mail", "[Gmail]/All Mail"],
        "\\Trash" => &["Trash", "[Gmail]/Trash", "Deleted Items"],
        "\\Junk" => &["Junk", "Spam"],
        _ => &[],
    }
}

/// Resolves special-use attributes to real folder names for one session.
#[derive(Debug)]
pub struct FolderResolver {
    special_use: HashMap<String, String>,
    all_names: Vec<String>,
}

impl FolderResolver {
    /// Build a resolver from the session's folder listing.
    pub fn new(folders: &[Folder]) -> Self {
        let mut special_use = HashMap::new();
        let mut all_names = Vec::with_capacity(folders.len());

        for folder in folders {
            all_names.push(folder.name.clone());
            for attribute in &folder.attributes {
                if SPECIAL_USE_ATTRIBUTES.contains(&attribute.as_str()) {
                    tracing::debug!(
                        attribute = attribute.as_str(),
                        folder = folder.name.as_str(),
                        "found special-use folder"
                    );
                    special_use.insert(attribute.clone(), folder.name.clone());
                }
            }
        }

        Self {
            special_use,
            all_names,
        }
    }

    /// The real folder name for a special-use attribute.
    ///
    /// Resolution order: advertised SPECIAL-USE attribute, the fallback name
    /// table, then a substring match on the attribute word.
    pub fn resolve(&self, attribute: &str) -> Result<String, MailError> {
        if let Some(name) = self.special_use.get(attribute) {
            return Ok(name.clone());
        }
        if attribute == "\\Inbox" {
            return Ok("INBOX".to_string());
        }

        tracing::warn!(attribute, "special-use folder not advertised, trying fallbacks");
        for candidate in fallback_names(attribute) {
            if self.all_names.iter().any(|name| name == candidate) {
                return Ok(candidate.to_string());
            }
        }

        let search_term = attribute.trim_matches('\\').to_lowercase();
        if let Some(name) = self
            .all_names
            .iter()
            .find(|name| name.to_lowercase().contains(&search_term))
        {
            return Ok(name.clone());
        }

        Err(MailError::FolderNotFound(attribute.to_string()))
    }
}
