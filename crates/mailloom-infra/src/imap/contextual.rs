//! Contextual message ids.
//!
//! A bare IMAP UID is only meaningful within one mailbox. A contextual id
//! (`base64(mailbox):uid`) stays resolvable across folder views, which
//! matters for Gmail where the same message appears in several folders.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use mailloom_types::error::MailError;

/// Build a contextual id for a UID within `mailbox`.
pub fn create_contextual_id(mailbox: &str, uid: u32) -> String {
    format!("{}:{}", STANDARD.encode(mailbox), uid)
}

/// Split a contextual id back into `(mailbox, uid)`.
pub fn parse_contextual_id(contextual_id: &str) -> Result<(String, u32), MailError> {
    let (encoded, uid) = contextual_id
        .rsplit_once(':')
        .ok_or_else(|| MailError::Parse(format!("malformed contextual id '{contextual_id}'")))?;
    let mailbox = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| MailError::Parse(format!("malformed contextual id '{contextual_id}'")))?;
    let uid = uid
        .parse()
        .map_err(|_| MailError::Parse(format!("malformed contextual id '{contextual_id}'")))?;
    Ok((mailbox, uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let id = create_contextual_id("[Gmail]/All Mail", 600);
        let (mailbox, uid) = parse_contextual_id(&id).unwrap();
        assert_eq!(mailbox, "[Gmail]/All Mail");
        assert_eq!(uid, 600);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(parse_contextual_id("no-colon").is_err());
        assert!(parse_contextual_id("!!!:42").is_err());
        assert!(parse_contextual_id("QQ==:notanumber").is_err());
    }
}
