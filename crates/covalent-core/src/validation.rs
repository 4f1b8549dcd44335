//! Structural validation for headers, change payloads and content pieces.
//!
//! These checks are independent of permissions. A piece that fails them is
//! dropped at the wire; a transaction whose changes fail to parse is kept in
//! the log and marked invalid by the validators instead.

use serde_json::Value;

use crate::content::CoValueContent;
use crate::error::ValidationError;
use crate::header::{content_types, CoValueHeader, Ruleset};
use crate::provider::CryptoProvider;

/// Maximum size of one encoded transaction.
pub const MAX_TRANSACTION_SIZE: usize = 1 << 20;

/// Parse a trusting `changes` payload into its change objects.
pub fn parse_changes(json: &str) -> Result<Vec<Value>, ValidationError> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(changes)) => Ok(changes),
        Ok(_) => Err(ValidationError::MalformedChanges(
            "changes must be a JSON array".into(),
        )),
        Err(e) => Err(ValidationError::MalformedChanges(e.to_string())),
    }
}

/// Check a header is internally consistent.
pub fn validate_header(header: &CoValueHeader) -> Result<(), ValidationError> {
    if header.content_type.is_empty() {
        return Err(ValidationError::MalformedHeader("empty content type".into()));
    }

    let group_like = header.content_type == content_types::GROUP
        || header.content_type == content_types::ACCOUNT;
    match (&header.ruleset, group_like) {
        (Ruleset::Group { .. }, false) => Err(ValidationError::MalformedHeader(format!(
            "group ruleset on content type {}",
            header.content_type
        ))),
        (Ruleset::OwnedByGroup { .. } | Ruleset::UnsafeAllowAll, true) => {
            Err(ValidationError::MalformedHeader(format!(
                "{} must use the group ruleset",
                header.content_type
            )))
        }
        _ => Ok(()),
    }
}

/// Check a content piece before merging it.
///
/// # Validation Steps
/// 1. A carried header must hash to the piece id and be consistent.
/// 2. Every new transaction must fit the size limit.
pub fn validate_content_piece(
    crypto: &dyn CryptoProvider,
    content: &CoValueContent,
) -> Result<(), ValidationError> {
    // 1. Header
    if let Some(header) = &content.header {
        if header.id(crypto) != content.id {
            return Err(ValidationError::HeaderMismatch);
        }
        validate_header(header)?;
    }

    // 2. Sizes
    for session in content.new.values() {
        for tx in &session.new_transactions {
            let size = tx.encoded_size();
            if size > MAX_TRANSACTION_SIZE {
                return Err(ValidationError::TransactionTooLarge {
                    size,
                    max: MAX_TRANSACTION_SIZE,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Priority;
    use crate::ids::{CoValueId, MemberId};
    use crate::provider::DalekCrypto;

    #[test]
    fn test_parse_changes() {
        assert_eq!(parse_changes(r#"[{"op":"set"}]"#).unwrap().len(), 1);
        assert!(parse_changes(r#"{"op":"set"}"#).is_err());
        assert!(parse_changes("not json").is_err());
    }

    #[test]
    fn test_header_ruleset_consistency() {
        let group = CoValueHeader::new(
            content_types::GROUP,
            Ruleset::Group {
                initial_admin: MemberId::Everyone,
            },
        );
        assert!(validate_header(&group).is_ok());

        let bad = CoValueHeader::new(
            content_types::COMAP,
            Ruleset::Group {
                initial_admin: MemberId::Everyone,
            },
        );
        assert!(validate_header(&bad).is_err());

        let owned_group = CoValueHeader::new(
            content_types::GROUP,
            Ruleset::OwnedByGroup {
                group: CoValueId::from_bytes([1; 32]),
            },
        );
        assert!(validate_header(&owned_group).is_err());
    }

    #[test]
    fn test_piece_header_must_match_id() {
        let crypto = DalekCrypto;
        let header = CoValueHeader::new(content_types::COMAP, Ruleset::UnsafeAllowAll)
            .with_uniqueness("x");

        let mut piece = CoValueContent::new(header.id(&crypto), Priority::Medium);
        piece.header = Some(header.clone());
        assert!(validate_content_piece(&crypto, &piece).is_ok());

        piece.id = CoValueId::from_bytes([9; 32]);
        assert!(matches!(
            validate_content_piece(&crypto, &piece),
            Err(ValidationError::HeaderMismatch)
        ));
    }
}
