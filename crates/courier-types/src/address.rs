// ============================================================================
// Recipient Address Validation
// ============================================================================
//
// Syntactic validation only. Deliverability is the provider's problem; this
// gate exists so malformed input is refused at enqueue time instead of
// burning a queue slot and a provider call.
//
// ============================================================================

use crate::job::JobError;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("malformed email address: {0}")]
    Malformed(String),
}

/// Validate a single recipient address.
///
/// Accepts the practical subset of RFC 5322 addr-spec: a non-empty local
/// part without whitespace or control characters, one `@`, and a domain of
/// at least two dot-separated labels made of alphanumerics and hyphens.
pub fn validate_recipient(address: &str) -> Result<(), AddressError> {
    let malformed = || AddressError::Malformed(address.to_string());

    if address.len() > 320 {
        return Err(malformed());
    }

    let (local, domain) = address.split_once('@').ok_or_else(malformed)?;

    if local.is_empty()
        || local.len() > 64
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
        || local
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '@')
    {
        return Err(malformed());
    }

    if domain.is_empty() || domain.len() > 255 || !domain.contains('.') {
        return Err(malformed());
    }
    for label in domain.split('.') {
        if label.is_empty()
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(malformed());
        }
    }

    Ok(())
}

/// Validate a recipient list: non-empty, every entry well-formed.
pub fn validate_recipients(recipients: &[String]) -> Result<(), JobError> {
    if recipients.is_empty() {
        return Err(JobError::NoRecipients);
    }
    for recipient in recipients {
        validate_recipient(recipient)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_addresses() {
        for addr in [
            "user@example.com",
            "first.last@example.co.uk",
            "user+tag@mail.example.com",
            "u@a.bc",
            "UPPER@EXAMPLE.COM",
        ] {
            assert!(validate_recipient(addr).is_ok(), "{addr} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for addr in [
            "",
            "no-at-sign",
            "@example.com",
            "user@",
            "user@localhost",
            "user name@example.com",
            "user@@example.com",
            ".user@example.com",
            "user.@example.com",
            "us..er@example.com",
            "user@-example.com",
            "user@exa mple.com",
            "user@example..com",
        ] {
            assert!(validate_recipient(addr).is_err(), "{addr} should be invalid");
        }
    }

    #[test]
    fn empty_list_is_refused() {
        assert!(matches!(
            validate_recipients(&[]),
            Err(JobError::NoRecipients)
        ));
    }

    #[test]
    fn one_bad_entry_fails_the_list() {
        let list = vec!["good@example.com".to_string(), "bad".to_string()];
        assert!(validate_recipients(&list).is_err());
    }

    #[test]
    fn duplicates_are_allowed() {
        let list = vec!["a@example.com".to_string(), "a@example.com".to_string()];
        assert!(validate_recipients(&list).is_ok());
    }
}
