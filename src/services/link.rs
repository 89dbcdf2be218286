//! Static validation of submitted verification links.
//!
//! A link is acceptable only when it references the external verification
//! service's domain and carries a verification-session identifier in its
//! path. Validation is synchronous and happens before any job record exists.

use url::Url;

/// Session identifiers are opaque tokens issued by the external service.
const REF_MIN_LEN: usize = 16;
const REF_MAX_LEN: usize = 64;

/// A validated verification link.
#[derive(Debug, Clone)]
pub struct VerificationLink {
    pub url: Url,
    /// Session identifier extracted from the link path.
    pub session_ref: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("not a valid URL")]
    Malformed,

    #[error("link does not reference the verification service domain")]
    WrongDomain,

    #[error("link carries no verification-session identifier")]
    MissingSessionRef,
}

/// Parse and validate a submitted link against the configured service domain.
pub fn parse_verification_link(raw: &str, domain: &str) -> Result<VerificationLink, LinkError> {
    let url = Url::parse(raw.trim()).map_err(|_| LinkError::Malformed)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(LinkError::Malformed);
    }

    let host = url.host_str().ok_or(LinkError::Malformed)?;
    if !host.eq_ignore_ascii_case(domain)
        && !host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
    {
        return Err(LinkError::WrongDomain);
    }

    let session_ref = url
        .path_segments()
        .and_then(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .next_back()
                .map(str::to_string)
        })
        .ok_or(LinkError::MissingSessionRef)?;

    if session_ref.len() < REF_MIN_LEN
        || session_ref.len() > REF_MAX_LEN
        || !session_ref
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(LinkError::MissingSessionRef);
    }

    Ok(VerificationLink { url, session_ref })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "verify.example.com";

    #[test]
    fn test_accepts_well_formed_link() {
        let link = parse_verification_link(
            "https://verify.example.com/verify/9f3c2b1a8d7e6f5a4b3c2d1e",
            DOMAIN,
        )
        .unwrap();
        assert_eq!(link.session_ref, "9f3c2b1a8d7e6f5a4b3c2d1e");
    }

    #[test]
    fn test_accepts_subdomain() {
        let link = parse_verification_link(
            "https://my.verify.example.com/v/9f3c2b1a8d7e6f5a4b3c2d1e/",
            DOMAIN,
        )
        .unwrap();
        assert_eq!(link.session_ref, "9f3c2b1a8d7e6f5a4b3c2d1e");
    }

    #[test]
    fn test_rejects_foreign_domain() {
        let err = parse_verification_link(
            "https://verify.example.com.evil.io/verify/9f3c2b1a8d7e6f5a4b3c2d1e",
            DOMAIN,
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::WrongDomain));
    }

    #[test]
    fn test_rejects_missing_session_ref() {
        let err = parse_verification_link("https://verify.example.com/", DOMAIN).unwrap_err();
        assert!(matches!(err, LinkError::MissingSessionRef));

        // Too short to be a session token.
        let err = parse_verification_link("https://verify.example.com/verify/abc", DOMAIN)
            .unwrap_err();
        assert!(matches!(err, LinkError::MissingSessionRef));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_verification_link("not a url", DOMAIN),
            Err(LinkError::Malformed)
        ));
        assert!(matches!(
            parse_verification_link("ftp://verify.example.com/verify/9f3c2b1a8d7e6f5a", DOMAIN),
            Err(LinkError::Malformed)
        ));
    }
}
