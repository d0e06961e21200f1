//! Advisory decoding of bearer credentials.
//!
//! Nothing here verifies a signature. The claims read from a token only feed
//! expiry bookkeeping and display metadata, so every function degrades to
//! `None`/`false` on malformed input instead of returning an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::types::UserInfo;

/// Claims the session layer cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    /// `exp`, seconds since the Unix epoch
    pub expires_at_secs: Option<u64>,
    pub user: UserInfo,
}

/// A bearer token is structurally valid when it has exactly three non-empty
/// dot-separated segments.
pub fn is_well_formed(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3 && segments.iter().all(|s| !s.is_empty())
}

/// Decode the payload segment of `token`. Returns `None` for anything that is
/// not a JSON object behind valid base64url.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Map<String, Value> = serde_json::from_slice(&bytes).ok()?;

    let expires_at_secs = claims
        .get("exp")
        .and_then(Value::as_f64)
        .filter(|exp| exp.is_finite() && *exp > 0.0)
        .map(|exp| exp as u64);

    let user = UserInfo {
        id: first_string(&claims, &["sub", "user_id", "id"]),
        username: first_string(&claims, &["username", "preferred_username"]),
        email: first_string(&claims, &["email"]),
        role: first_string(&claims, &["role"]),
        theme_color: first_string(&claims, &["theme_color", "themeColor"]),
        ..Default::default()
    };

    Some(TokenClaims {
        expires_at_secs,
        user,
    })
}

fn first_string(claims: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match claims.get(*name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_claims_reads_expiry_and_identity() {
        let token = token_with_payload(
            r#"{"exp":1700000000,"sub":"u-1","preferred_username":"ada","role":"admin","themeColor":"teal"}"#,
        );
        let claims = decode_claims(&token).unwrap();

        assert_eq!(claims.expires_at_secs, Some(1_700_000_000));
        assert_eq!(claims.user.id.as_deref(), Some("u-1"));
        assert_eq!(claims.user.username.as_deref(), Some("ada"));
        assert_eq!(claims.user.role.as_deref(), Some("admin"));
        assert_eq!(claims.user.theme_color.as_deref(), Some("teal"));
        assert_eq!(claims.user.email, None);
    }

    #[test]
    fn test_numeric_subject_is_stringified() {
        let claims = decode_claims(&token_with_payload(r#"{"sub":42}"#)).unwrap();
        assert_eq!(claims.user.id.as_deref(), Some("42"));
        assert_eq!(claims.expires_at_secs, None);
    }

    #[test]
    fn test_malformed_tokens_never_fail_loudly() {
        assert_eq!(decode_claims(""), None);
        assert_eq!(decode_claims("opaque-session-token"), None);
        assert_eq!(decode_claims("a.!!!not-base64!!!.c"), None);
        assert_eq!(decode_claims(&token_with_payload("[1,2,3]")), None);
        assert_eq!(decode_claims(&token_with_payload("{\"exp\":")), None);

        let negative = decode_claims(&token_with_payload(r#"{"exp":-5}"#)).unwrap();
        assert_eq!(negative.expires_at_secs, None);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("a.b.c"));
        assert!(!is_well_formed("a.b"));
        assert!(!is_well_formed("a..c"));
        assert!(!is_well_formed("a.b.c.d"));
        assert!(!is_well_formed(""));
    }
}
