use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the canonical string every signature covers.
const CANONICAL_PREFIX: &str = "amp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token parameters missing")]
    Missing,
    #[error("malformed token parameter: {0}")]
    Malformed(&'static str),
}

/// A capability as carried in an email link: `rt`, `uid`, `exp` plus the chat
/// id the link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityToken {
    pub user_id: u64,
    pub chat_id: u64,
    pub expiry: i64,
    pub signature: String,
}

impl CapabilityToken {
    /// Build a token from raw query values. Empty values count as missing.
    pub fn parse(
        rt: Option<&str>,
        uid: Option<&str>,
        exp: Option<&str>,
        chat_id: u64,
    ) -> Result<Self, TokenError> {
        let (Some(rt), Some(uid), Some(exp)) = (present(rt), present(uid), present(exp)) else {
            return Err(TokenError::Missing);
        };

        let user_id = uid.parse::<u64>().map_err(|_| TokenError::Malformed("uid"))?;
        let expiry = exp.parse::<i64>().map_err(|_| TokenError::Malformed("exp"))?;
        if user_id == 0 || i64::try_from(user_id).is_err() {
            return Err(TokenError::Malformed("uid"));
        }

        Ok(Self {
            user_id,
            chat_id,
            expiry,
            signature: rt.to_string(),
        })
    }

    /// Query string fragment for embedding the token in a link.
    pub fn query_string(&self) -> String {
        format!("rt={}&uid={}&exp={}", self.signature, self.user_id, self.expiry)
    }
}

/// Signs and verifies capability tokens.
///
/// Verification is a pure function of the inputs and the secret, so the same
/// token keeps working for every request until it expires.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl TokenCodec {
    pub fn new<S: AsRef<[u8]>>(secret: Option<S>) -> Self {
        let secret = secret
            .map(|s| s.as_ref().to_vec())
            .filter(|s| !s.is_empty());
        Self { secret }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Hex HMAC over `"amp" || user_id || chat_id || expiry`.
    /// Returns `None` when no secret is configured.
    pub fn sign(&self, user_id: u64, chat_id: u64, expiry: i64) -> Option<String> {
        let mac = self.mac_for(user_id, chat_id, expiry)?;
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Mint a full token for a link.
    pub fn mint(&self, user_id: u64, chat_id: u64, expiry: i64) -> Option<CapabilityToken> {
        let signature = self.sign(user_id, chat_id, expiry)?;
        Some(CapabilityToken {
            user_id,
            chat_id,
            expiry,
            signature,
        })
    }

    /// Constant-time check of `signature` plus `now < expiry`. Never fails loudly.
    pub fn verify(&self, signature: &str, user_id: u64, chat_id: u64, expiry: i64, now: i64) -> bool {
        if now >= expiry {
            return false;
        }

        let Ok(supplied) = hex::decode(signature.trim()) else {
            return false;
        };

        match self.mac_for(user_id, chat_id, expiry) {
            Some(mac) => mac.verify_slice(&supplied).is_ok(),
            None => false,
        }
    }

    /// Signature check only, ignoring expiry. Lets callers tell an expired but
    /// genuine token apart from a forged one for logging.
    pub fn signature_matches(&self, token: &CapabilityToken) -> bool {
        self.verify(&token.signature, token.user_id, token.chat_id, token.expiry, i64::MIN)
    }

    pub fn verify_token(&self, token: &CapabilityToken, now: i64) -> bool {
        self.verify(&token.signature, token.user_id, token.chat_id, token.expiry, now)
    }

    fn mac_for(&self, user_id: u64, chat_id: u64, expiry: i64) -> Option<HmacSha256> {
        let secret = self.secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(canonical(user_id, chat_id, expiry).as_bytes());
        Some(mac)
    }
}

fn present(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn canonical(user_id: u64, chat_id: u64, expiry: i64) -> String {
    format!("{CANONICAL_PREFIX}{user_id}{chat_id}{expiry}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(Some("test-secret"))
    }

    #[test]
    fn sign_then_verify() {
        let codec = codec();
        for (uid, cid, exp) in [(1, 1, NOW + 1), (42, 7, NOW + 3600), (u64::MAX, 99, i64::MAX)] {
            let sig = codec.sign(uid, cid, exp).unwrap();
            assert!(codec.verify(&sig, uid, cid, exp, NOW), "uid={uid} cid={cid}");
        }
    }

    #[test]
    fn signature_is_hmac_of_canonical_string() {
        let sig = codec().sign(12, 34, 5678).unwrap();
        let mut mac = HmacSha256::new_from_slice(b"test-secret").unwrap();
        mac.update(b"amp12345678");
        assert_eq!(sig, hex::encode(mac.finalize().into_bytes()));
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn any_bit_flip_fails() {
        let codec = codec();
        let exp = NOW + 60;
        let sig = codec.sign(5, 6, exp).unwrap();
        let raw = hex::decode(&sig).unwrap();

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut flipped = raw.clone();
                flipped[byte] ^= 1 << bit;
                assert!(!codec.verify(&hex::encode(&flipped), 5, 6, exp, NOW));
            }
        }
    }

    #[test]
    fn expiry_is_exclusive() {
        let codec = codec();
        let sig = codec.sign(1, 2, NOW).unwrap();
        assert!(!codec.verify(&sig, 1, 2, NOW, NOW));
        assert!(!codec.verify(&sig, 1, 2, NOW, NOW + 1));
        assert!(codec.verify(&sig, 1, 2, NOW, NOW - 1));
    }

    #[test]
    fn bound_fields_cannot_be_swapped() {
        let codec = codec();
        let exp = NOW + 60;
        let sig = codec.sign(1, 2, exp).unwrap();
        assert!(!codec.verify(&sig, 1, 3, exp, NOW));
        assert!(!codec.verify(&sig, 2, 2, exp, NOW));
        assert!(!codec.verify(&sig, 1, 2, exp + 1, NOW));
    }

    #[test]
    fn unset_secret_never_verifies() {
        let empty = TokenCodec::new(Some(""));
        assert!(!empty.is_configured());
        assert!(empty.sign(1, 1, NOW + 10).is_none());

        let sig = codec().sign(1, 1, NOW + 10).unwrap();
        assert!(!TokenCodec::new(None::<&str>).verify(&sig, 1, 1, NOW + 10, NOW));
    }

    #[test]
    fn garbage_signature_is_false() {
        let codec = codec();
        assert!(!codec.verify("not-hex", 1, 1, NOW + 10, NOW));
        assert!(!codec.verify("", 1, 1, NOW + 10, NOW));
        assert!(!codec.verify("abcd", 1, 1, NOW + 10, NOW));
    }

    #[test]
    fn tokens_are_reusable() {
        let codec = codec();
        let token = codec.mint(3, 4, NOW + 100).unwrap();
        assert!(codec.verify_token(&token, NOW));
        assert!(codec.verify_token(&token, NOW + 50));
        assert!(!codec.verify_token(&token, NOW + 100));
        assert!(codec.signature_matches(&token));
    }

    #[test]
    fn parse_query_values() {
        assert_eq!(CapabilityToken::parse(None, Some("1"), Some("2"), 9), Err(TokenError::Missing));
        assert_eq!(CapabilityToken::parse(Some(""), Some("1"), Some("2"), 9), Err(TokenError::Missing));
        assert_eq!(
            CapabilityToken::parse(Some("ab"), Some("x"), Some("2"), 9),
            Err(TokenError::Malformed("uid"))
        );
        assert_eq!(
            CapabilityToken::parse(Some("ab"), Some("1"), Some("soon"), 9),
            Err(TokenError::Malformed("exp"))
        );

        assert_eq!(
            CapabilityToken::parse(Some("ab"), Some("18446744073709551615"), Some("2"), 9),
            Err(TokenError::Malformed("uid"))
        );
        assert!(CapabilityToken::parse(Some("ab"), Some("9223372036854775807"), Some("2"), 9).is_ok());

        let token = CapabilityToken::parse(Some("ab"), Some("1"), Some("2"), 9).unwrap();
        assert_eq!(token.query_string(), "rt=ab&uid=1&exp=2");
        assert_eq!(token.chat_id, 9);
    }
}
