use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// The only digest accepted in the signature header.
pub const SIGNATURE_PREFIX: &str = "sha1";

/// Length of the hex digest after the `sha1=` prefix.
pub const DIGEST_LEN: usize = 40;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Verifies that webhook deliveries were signed with the shared secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check the event and signature headers of a delivery against `body`.
    ///
    /// The signature must be `sha1=` followed by exactly 40 alphanumerics.
    /// It only matches in its lowercase hex rendering, and the digest
    /// comparison is constant-time.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), AuthError> {
        if !headers.contains_key(EVENT_HEADER) {
            return Err(AuthError::MissingHeader(EVENT_HEADER));
        }

        let header = headers
            .get(SIGNATURE_HEADER)
            .ok_or(AuthError::MissingHeader(SIGNATURE_HEADER))?
            .to_str()
            .map_err(|_| AuthError::MalformedSignature)?;

        let (prefix, signature) = header
            .split_once('=')
            .ok_or(AuthError::MalformedSignature)?;
        if prefix != SIGNATURE_PREFIX {
            return Err(AuthError::UnsupportedAlgorithm(prefix.to_owned()));
        }

        if signature.len() != DIGEST_LEN || !signature.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AuthError::MalformedSignature);
        }

        // Well-formed but outside lowercase hex can never equal a rendered digest.
        if !signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(AuthError::SignatureMismatch);
        }
        let expected = hex::decode(signature).map_err(|_| AuthError::SignatureMismatch)?;

        self.mac(body)?
            .verify_slice(&expected)
            .map_err(|_| AuthError::SignatureMismatch)
    }

    /// Render the signature header value a sender would attach to `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let digest = self
            .mac(body)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("{SIGNATURE_PREFIX}={digest}")
    }

    fn mac(&self, body: &[u8]) -> Result<HmacSha1, AuthError> {
        let mut mac =
            HmacSha1::new_from_slice(&self.secret).map_err(|_| AuthError::SignatureMismatch)?;
        mac.update(body);
        Ok(mac)
    }
}
