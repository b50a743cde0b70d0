//! Time-boxed media URLs.
//!
//! `{base}/{content_ref}?expires={unix}&sig={hex}` where `sig` is a keyed
//! blake3 MAC over the content ref and expiry.

use chrono::{DateTime, Duration, TimeZone, Utc};
use kiosk_core::protocol::SignedUrl;

#[derive(Clone)]
pub struct UrlSigner {
    key: [u8; 32],
    base: String,
    lifetime: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base", &self.base)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: &str, base: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            key: blake3::derive_key("kiosk-hub media url v1", secret.as_bytes()),
            base: base.into().trim_end_matches('/').to_string(),
            lifetime,
        }
    }

    fn mac(&self, content_ref: &str, expires: i64) -> String {
        let message = format!("{content_ref}\n{expires}");
        blake3::keyed_hash(&self.key, message.as_bytes()).to_hex().to_string()
    }

    pub fn sign(&self, content_ref: &str, now: DateTime<Utc>) -> SignedUrl {
        let expires_at = now + self.lifetime;
        let expires = expires_at.timestamp();
        SignedUrl {
            content_ref: content_ref.to_string(),
            url: format!(
                "{}/{content_ref}?expires={expires}&sig={}",
                self.base,
                self.mac(content_ref, expires)
            ),
            // Whole seconds, matching what the URL carries.
            expires_at: Utc.timestamp_opt(expires, 0).single().unwrap_or(expires_at),
        }
    }

    /// Check a URL produced by [`UrlSigner::sign`] at `now`.
    pub fn verify(&self, url: &str, now: DateTime<Utc>) -> bool {
        let Some(rest) = url.strip_prefix(&self.base) else {
            return false;
        };
        let Some((path, query)) = rest.trim_start_matches('/').split_once('?') else {
            return false;
        };

        let mut expires = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("sig", v)) => sig = Some(v),
                _ => {}
            }
        }
        let (Some(expires), Some(sig)) = (expires, sig) else {
            return false;
        };
        if expires < now.timestamp() {
            return false;
        }
        let Ok(given) = hex::decode(sig) else {
            return false;
        };
        let Ok(given) = <[u8; 32]>::try_from(given.as_slice()) else {
            return false;
        };
        let expected = blake3::keyed_hash(&self.key, format!("{path}\n{expires}").as_bytes());
        // blake3::Hash equality is constant-time.
        expected == blake3::Hash::from(given)
    }
}
