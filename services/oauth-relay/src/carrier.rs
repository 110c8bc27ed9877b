//! Flow state carrier
//!
//! FlowState rides in a cookie on the browser, not in server memory, so a
//! callback can land on any instance. The cookie value is
//! `base64url(nonce || AES-256-GCM(envelope))` with the driver id as
//! associated data:
//! - the page script cannot read it (HttpOnly) and nobody can forge it
//! - a cookie sealed for one driver does not open for another
//! - expiry is checked here from `exp`, the cookie Max-Age is advisory
//!
//! The cookie path is scoped to `<base path>/<route>`, where route is the
//! driver segment the flow started on (a driver alias included), so each
//! driver route has at most one flow in progress per browser.

use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use driver::{DriverId, FlowState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Cookie holding the sealed flow state.
pub const FLOW_COOKIE: &str = "__flow";

/// Largest sealed value accepted, below the ~4KB per-cookie browser limit.
pub const MAX_SEALED_LEN: usize = 3800;

const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    v: u8,
    exp: u64,
    state: FlowState,
}

pub struct Carrier {
    cipher: Aes256Gcm,
    ttl_secs: u64,
    base_path: String,
    secure: bool,
}

impl Carrier {
    /// `secret` is stretched to a 256-bit key with SHA-256.
    pub fn new(secret: &[u8], ttl_secs: u64, base_path: impl Into<String>, secure: bool) -> Self {
        let key: [u8; 32] = Sha256::digest(secret).into();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            ttl_secs,
            base_path: base_path.into(),
            secure,
        }
    }

    pub fn seal(&self, driver: DriverId, state: &FlowState, now: u64) -> Result<String> {
        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            exp: now + self.ttl_secs,
            state: state.clone(),
        };
        let plaintext = serde_json::to_vec(&envelope).map_err(|e| Error::Seal(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &plaintext,
                    aad: driver.as_str().as_bytes(),
                },
            )
            .map_err(|e| Error::Seal(format!("AES-GCM encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        let encoded = URL_SAFE_NO_PAD.encode(sealed);
        if encoded.len() > MAX_SEALED_LEN {
            return Err(Error::Oversized {
                len: encoded.len(),
                max: MAX_SEALED_LEN,
            });
        }
        Ok(encoded)
    }

    pub fn open(&self, driver: DriverId, sealed: &str, now: u64) -> Result<FlowState> {
        if sealed.len() > MAX_SEALED_LEN {
            return Err(Error::Open);
        }
        let raw = URL_SAFE_NO_PAD.decode(sealed).map_err(|_| Error::Open)?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Open);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: driver.as_str().as_bytes(),
                },
            )
            .map_err(|_| Error::Open)?;

        let envelope: Envelope = serde_json::from_slice(&plaintext).map_err(|_| Error::Open)?;
        if envelope.v != ENVELOPE_VERSION || envelope.state.driver != driver {
            return Err(Error::Open);
        }
        if envelope.exp <= now {
            return Err(Error::Expired);
        }
        Ok(envelope.state)
    }

    /// Attach sealed state to the outgoing jar.
    pub fn save(
        &self,
        jar: CookieJar,
        driver: DriverId,
        route: &str,
        state: &FlowState,
    ) -> Result<CookieJar> {
        let sealed = self.seal(driver, state, unix_now())?;
        let cookie = Cookie::build((FLOW_COOKIE, sealed))
            .path(self.cookie_path(route))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(time::Duration::seconds(self.ttl_secs as i64))
            .build();
        debug!(driver = %driver, "flow state saved");
        Ok(jar.add(cookie))
    }

    /// Read the state for `driver` from the inbound jar.
    pub fn load(&self, jar: &CookieJar, driver: DriverId) -> Result<FlowState> {
        let cookie = jar.get(FLOW_COOKIE).ok_or(Error::Open)?;
        self.open(driver, cookie.value(), unix_now())
    }

    /// Clear the state cookie. Runs on every terminal callback outcome.
    pub fn consume(&self, jar: CookieJar, route: &str) -> CookieJar {
        debug!(route, "flow state consumed");
        jar.remove(Cookie::build(FLOW_COOKIE).path(self.cookie_path(route)))
    }

    fn cookie_path(&self, route: &str) -> String {
        format!("{}/{}", self.base_path, route)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
