//! Auth cookie signing.
//!
//! Cookie payload: `accountID|username|base64(HMAC-SHA1(accountID|username|,
//! key))`, base64-encoded as a whole. The signing key is a process-local
//! random 32-byte blob, so cookies do not survive restarts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use thornvale_domain::ids::AccountId;

type HmacSha1 = Hmac<Sha1>;

/// Name of the auth cookie.
pub const COOKIE_NAME: &str = "thornvale_auth";

/// Process-local signing key.
#[derive(Clone)]
pub struct AuthKeys {
    key: [u8; 32],
}

impl AuthKeys {
    pub fn random() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    #[cfg(test)]
    fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn signature(&self, account: AccountId, username: &str) -> String {
        let mut mac = HmacSha1::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(format!("{}|{}|", account.0, username).as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Produce the signed cookie value for a session.
    pub fn sign(&self, account: AccountId, username: &str) -> String {
        let signature = self.signature(account, username);
        BASE64.encode(format!("{}|{}|{}", account.0, username, signature))
    }

    /// Validate a cookie value; returns the account and username it binds.
    pub fn verify(&self, cookie: &str) -> Option<(AccountId, String)> {
        let decoded = BASE64.decode(cookie).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let mut parts = decoded.splitn(3, '|');
        let account = AccountId(parts.next()?.parse().ok()?);
        let username = parts.next()?.to_string();
        let signature = parts.next()?;
        if signature == self.signature(account, &username) {
            Some((account, username))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_cookies_verify() {
        let keys = AuthKeys::random();
        let cookie = keys.sign(AccountId(42), "kara");
        assert_eq!(keys.verify(&cookie), Some((AccountId(42), "kara".into())));
    }

    #[test]
    fn tampered_cookies_fail() {
        let keys = AuthKeys::random();
        let cookie = keys.sign(AccountId(42), "kara");
        let decoded = String::from_utf8(BASE64.decode(&cookie).unwrap()).unwrap();
        let forged = decoded.replacen("42", "43", 1);
        let forged = BASE64.encode(forged);
        assert_eq!(keys.verify(&forged), None);
        assert_eq!(keys.verify("not-base64!"), None);
    }

    #[test]
    fn cookies_are_key_bound() {
        let a = AuthKeys::from_key([1; 32]);
        let b = AuthKeys::from_key([2; 32]);
        let cookie = a.sign(AccountId(7), "kara");
        assert!(a.verify(&cookie).is_some());
        assert!(b.verify(&cookie).is_none());
    }
}
