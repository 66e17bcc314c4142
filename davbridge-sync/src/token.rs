use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Issues and verifies expiring download tokens. A token authorises one
/// remote path until its expiry and carries no credentials; it is the
/// base64 of `{expiry}|{hex signature}` where the signature is an
/// HMAC-SHA256 over `{expiry}|{path}`.
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Creates a token for `path` valid for `ttl` from now.
    pub fn issue(&self, path: &str, ttl: Duration) -> String {
        self.issue_at(path, now_unix() + ttl.as_secs())
    }

    fn issue_at(&self, path: &str, expiry: u64) -> String {
        let signature = hex::encode(self.sign(path, expiry));
        URL_SAFE_NO_PAD.encode(format!("{expiry}|{signature}"))
    }

    /// True only for an untampered token for exactly this `path` whose
    /// expiry has not passed. Malformed input is a plain `false`.
    pub fn verify(&self, path: &str, token: &str) -> bool {
        let Ok(raw) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        let Ok(raw) = String::from_utf8(raw) else {
            return false;
        };
        let Some((expiry, signature)) = raw.split_once('|') else {
            return false;
        };
        let Ok(expiry) = expiry.parse::<u64>() else {
            return false;
        };
        if expiry < now_unix() {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        self.mac(path, expiry).verify_slice(&signature).is_ok()
    }

    fn sign(&self, path: &str, expiry: u64) -> Vec<u8> {
        self.mac(path, expiry).finalize().into_bytes().to_vec()
    }

    fn mac(&self, path: &str, expiry: u64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(format!("{expiry}|{path}").as_bytes());
        mac
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(b"test-secret".to_vec())
    }

    #[test]
    fn token_round_trips_for_its_path() {
        let svc = service();
        let token = svc.issue("Docs/a.txt", Duration::from_secs(60));
        assert!(svc.verify("Docs/a.txt", &token));
    }

    #[test]
    fn token_is_bound_to_one_path() {
        let svc = service();
        let token = svc.issue("Docs/a.txt", Duration::from_secs(60));
        assert!(!svc.verify("Docs/b.txt", &token));
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service();
        let token = svc.issue_at("Docs/a.txt", now_unix() - 10);
        assert!(!svc.verify("Docs/a.txt", &token));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = TokenService::new(b"other".to_vec()).issue("Docs/a.txt", Duration::from_secs(60));
        assert!(!service().verify("Docs/a.txt", &token));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let svc = service();
        assert!(!svc.verify("Docs/a.txt", "not-base64!!"));
        assert!(!svc.verify("Docs/a.txt", &URL_SAFE_NO_PAD.encode("no-separator")));
        assert!(!svc.verify("Docs/a.txt", &URL_SAFE_NO_PAD.encode("abc|deadbeef")));
        assert!(!svc.verify(
            "Docs/a.txt",
            &URL_SAFE_NO_PAD.encode("9999999999|zz-not-hex")
        ));
    }

    #[test]
    fn tampered_expiry_is_rejected() {
        let svc = service();
        let token = svc.issue("Docs/a.txt", Duration::from_secs(60));
        let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let (_, signature) = raw.split_once('|').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(format!("{}|{signature}", now_unix() + 9999));
        assert!(!svc.verify("Docs/a.txt", &forged));
    }
}
