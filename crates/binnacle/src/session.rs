use sha2::{Digest as _, Sha256};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which re-authentication methods the user has configured. With none
/// configured the gate is deliberately permissive: it degrades to "no
/// protection configured" instead of locking the user out of their own
/// funds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthMethods {
    pub pin_configured: bool,
    pub biometric_enrolled: bool,
    pub biometric_enabled: bool,
}

impl AuthMethods {
    pub const fn any_configured(self) -> bool {
        self.pin_configured || (self.biometric_enrolled && self.biometric_enabled)
    }
}

/// Timeout-based gate in front of decrypted-secret access.
///
/// The timestamp lives behind a mutex so concurrent `authentication_required`
/// checks observe a consistent state relative to any `record_authentication`
/// call racing them.
#[derive(Debug)]
pub struct SessionGate {
    last_auth: Mutex<Option<Instant>>,
    methods: Mutex<AuthMethods>,
    timeout: Duration,
}

impl SessionGate {
    pub fn new(timeout_secs: u64, methods: AuthMethods) -> Self {
        Self {
            last_auth: Mutex::new(None),
            methods: Mutex::new(methods),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn record_authentication(&self) {
        let mut guard = self.last_auth.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Instant::now());
    }

    /// Logout: the session returns to "never authenticated".
    pub fn clear_session(&self) {
        let mut guard = self.last_auth.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn set_methods(&self, methods: AuthMethods) {
        let mut guard = self.methods.lock().unwrap_or_else(|e| e.into_inner());
        *guard = methods;
    }

    pub fn is_session_valid(&self) -> bool {
        self.is_session_valid_at(Instant::now())
    }

    /// Validity at an explicit instant; exposed so expiry is testable without
    /// sleeping through a real timeout.
    pub fn is_session_valid_at(&self, now: Instant) -> bool {
        let guard = self.last_auth.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(t) => now.saturating_duration_since(t) < self.timeout,
            None => false,
        }
    }

    /// Whether an operation touching secrets must re-authenticate first.
    pub fn authentication_required(&self) -> bool {
        self.authentication_required_at(Instant::now())
    }

    pub fn authentication_required_at(&self, now: Instant) -> bool {
        if self.is_session_valid_at(now) {
            return false;
        }
        let methods = *self.methods.lock().unwrap_or_else(|e| e.into_inner());
        methods.any_configured()
    }
}

/// Hash a PIN for storage: fresh random 16-byte salt per call, stored as
/// `hex(sha256(pin || salt)) ":" hex(salt)`. The PIN itself never persists.
pub fn hash_pin(pin: &str) -> String {
    let salt = crate::keystore::crypto::random_salt16();
    let digest = pin_digest(pin, &salt);
    format!("{}:{}", hex::encode(digest), hex::encode(salt))
}

/// Verify against a stored `hash:salt` value. The salt is always re-derived
/// from the stored value; re-salting here would make every PIN verify fail
/// and is the bug class this layout exists to prevent.
pub fn verify_pin(pin: &str, stored: &str) -> bool {
    let Some((hash_hex, salt_hex)) = stored.split_once(':') else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let got = pin_digest_slice(pin, &salt);
    constant_time_eq(&got, &expected)
}

fn pin_digest(pin: &str, salt: &[u8; 16]) -> [u8; 32] {
    pin_digest_slice(pin, salt)
}

fn pin_digest_slice(pin: &str, salt: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(pin.as_bytes());
    h.update(salt);
    h.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Result of a biometric prompt. Cancellation is a first-class outcome, not
/// a dangling callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricOutcome {
    Success,
    Error(String),
    Cancelled,
}

/// Async biometric capability. The platform integration (or a test stub)
/// implements this; the core only consumes the outcome.
pub trait BiometricPrompt {
    fn prompt(&self) -> impl std::future::Future<Output = BiometricOutcome> + Send;
}

/// Stand-in when no biometric hardware is enrolled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBiometrics;

impl BiometricPrompt for NoBiometrics {
    async fn prompt(&self) -> BiometricOutcome {
        BiometricOutcome::Error("no biometric method enrolled".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_verify_accepts_correct_and_rejects_wrong() {
        let stored = hash_pin("2468");
        assert!(verify_pin("2468", &stored));
        assert!(!verify_pin("2469", &stored));
        assert!(!verify_pin("", &stored));
    }

    #[test]
    fn pin_salts_are_never_reused() {
        let a = hash_pin("2468");
        let b = hash_pin("2468");
        assert_ne!(a, b);
        let salt_a = a.split(':').nth(1).map(str::to_owned);
        let salt_b = b.split(':').nth(1).map(str::to_owned);
        assert!(salt_a.is_some());
        assert_ne!(salt_a, salt_b);
        // Both still verify: the stored salt is what verification uses.
        assert!(verify_pin("2468", &a));
        assert!(verify_pin("2468", &b));
    }

    #[test]
    fn malformed_stored_value_never_verifies() {
        assert!(!verify_pin("2468", ""));
        assert!(!verify_pin("2468", "nocolon"));
        assert!(!verify_pin("2468", "zz:zz"));
    }

    #[test]
    fn session_validity_window() {
        let gate = SessionGate::new(
            300,
            AuthMethods {
                pin_configured: true,
                ..Default::default()
            },
        );
        assert!(!gate.is_session_valid());

        gate.record_authentication();
        let now = Instant::now();
        assert!(gate.is_session_valid_at(now));
        assert!(!gate.is_session_valid_at(now + Duration::from_secs(301)));
        assert!(gate.authentication_required_at(now + Duration::from_secs(301)));

        gate.clear_session();
        assert!(!gate.is_session_valid());
    }

    #[test]
    fn gate_is_permissive_with_no_methods_configured() {
        let gate = SessionGate::new(300, AuthMethods::default());
        assert!(!gate.is_session_valid());
        // Expired session, but nothing to authenticate with: allow through.
        assert!(!gate.authentication_required());
    }

    #[test]
    fn gate_requires_auth_when_pin_configured_and_session_expired() {
        let gate = SessionGate::new(
            300,
            AuthMethods {
                pin_configured: true,
                ..Default::default()
            },
        );
        assert!(gate.authentication_required());
        gate.record_authentication();
        assert!(!gate.authentication_required());
    }

    #[test]
    fn biometric_enabled_requires_enrollment() {
        let enabled_not_enrolled = AuthMethods {
            pin_configured: false,
            biometric_enrolled: false,
            biometric_enabled: true,
        };
        assert!(!enabled_not_enrolled.any_configured());

        let enrolled_and_enabled = AuthMethods {
            pin_configured: false,
            biometric_enrolled: true,
            biometric_enabled: true,
        };
        assert!(enrolled_and_enabled.any_configured());
    }

    #[tokio::test]
    async fn stub_biometric_prompt_reports_error_outcome() {
        let outcome = NoBiometrics.prompt().await;
        assert!(matches!(outcome, BiometricOutcome::Error(_)));
    }
}
