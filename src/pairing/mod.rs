//! Pairing Manager: short one-time codes exchanged for long-lived bearer
//! tokens.
//!
//! Grounded on the teacher's `gateway::auth` token-file idiom (a UUID-derived
//! token under `dirs::home_dir()`), upgraded to a constant-time-compare +
//! salted-hash contract — the teacher's single static daemon token predates
//! this multi-client pairing scheme.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
const CODE_LEN: usize = 6;

/// Default pairing-code lifetime, used when no config value is supplied.
pub const DEFAULT_CODE_TTL_MINUTES: i64 = 10;
/// Default bearer-token lifetime, used when no config value is supplied.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 30;

/// Result of [`PairingManager::generate_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub code: String,
    pub label: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub one_shot: bool,
}

/// One entry in [`PairingManager::list_clients`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub label: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairingStats {
    pub active_codes: usize,
    pub paired_clients: usize,
}

struct CodeEntry {
    label: Option<String>,
    expires_at: DateTime<Utc>,
}

struct TokenEntry {
    label: Option<String>,
    salt: [u8; 16],
    hash: Vec<u8>,
    expires_at: DateTime<Utc>,
}

fn hash_token(salt: &[u8; 16], token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Issues one-time pairing codes and exchanges them for bearer tokens.
///
/// Codes and token hashes live in `Mutex`-guarded maps owned by the manager;
/// durability is a collaborator's concern (the contract is in-memory only).
pub struct PairingManager {
    codes: Mutex<HashMap<String, CodeEntry>>,
    tokens: Mutex<HashMap<String, TokenEntry>>,
    code_ttl_minutes: i64,
    token_ttl_days: i64,
}

impl PairingManager {
    /// Build a manager with the default TTLs ([`DEFAULT_CODE_TTL_MINUTES`],
    /// [`DEFAULT_TOKEN_TTL_DAYS`]).
    pub fn new() -> Self {
        Self::with_ttls(DEFAULT_CODE_TTL_MINUTES, DEFAULT_TOKEN_TTL_DAYS)
    }

    /// Build a manager with TTLs sourced from configuration
    /// (`config.pairing.code_ttl_minutes` / `config.pairing.token_ttl_days`).
    pub fn with_ttls(code_ttl_minutes: i64, token_ttl_days: i64) -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            code_ttl_minutes,
            token_ttl_days,
        }
    }

    pub fn generate_code(&self, label: Option<String>) -> GeneratedCode {
        let mut codes = self.codes.lock().expect("pairing codes mutex poisoned");
        let code = loop {
            let candidate = random_code();
            if !codes.contains_key(&candidate) {
                break candidate;
            }
        };
        let expires_at = Utc::now() + ChronoDuration::minutes(self.code_ttl_minutes);
        codes.insert(
            code.clone(),
            CodeEntry {
                label: label.clone(),
                expires_at,
            },
        );
        GeneratedCode {
            code,
            label,
            expires_at,
            one_shot: true,
        }
    }

    /// Consume `code` (one-shot) and mint a bearer token. Returns `None` if
    /// the code is unknown or expired.
    pub fn exchange_code(&self, code: &str, label: Option<String>) -> Option<String> {
        {
            let mut codes = self.codes.lock().expect("pairing codes mutex poisoned");
            let entry = codes.remove(code)?;
            if entry.expires_at < Utc::now() {
                return None;
            }
            let resolved_label = label.or(entry.label);
            return Some(self.mint_token(resolved_label));
        }
    }

    fn mint_token(&self, label: Option<String>) -> String {
        let token = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let salt: [u8; 16] = *Uuid::new_v4().as_bytes();
        let hash = hash_token(&salt, &token);
        let entry_id = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + ChronoDuration::days(self.token_ttl_days);
        self.tokens.lock().expect("pairing tokens mutex poisoned").insert(
            entry_id,
            TokenEntry {
                label,
                salt,
                hash,
                expires_at,
            },
        );
        token
    }

    /// Constant-time validation against every stored (salt, hash) pair.
    /// Rejects expired tokens.
    pub fn validate_token(&self, token: &str) -> bool {
        let now = Utc::now();
        let tokens = self.tokens.lock().expect("pairing tokens mutex poisoned");
        tokens.values().any(|entry| {
            entry.expires_at >= now && hash_token(&entry.salt, token).ct_eq(&entry.hash).into()
        })
    }

    pub fn list_codes(&self) -> Vec<GeneratedCode> {
        let now = Utc::now();
        self.codes
            .lock()
            .expect("pairing codes mutex poisoned")
            .iter()
            .filter(|(_, e)| e.expires_at >= now)
            .map(|(code, e)| GeneratedCode {
                code: code.clone(),
                label: e.label.clone(),
                expires_at: e.expires_at,
                one_shot: true,
            })
            .collect()
    }

    pub fn list_clients(&self) -> Vec<ClientInfo> {
        let now = Utc::now();
        self.tokens
            .lock()
            .expect("pairing tokens mutex poisoned")
            .values()
            .filter(|e| e.expires_at >= now)
            .map(|e| ClientInfo {
                label: e.label.clone(),
                expires_at: e.expires_at,
            })
            .collect()
    }

    pub fn revoke_code(&self, code: &str) -> bool {
        self.codes.lock().expect("pairing codes mutex poisoned").remove(code).is_some()
    }

    pub fn revoke_token(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().expect("pairing tokens mutex poisoned");
        let Some(key) = tokens
            .iter()
            .find(|(_, e)| hash_token(&e.salt, token).ct_eq(&e.hash).into())
            .map(|(k, _)| k.clone())
        else {
            return false;
        };
        tokens.remove(&key);
        true
    }

    pub fn stats(&self) -> PairingStats {
        let now = Utc::now();
        let active_codes = self
            .codes
            .lock()
            .expect("pairing codes mutex poisoned")
            .values()
            .filter(|e| e.expires_at >= now)
            .count();
        let paired_clients = self
            .tokens
            .lock()
            .expect("pairing tokens mutex poisoned")
            .values()
            .filter(|e| e.expires_at >= now)
            .count();
        PairingStats {
            active_codes,
            paired_clients,
        }
    }
}

impl Default for PairingManager {
    fn default() -> Self {
        Self::new()
    }
}

fn random_code() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    // Seed the LCG from a uuid so we never depend on `rand` (not in the
    // teacher's dependency stack) while still drawing from entropy rather
    // than a fixed seed.
    static STATE: AtomicU64 = AtomicU64::new(0);
    if STATE.load(Ordering::Relaxed) == 0 {
        let seed = u64::from_le_bytes(Uuid::new_v4().as_bytes()[..8].try_into().unwrap());
        STATE.store(seed | 1, Ordering::Relaxed);
    }
    let mut out = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        let mut x = STATE.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        STATE.store(x, Ordering::Relaxed);
        out.push(CODE_ALPHABET[(x as usize) % CODE_ALPHABET.len()] as char);
    }
    out
}
