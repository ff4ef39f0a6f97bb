//! Token authority
//!
//! Issues and decodes the opaque bearer tokens presented by operators,
//! runners and triggers. Services only ask two questions of a token: who
//! it identifies and whether it authorizes a given runner.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const TOKEN_PREFIX: &str = "hbr_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Operator or entrypoint login
    Login { user: String },
    /// Runner token. No runner ID authorizes any runner; a zero label hash
    /// skips the label check.
    Runner {
        runner_id: Option<String>,
        label_hash: u64,
    },
    /// Restricted to queueing jobs
    Trigger { trigger_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
}

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            issued_at: Utc::now(),
        }
    }

    pub fn is_login(&self) -> bool {
        matches!(self.kind, TokenKind::Login { .. })
    }

    pub fn is_runner(&self) -> bool {
        matches!(self.kind, TokenKind::Runner { .. })
    }

    /// Whether this is a runner token valid for `runner_id` carrying
    /// `labels`. Always false for other token kinds.
    pub fn authorizes_runner(&self, runner_id: &str, labels: &HashMap<String, String>) -> bool {
        match &self.kind {
            TokenKind::Runner {
                runner_id: token_runner,
                label_hash: token_hash,
            } => {
                token_runner.as_deref().is_none_or(|id| id == runner_id)
                    && (*token_hash == 0 || *token_hash == label_hash(labels))
            }
            _ => false,
        }
    }
}

/// Hash of a runner's label set: the first eight bytes of a SHA-256 over the
/// sorted `key=value` pairs. Never zero, since zero means "unchecked".
pub fn label_hash(labels: &HashMap<String, String>) -> u64 {
    let mut pairs: Vec<(&String, &String)> = labels.iter().collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix).max(1)
}

pub trait TokenAuthority: Send + Sync {
    /// Returns the token behind `raw`, or `None` when it is unknown
    fn decode(&self, raw: &str) -> Option<Token>;

    fn issue_login_token(&self, user: &str) -> String;

    fn issue_runner_token(&self, runner_id: Option<&str>, label_hash: u64) -> String;

    fn issue_trigger_token(&self, trigger_id: &str) -> String;
}

/// Token authority keeping issued tokens in process memory
#[derive(Debug, Default)]
pub struct MemoryTokenAuthority {
    tokens: RwLock<HashMap<String, Token>>,
}

impl MemoryTokenAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a caller-chosen raw token, e.g. a bootstrap login token
    pub fn register(&self, raw: impl Into<String>, kind: TokenKind) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raw.into(), Token::new(kind));
    }

    fn issue(&self, kind: TokenKind) -> String {
        let raw = format!("{TOKEN_PREFIX}{}", Uuid::new_v4().simple());
        self.register(raw.clone(), kind);
        raw
    }
}

impl TokenAuthority for MemoryTokenAuthority {
    fn decode(&self, raw: &str) -> Option<Token> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(raw)
            .cloned()
    }

    fn issue_login_token(&self, user: &str) -> String {
        self.issue(TokenKind::Login {
            user: user.to_string(),
        })
    }

    fn issue_runner_token(&self, runner_id: Option<&str>, label_hash: u64) -> String {
        self.issue(TokenKind::Runner {
            runner_id: runner_id.map(str::to_string),
            label_hash,
        })
    }

    fn issue_trigger_token(&self, trigger_id: &str) -> String {
        self.issue(TokenKind::Trigger {
            trigger_id: trigger_id.to_string(),
        })
    }
}
