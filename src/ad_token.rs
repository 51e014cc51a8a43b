//! Single-use ad-completion tokens.
//!
//! The mobile client mints a token of the form `<unixMillis>-<random>` when a
//! simulated ad finishes and sends it once with its restore request. The
//! server accepts a token only if it is well formed, at most
//! [`TOKEN_EXPIRY_MS`] old, at most [`CLOCK_SKEW_TOLERANCE_MS`] in the future,
//! and not already consumed.
//!
//! The consumed set lives in process memory. A restart forgets it and separate
//! server instances do not share it; a deployment that needs real anti-replay
//! guarantees must move it to a shared store with expiry.

use std::collections::HashMap;

use rand::Rng;

/// Lifetime of a token after issuance.
pub const TOKEN_EXPIRY_MS: i64 = 60_000;

/// How far ahead of the server clock an issue time may be.
pub const CLOCK_SKEW_TOLERANCE_MS: i64 = 5_000;

/// Characters of a token shown in logs.
const LOG_PREFIX_CHARS: usize = 20;

const SUFFIX_LEN: usize = 13;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shorten a raw token for logging.
pub fn redact(raw: &str) -> String {
    if raw.chars().count() <= LOG_PREFIX_CHARS {
        return raw.to_string();
    }
    let prefix: String = raw.chars().take(LOG_PREFIX_CHARS).collect();
    format!("{prefix}...")
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a presented token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("No ad token provided")]
    Missing,
    #[error("Token already used")]
    AlreadyUsed,
    #[error("Invalid token format")]
    Malformed,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token timestamp")]
    FutureTimestamp,
}

impl TokenRejection {
    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "TOKEN_MISSING",
            Self::AlreadyUsed => "TOKEN_ALREADY_USED",
            Self::Malformed => "TOKEN_MALFORMED",
            Self::Expired => "TOKEN_EXPIRED",
            Self::FutureTimestamp => "TOKEN_FUTURE",
        }
    }
}

// ---------------------------------------------------------------------------
// AdToken
// ---------------------------------------------------------------------------

/// A parsed ad token. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdToken {
    raw: String,
    issued_at_millis: i64,
}

impl AdToken {
    /// Parse `<timestamp>-<suffix>`. The suffix may itself contain hyphens.
    pub fn parse(raw: &str) -> Result<Self, TokenRejection> {
        let (prefix, _suffix) = raw.split_once('-').ok_or(TokenRejection::Malformed)?;
        let issued_at_millis = prefix
            .parse::<i64>()
            .map_err(|_| TokenRejection::Malformed)?;

        Ok(Self {
            raw: raw.to_string(),
            issued_at_millis,
        })
    }

    /// Mint a token the way the mobile client does when an ad completes.
    pub fn issue_at(now_millis: i64) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();

        Self {
            raw: format!("{now_millis}-{suffix}"),
            issued_at_millis: now_millis,
        }
    }

    /// Mint a token stamped with the current time.
    pub fn issue() -> Self {
        Self::issue_at(now_millis())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn issued_at_millis(&self) -> i64 {
        self.issued_at_millis
    }

    pub fn redacted(&self) -> String {
        redact(&self.raw)
    }
}

impl std::fmt::Display for AdToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// Expiry window and clock-skew tolerance applied to issue timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub expiry_ms: i64,
    pub clock_skew_ms: i64,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            expiry_ms: TOKEN_EXPIRY_MS,
            clock_skew_ms: CLOCK_SKEW_TOLERANCE_MS,
        }
    }
}

impl TokenPolicy {
    /// Reject tokens outside `[now - expiry, now + skew]`.
    pub fn check_window(&self, token: &AdToken, now_millis: i64) -> Result<(), TokenRejection> {
        if self.is_expired(token.issued_at_millis, now_millis) {
            return Err(TokenRejection::Expired);
        }
        if token.issued_at_millis > now_millis + self.clock_skew_ms {
            return Err(TokenRejection::FutureTimestamp);
        }
        Ok(())
    }

    fn is_expired(&self, issued_at_millis: i64, now_millis: i64) -> bool {
        now_millis - issued_at_millis > self.expiry_ms
    }
}

// ---------------------------------------------------------------------------
// Consumed set
// ---------------------------------------------------------------------------

/// Raw token strings already spent, keyed to their issue time.
///
/// Shared as `Arc<Mutex<ConsumedTokens>>`. Callers that validate and consume
/// must do both under one lock acquisition ([`Self::check_and_consume`]).
#[derive(Debug, Default)]
pub struct ConsumedTokens {
    seen: HashMap<String, i64>,
    policy: TokenPolicy,
}

impl ConsumedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TokenPolicy) -> Self {
        Self {
            seen: HashMap::new(),
            policy,
        }
    }

    /// Decide whether `token` may be spent. Does not modify the set.
    ///
    /// Checks run in a fixed order: presence, reuse, format, expiry, future
    /// timestamp. The first failing check is reported.
    pub fn validate(
        &self,
        token: Option<&str>,
        now_millis: i64,
    ) -> Result<AdToken, TokenRejection> {
        let raw = token
            .filter(|t| !t.is_empty())
            .ok_or(TokenRejection::Missing)?;

        if self.seen.contains_key(raw) {
            return Err(TokenRejection::AlreadyUsed);
        }

        let token = AdToken::parse(raw)?;
        self.policy.check_window(&token, now_millis)?;
        Ok(token)
    }

    /// Record `token` as spent. Returns `false` if it already was.
    pub fn consume(&mut self, token: &AdToken) -> bool {
        self.seen
            .insert(token.raw.clone(), token.issued_at_millis)
            .is_none()
    }

    /// Validate and, on success, consume in one step.
    pub fn check_and_consume(
        &mut self,
        token: Option<&str>,
        now_millis: i64,
    ) -> Result<AdToken, TokenRejection> {
        let token = self.validate(token, now_millis)?;
        self.consume(&token);
        Ok(token)
    }

    /// Drop entries whose issue time is older than the expiry window.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now_millis: i64) -> usize {
        let before = self.seen.len();
        let policy = self.policy;
        self.seen
            .retain(|_, issued_at| !policy.is_expired(*issued_at, now_millis));
        before - self.seen.len()
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.seen.contains_key(raw)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
