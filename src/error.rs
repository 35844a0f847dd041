//! Shared error taxonomy and classifier.
//!
//! Every driver funnels its failures through [`classify`] rather than
//! carrying its own error-mapping trait. The classifier works on raw text —
//! an error message, an SDK error's `Display`, or an entire response body —
//! because several backends (notably the OpenAI-compatible family) report
//! the interesting detail only in the HTTP body, not in the error the SDK
//! surfaces.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// The closed set of semantic error kinds the gateway reasons about.
///
/// Every provider error, regardless of wire format, is classified into one
/// of these. Adding a tenth "misc" bucket is deliberately avoided: `unknown`
/// is that bucket, and it is handled uniformly (returned to the caller,
/// never retried).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No recognized pattern matched.
    Unknown,
    /// The transcript no longer fits the model's context window.
    ContextOverflow,
    /// HTTP 429 or an equivalent provider-specific rate-limit phrase.
    RateLimit,
    /// The backend reports itself as overloaded/unavailable (503-class).
    Overloaded,
    /// Authentication failed (401/403 or an invalid-API-key phrase).
    Auth,
    /// Billing/quota exhausted (402 or an insufficient-credits phrase).
    Billing,
    /// The request timed out (408/504 or a client-side deadline).
    Timeout,
    /// The transcript itself is malformed in a way the provider rejects.
    Format,
    /// The requested `max_tokens` exceeds what the model allows.
    MaxTokens,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::ContextOverflow => "context_overflow",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Auth => "auth",
            ErrorKind::Billing => "billing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Format => "format",
            ErrorKind::MaxTokens => "max_tokens",
        };
        f.write_str(s)
    }
}

/// Returns `true` when this kind should advance the failover chain.
///
/// `context_overflow` needs compaction, not a different provider.
/// `format` indicates the transcript itself is corrupt — another provider
/// would reject it too. `max_tokens` is handled by a same-model retry
/// (see [`parse_max_tokens_limit`]), not failover. `unknown` is returned to
/// the caller unchanged because guessing at its eligibility is worse than
/// surfacing it.
pub fn is_failover(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::RateLimit
            | ErrorKind::Auth
            | ErrorKind::Billing
            | ErrorKind::Timeout
            | ErrorKind::Overloaded
    )
}

/// `true` when an alias's cooldown schedule should use the long billing
/// clock (§4.10) rather than the short transient-failure clock.
pub fn is_billing(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Billing)
}

/// Stable, user-facing message for each kind. `unknown` is handled by the
/// caller (it needs the raw text to build `"LLM error: {raw}"`).
pub fn format_for_user(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Unknown => "LLM error",
        ErrorKind::ContextOverflow => {
            "The conversation is too long for this model's context window. Try starting a new conversation or summarizing."
        }
        ErrorKind::RateLimit => "Rate limited - too many requests. Please wait a moment and try again.",
        ErrorKind::Overloaded => "The AI provider is currently overloaded. Please try again shortly.",
        ErrorKind::Auth => "Authentication failed - check the configured API key.",
        ErrorKind::Billing => "Billing or quota limit reached for this provider.",
        ErrorKind::Timeout => "The request timed out waiting for a response.",
        ErrorKind::Format => "The conversation history could not be sent to the provider in its current form.",
        ErrorKind::MaxTokens => "The requested output length exceeds what this model allows.",
    }
}

/// Render a user-facing message for an error kind, falling back to
/// `"LLM error: <raw>"` for `unknown`.
pub fn user_message(kind: ErrorKind, raw: &str) -> String {
    match kind {
        ErrorKind::Unknown => format!("LLM error: {raw}"),
        other => format_for_user(other).to_string(),
    }
}

struct Pattern {
    kind: ErrorKind,
    needles: &'static [&'static str],
}

// Priority order matters: max_tokens before context_overflow before
// rate_limit before overloaded before billing before auth before timeout
// before format. A 400 `invalid_request_error` carrying a max-tokens
// complaint must not fall through to `auth` just because some providers
// tag every 4xx as `invalid_request_error`.
static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            kind: ErrorKind::MaxTokens,
            needles: &[
                "max_tokens",
                "max output tokens",
                "maximum output tokens",
                "max_completion_tokens",
            ],
        },
        Pattern {
            kind: ErrorKind::ContextOverflow,
            needles: &[
                "context_length_exceeded",
                "context length exceeded",
                "context_window_exceeded",
                "request_too_large",
                "too many tokens",
                "prompt is too long",
                "413",
                "maximum context length",
            ],
        },
        Pattern {
            kind: ErrorKind::RateLimit,
            needles: &[
                "rate_limit",
                "rate limit",
                "too many requests",
                "429",
            ],
        },
        Pattern {
            kind: ErrorKind::Overloaded,
            needles: &[
                "overloaded_error",
                "overloaded",
                "server is busy",
                "try again later",
                "503",
                "service unavailable",
            ],
        },
        Pattern {
            kind: ErrorKind::Billing,
            needles: &[
                "insufficient_credits",
                "insufficient_quota",
                "quota exceeded",
                "billing",
                "payment required",
                "402",
                "credit balance",
            ],
        },
        Pattern {
            kind: ErrorKind::Auth,
            needles: &[
                "invalid api key",
                "invalid_api_key",
                "authentication_error",
                "unauthorized",
                "forbidden",
                "401",
                "403",
            ],
        },
        Pattern {
            kind: ErrorKind::Timeout,
            needles: &[
                "timed out",
                "timeout",
                "deadline exceeded",
                "408",
                "504",
                "gateway timeout",
            ],
        },
        Pattern {
            kind: ErrorKind::Format,
            needles: &[
                "invalid_request_error",
                "malformed",
                "tool_use ids were found without tool_result",
                "unexpected role",
            ],
        },
    ]
});

/// Classify an error message or an entire response body into an
/// [`ErrorKind`], evaluating the layered substring sweep in fixed priority
/// order. Matching is case-insensitive.
pub fn classify(text: &str) -> ErrorKind {
    let lower = text.to_lowercase();
    for pattern in PATTERNS.iter() {
        if pattern.needles.iter().any(|needle| lower.contains(needle)) {
            return pattern.kind;
        }
    }
    ErrorKind::Unknown
}

static MAX_TOKENS_RE_GT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"max_tokens:\s*(\d+)\s*>\s*(\d+)").unwrap());
static MAX_TOKENS_RE_LE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"max_tokens\s+must\s+be\s*<=\s*(\d+)|cannot\s+exceed\s+(\d+)").unwrap()
});
static MAX_TOKENS_RE_GENERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"maximum[^0-9]*(\d+)[^0-9]*output[^0-9]*tokens?").unwrap());

/// Extract a provider-asserted max-output-tokens limit from free text.
///
/// Returns `(true, limit)` when one of three known phrasings is found:
/// `max_tokens: N > M`, `max_tokens must be <= M` / `cannot exceed M`, or
/// the generic `maximum … output … tokens … M` fallback. Returns
/// `(false, 0)` for unrelated text.
pub fn parse_max_tokens_limit(text: &str) -> (bool, u32) {
    let lower = text.to_lowercase();

    if let Some(caps) = MAX_TOKENS_RE_GT.captures(&lower) {
        if let Some(limit) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) {
            return (true, limit);
        }
    }
    if let Some(caps) = MAX_TOKENS_RE_LE.captures(&lower) {
        let limit = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        if let Some(limit) = limit {
            return (true, limit);
        }
    }
    if let Some(caps) = MAX_TOKENS_RE_GENERIC.captures(&lower) {
        if let Some(limit) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            return (true, limit);
        }
    }
    (false, 0)
}

/// Re-classify a provider error using the raw response body when the
/// surfaced SDK error message is opaque (e.g. `unexpected end of JSON
/// input`, which several SSE-based backends produce when the real error
/// arrived as an embedded event rather than an HTTP status). Returns a new
/// [`GatewayError`] with a clearer message, keeping the original as the
/// error source.
pub fn enhance_error(original: GatewayError, response_body: &str) -> GatewayError {
    if response_body.trim().is_empty() {
        return original;
    }
    let kind = classify(response_body);
    if matches!(kind, ErrorKind::Unknown) {
        return original;
    }
    GatewayError::Provider {
        kind,
        message: format!("{}: {}", user_message(kind, response_body), original),
        source: Some(Box::new(original)),
    }
}

/// The crate-wide error type.
///
/// Driver-internal errors (HTTP failures, malformed JSON, WebSocket
/// faults) are wrapped in [`GatewayError::Provider`] once classified;
/// everything else is a distinct variant so callers can match without
/// string comparison.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A classified provider failure.
    #[error("{message}")]
    Provider {
        /// The classified kind driving failover/retry decisions.
        kind: ErrorKind,
        /// Human-readable detail, already passed through [`user_message`].
        message: String,
        /// The original error this one salvaged a clearer message from.
        #[source]
        source: Option<Box<GatewayError>>,
    },

    /// All candidates in a purpose's chain were exhausted.
    #[error("all models failed for {purpose} (last: {last})")]
    AllModelsFailed {
        /// The purpose being resolved.
        purpose: String,
        /// The last error observed before the chain was exhausted.
        last: String,
    },

    /// The registry's purpose gate removed every candidate for a required
    /// purpose (always `agent`; other purposes fall back silently).
    #[error("no usable models remain for purpose '{purpose}' after capability gating: {removed}")]
    PurposeExhausted {
        /// The purpose whose chain emptied out.
        purpose: String,
        /// A human-readable list of removed `alias/model` entries and why.
        removed: String,
    },

    /// A driver rejected a model name outright (model validator fatal).
    #[error("model '{model}' is not usable with driver '{driver}': {message}")]
    UnsupportedModel {
        /// The driver alias.
        driver: String,
        /// The rejected model id.
        model: String,
        /// The validator's explanation.
        message: String,
    },

    /// The call was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// A malformed `alias/model` reference.
    #[error("invalid model reference '{0}': expected 'alias/model'")]
    InvalidModelReference(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport-level HTTP failure below the classifier.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Transport-level WebSocket failure below the classifier.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Build a classified provider error from raw text, applying
    /// [`classify`] and [`user_message`] in one step.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = classify(&text);
        GatewayError::Provider {
            message: user_message(kind, &text),
            kind,
            source: None,
        }
    }

    /// Build a classified provider error with an explicit, already-known
    /// kind (used where the driver knows the HTTP status directly rather
    /// than needing to sniff the body).
    pub fn with_kind(kind: ErrorKind, text: impl Into<String>) -> Self {
        let text = text.into();
        GatewayError::Provider {
            message: user_message(kind, &text),
            kind,
            source: None,
        }
    }

    /// The classified kind, if this is a [`GatewayError::Provider`].
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GatewayError::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;
