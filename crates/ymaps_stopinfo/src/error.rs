//! Stop-info client error types

use thiserror::Error;

/// Errors raised while establishing or using an API session.
///
/// Every variant here is a hard failure: the client cannot proceed
/// without a fresh bootstrap or a configuration fix. A stop-info
/// response that fails to parse as JSON is deliberately *not* an error
/// variant; it comes back as a structured `{"error": ...}` payload so
/// polling callers can keep going without unwinding.
#[derive(Debug, Error)]
pub enum StopInfoError {
    /// The upstream flagged the session as automated and served a
    /// captcha challenge instead of the maps page.
    #[error("bot challenge served on bootstrap page, captcha resolution required")]
    CaptchaRequired {
        /// Raw challenge page, for hand-off to a captcha solver.
        page_html: String,
    },

    /// The bootstrap page carried no csrf token (upstream markup
    /// changed).
    #[error("csrf token not found on bootstrap page")]
    CsrfTokenNotFound,

    /// The bootstrap page carried no session id (upstream markup
    /// changed).
    #[error("session id not found on bootstrap page")]
    SessionNotFound,

    /// The bootstrap redirect chain never settled on a page.
    #[error("bootstrap redirect chain exceeded {max_hops} hops")]
    RedirectLoop {
        /// Hop limit that was exceeded.
        max_hops: usize,
    },

    /// Transport-level failure, propagated unchanged from the HTTP
    /// client.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StopInfoError {
    /// Returns true if the upstream demanded captcha resolution.
    #[must_use]
    pub const fn is_bot_challenge(&self) -> bool {
        matches!(self, Self::CaptchaRequired { .. })
    }

    /// The raw challenge page, when this error carries one.
    #[must_use]
    pub fn challenge_html(&self) -> Option<&str> {
        match self {
            Self::CaptchaRequired { page_html } => Some(page_html),
            _ => None,
        }
    }
}
