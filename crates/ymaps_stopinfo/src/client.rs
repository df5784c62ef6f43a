//! Stop-info client for the Yandex Maps masstransit API
//!
//! Owns the bootstrapped session state and orchestrates per-stop
//! lookups: bootstrap on first use, parameter assembly in the schema
//! order the web client sends, signing, and the cookie-authenticated
//! data call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{instrument, warn};

use crate::config::StopInfoConfig;
use crate::error::StopInfoError;
use crate::session::{self, CaptchaSolver, SessionState};
use crate::signature::{self, SIGNATURE_KEY};

/// Separator distinguishing raw numeric stop ids from the provider's
/// object-reference form.
const STOP_ID_SEPARATOR: &str = "__";
/// Namespace prefix for stop object references.
const STOP_NAMESPACE: &str = "stop";

const AJAX_KEY: &str = "ajax";
const CSRF_TOKEN_KEY: &str = "csrfToken";
const ID_KEY: &str = "id";
const LANG_KEY: &str = "lang";
const LOCALE_KEY: &str = "locale";
const MODE_KEY: &str = "mode";
const SESSION_ID_KEY: &str = "sessionId";
const URI_KEY: &str = "uri";

/// Trait for masstransit stop-info lookups
#[async_trait]
pub trait StopInfoClient: Send + Sync {
    /// Fetch arrival predictions for a stop.
    ///
    /// The payload is passed through as opaque JSON. A response body
    /// that is not valid JSON comes back as
    /// `{"error": {"message": ..., "rawResponse": ...}}` instead of an
    /// `Err`; transient upstream HTML error pages are expected in a
    /// polling workload and should not unwind the caller.
    async fn stop_info(&self, stop_id: &str) -> Result<Value, StopInfoError>;
}

/// Yandex Maps implementation of [`StopInfoClient`]
pub struct YandexMapsClient {
    http: reqwest::Client,
    config: StopInfoConfig,
    session: OnceCell<SessionState>,
    captcha_solver: Option<Arc<dyn CaptchaSolver>>,
}

impl fmt::Debug for YandexMapsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YandexMapsClient")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl YandexMapsClient {
    /// Create a new client with the given configuration.
    ///
    /// The session is established lazily on the first
    /// [`StopInfoClient::stop_info`] call.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP
    /// client cannot be initialized.
    pub fn new(config: &StopInfoConfig) -> Result<Self, StopInfoError> {
        config.validate().map_err(StopInfoError::Configuration)?;

        // Redirects are off: the bootstrap follows them itself so that
        // cookies set on intermediate hops are captured.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            config: config.clone(),
            session: OnceCell::new(),
            captcha_solver: None,
        })
    }

    /// Install a captcha solver consulted when the bootstrap page turns
    /// out to be a bot challenge.
    #[must_use]
    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha_solver = Some(solver);
        self
    }

    /// The session, bootstrapping it on first use.
    ///
    /// Concurrent first callers await the single in-flight handshake;
    /// once populated the state is only ever read.
    async fn session(&self) -> Result<&SessionState, StopInfoError> {
        self.session
            .get_or_try_init(|| {
                session::bootstrap(&self.http, &self.config, self.captcha_solver.as_deref())
            })
            .await
    }

    /// Drop the current session and perform a fresh bootstrap.
    ///
    /// Sessions are never refreshed automatically: an expired one shows
    /// up as an upstream error payload on an otherwise successful call,
    /// and the caller decides when to re-bootstrap.
    pub async fn refresh_session(&mut self) -> Result<(), StopInfoError> {
        self.session = OnceCell::new();
        self.session().await.map(|_| ())
    }

    /// Per-request parameters in the fixed schema order the web client
    /// sends. Insertion order drives the outgoing query string; the
    /// signature sorts on its own.
    fn request_params(&self, state: &SessionState, stop_id: &str) -> Vec<(&'static str, String)> {
        vec![
            (AJAX_KEY, "1".to_string()),
            (CSRF_TOKEN_KEY, state.csrf_token.clone()),
            (ID_KEY, stop_id.to_string()),
            (LANG_KEY, self.config.lang.clone()),
            (LOCALE_KEY, self.config.locale.clone()),
            (MODE_KEY, self.config.mode.clone()),
            (SESSION_ID_KEY, state.session_id.clone()),
            (URI_KEY, format!("ymapsbm1://transit/stop?id={stop_id}")),
        ]
    }
}

/// Bring a caller-supplied stop id into the provider's object-reference
/// form. Raw numeric ids get the stop namespace prefix; ids that
/// already carry a separator pass through unchanged, so the operation
/// is idempotent.
fn normalize_stop_id(stop_id: &str) -> String {
    if stop_id.contains(STOP_ID_SEPARATOR) {
        stop_id.to_string()
    } else {
        format!("{STOP_NAMESPACE}{STOP_ID_SEPARATOR}{stop_id}")
    }
}

#[async_trait]
impl StopInfoClient for YandexMapsClient {
    #[instrument(skip(self))]
    async fn stop_info(&self, stop_id: &str) -> Result<Value, StopInfoError> {
        let state = self.session().await?;

        let stop_id = normalize_stop_id(stop_id);
        let mut params = self.request_params(state, &stop_id);
        let request_signature = signature::sign(&params);
        params.push((SIGNATURE_KEY, request_signature));

        let mut request = self.http.get(&state.stop_info_url).query(&params);
        if let Some(cookie_header) = state.cookie_header() {
            request = request.header(COOKIE, cookie_header);
        }

        // The status code is deliberately not inspected: upstream error
        // pages and expired sessions surface through the body.
        let body = request.send().await?.text().await?;

        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(%err, "stop info response is not valid JSON");
                Ok(json!({
                    "error": {
                        "message": err.to_string(),
                        "rawResponse": body,
                    }
                }))
            }
        }
    }
}
