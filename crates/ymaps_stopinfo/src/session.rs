//! Session bootstrap against the Yandex Maps web front end
//!
//! Emulates a browser's first navigation: fetches the maps landing
//! page, pulls the anti-forgery token and session id out of the inline
//! page state, and captures the cookies the upstream issues. The
//! handshake either yields a complete [`SessionState`] or fails; no
//! partial state ever leaves this module.
//!
//! The extraction patterns are an upstream-controlled contract that has
//! already changed several times; each field lives behind its own
//! function so a markup change is a one-place fix with a distinct
//! error.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{COOKIE, HeaderMap, LOCATION, SET_COOKIE};
use tracing::{debug, warn};

use crate::config::StopInfoConfig;
use crate::error::StopInfoError;

/// Marker element present in the bot-challenge page body.
const CAPTCHA_BODY_MARKER: &str = "captcha__image";
/// Path fragment of the bot-challenge redirect target.
const CAPTCHA_URL_MARKER: &str = "showcaptcha";

/// Upper bound on manually followed bootstrap redirects.
const MAX_REDIRECT_HOPS: usize = 10;

// Two dot-separated word segments, as served in the page's inline JSON
// state.
static CSRF_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""csrfToken":"(\w+\.\w+)""#).expect("csrf token pattern is valid")
});

// The session id format varies across upstream versions; anything
// quoted and non-empty is accepted.
static SESSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""sessionId":"([^"]+)""#).expect("session id pattern is valid")
});

/// Credentials and routing state obtained from a successful bootstrap.
///
/// Read-only after construction; a client holds at most one for its
/// lifetime and replaces it wholesale on an explicit refresh.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Anti-forgery token required on every API request.
    pub csrf_token: String,
    /// Upstream session identifier.
    pub session_id: String,
    /// Cookies issued during the handshake (redirect hops included),
    /// passed through verbatim.
    pub cookies: HashMap<String, String>,
    /// Resolved stop-info endpoint on the host that served the
    /// bootstrap page (which may differ from the requested host).
    pub stop_info_url: String,
}

impl SessionState {
    /// Serialize the captured cookies into a `Cookie` header value.
    pub(crate) fn cookie_header(&self) -> Option<String> {
        cookie_header(&self.cookies)
    }
}

/// Hook for resolving a bot challenge out of band.
///
/// Implementations present the challenge page to a human or an external
/// solving service and return the page the upstream serves once the
/// challenge has been answered. The bootstrap continues with the
/// returned page as if the challenge had never appeared; without a
/// solver the bootstrap fails with
/// [`StopInfoError::CaptchaRequired`].
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Resolve a challenge page, returning the follow-up page body.
    async fn resolve(&self, challenge_html: &str) -> Result<String, StopInfoError>;
}

/// Perform the browser-like handshake and capture a complete session.
///
/// Every step is a hard failure; retrying the bootstrap is the caller's
/// decision.
///
/// The given client must be built with automatic redirects disabled:
/// hops are followed here so that cookies set on intermediate redirect
/// responses are captured and resent. The upstream sets session
/// cookies while redirecting from the landing host to the maps host.
pub(crate) async fn bootstrap(
    http: &reqwest::Client,
    config: &StopInfoConfig,
    solver: Option<&dyn CaptchaSolver>,
) -> Result<SessionState, StopInfoError> {
    debug!(url = %config.init_url, "bootstrapping session");

    let mut current = url::Url::parse(&config.init_url)
        .map_err(|err| StopInfoError::Configuration(format!("invalid init_url: {err}")))?;
    let mut cookies = HashMap::new();
    let mut hops = 0;

    let response = loop {
        let mut request = http.get(current.clone());
        if let Some(header) = cookie_header(&cookies) {
            request = request.header(COOKIE, header);
        }
        let response = request.send().await?;
        merge_set_cookies(&mut cookies, response.headers());

        if !response.status().is_redirection() {
            break response;
        }
        // A redirect without a usable Location is treated as final.
        let Some(next) = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| current.join(location).ok())
        else {
            break response;
        };
        hops += 1;
        if hops > MAX_REDIRECT_HOPS {
            return Err(StopInfoError::RedirectLoop {
                max_hops: MAX_REDIRECT_HOPS,
            });
        }
        current = next;
    };

    let final_url = response.url().clone();
    let mut page = response.text().await?;

    // The URL marker only describes the response we actually fetched;
    // a solver-supplied replacement page can clear the body marker but
    // never the URL. So the combined check runs once, and afterwards
    // only the body of the current page decides whether the challenge
    // is still up.
    if is_bot_challenge(&page, final_url.as_str()) {
        page = resolve_challenge(solver, page).await?;
        while page.contains(CAPTCHA_BODY_MARKER) {
            page = resolve_challenge(solver, page).await?;
        }
    }

    let csrf_token = extract_csrf_token(&page).ok_or(StopInfoError::CsrfTokenNotFound)?;
    let session_id = extract_session_id(&page).ok_or(StopInfoError::SessionNotFound)?;
    let stop_info_url = resolve_stop_info_url(&final_url, &config.resource_path);

    debug!(
        host = final_url.host_str().unwrap_or(""),
        cookies = cookies.len(),
        "session established"
    );

    Ok(SessionState {
        csrf_token,
        session_id,
        cookies,
        stop_info_url,
    })
}

async fn resolve_challenge(
    solver: Option<&dyn CaptchaSolver>,
    page: String,
) -> Result<String, StopInfoError> {
    let Some(solver) = solver else {
        return Err(StopInfoError::CaptchaRequired { page_html: page });
    };
    warn!("bot challenge on bootstrap page, handing off to captcha solver");
    solver.resolve(&page).await
}

fn extract_csrf_token(page: &str) -> Option<String> {
    CSRF_TOKEN_RE
        .captures(page)
        .map(|captures| captures[1].to_string())
}

fn extract_session_id(page: &str) -> Option<String> {
    SESSION_ID_RE
        .captures(page)
        .map(|captures| captures[1].to_string())
}

fn is_bot_challenge(page: &str, final_url: &str) -> bool {
    page.contains(CAPTCHA_BODY_MARKER) || final_url.contains(CAPTCHA_URL_MARKER)
}

/// Point the stop-info endpoint at whatever origin the bootstrap
/// redirect landed on.
fn resolve_stop_info_url(final_url: &url::Url, resource_path: &str) -> String {
    let mut resolved = final_url.clone();
    resolved.set_path(resource_path);
    resolved.set_query(None);
    resolved.set_fragment(None);
    resolved.to_string()
}

fn cookie_header(cookies: &HashMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let pairs: Vec<String> = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    Some(pairs.join("; "))
}

fn merge_set_cookies(cookies: &mut HashMap<String, String>, headers: &HeaderMap) {
    for header in headers.get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        // Only the name=value part matters; attributes like Path and
        // Expires are dropped.
        let pair = raw.split(';').next().unwrap_or(raw);
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use tokio_test::assert_ok;

    use super::*;

    const BOOTSTRAP_PAGE: &str = concat!(
        "<html><head><script>var config = {\"counters\":{},",
        "\"csrfToken\":\"f31ab9de12c8b2537188.8038747520\",",
        "\"sessionId\":\"1692454465173_306101\",",
        "\"lang\":\"ru\"};</script></head><body></body></html>",
    );

    #[test]
    fn extracts_csrf_token_from_inline_state() {
        assert_eq!(
            extract_csrf_token(BOOTSTRAP_PAGE).as_deref(),
            Some("f31ab9de12c8b2537188.8038747520")
        );
    }

    #[test]
    fn csrf_token_requires_two_segments() {
        assert!(extract_csrf_token("{\"csrfToken\":\"justoneword\"}").is_none());
        assert!(extract_csrf_token("<html>no tokens here</html>").is_none());
    }

    #[test]
    fn extracts_session_id_from_inline_state() {
        assert_eq!(
            extract_session_id(BOOTSTRAP_PAGE).as_deref(),
            Some("1692454465173_306101")
        );
    }

    #[test]
    fn session_id_format_is_not_over_constrained() {
        // Observed formats have drifted; any quoted non-empty value goes.
        assert_eq!(
            extract_session_id("{\"sessionId\":\"v3:abc-def:0\"}").as_deref(),
            Some("v3:abc-def:0")
        );
        assert!(extract_session_id("{\"sessionId\":\"\"}").is_none());
    }

    #[test]
    fn detects_bot_challenge_in_body_and_url() {
        assert!(is_bot_challenge(
            "<div class=\"captcha__image\"><img src=\"x\"></div>",
            "https://yandex.ru/maps",
        ));
        assert!(is_bot_challenge(
            "<html></html>",
            "https://yandex.ru/showcaptcha?retpath=x",
        ));
        assert!(!is_bot_challenge(BOOTSTRAP_PAGE, "https://yandex.ru/maps"));
    }

    #[test]
    fn merges_cookie_names_and_values_only() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("yandexuid=8312561991692454464; Path=/; Domain=.yandex.ru"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("maps_los=1; HttpOnly"));

        let mut cookies = HashMap::new();
        merge_set_cookies(&mut cookies, &headers);
        assert_eq!(cookies.len(), 2);
        assert_eq!(
            cookies.get("yandexuid").map(String::as_str),
            Some("8312561991692454464")
        );
        assert_eq!(cookies.get("maps_los").map(String::as_str), Some("1"));
    }

    #[test]
    fn later_hops_override_earlier_cookie_values() {
        let mut cookies = HashMap::new();
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("spravka=old; Path=/"));
        merge_set_cookies(&mut cookies, &headers);

        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("spravka=new; Path=/"));
        merge_set_cookies(&mut cookies, &headers);

        assert_eq!(cookies.get("spravka").map(String::as_str), Some("new"));
    }

    #[test]
    fn cookie_header_is_absent_without_cookies() {
        let state = SessionState {
            csrf_token: "a.b".to_string(),
            session_id: "1_2".to_string(),
            cookies: HashMap::new(),
            stop_info_url: "https://yandex.ru/maps/api/masstransit/getStopInfo".to_string(),
        };
        assert!(state.cookie_header().is_none());
    }

    #[test]
    fn resolved_url_keeps_origin_and_replaces_path() {
        let final_url = url::Url::parse("https://yandex.ru/maps/213/moscow/?ll=37.6").unwrap();
        assert_eq!(
            resolve_stop_info_url(&final_url, "maps/api/masstransit/getStopInfo"),
            "https://yandex.ru/maps/api/masstransit/getStopInfo"
        );
    }

    fn http_client() -> reqwest::Client {
        // Bootstrap follows redirects itself; see `bootstrap`.
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    fn config_for(server: &MockServer) -> StopInfoConfig {
        StopInfoConfig {
            init_url: server.uri(),
            ..StopInfoConfig::for_testing()
        }
    }

    #[tokio::test]
    async fn bootstrap_populates_complete_session_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BOOTSTRAP_PAGE)
                    .insert_header("set-cookie", "yandexuid=8312561991692454464; Path=/"),
            )
            .mount(&server)
            .await;

        let http = http_client();
        let state = tokio_test::assert_ok!(bootstrap(&http, &config_for(&server), None).await);

        assert_eq!(state.csrf_token, "f31ab9de12c8b2537188.8038747520");
        assert_eq!(state.session_id, "1692454465173_306101");
        assert_eq!(
            state.cookies.get("yandexuid").map(String::as_str),
            Some("8312561991692454464")
        );
        assert_eq!(
            state.stop_info_url,
            format!("{}/maps/api/masstransit/getStopInfo", server.uri())
        );
    }

    #[tokio::test]
    async fn bootstrap_accumulates_cookies_across_redirect_hops() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/maps")
                    .insert_header("set-cookie", "hop=fromredirect; Path=/"),
            )
            .mount(&server)
            .await;
        // The hop cookie must be resent on the follow-up request.
        Mock::given(method("GET"))
            .and(path("/maps"))
            .and(header("cookie", "hop=fromredirect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BOOTSTRAP_PAGE)
                    .insert_header("set-cookie", "yandexuid=8312561991692454464; Path=/"),
            )
            .mount(&server)
            .await;

        let http = http_client();
        let state = bootstrap(&http, &config_for(&server), None).await.unwrap();

        assert_eq!(
            state.cookies.get("hop").map(String::as_str),
            Some("fromredirect")
        );
        assert_eq!(
            state.cookies.get("yandexuid").map(String::as_str),
            Some("8312561991692454464")
        );
        assert_eq!(
            state.stop_info_url,
            format!("{}/maps/api/masstransit/getStopInfo", server.uri())
        );
    }

    #[tokio::test]
    async fn bootstrap_gives_up_on_a_redirect_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/"))
            .mount(&server)
            .await;

        let http = http_client();
        let err = bootstrap(&http, &config_for(&server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StopInfoError::RedirectLoop { .. }));
    }

    #[tokio::test]
    async fn bootstrap_fails_on_challenge_without_solver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<div class=\"captcha__image\"><img src=\"/captcha.png\"></div>",
            ))
            .mount(&server)
            .await;

        let http = http_client();
        let err = bootstrap(&http, &config_for(&server), None)
            .await
            .unwrap_err();

        assert!(err.is_bot_challenge());
        assert!(err.challenge_html().is_some_and(|html| html.contains("captcha.png")));
    }

    #[tokio::test]
    async fn url_marker_challenge_without_solver_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/showcaptcha"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html>checking your browser</html>"),
            )
            .mount(&server)
            .await;

        let config = StopInfoConfig {
            init_url: format!("{}/showcaptcha", server.uri()),
            ..StopInfoConfig::for_testing()
        };
        let http = http_client();
        let err = bootstrap(&http, &config, None).await.unwrap_err();
        assert!(err.is_bot_challenge());
    }

    struct CountingSolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptchaSolver for CountingSolver {
        async fn resolve(&self, _challenge_html: &str) -> Result<String, StopInfoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BOOTSTRAP_PAGE.to_string())
        }
    }

    #[tokio::test]
    async fn body_marker_challenge_clears_after_one_solver_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<div class=\"captcha__image\"><img src=\"/captcha.png\"></div>",
            ))
            .mount(&server)
            .await;

        let solver = CountingSolver {
            calls: AtomicUsize::new(0),
        };
        let http = http_client();
        let state = bootstrap(&http, &config_for(&server), Some(&solver))
            .await
            .unwrap();

        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.session_id, "1692454465173_306101");
    }

    #[tokio::test]
    async fn url_marker_challenge_clears_after_one_solver_round_trip() {
        // The challenge landed on a /showcaptcha URL with a clean body;
        // a single solver round trip must settle it even though the
        // URL itself never changes.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/showcaptcha"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html>checking your browser</html>"),
            )
            .mount(&server)
            .await;

        let config = StopInfoConfig {
            init_url: format!("{}/showcaptcha", server.uri()),
            ..StopInfoConfig::for_testing()
        };
        let solver = CountingSolver {
            calls: AtomicUsize::new(0),
        };
        let http = http_client();
        let state = bootstrap(&http, &config, Some(&solver)).await.unwrap();

        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.session_id, "1692454465173_306101");
    }

    #[tokio::test]
    async fn bootstrap_reports_missing_csrf_token_distinctly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"sessionId\":\"1692454465173_306101\"}"),
            )
            .mount(&server)
            .await;

        let http = http_client();
        let err = bootstrap(&http, &config_for(&server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StopInfoError::CsrfTokenNotFound));
    }

    #[tokio::test]
    async fn bootstrap_reports_missing_session_id_distinctly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"csrfToken\":\"f31ab9de.8038747520\"}"),
            )
            .mount(&server)
            .await;

        let http = http_client();
        let err = bootstrap(&http, &config_for(&server), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StopInfoError::SessionNotFound));
    }
}
