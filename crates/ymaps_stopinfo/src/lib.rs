//! Yandex Maps masstransit stop-info client
//!
//! Fetches real-time arrival predictions for a public-transit stop from
//! Yandex Maps' internal web API. The API is not public: it only
//! answers requests that look like they come from the maps front end,
//! which takes a browser-like handshake (landing page fetch, anti-forgery
//! token and session id scraped from the inline page state, cookie
//! capture) plus a custom hash signature over the sorted query
//! parameters of every request.
//!
//! # Architecture
//!
//! The crate follows a client-trait pattern: [`StopInfoClient`] defines
//! the lookup interface, implemented by [`YandexMapsClient`], which
//! bootstraps its session lazily on first use and keeps it for its
//! lifetime. [`sign`] is the standalone signature routine, and
//! [`CaptchaSolver`] is an optional hook for resolving bot challenges
//! out of band.
//!
//! The transit payload itself is passed through as opaque
//! [`serde_json::Value`]; no schema is imposed on it.
//!
//! # Example
//!
//! ```rust,ignore
//! use ymaps_stopinfo::{StopInfoClient, StopInfoConfig, YandexMapsClient};
//!
//! let config = StopInfoConfig::default();
//! let client = YandexMapsClient::new(&config)?;
//!
//! let info = client.stop_info("9639579").await?;
//! println!("{info:#}");
//! ```

mod client;
mod config;
mod error;
mod session;
mod signature;

pub use client::{StopInfoClient, YandexMapsClient};
pub use config::StopInfoConfig;
pub use error::StopInfoError;
pub use session::{CaptchaSolver, SessionState};
pub use signature::sign;
