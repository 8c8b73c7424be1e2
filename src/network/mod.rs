//! Network access backends
//!
//! Every request the crate makes goes through a [`NetworkAccessPort`]. Three
//! interchangeable backends implement it:
//! - [`DirectHttpPort`] - plain HTTP, fastest, fails against challenge walls
//! - [`ScriptedPort`] - drives a [`BrowserSurface`], can pass challenges interactively
//! - [`GatekeeperPort`] - asks a remote relay to perform the request
//!
//! [`PortFactory`] builds the right one for a [`BackendKind`] and [`PortPool`]
//! keeps one initialised port per wiki, building through [`PortBuilder`] so the
//! set of backends can be swapped wholesale.

mod direct;
pub mod extract;
mod factory;
mod gatekeeper;
mod lifecycle;
mod pool;
mod scripted;

pub use direct::DirectHttpPort;
pub use factory::{PortBuilder, PortFactory};
pub use gatekeeper::GatekeeperPort;
pub use pool::PortPool;
pub use scripted::{BrowserSurface, ScriptedPort, SurfaceFactory};

use crate::error::Result;
use crate::types::BackendKind;
use async_trait::async_trait;
use url::Url;

/// Contract every network backend fulfils
///
/// A port is stateful: it must be initialised before use and disposed to
/// release whatever session it holds. Overlapping `initialize` calls share a
/// single in-flight initialisation.
#[async_trait]
pub trait NetworkAccessPort: Send + Sync {
    /// Which backend variant this is
    fn kind(&self) -> BackendKind;

    /// Establish the backend's session; idempotent
    ///
    /// `base_url` is the origin the session should be bound to, if any.
    async fn initialize(&self, base_url: Option<&Url>) -> Result<()>;

    /// GET `url` and return its validated JSON text
    async fn fetch_json(&self, url: &Url) -> Result<String>;

    /// POST `fields` form-encoded to `url` and return its validated JSON text
    async fn post_form_and_fetch_json(&self, url: &Url, fields: &[(String, String)])
    -> Result<String>;

    /// GET `url` and return the body as text
    async fn fetch_raw_html(&self, url: &Url) -> Result<String>;

    /// GET `url` and return the body as bytes (media)
    async fn fetch_raw_bytes(&self, url: &Url) -> Result<Vec<u8>>;

    /// Session cookies for `url` as `name=value` pairs
    async fn export_cookies(&self, url: &Url) -> Result<Vec<String>>;

    /// Install `name=value` cookies for `url` into this port's session
    async fn import_cookies(&self, url: &Url, cookies: &[String]) -> Result<()>;

    /// Bring an initialised port onto `base_url` so later requests run in
    /// the origin's context
    ///
    /// Backends without page state have nothing to do.
    async fn land_on(&self, _base_url: &Url) -> Result<()> {
        Ok(())
    }

    /// Transplant the session of `other` into this port; best effort
    ///
    /// Failures are logged and swallowed: a fresh port without cookies is
    /// still usable, it just may have to authenticate again.
    async fn copy_cookies_from(&self, other: &dyn NetworkAccessPort, url: &Url) {
        let cookies = match other.export_cookies(url).await {
            Ok(cookies) => cookies,
            Err(e) => {
                tracing::debug!(error = %e, url = %url, "could not export cookies");
                return;
            }
        };
        if cookies.is_empty() {
            return;
        }
        if let Err(e) = self.import_cookies(url, &cookies).await {
            tracing::debug!(error = %e, url = %url, "could not import cookies");
        } else {
            tracing::debug!(
                count = cookies.len(),
                from = %other.kind(),
                to = %self.kind(),
                "copied session cookies"
            );
        }
    }

    /// Release backend resources; safe to call more than once
    async fn dispose(&self);
}

/// Split a `Cookie` header value (`a=1; b=2`) into `name=value` pairs
pub(crate) fn split_cookie_header(header: &str) -> Vec<String> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .map(str::to_string)
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;
