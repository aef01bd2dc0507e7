pub mod http;
pub mod renewer;
pub mod scrape;

pub use http::{PortalClient, PortalResponse};
pub use renewer::RenewalBot;

use thiserror::Error;

/// Fixed portal origin. Relative paths from the scrape layer resolve against
/// this; supporting other sites is explicitly out of scope.
pub const PORTAL_ORIGIN: &str = "https://dash.hidencloud.com";

pub const LOGIN_PATH: &str = "/auth/login";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Failures in the authenticated portal conversation.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The in-page HTTP call itself faulted (network error, thrown script).
    #[error("in-page request failed: {0}")]
    Request(String),

    /// The session is not (or no longer) authenticated: `/dashboard`
    /// redirected to the login flow, or an interception page came back.
    #[error("session invalid: {0}")]
    SessionInvalid(String),
}
