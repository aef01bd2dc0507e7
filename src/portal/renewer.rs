//! Renewal and payment flow for one authenticated account.
//!
//! Everything here runs over the in-page request shim against server-rendered
//! HTML: verify the session, walk the discovered services, submit one renewal
//! per service, and settle whatever unpaid invoices fall out. Failures are
//! contained at the unit that produced them — one broken service or invoice
//! page must not abort its siblings.

use tracing::{debug, info, warn};

use super::http::{encode_form, PortalClient, PortalResponse};
use super::scrape;
use super::{PortalError, DASHBOARD_PATH};
use crate::browser::BrowserSession;
use crate::core::types::Service;
use crate::pacing::StepDelay;

/// Page titles the interception layer serves instead of the dashboard.
const INTERCEPT_TITLES: &[&str] = &["Just a moment", "Attention Required"];

/// Did the request chain end on the login/auth flow instead of the page we
/// asked for? The portal answers unauthenticated requests with a redirect,
/// not a status code.
pub fn is_login_redirect(final_url: &str) -> bool {
    final_url.contains("/login") || final_url.contains("/auth")
}

/// Challenge/interception page served in place of real content.
pub fn is_intercept_title(title: &str) -> bool {
    INTERCEPT_TITLES.iter().any(|t| title.contains(t))
}

pub struct RenewalBot {
    client: PortalClient,
    username: String,
    renew_days: u32,
}

impl RenewalBot {
    pub fn new(session: &BrowserSession, username: &str, renew_days: u32) -> Self {
        Self {
            client: PortalClient::new(session),
            username: username.to_string(),
            renew_days,
        }
    }

    /// Full renewal pass: verify the session, then process every service.
    /// Returns the number of discovered services (zero is a valid success).
    pub async fn run(&mut self) -> Result<usize, PortalError> {
        let services = self.verify_session().await?;
        for service in &services {
            if let Err(e) = self.process_service(service).await {
                warn!("[{}] ❌ service {} failed: {}", self.username, service.id, e);
            }
        }
        Ok(services.len())
    }

    /// Confirm the browser session is still authenticated and enumerate
    /// services from the dashboard.
    async fn verify_session(&mut self) -> Result<Vec<Service>, PortalError> {
        info!("[{}] 🔍 verifying session against the dashboard...", self.username);
        StepDelay::new(1_500, 3_000).wait().await;

        let res = self.client.get(DASHBOARD_PATH).send().await?;

        if is_login_redirect(&res.final_url) {
            return Err(PortalError::SessionInvalid(format!(
                "dashboard redirected to {}",
                res.final_url
            )));
        }

        let title = scrape::page_title(&res.body).unwrap_or_default();
        debug!("[{}] dashboard title: {:?}", self.username, title);
        if is_intercept_title(&title) {
            return Err(PortalError::SessionInvalid(format!(
                "interception page served: {:?}",
                title
            )));
        }

        if let Some(token) = scrape::csrf_token(&res.body) {
            self.client.set_csrf_token(token);
        }

        let services = scrape::service_links(&res.body);
        info!(
            "[{}] ✅ session valid, {} service(s) discovered",
            self.username,
            services.len()
        );
        Ok(services)
    }

    /// Renew one service and settle whatever invoice the renewal produced.
    async fn process_service(&mut self, service: &Service) -> Result<(), PortalError> {
        StepDelay::between_services().wait().await;
        info!("[{}] >>> processing service {}", self.username, service.id);

        let manage = self
            .client
            .get(&format!("/service/{}/manage", service.id))
            .send()
            .await?;

        // A missing token still gets submitted — the server's rejection moves
        // the flow on to the unpaid-invoice check, same as the happy path.
        let token = scrape::form_token(&manage.body).unwrap_or_else(|| {
            warn!("[{}] renewal form token missing on manage page", self.username);
            String::new()
        });

        if let Some(fresh) = scrape::csrf_token(&manage.body) {
            self.client.set_csrf_token(fresh);
        }

        info!("[{}] 📅 submitting renewal ({} days)...", self.username, self.renew_days);
        StepDelay::before_submit().wait().await;

        let body = encode_form(&[
            ("_token".to_string(), token),
            ("days".to_string(), self.renew_days.to_string()),
        ]);
        let res = self
            .client
            .post(&format!("/service/{}/renew", service.id), &body)
            .send()
            .await?;

        if res.final_url.contains("/invoice/") {
            info!("[{}] ⚡ renewal raised an invoice, paying it", self.username);
            self.pay_from_html(&res).await?;
        } else {
            info!("[{}] renewal did not redirect, checking invoice list...", self.username);
            self.settle_unpaid_invoices(&service.id).await?;
        }
        Ok(())
    }

    /// Walk the service's unpaid-invoice listing and pay each entry. An empty
    /// listing is success-with-nothing-to-pay.
    async fn settle_unpaid_invoices(&mut self, service_id: &str) -> Result<(), PortalError> {
        StepDelay::before_invoice_check().wait().await;

        let res = self
            .client
            .get(&format!("/service/{}/invoices?where=unpaid", service_id))
            .send()
            .await?;

        let invoices = scrape::invoice_links(&res.body);
        if invoices.is_empty() {
            info!("[{}] ✅ no unpaid invoices", self.username);
            return Ok(());
        }

        for url in invoices {
            if let Err(e) = self.pay_single_invoice(&url).await {
                warn!("[{}] ❌ invoice {} failed: {}", self.username, url, e);
            }
            StepDelay::between_invoices().wait().await;
        }
        Ok(())
    }

    async fn pay_single_invoice(&mut self, url: &str) -> Result<(), PortalError> {
        info!("[{}] 📄 opening invoice {}", self.username, url);
        let res = self.client.get(url).send().await?;
        self.pay_from_html(&res).await
    }

    /// Locate the payment form on an invoice page and resubmit it. A page
    /// without one is treated as already settled — logged, never an error.
    /// A non-200 payment response is logged as a warning and accepted:
    /// submission is at-least-once, not verified.
    async fn pay_from_html(&mut self, page: &PortalResponse) -> Result<(), PortalError> {
        let Some(form) = scrape::payment_form(&page.body) else {
            info!("[{}] ⚪ no payment form found (already settled)", self.username);
            return Ok(());
        };

        info!("[{}] 💳 submitting payment to {}...", self.username, form.action);
        let body = encode_form(&form.fields);
        let res = self.client.post(&form.action, &body).send().await?;

        if res.status == 200 {
            info!("[{}] ✅ payment success", self.username);
        } else {
            warn!("[{}] ⚠️ payment responded with status {}", self.username, res.status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_redirects_invalidate_the_session() {
        assert!(is_login_redirect("https://dash.hidencloud.com/auth/login"));
        assert!(is_login_redirect("https://dash.hidencloud.com/login?next=/dashboard"));
        assert!(!is_login_redirect("https://dash.hidencloud.com/dashboard"));
        assert!(!is_login_redirect("https://dash.hidencloud.com/invoice/55"));
    }

    #[test]
    fn interception_titles_are_recognized() {
        assert!(is_intercept_title("Just a moment..."));
        assert!(is_intercept_title("Attention Required! | Cloudflare"));
        assert!(!is_intercept_title("Dashboard - HidenCloud"));
        assert!(!is_intercept_title(""));
    }
}
