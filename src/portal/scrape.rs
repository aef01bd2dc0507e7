//! HTML extraction layer for the portal's server-rendered pages.
//!
//! Every extraction returns `Option`/empty rather than failing: the pages are
//! scraped, not versioned, so a missing element is a state the caller decides
//! about (benign "nothing to pay" vs. invalid session), never a panic.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::core::types::Service;

/// `/service/{id}/manage` — the dashboard's per-service entry link.
fn manage_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/service/(\d+)/manage").expect("valid manage-link pattern"))
}

/// `<title>` text, trimmed. Used to spot interception pages.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Session CSRF token from `<meta name="csrf-token">`.
pub fn csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"meta[name="csrf-token"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Hidden `_token` field of a server-rendered form.
pub fn form_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"input[name="_token"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("value"))
        .map(|s| s.to_string())
}

/// Services linked from the dashboard, de-duplicated by id in first-seen
/// order. A dashboard typically links each service several times (name, row,
/// manage button); they collapse to one entry.
pub fn service_links(html: &str) -> Vec<Service> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(r#"a[href*="/service/"]"#) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut services = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(caps) = manage_link_re().captures(href) {
            let id = caps[1].to_string();
            if seen.insert(id.clone()) {
                services.push(Service {
                    id,
                    manage_url: href.to_string(),
                });
            }
        }
    }
    services
}

/// Invoice page links from an unpaid-invoice listing, de-duplicated in
/// first-seen order. "download" links point at PDFs, not payable pages.
pub fn invoice_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(r#"a[href*="/invoice/"]"#) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.contains("download") {
            continue;
        }
        if seen.insert(href.to_string()) {
            links.push(href.to_string());
        }
    }
    links
}

/// A payable form found on an invoice page: where to POST and every input
/// field it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentForm {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

/// Find the payment form: the first form whose submit button says "pay"
/// (case-insensitive) and whose action is not the balance top-up endpoint.
/// `None` means there is nothing to pay on this page — the invoice is already
/// settled or was never payable.
pub fn payment_form(html: &str) -> Option<PaymentForm> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").ok()?;
    let button_sel = Selector::parse("button").ok()?;
    let input_sel = Selector::parse("input").ok()?;

    for form in document.select(&form_sel) {
        let button_text = form
            .select(&button_sel)
            .map(|b| b.text().collect::<String>())
            .collect::<String>()
            .trim()
            .to_lowercase();
        if !button_text.contains("pay") {
            continue;
        }

        let Some(action) = form.value().attr("action") else {
            continue;
        };
        if action.contains("balance/add") {
            continue;
        }

        let fields = form
            .select(&input_sel)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or("");
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        return Some(PaymentForm {
            action: action.to_string(),
            fields,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DASHBOARD: &str = r#"
        <html><head><title>Dashboard - HidenCloud</title>
        <meta name="csrf-token" content="tok-123"></head>
        <body>
            <a href="/service/101/manage">web-101</a>
            <a href="/service/101/manage">Manage</a>
            <a href="/service/102/manage">web-102</a>
            <a href="/service/102/invoices">Invoices</a>
            <a href="/profile">Profile</a>
        </body></html>"#;

    #[test]
    fn title_and_csrf_come_from_head_metadata() {
        assert_eq!(
            page_title(DASHBOARD).as_deref(),
            Some("Dashboard - HidenCloud")
        );
        assert_eq!(csrf_token(DASHBOARD).as_deref(), Some("tok-123"));
    }

    #[test]
    fn services_are_deduplicated_by_id() {
        let services = service_links(DASHBOARD);
        assert_eq!(
            services,
            vec![
                Service {
                    id: "101".into(),
                    manage_url: "/service/101/manage".into()
                },
                Service {
                    id: "102".into(),
                    manage_url: "/service/102/manage".into()
                },
            ]
        );
    }

    #[test]
    fn non_manage_service_links_are_ignored() {
        let html = r#"<a href="/service/7/invoices">x</a><a href="/service/abc/manage">y</a>"#;
        assert!(service_links(html).is_empty());
    }

    #[test]
    fn missing_metadata_is_none_not_an_error() {
        let html = "<html><head></head><body></body></html>";
        assert!(page_title(html).is_none());
        assert!(csrf_token(html).is_none());
        assert!(form_token(html).is_none());
    }

    #[test]
    fn form_token_reads_hidden_input() {
        let html = r#"<form><input type="hidden" name="_token" value="f-9"></form>"#;
        assert_eq!(form_token(html).as_deref(), Some("f-9"));
    }

    const UNPAID: &str = r#"
        <body>
            <a href="/invoice/55">Invoice #55</a>
            <a href="/invoice/55">View</a>
            <a href="/invoice/55/download">Download PDF</a>
            <a href="/invoice/60">Invoice #60</a>
        </body>"#;

    #[test]
    fn invoice_links_exclude_downloads_and_duplicates() {
        assert_eq!(invoice_links(UNPAID), vec!["/invoice/55", "/invoice/60"]);
    }

    #[test]
    fn invoice_listing_scrape_is_idempotent() {
        // Same page scraped twice yields the same de-duplicated set.
        assert_eq!(invoice_links(UNPAID), invoice_links(UNPAID));
    }

    #[test]
    fn empty_listing_yields_no_invoices() {
        assert!(invoice_links("<body><p>All caught up!</p></body>").is_empty());
    }

    const INVOICE_PAGE: &str = r#"
        <body>
            <form action="/balance/add" method="post">
                <input type="hidden" name="_token" value="zzz">
                <button>Pay with balance top-up</button>
            </form>
            <form action="/invoice/55/pay" method="post">
                <input type="hidden" name="_token" value="abc">
                <input type="hidden" name="amount" value="10">
                <button type="submit">Pay Now</button>
            </form>
        </body>"#;

    #[test]
    fn payment_form_skips_balance_topup() {
        let form = payment_form(INVOICE_PAGE).unwrap();
        assert_eq!(form.action, "/invoice/55/pay");
        assert_eq!(
            form.fields,
            vec![
                ("_token".to_string(), "abc".to_string()),
                ("amount".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn pay_match_is_case_insensitive() {
        let html = r#"<form action="/invoice/9/pay"><input name="_token" value="t">
                      <button>PAY</button></form>"#;
        assert!(payment_form(html).is_some());
    }

    #[test]
    fn settled_invoice_has_no_payment_form() {
        let html = r#"<body><form action="/invoice/55/pay">
                      <button>Download receipt</button></form></body>"#;
        assert!(payment_form(html).is_none());
    }

    #[test]
    fn form_without_action_is_not_payable() {
        let html = r#"<form><button>Pay</button><input name="a" value="1"></form>"#;
        assert!(payment_form(html).is_none());
    }

    #[test]
    fn inputs_without_names_are_dropped() {
        let html = r#"<form action="/invoice/1/pay"><button>pay</button>
                      <input value="ghost"><input name="kept" value="v"></form>"#;
        let form = payment_form(html).unwrap();
        assert_eq!(form.fields, vec![("kept".to_string(), "v".to_string())]);
    }
}
