//! Fixture-driven coverage of the scrape → pay pipeline, exercised through
//! the public crate surface. These mirror the portal's server-rendered pages;
//! everything that needs a live browser is out of scope here.

use hiden_renew::portal::http::{encode_form, resolve_url};
use hiden_renew::portal::renewer::{is_intercept_title, is_login_redirect};
use hiden_renew::portal::scrape;
use hiden_renew::{RunResult, RunStatus, RunSummary};

/// Dashboard listing two services, each linked twice (name + manage button).
const DASHBOARD_TWO_SERVICES: &str = r#"
<html>
<head>
    <title>Dashboard - HidenCloud</title>
    <meta name="csrf-token" content="sess-token-1">
</head>
<body>
    <nav><a href="/dashboard">Home</a><a href="/balance">Balance</a></nav>
    <table>
        <tr>
            <td><a href="/service/101/manage">minecraft-101</a></td>
            <td><a href="/service/101/manage"><button>Manage</button></a></td>
        </tr>
        <tr>
            <td><a href="/service/102/manage">vps-102</a></td>
            <td><a href="/service/102/manage"><button>Manage</button></a></td>
        </tr>
    </table>
</body>
</html>"#;

/// Invoice page the renewal POST redirects to (end-to-end scenario 1).
const INVOICE_55: &str = r#"
<html>
<head><title>Invoice #55 - HidenCloud</title></head>
<body>
    <h1>Invoice #55</h1>
    <form action="/balance/add" method="POST">
        <input type="hidden" name="_token" value="abc">
        <input type="number" name="amount" value="5">
        <button type="submit">Pay from balance (top up)</button>
    </form>
    <form action="/invoice/55/pay" method="POST">
        <input type="hidden" name="_token" value="abc">
        <input type="hidden" name="amount" value="10">
        <button type="submit">Pay Invoice</button>
    </form>
</body>
</html>"#;

#[test]
fn scenario_renewal_redirects_to_payable_invoice() {
    // Dashboard discovery: [101, 102], de-duplicated.
    let services = scrape::service_links(DASHBOARD_TWO_SERVICES);
    let ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["101", "102"]);

    // The CSRF token is present for the request shim to attach.
    assert_eq!(
        scrape::csrf_token(DASHBOARD_TWO_SERVICES).as_deref(),
        Some("sess-token-1")
    );

    // The pay form is the non-top-up one, and its fields produce exactly the
    // expected POST body.
    let form = scrape::payment_form(INVOICE_55).expect("payment form present");
    assert_eq!(form.action, "/invoice/55/pay");
    assert_eq!(encode_form(&form.fields), "_token=abc&amount=10");
    assert_eq!(
        resolve_url(&form.action),
        "https://dash.hidencloud.com/invoice/55/pay"
    );
}

#[test]
fn scenario_no_unpaid_invoices_means_nothing_to_post() {
    let listing = r#"
        <html><body>
            <h2>Invoices</h2>
            <p>No unpaid invoices for this service.</p>
            <a href="/service/103/manage">Back</a>
        </body></html>"#;
    assert!(scrape::invoice_links(listing).is_empty());
}

#[test]
fn unpaid_listing_is_deduplicated_and_skips_downloads() {
    let listing = r#"
        <body>
            <a href="/invoice/70">#70</a>
            <a href="/invoice/70">open</a>
            <a href="/invoice/70/download">pdf</a>
            <a href="/invoice/71">#71</a>
        </body>"#;
    let first = scrape::invoice_links(listing);
    assert_eq!(first, vec!["/invoice/70", "/invoice/71"]);
    // Idempotence: re-scraping the unchanged page yields the same set.
    assert_eq!(scrape::invoice_links(listing), first);
}

#[test]
fn settled_invoice_page_produces_no_form() {
    let settled = r#"
        <html><body>
            <h1>Invoice #55</h1>
            <p>Status: <strong>Paid</strong></p>
            <a href="/invoice/55/download">Download receipt</a>
        </body></html>"#;
    assert!(scrape::payment_form(settled).is_none());
}

#[test]
fn login_bounce_and_interception_are_session_invalid_inputs() {
    assert!(is_login_redirect(
        "https://dash.hidencloud.com/auth/login?redirect=%2Fdashboard"
    ));
    assert!(!is_login_redirect("https://dash.hidencloud.com/dashboard"));

    let challenge_page = "<html><head><title>Just a moment...</title></head></html>";
    let title = scrape::page_title(challenge_page).unwrap();
    assert!(is_intercept_title(&title));
}

#[test]
fn zero_service_account_counts_as_success() {
    let mut summary = RunSummary::default();
    summary.push(RunResult {
        username: "user1".into(),
        status: RunStatus::Success,
        services: 0,
    });
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(
        summary.console_lines(),
        vec!["User: user1 | Status: Success | Services: 0"]
    );
}

#[test]
fn any_failed_account_fails_the_batch() {
    let mut summary = RunSummary::default();
    summary.push(RunResult {
        username: "user1".into(),
        status: RunStatus::Success,
        services: 2,
    });
    summary.push(RunResult {
        username: "user2".into(),
        status: RunStatus::ApiInitFailed,
        services: 0,
    });
    assert_eq!(summary.exit_code(), 1);
    let md = summary.to_markdown();
    assert!(md.contains("Failed (API Init)"));
}
