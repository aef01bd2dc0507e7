use serde::{Deserialize, Serialize};

/// One portal account, as supplied by `USERS_JSON` / `users.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// A service discovered on the dashboard. `id` is unique within one account's
/// discovered set; duplicates from repeated dashboard links are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub manage_url: String,
}

/// Terminal outcome for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Credentials rejected or the dashboard was never reached.
    LoginFailed,
    /// Logged in, but the authenticated session could not be verified
    /// (login redirect or interception page on `/dashboard`).
    ApiInitFailed,
}

impl RunStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, RunStatus::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::LoginFailed => "Failed (Login)",
            RunStatus::ApiInitFailed => "Failed (API Init)",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Appended once per account; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub username: String,
    pub status: RunStatus,
    pub services: usize,
}

/// Batch summary handed to the console report and the notifier.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<RunResult>,
}

impl RunSummary {
    pub fn push(&mut self, result: RunResult) {
        self.results.push(result);
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }

    /// Process exit code: 0 only when every account succeeded.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// One console line per account.
    pub fn console_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| {
                format!(
                    "User: {} | Status: {} | Services: {}",
                    r.username, r.status, r.services
                )
            })
            .collect()
    }

    /// Markdown body for the Telegram notification.
    pub fn to_markdown(&self) -> String {
        let date = chrono::Utc::now().format("%Y-%m-%d");
        let mut text = format!("*HidenCloud renewal report ({})*\n\n", date);
        for r in &self.results {
            let mark = if r.status.is_failure() { "❌" } else { "✅" };
            text.push_str(&format!(
                "👤 `{}`\nStatus: {} {}\nServices: {}\n\n",
                r.username, mark, r.status, r.services
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(username: &str, status: RunStatus, services: usize) -> RunResult {
        RunResult {
            username: username.to_string(),
            status,
            services,
        }
    }

    #[test]
    fn empty_service_list_is_success() {
        // Discovering nothing is a valid outcome, not a failure.
        let mut summary = RunSummary::default();
        summary.push(result("alice", RunStatus::Success, 0));
        assert!(!summary.has_failures());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn any_failure_flips_exit_code() {
        let mut summary = RunSummary::default();
        summary.push(result("alice", RunStatus::Success, 2));
        summary.push(result("bob", RunStatus::LoginFailed, 0));
        assert!(summary.has_failures());
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn status_labels_match_report_format() {
        assert_eq!(RunStatus::Success.label(), "Success");
        assert_eq!(RunStatus::LoginFailed.label(), "Failed (Login)");
        assert_eq!(RunStatus::ApiInitFailed.label(), "Failed (API Init)");
    }

    #[test]
    fn console_lines_carry_all_fields() {
        let mut summary = RunSummary::default();
        summary.push(result("alice", RunStatus::ApiInitFailed, 0));
        let lines = summary.console_lines();
        assert_eq!(
            lines,
            vec!["User: alice | Status: Failed (API Init) | Services: 0"]
        );
    }

    #[test]
    fn markdown_marks_failures() {
        let mut summary = RunSummary::default();
        summary.push(result("alice", RunStatus::Success, 1));
        summary.push(result("bob", RunStatus::LoginFailed, 0));
        let md = summary.to_markdown();
        assert!(md.contains("`alice`"));
        assert!(md.contains("✅"));
        assert!(md.contains("❌"));
    }
}
