//! CDP session on top of a launched Chrome.
//!
//! Owns the `chromiumoxide` connection, the working page, and the registry of
//! frame execution contexts the challenge solver polls. Every page operation
//! is wrapped in an explicit timeout — a wedged renderer must cost one bounded
//! wait, not the whole batch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, FrameId};
use chromiumoxide::cdp::js_protocol::runtime::{
    EnableParams, EvaluateParams, EventExecutionContextCreated, EventExecutionContextsCleared,
    ExecutionContextId,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::launcher::LaunchedChrome;
use super::BrowserError;
use crate::challenge::injector;
use crate::pacing::input_gap_ms;

/// Default ceiling for any single page interaction.
const OP_TIMEOUT: Duration = Duration::from_secs(60);

/// One JavaScript realm inside the page. The main document and every iframe
/// (same- or cross-origin, with site isolation disabled) each get one default
/// context, announced over `Runtime.executionContextCreated`.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub context_id: ExecutionContextId,
    pub frame_id: Option<FrameId>,
}

pub struct BrowserSession {
    launched: LaunchedChrome,
    browser: Browser,
    page: Page,
    contexts: Arc<Mutex<Vec<FrameContext>>>,
    handler_task: tokio::task::JoinHandle<()>,
    tracker_task: tokio::task::JoinHandle<()>,
}

/// Everything `connect` assembles before it can own the launched process.
struct Attached {
    browser: Browser,
    page: Page,
    contexts: Arc<Mutex<Vec<FrameContext>>>,
    handler_task: tokio::task::JoinHandle<()>,
    tracker_task: tokio::task::JoinHandle<()>,
}

impl BrowserSession {
    /// Attach to a launched Chrome, open the working page, install the
    /// challenge injector as a document-start script, and start tracking
    /// frame execution contexts. A failed attach kills the process it was
    /// given — the caller never has to clean up after this function.
    pub async fn connect(mut launched: LaunchedChrome) -> Result<Self, BrowserError> {
        match Self::attach(&launched).await {
            Ok(attached) => {
                info!("🔗 CDP session ready on port {}", launched.port);
                Ok(Self {
                    launched,
                    browser: attached.browser,
                    page: attached.page,
                    contexts: attached.contexts,
                    handler_task: attached.handler_task,
                    tracker_task: attached.tracker_task,
                })
            }
            Err(e) => {
                launched.terminate_tree().await;
                Err(e)
            }
        }
    }

    async fn attach(launched: &LaunchedChrome) -> Result<Attached, BrowserError> {
        let (browser, mut handler) = Browser::connect(launched.ws_url.clone())
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("CDP connect: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
            warn!("CDP handler ended — Chrome disconnected");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("new page: {}", e)))?;

        injector::install(&page)
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("injector install: {}", e)))?;

        // Subscribe before Runtime.enable so the contexts that already exist
        // get announced into the registry too.
        let contexts: Arc<Mutex<Vec<FrameContext>>> = Arc::new(Mutex::new(Vec::new()));
        let mut created = page
            .event_listener::<EventExecutionContextCreated>()
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("context listener: {}", e)))?;
        let mut cleared = page
            .event_listener::<EventExecutionContextsCleared>()
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("context listener: {}", e)))?;

        let registry = contexts.clone();
        let tracker_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    ev = created.next() => match ev {
                        Some(ev) => {
                            let frame_id = ev
                                .context
                                .aux_data
                                .as_ref()
                                .and_then(|d| d.get("frameId"))
                                .and_then(|v| serde_json::from_value::<FrameId>(v.clone()).ok());
                            if let Ok(mut reg) = registry.lock() {
                                reg.push(FrameContext {
                                    context_id: ev.context.id.clone(),
                                    frame_id,
                                });
                            }
                        }
                        None => break,
                    },
                    ev = cleared.next() => match ev {
                        // Navigation: every old realm is gone, and with it any
                        // stale challenge signal.
                        Some(_) => {
                            if let Ok(mut reg) = registry.lock() {
                                reg.clear();
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        page.execute(EnableParams::default())
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Runtime.enable: {}", e)))?;

        Ok(Attached {
            browser,
            page,
            contexts,
            handler_task,
            tracker_task,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Snapshot of the currently known frame contexts.
    pub fn frame_contexts(&self) -> Vec<FrameContext> {
        self.contexts
            .lock()
            .map(|reg| reg.clone())
            .unwrap_or_default()
    }

    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!("navigating to {}", url);
        tokio::time::timeout(OP_TIMEOUT, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("goto {}", url)))?
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;
        // Best-effort settle; a slow subresource must not fail the navigation.
        let _ = tokio::time::timeout(OP_TIMEOUT, self.page.wait_for_navigation()).await;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, BrowserError> {
        tokio::time::timeout(Duration::from_secs(10), self.page.url())
            .await
            .map_err(|_| BrowserError::Timeout("page.url".into()))?
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("page has no URL".into()))
    }

    /// Evaluate an expression in the main frame, awaiting promises, and return
    /// its JSON value. Script exceptions surface as `BrowserError::Javascript`.
    pub async fn evaluate(&self, expression: String) -> Result<serde_json::Value, BrowserError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Javascript)?;

        let resp = tokio::time::timeout(OP_TIMEOUT, self.page.execute(params))
            .await
            .map_err(|_| BrowserError::Timeout("evaluate".into()))?
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;

        if let Some(exception) = &resp.result.exception_details {
            return Err(BrowserError::Javascript(exception.text.clone()));
        }
        Ok(resp.result.result.value.clone().unwrap_or(serde_json::Value::Null))
    }

    /// Type into the focused element through raw CDP key events, one
    /// randomized gap per keystroke. Focus is the caller's responsibility.
    pub async fn type_text(&self, text: &str) -> Result<(), BrowserError> {
        for c in text.chars() {
            let key_down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .text(c.to_string())
                .build()
                .map_err(BrowserError::Javascript)?;
            self.page
                .execute(key_down)
                .await
                .map_err(|e| BrowserError::ConnectionLost(format!("keyDown: {}", e)))?;

            let key_up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .build()
                .map_err(BrowserError::Javascript)?;
            self.page
                .execute(key_up)
                .await
                .map_err(|e| BrowserError::ConnectionLost(format!("keyUp: {}", e)))?;

            tokio::time::sleep(Duration::from_millis(input_gap_ms(50, 150))).await;
        }
        Ok(())
    }

    /// Best-effort PNG capture for failure diagnostics. Never fails the run.
    pub async fn save_screenshot(&self, path: &str) {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        match tokio::time::timeout(Duration::from_secs(15), self.page.save_screenshot(params, path))
            .await
        {
            Ok(Ok(_)) => info!("📸 screenshot saved: {}", path),
            Ok(Err(e)) => warn!("screenshot {} failed: {}", path, e),
            Err(_) => warn!("screenshot {} timed out", path),
        }
    }

    /// Tear everything down: CDP connection, browser process tree, profile
    /// dir. Infallible by contract — cleanup must never abort the batch, so
    /// each step logs and moves on.
    pub async fn close(mut self) {
        self.tracker_task.abort();

        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), self.page.clone().close()).await
        {
            debug!("page close: {}", e);
        }
        match tokio::time::timeout(Duration::from_secs(5), self.browser.close()).await {
            Ok(Err(e)) => debug!("browser close: {}", e),
            Err(_) => debug!("browser close timed out"),
            _ => {}
        }
        self.handler_task.abort();

        self.launched.terminate_tree().await;
        info!("🧹 browser session closed");
    }
}
