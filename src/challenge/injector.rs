//! Document-start script that turns the Turnstile widget inside out.
//!
//! The widget renders its checkbox inside a closed shadow root in a
//! cross-origin frame, out of reach of selectors and accessibility queries.
//! Instead of looking for it from the outside, this script runs *inside*
//! every nested frame before any page code and wraps `attachShadow` itself:
//! the moment the widget builds its shadow tree, the wrapper finds the
//! checkbox, measures it, and publishes its viewport-relative center to a
//! page global the solver can poll from outside.
//!
//! Presence of the global is the sole readiness signal — no timing games.

use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;

/// Name of the page-global slot the signal is published to. Each navigation
/// gets a fresh page global, so stale signals cannot survive a reload.
pub const SIGNAL_SLOT: &str = "__turnstile_probe";

/// Runs at document start in every frame; bails immediately in the top
/// document. Also pins `MouseEvent.screenX/screenY` to one random pair per
/// page load — the widget reads them repeatedly and expects self-consistent,
/// plausible screen coordinates.
pub const SIDE_CHANNEL_SCRIPT: &str = r#"
(function () {
    if (window.self === window.top) return;

    try {
        var randInt = function (min, max) {
            return Math.floor(Math.random() * (max - min + 1)) + min;
        };
        var fixedX = randInt(800, 1200);
        var fixedY = randInt(400, 600);
        Object.defineProperty(MouseEvent.prototype, 'screenX', { value: fixedX });
        Object.defineProperty(MouseEvent.prototype, 'screenY', { value: fixedY });
    } catch (e) { }

    try {
        var nativeAttachShadow = Element.prototype.attachShadow;
        Element.prototype.attachShadow = function (init) {
            var root = nativeAttachShadow.call(this, init);
            if (root) {
                var publish = function () {
                    var box = root.querySelector('input[type="checkbox"]');
                    if (!box) return false;
                    var rect = box.getBoundingClientRect();
                    if (rect.width > 0 && rect.height > 0 &&
                        window.innerWidth > 0 && window.innerHeight > 0) {
                        window.__turnstile_probe = {
                            xRatio: (rect.left + rect.width / 2) / window.innerWidth,
                            yRatio: (rect.top + rect.height / 2) / window.innerHeight
                        };
                        return true;
                    }
                    return false;
                };
                if (!publish()) {
                    var observer = new MutationObserver(function () {
                        if (publish()) observer.disconnect();
                    });
                    observer.observe(root, { childList: true, subtree: true });
                }
            }
            return root;
        };
    } catch (e) { }
})();
"#;

/// Register the side-channel script to run before any document script on
/// every navigation of `page`, in every frame.
pub async fn install(page: &Page) -> Result<(), chromiumoxide::error::CdpError> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
        SIDE_CHANNEL_SCRIPT,
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_skips_top_level_document() {
        assert!(SIDE_CHANNEL_SCRIPT.contains("window.self === window.top"));
    }

    #[test]
    fn script_publishes_to_the_agreed_slot() {
        // The solver polls `window.__turnstile_probe`; the script must write
        // exactly that name.
        assert!(SIDE_CHANNEL_SCRIPT.contains(&format!("window.{}", SIGNAL_SLOT)));
    }

    #[test]
    fn script_targets_shadow_checkboxes() {
        assert!(SIDE_CHANNEL_SCRIPT.contains("attachShadow"));
        assert!(SIDE_CHANNEL_SCRIPT.contains(r#"input[type="checkbox"]"#));
    }
}
