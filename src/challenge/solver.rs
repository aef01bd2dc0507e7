//! Clicks the Turnstile checkbox from outside the page.
//!
//! The injector publishes the checkbox center as a viewport fraction inside
//! the challenge frame. One solver pass reads that slot from every known
//! frame realm, maps the fraction through the hosting iframe's box into page
//! coordinates, and fires a raw `Input.dispatchMouseEvent` press/release pair.
//! Raw protocol input is the only kind that lands across the cross-origin
//! frame boundary — synthesized DOM events never leave the dispatching realm.

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::dom::{GetBoxModelParams, GetFrameOwnerParams};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use serde::Deserialize;
use tracing::{debug, info};

use crate::browser::session::FrameContext;
use crate::browser::BrowserSession;
use crate::challenge::injector::SIGNAL_SLOT;
use crate::pacing::input_gap_ms;

/// Checkbox center, relative to the challenge frame's viewport.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ChallengeSignal {
    #[serde(rename = "xRatio")]
    pub x_ratio: f64,
    #[serde(rename = "yRatio")]
    pub y_ratio: f64,
}

/// Axis-aligned box of the hosting iframe, in page CSS pixels.
#[derive(Debug, Clone, Copy)]
struct FrameBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl FrameBox {
    /// Map a viewport fraction inside the frame to page coordinates.
    fn project(&self, signal: &ChallengeSignal) -> (f64, f64) {
        (
            self.x + self.width * signal.x_ratio,
            self.y + self.height * signal.y_ratio,
        )
    }
}

/// One solver instance per browser session. Remembers which frame realms it
/// already clicked so a signal is acted on at most once per page instance;
/// a navigation clears the realm registry and with it that memory.
#[derive(Default)]
pub struct TurnstileSolver {
    clicked: Vec<ExecutionContextId>,
}

impl TurnstileSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single non-blocking pass: scan every known frame realm for a published
    /// signal and click the first one found. Returns whether a click was
    /// dispatched. Callers own the retry cadence.
    ///
    /// A realm that errors while being probed (detached frame, restricted
    /// context) is skipped, never fatal.
    pub async fn attempt(&mut self, session: &BrowserSession) -> bool {
        for ctx in session.frame_contexts() {
            if self.clicked.contains(&ctx.context_id) {
                continue;
            }
            match self.probe_and_click(session, &ctx).await {
                Ok(true) => {
                    self.clicked.push(ctx.context_id.clone());
                    return true;
                }
                Ok(false) => {}
                Err(e) => debug!("challenge probe skipped a frame: {}", e),
            }
        }
        false
    }

    async fn probe_and_click(
        &self,
        session: &BrowserSession,
        ctx: &FrameContext,
    ) -> Result<bool, chromiumoxide::error::CdpError> {
        let Some(signal) = self.read_signal(session, ctx).await? else {
            return Ok(false);
        };
        // The signal lives inside a frame; a realm without a frame id is the
        // main document and cannot host the widget.
        let Some(frame_id) = ctx.frame_id.clone() else {
            return Ok(false);
        };

        info!(
            "🎯 challenge signal found (x={:.3}, y={:.3})",
            signal.x_ratio, signal.y_ratio
        );

        let Some(frame_box) = self.frame_owner_box(session, frame_id).await? else {
            return Ok(false);
        };
        let (x, y) = frame_box.project(&signal);

        self.dispatch_click(session, x, y).await?;
        info!("🖱️ challenge click dispatched at ({:.0}, {:.0})", x, y);
        Ok(true)
    }

    /// Read the published slot from one frame realm. Missing slot → `None`.
    async fn read_signal(
        &self,
        session: &BrowserSession,
        ctx: &FrameContext,
    ) -> Result<Option<ChallengeSignal>, chromiumoxide::error::CdpError> {
        let params = EvaluateParams::builder()
            .expression(format!("window.{} || null", SIGNAL_SLOT))
            .return_by_value(true)
            .context_id(ctx.context_id.clone())
            .build()
            .expect("expression is set");

        let resp = session.page().execute(params).await?;
        let value = resp.result.result.value.clone();
        Ok(value.and_then(|v| serde_json::from_value::<ChallengeSignal>(v).ok()))
    }

    /// Bounding box of the iframe element hosting `frame_id`, in page
    /// coordinates, via `DOM.getFrameOwner` + `DOM.getBoxModel`.
    async fn frame_owner_box(
        &self,
        session: &BrowserSession,
        frame_id: FrameId,
    ) -> Result<Option<FrameBox>, chromiumoxide::error::CdpError> {
        let owner = session
            .page()
            .execute(GetFrameOwnerParams::new(frame_id))
            .await?;

        let model = session
            .page()
            .execute(
                GetBoxModelParams::builder()
                    .backend_node_id(owner.result.backend_node_id)
                    .build(),
            )
            .await?;

        // Content quad: 4 corner points (x1,y1 .. x4,y4).
        let quad = model.result.model.content.inner().clone();
        Ok(quad_to_box(&quad))
    }

    async fn dispatch_click(
        &self,
        session: &BrowserSession,
        x: f64,
        y: f64,
    ) -> Result<(), chromiumoxide::error::CdpError> {
        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .expect("press event is complete");
        session.page().execute(press).await?;

        // Human press-to-release cadence.
        tokio::time::sleep(Duration::from_millis(input_gap_ms(50, 150))).await;

        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .expect("release event is complete");
        session.page().execute(release).await?;
        Ok(())
    }
}

fn quad_to_box(quad: &[f64]) -> Option<FrameBox> {
    if quad.len() < 8 {
        return None;
    }
    let xs = [quad[0], quad[2], quad[4], quad[6]];
    let ys = [quad[1], quad[3], quad[5], quad[7]];
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let (width, height) = (max_x - min_x, max_y - min_y);
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(FrameBox {
        x: min_x,
        y: min_y,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_deserializes_from_page_slot_shape() {
        let signal: ChallengeSignal =
            serde_json::from_str(r#"{"xRatio": 0.25, "yRatio": 0.5}"#).unwrap();
        assert!((signal.x_ratio - 0.25).abs() < f64::EPSILON);
        assert!((signal.y_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_signal_values_do_not_deserialize() {
        assert!(serde_json::from_str::<ChallengeSignal>("null").is_err());
        assert!(serde_json::from_str::<ChallengeSignal>(r#"{"xRatio": 0.2}"#).is_err());
    }

    #[test]
    fn projection_interpolates_inside_the_frame() {
        let frame = FrameBox {
            x: 100.0,
            y: 200.0,
            width: 300.0,
            height: 60.0,
        };
        let signal = ChallengeSignal {
            x_ratio: 0.5,
            y_ratio: 0.5,
        };
        let (x, y) = frame.project(&signal);
        assert!((x - 250.0).abs() < 1e-9);
        assert!((y - 230.0).abs() < 1e-9);
    }

    #[test]
    fn quad_corners_collapse_to_origin_and_size() {
        // TL, TR, BR, BL
        let quad = [10.0, 20.0, 110.0, 20.0, 110.0, 70.0, 10.0, 70.0];
        let b = quad_to_box(&quad).unwrap();
        assert_eq!((b.x, b.y), (10.0, 20.0));
        assert_eq!((b.width, b.height), (100.0, 50.0));
    }

    #[test]
    fn degenerate_quads_are_rejected() {
        assert!(quad_to_box(&[0.0; 4]).is_none());
        let flat = [10.0, 20.0, 10.0, 20.0, 10.0, 20.0, 10.0, 20.0];
        assert!(quad_to_box(&flat).is_none());
    }
}
