//! Wasm client for the competitive-programming stats dashboard: canvas
//! rating charts, the live stats channel with reconnect, and the DOM panels
//! around them. Pure logic (bounds math, the reconnect state machine, the
//! payload codec) lives in `stats-core` and `live-feed`; this crate drives
//! the browser side.

mod connection;
mod controller;
mod surface;
mod table;

pub use connection::{ConnectionManager, FeedEvent};
pub use controller::{DashboardConfig, DashboardController, Mode};
pub use surface::{ChartSurface, Dataset, InspectInfo, RenderOutcome};

use wasm_bindgen::prelude::*;

/// Page-facing handle. One per page; constructing it resolves the required
/// DOM elements, opens the live channel and primes the status cache.
#[wasm_bindgen]
pub struct DashboardHandle {
    controller: DashboardController,
}

#[wasm_bindgen]
impl DashboardHandle {
    /// `mode` is one of "solo", "performance", "compare". `ws_base` and
    /// `http_base` are origin prefixes like "wss://host" and "https://host".
    #[wasm_bindgen(constructor)]
    pub fn new(
        mode: &str,
        username: &str,
        ws_base: &str,
        http_base: &str,
        compress: bool,
    ) -> Result<DashboardHandle, JsValue> {
        console_error_panic_hook::set_once();
        let mode = Mode::from_str(mode)
            .ok_or_else(|| JsValue::from_str(&format!("unknown mode: {mode}")))?;
        let controller = DashboardController::init(DashboardConfig {
            mode,
            username: username.to_string(),
            ws_base: ws_base.to_string(),
            http_base: http_base.to_string(),
            compress,
        })?;
        Ok(DashboardHandle { controller })
    }

    /// Start a comparison against another username.
    pub fn compare(&self, other: &str) {
        self.controller.compare(other);
    }

    /// Typing-time feedback: validates the name and writes the (cached)
    /// lookup result into the status line.
    #[wasm_bindgen(js_name = checkUser)]
    pub fn check_user(&self, name: &str) {
        self.controller.check_user(name);
    }

    /// Force a server-side recompute of the current subject(s).
    pub fn refresh(&self) {
        self.controller.refresh();
    }

    /// Clear the comparison and restore the fitted chart view.
    pub fn reset(&self) {
        self.controller.reset();
    }

    /// Restore the fitted chart view only.
    #[wasm_bindgen(js_name = resetView)]
    pub fn reset_view(&self) {
        self.controller.reset_view();
    }

    /// Recolor the chart for a theme change without rebuilding it.
    #[wasm_bindgen(js_name = applyTheme)]
    pub fn apply_theme(&self, dark: bool) {
        self.controller.apply_theme(dark);
    }

    /// Release the socket, timers and canvas listeners. Idempotent.
    pub fn cleanup(&self) {
        self.controller.cleanup();
    }
}
