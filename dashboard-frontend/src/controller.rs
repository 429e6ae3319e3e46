use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use gloo_net::http::Request;
use gloo_timers::future::TimeoutFuture;
use live_feed::PayloadCodec;
use stats_core::{
    history_rows, platform_series, sanitize_username, validate_pair, validate_username,
    CompareRequest, Platform, StatsMessage, StatusFlags, UserSnapshot,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{console, Document, Element, HtmlCanvasElement, HtmlElement};

use crate::connection::{ConnectionManager, FeedEvent};
use crate::surface::{body_is_dark, dataset_color, ChartSurface, Dataset, InspectInfo};
use crate::table::{
    clear_notice, render_history_table, render_status, render_summary, reset_summary,
    set_status_text, show_notice, NoticeKind,
};

/// Status lookups are reused for this long before hitting the endpoint again.
const STATUS_CACHE_MS: u32 = 120_000;
/// The performance page shows only the most recent contests.
const PERFORMANCE_HISTORY_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Solo,
    Performance,
    Compare,
}

impl Mode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "solo" | "stats" => Some(Mode::Solo),
            "performance" => Some(Mode::Performance),
            "compare" => Some(Mode::Compare),
            _ => None,
        }
    }
}

pub struct DashboardConfig {
    pub mode: Mode,
    pub username: String,
    pub ws_base: String,
    pub http_base: String,
    pub compress: bool,
}

/// DOM anchors the dashboard writes to. Resolved once at startup so a missing
/// element fails loudly instead of silently skipping updates later.
struct PageElements {
    document: Document,
    canvas: HtmlCanvasElement,
    no_data: HtmlElement,
    fit_control: HtmlElement,
    reset_control: HtmlElement,
    history_body: Element,
    point_details: Option<Element>,
}

impl PageElements {
    fn resolve(document: Document) -> Result<Self, JsValue> {
        let canvas = require(&document, "ratingChart")?.dyn_into::<HtmlCanvasElement>()?;
        let no_data = require(&document, "no-data-message")?.dyn_into::<HtmlElement>()?;
        let fit_control = require(&document, "zoom-to-fit")?.dyn_into::<HtmlElement>()?;
        let reset_control = require(&document, "reset-zoom")?.dyn_into::<HtmlElement>()?;
        let history_body = require(&document, "history-body")?;
        let point_details = document.get_element_by_id("point-details");
        Ok(Self {
            document,
            canvas,
            no_data,
            fit_control,
            reset_control,
            history_body,
            point_details,
        })
    }
}

fn require(document: &Document, id: &str) -> Result<Element, JsValue> {
    document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("required element #{id} not found")))
}

struct Ctl {
    config: DashboardConfig,
    page: PageElements,
    surface: ChartSurface,
    connection: Option<ConnectionManager>,
    /// Comparison target currently shown, if any.
    compare_user: Option<String>,
    last_message: Option<StatsMessage>,
    status_cache: HashMap<String, (StatusFlags, u64)>,
    cache_stamp: u64,
}

/// Ties the chart surface, the live connection and the DOM panels together
/// behind the operations the page exposes.
pub struct DashboardController {
    inner: Rc<RefCell<Ctl>>,
}

impl DashboardController {
    pub fn init(config: DashboardConfig) -> Result<Self, JsValue> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let page = PageElements::resolve(document)?;
        let surface = ChartSurface::new(
            page.canvas.clone(),
            page.no_data.clone(),
            page.fit_control.clone(),
            page.reset_control.clone(),
        );
        validate_username(&config.username)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;

        let inner = Rc::new(RefCell::new(Ctl {
            config,
            page,
            surface,
            connection: None,
            compare_user: None,
            last_message: None,
            status_cache: HashMap::new(),
            cache_stamp: 0,
        }));

        // The connection event sink holds a weak handle; a dropped controller
        // must not be kept alive by its own feed callbacks.
        let weak: Weak<RefCell<Ctl>> = Rc::downgrade(&inner);
        let (compress, ws_url, username) = {
            let ctl = inner.borrow();
            (
                ctl.config.compress,
                format!("{}/ws/stats/{}/", ctl.config.ws_base, ctl.config.username),
                ctl.config.username.clone(),
            )
        };
        let connection = ConnectionManager::new(
            PayloadCodec::new(compress),
            Rc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    handle_event(&inner, event);
                }
            }),
        );
        connection.connect(ws_url);
        inner.borrow_mut().connection = Some(connection);

        let controller = Self { inner };
        controller.prime_status(username);
        Ok(controller)
    }

    /// Validate and start a comparison against another user. Live-first; the
    /// HTTP fallback runs when the channel is not open.
    pub fn compare(&self, other: &str) {
        let other = sanitize_username(other);
        let (user1, mode) = {
            let ctl = self.inner.borrow();
            (ctl.config.username.clone(), ctl.config.mode)
        };
        if mode != Mode::Compare {
            console::warn_1(&"compare requested outside compare mode".into());
            return;
        }
        if let Err(reason) = validate_pair(&user1, &other) {
            self.notice(&reason.to_string(), NoticeKind::Error);
            return;
        }

        let inner = self.inner.clone();
        spawn_local(async move {
            match lookup_status(&inner, &other).await {
                Ok(flags) if !flags.is_comparable() => {
                    let reason = if !flags.exists {
                        format!("User '{other}' was not found")
                    } else {
                        format!("User '{other}' has no valid rating history")
                    };
                    with_document(&inner, |doc| show_notice(doc, &reason, NoticeKind::Error));
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    with_document(&inner, |doc| show_notice(doc, &err, NoticeKind::Error));
                    return;
                }
            }

            inner.borrow_mut().compare_user = Some(other.clone());
            let request = CompareRequest {
                user1: user1.clone(),
                compare_to: Some(other.clone()),
                force_refresh: None,
            };
            let sent = {
                let ctl = inner.borrow();
                ctl.connection.as_ref().is_some_and(|c| c.send(request))
            };
            if !sent {
                http_compare_fallback(&inner, &user1, &other).await;
            }
        });
    }

    /// Typing-time username feedback: validate locally, then report the
    /// cached status lookup in the status line. Meant to be wired to a
    /// debounced input listener; the cache absorbs repeat lookups.
    pub fn check_user(&self, name: &str) {
        let name = sanitize_username(name);
        if let Err(reason) = validate_username(&name) {
            with_document(&self.inner, |doc| set_status_text(doc, &reason.to_string()));
            return;
        }
        with_document(&self.inner, |doc| set_status_text(doc, "Checking..."));
        let inner = self.inner.clone();
        spawn_local(async move {
            let text = match lookup_status(&inner, &name).await {
                Ok(flags) => flags.describe().to_string(),
                Err(_) => "Error validating username".to_string(),
            };
            with_document(&inner, |doc| set_status_text(doc, &text));
        });
    }

    /// Ask the server to recompute the current subject(s).
    pub fn refresh(&self) {
        let ctl = self.inner.borrow();
        let request = CompareRequest {
            user1: ctl.config.username.clone(),
            compare_to: ctl.compare_user.clone(),
            force_refresh: Some(true),
        };
        if let Some(connection) = &ctl.connection {
            // Queued as the pending action when the channel is down.
            connection.send(request);
        }
    }

    /// Drop the comparison and return the chart to its fitted view.
    pub fn reset(&self) {
        let mut ctl = self.inner.borrow_mut();
        ctl.compare_user = None;
        reset_summary(&ctl.page.document, "user2-");
        clear_notice(&ctl.page.document);
        if let Some(mut message) = ctl.last_message.clone() {
            message.compare_to = None;
            drop(ctl);
            apply_message(&self.inner, message);
            self.inner.borrow().surface.reset_view();
        } else {
            ctl.surface.reset_view();
        }
    }

    pub fn reset_view(&self) {
        self.inner.borrow().surface.reset_view();
    }

    pub fn apply_theme(&self, dark: bool) {
        self.inner.borrow().surface.apply_theme(dark);
    }

    /// Tear down the page's live resources. Safe to call more than once.
    pub fn cleanup(&self) {
        let mut ctl = self.inner.borrow_mut();
        if let Some(connection) = ctl.connection.take() {
            connection.close();
        }
        ctl.surface.destroy();
        clear_notice(&ctl.page.document);
    }

    fn notice(&self, text: &str, kind: NoticeKind) {
        let ctl = self.inner.borrow();
        show_notice(&ctl.page.document, text, kind);
    }

    /// Warm the status cache for the page's own user at startup.
    fn prime_status(&self, username: String) {
        let inner = self.inner.clone();
        spawn_local(async move {
            if let Err(err) = lookup_status(&inner, &username).await {
                console::warn_1(&format!("status check failed: {err}").into());
            }
        });
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn with_document<R>(inner: &Rc<RefCell<Ctl>>, f: impl FnOnce(&Document) -> R) -> R {
    let ctl = inner.borrow();
    f(&ctl.page.document)
}

fn handle_event(inner: &Rc<RefCell<Ctl>>, event: FeedEvent) {
    match event {
        FeedEvent::Opened => {
            with_document(inner, |doc| {
                show_notice(doc, "Connected to real-time updates", NoticeKind::Info)
            });
        }
        FeedEvent::Message(message) => apply_message(inner, message),
        FeedEvent::SoftError(text) => {
            // Throttled, not broken: keep whatever is already rendered.
            with_document(inner, |doc| show_notice(doc, &text, NoticeKind::Warning));
        }
        FeedEvent::HardError(text) => {
            with_document(inner, |doc| show_notice(doc, &text, NoticeKind::Error));
        }
        FeedEvent::DecodeFailure(detail) => {
            console::warn_1(&format!("dropped malformed frame: {detail}").into());
        }
        FeedEvent::EncodeFailure(detail) => {
            console::warn_1(&format!("could not encode request: {detail}").into());
        }
        FeedEvent::SendFailed(request) => {
            // The socket write failed even though the channel looked open.
            // Compare intents get the HTTP fallback right away; anything else
            // stays parked for the next open.
            match request.compare_to.clone() {
                Some(user2) => {
                    let inner = inner.clone();
                    spawn_local(async move {
                        http_compare_fallback(&inner, &request.user1, &user2).await;
                    });
                }
                None => {
                    with_document(inner, |doc| {
                        show_notice(
                            doc,
                            "Could not reach the server, will retry when reconnected",
                            NoticeKind::Warning,
                        )
                    });
                }
            }
        }
        FeedEvent::Reconnecting { attempt, delay_ms } => {
            with_document(inner, |doc| {
                show_notice(
                    doc,
                    &format!("Connection lost, retrying in {}s (attempt {attempt})", delay_ms / 1000),
                    NoticeKind::Warning,
                )
            });
        }
        FeedEvent::ConnectionLost => {
            with_document(inner, |doc| {
                show_notice(
                    doc,
                    "Live connection lost. Please refresh the page.",
                    NoticeKind::Error,
                )
            });
        }
    }
}

/// The single render path: every snapshot, live or fetched, lands here.
fn apply_message(inner: &Rc<RefCell<Ctl>>, message: StatsMessage) {
    let Some(user1) = message.user1.clone() else {
        return;
    };
    let compare = message.compare_to.clone();

    let (mode, dark) = {
        let ctl = inner.borrow();
        (ctl.config.mode, body_is_dark())
    };
    // The compare page prefixes its summary element ids per user.
    let prefix = if mode == Mode::Compare { "user1-" } else { "" };

    {
        let ctl = inner.borrow();
        render_summary(&ctl.page.document, prefix, &user1);
        render_status(&ctl.page.document, prefix, &user1);
        if let Some(snapshot) = &compare {
            render_summary(&ctl.page.document, "user2-", snapshot);
            render_status(&ctl.page.document, "user2-", snapshot);
        }

        // Server-flagged empty histories warrant a warning, not silence.
        for snapshot in [Some(&user1), compare.as_ref()].into_iter().flatten() {
            if let Some(text) = snapshot.empty_history_notice() {
                show_notice(&ctl.page.document, &text, NoticeKind::Warning);
            }
        }

        let mut rows = history_rows(&user1, compare.as_ref());
        if mode == Mode::Performance {
            rows.truncate(PERFORMANCE_HISTORY_ROWS);
        }
        render_history_table(&ctl.page.history_body, &rows, compare.is_some());
    }

    let datasets = build_datasets(&user1, compare.as_ref(), dark);
    let details = inner.borrow().page.point_details.clone();
    let inspect_sink: Rc<dyn Fn(Option<InspectInfo>)> = Rc::new(move |info| {
        let Some(details) = &details else { return };
        match info {
            Some(info) => {
                let rank = info
                    .rank
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                details.set_text_content(Some(&format!(
                    "{}: {} in {} (rank {rank})",
                    info.label, info.value, info.contest
                )));
            }
            None => details.set_text_content(None),
        }
    });

    // Live updates into an existing chart keep the user's pan/zoom; only the
    // first snapshot (or a recovery from the no-data state) builds a binding.
    {
        let mut ctl = inner.borrow_mut();
        if ctl.surface.has_binding() {
            ctl.surface.update(datasets, false);
        } else if let Err(err) = ctl.surface.render(datasets, dark, inspect_sink) {
            console::error_1(&err);
        }
    }
    inner.borrow_mut().last_message = Some(message);
}

fn build_datasets(
    user1: &UserSnapshot,
    compare: Option<&UserSnapshot>,
    dark: bool,
) -> Vec<Dataset> {
    let mut datasets = Vec::new();
    let mut push_user = |snapshot: &UserSnapshot, is_compare: bool| {
        for platform in Platform::ALL {
            let points = platform_series(&snapshot.rating_history, platform);
            if points.is_empty() {
                continue;
            }
            let label = if compare.is_some() {
                format!("{} {}", snapshot.username, platform.name())
            } else {
                platform.name().to_string()
            };
            datasets.push(Dataset {
                label,
                color: dataset_color(platform, dark, is_compare),
                points,
            });
        }
    };
    push_user(user1, false);
    if let Some(snapshot) = compare {
        push_user(snapshot, true);
    }
    datasets
}

/// Cached status lookup with per-key expiry. A malformed response (missing
/// flag fields) is an error, never a set of defaults.
async fn lookup_status(inner: &Rc<RefCell<Ctl>>, username: &str) -> Result<StatusFlags, String> {
    if let Some((flags, _)) = inner.borrow().status_cache.get(username) {
        return Ok(*flags);
    }

    let url = {
        let ctl = inner.borrow();
        format!("{}/check_status/{}/", ctl.config.http_base, username)
    };
    let response = Request::get(&url)
        .send()
        .await
        .map_err(|e| format!("status check failed: {e}"))?;
    if !response.ok() {
        return Err(format!("status check failed: HTTP {}", response.status()));
    }
    let flags: StatusFlags = response
        .json()
        .await
        .map_err(|e| format!("malformed status response: {e}"))?;

    let stamp = {
        let mut ctl = inner.borrow_mut();
        ctl.cache_stamp += 1;
        let stamp = ctl.cache_stamp;
        ctl.status_cache.insert(username.to_string(), (flags, stamp));
        stamp
    };
    let expiry_inner = inner.clone();
    let key = username.to_string();
    spawn_local(async move {
        TimeoutFuture::new(STATUS_CACHE_MS).await;
        let mut ctl = expiry_inner.borrow_mut();
        // A refreshed entry carries a newer stamp; leave it alone.
        if ctl.status_cache.get(&key).is_some_and(|(_, s)| *s == stamp) {
            ctl.status_cache.remove(&key);
        }
    });
    Ok(flags)
}

/// POST fallback when the live channel is down; the response is the same
/// message shape the socket would have pushed.
async fn http_compare_fallback(inner: &Rc<RefCell<Ctl>>, user1: &str, user2: &str) {
    let url = {
        let ctl = inner.borrow();
        format!("{}/compare_stats/", ctl.config.http_base)
    };
    let body = serde_json::json!({
        "user1_username": user1,
        "user2_username": user2,
    });
    let request = match Request::post(&url).json(&body) {
        Ok(request) => request,
        Err(err) => {
            with_document(inner, |doc| {
                show_notice(doc, &format!("compare request failed: {err}"), NoticeKind::Error)
            });
            return;
        }
    };
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            with_document(inner, |doc| {
                show_notice(doc, &format!("compare request failed: {err}"), NoticeKind::Error)
            });
            return;
        }
    };
    if response.status() == 403 {
        with_document(inner, |doc| {
            show_notice(
                doc,
                "Your session has expired. Please refresh the page.",
                NoticeKind::Error,
            )
        });
        return;
    }
    if !response.ok() {
        with_document(inner, |doc| {
            show_notice(
                doc,
                &format!("compare request failed: HTTP {}", response.status()),
                NoticeKind::Error,
            )
        });
        return;
    }
    match response.json::<StatsMessage>().await {
        Ok(message) => {
            if let Some(error) = message.error.clone() {
                let kind = if message.is_rate_limited() {
                    NoticeKind::Warning
                } else {
                    NoticeKind::Error
                };
                with_document(inner, |doc| show_notice(doc, &error, kind));
            } else {
                apply_message(inner, message);
            }
        }
        Err(err) => {
            with_document(inner, |doc| {
                show_notice(doc, &format!("malformed compare response: {err}"), NoticeKind::Error)
            });
        }
    }
}
