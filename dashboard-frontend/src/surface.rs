use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Array;
use stats_core::{fit_view, AxisBounds, FittedView, Platform, RatingPoint, ViewBounds};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    CanvasRenderingContext2d, HtmlCanvasElement, HtmlElement, MouseEvent, MutationObserver,
    MutationObserverInit, WheelEvent,
};

/// Pixel distance within which a click counts as hitting a point.
const HIT_RADIUS_PX: f64 = 8.0;
/// A mouse travel below this is a click, not a pan.
const CLICK_SLOP_PX: f64 = 3.0;

const MARGIN_LEFT: f64 = 56.0;
const MARGIN_RIGHT: f64 = 12.0;
const MARGIN_TOP: f64 = 26.0;
const MARGIN_BOTTOM: f64 = 28.0;

/// One named line on the chart.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub label: String,
    pub color: &'static str,
    pub points: Vec<RatingPoint>,
}

/// Point metadata surfaced on click-to-inspect; `None` clears the inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectInfo {
    pub label: String,
    pub contest: String,
    pub rank: Option<i64>,
    pub value: f64,
}

pub type InspectSink = Rc<dyn Fn(Option<InspectInfo>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// No finite point in any dataset; the empty-state message is shown and
    /// no binding is created.
    NoData,
}

/// Line color for a platform. Compare-mode overlays get a distinct palette so
/// the two users stay tell-apart-able; primary colors shift with the theme.
pub fn dataset_color(platform: Platform, dark: bool, compare: bool) -> &'static str {
    match (platform, compare) {
        (Platform::Codeforces, false) => {
            if dark {
                "#1e90ff"
            } else {
                "#4169e1"
            }
        }
        (Platform::Codeforces, true) => "#ff4500",
        (Platform::CodeChef, false) => {
            if dark {
                "#ff6347"
            } else {
                "#dc143c"
            }
        }
        (Platform::CodeChef, true) => "#8a2be2",
        (Platform::LeetCode, false) => "#32cd32",
        (Platform::LeetCode, true) => "#ffa500",
    }
}

struct ThemeColors {
    text: &'static str,
    grid: &'static str,
    background: &'static str,
}

fn theme_colors(dark: bool) -> ThemeColors {
    if dark {
        ThemeColors {
            text: "#ffffff",
            grid: "rgba(255, 255, 255, 0.2)",
            background: "#2d2d2d",
        }
    } else {
        ThemeColors {
            text: "#2c3e50",
            grid: "rgba(0, 0, 0, 0.1)",
            background: "#ffffff",
        }
    }
}

/// Pan interaction state: `Idle` until a primary-button press, `Panning`
/// while the pointer is down, back to `Idle` on release or leave.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PanState {
    Idle,
    Panning { last_x: f64, last_y: f64, travel: f64 },
}

/// Chart data + view state; everything that draws or maps coordinates.
struct ChartModel {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
    datasets: Vec<Dataset>,
    fitted: FittedView,
    view: ViewBounds,
    dark: bool,
    pan: PanState,
    inspected: Option<InspectInfo>,
    inspect_sink: InspectSink,
    destroyed: bool,
}

impl ChartModel {
    fn width(&self) -> f64 {
        self.canvas.width() as f64
    }

    fn height(&self) -> f64 {
        self.canvas.height() as f64
    }

    fn plot_width(&self) -> f64 {
        (self.width() - MARGIN_LEFT - MARGIN_RIGHT).max(1.0)
    }

    fn plot_height(&self) -> f64 {
        (self.height() - MARGIN_TOP - MARGIN_BOTTOM).max(1.0)
    }

    fn x_to_px(&self, x: f64) -> f64 {
        let range = self.view.x.range().max(1e-9);
        MARGIN_LEFT + (x - self.view.x.min) / range * self.plot_width()
    }

    fn y_to_px(&self, y: f64) -> f64 {
        let range = self.view.y.range().max(1e-9);
        MARGIN_TOP + self.plot_height() - (y - self.view.y.min) / range * self.plot_height()
    }

    /// Shift one axis, clamped so the view never leaves the pan limits.
    fn translate_axis(bounds: AxisBounds, limits: AxisBounds, shift: f64) -> AxisBounds {
        let lo = limits.min - bounds.min;
        let hi = limits.max - bounds.max;
        if lo > hi {
            return bounds;
        }
        let shift = shift.clamp(lo, hi);
        AxisBounds {
            min: bounds.min + shift,
            max: bounds.max + shift,
        }
    }

    /// Translate both axes by the pixel delta. Y is inverted: dragging down
    /// moves the view down.
    fn pan_by_pixels(&mut self, dx: f64, dy: f64) {
        let x_ratio = self.view.x.range() / self.plot_width();
        let y_ratio = self.view.y.range() / self.plot_height();
        self.view.x =
            Self::translate_axis(self.view.x, self.fitted.limits.x, -dx * x_ratio);
        self.view.y = Self::translate_axis(self.view.y, self.fitted.limits.y, dy * y_ratio);
    }

    fn zoom_axis(
        bounds: AxisBounds,
        limits: AxisBounds,
        min_range: f64,
        anchor_ratio: f64,
        factor: f64,
    ) -> AxisBounds {
        let span = bounds.range().max(1e-9);
        let max_span = (limits.max - limits.min).max(min_range);
        let new_span = (span * factor).clamp(min_range, max_span);
        let anchor = bounds.min + span * anchor_ratio;
        let zoomed = AxisBounds {
            min: anchor - new_span * anchor_ratio,
            max: anchor + new_span * (1.0 - anchor_ratio),
        };
        Self::translate_axis(zoomed, limits, 0.0)
    }

    fn zoom_at(&mut self, px: f64, py: f64, factor: f64) {
        if factor <= 0.0 {
            return;
        }
        let ax = ((px - MARGIN_LEFT) / self.plot_width()).clamp(0.0, 1.0);
        // Screen Y grows downward; anchor ratio is measured from the axis min.
        let ay = (1.0 - (py - MARGIN_TOP) / self.plot_height()).clamp(0.0, 1.0);
        self.view.x = Self::zoom_axis(
            self.view.x,
            self.fitted.limits.x,
            self.fitted.limits.x_min_range,
            ax,
            factor,
        );
        self.view.y = Self::zoom_axis(
            self.view.y,
            self.fitted.limits.y,
            self.fitted.limits.y_min_range,
            ay,
            factor,
        );
    }

    /// Back to the fitted (padded) view, not the library autoscale.
    fn reset_view(&mut self) {
        self.view = self.fitted.initial;
        self.set_inspected(None);
    }

    fn set_inspected(&mut self, info: Option<InspectInfo>) {
        if self.inspected != info {
            self.inspected = info.clone();
            (self.inspect_sink)(info);
        }
    }

    fn nearest_point(&self, px: f64, py: f64) -> Option<InspectInfo> {
        let mut best: Option<(f64, InspectInfo)> = None;
        for ds in &self.datasets {
            for p in &ds.points {
                let dx = self.x_to_px(p.ts as f64) - px;
                let dy = self.y_to_px(p.value) - py;
                let dist = (dx * dx + dy * dy).sqrt();
                if dist <= HIT_RADIUS_PX && best.as_ref().map_or(true, |(d, _)| dist < *d) {
                    best = Some((
                        dist,
                        InspectInfo {
                            label: ds.label.clone(),
                            contest: p.contest.clone(),
                            rank: p.rank,
                            value: p.value,
                        },
                    ));
                }
            }
        }
        best.map(|(_, info)| info)
    }

    // --- drawing -------------------------------------------------------------

    fn draw(&self) {
        if self.destroyed {
            return;
        }
        let colors = theme_colors(self.dark);
        let ctx = &self.ctx;
        let (w, h) = (self.width(), self.height());

        ctx.set_fill_style_str(colors.background);
        ctx.fill_rect(0.0, 0.0, w, h);

        self.draw_grid(&colors);
        for ds in &self.datasets {
            self.draw_dataset(ds);
        }
        self.draw_legend(&colors);
        if let Some(info) = &self.inspected {
            self.draw_inspect_box(&colors, info);
        }
    }

    fn draw_grid(&self, colors: &ThemeColors) {
        let ctx = &self.ctx;
        ctx.set_stroke_style_str(colors.grid);
        ctx.set_fill_style_str(colors.text);
        ctx.set_line_width(1.0);
        ctx.set_font("12px 'Inter', sans-serif");

        let y_ticks = 5usize;
        for i in 0..=y_ticks {
            let value = self.view.y.min + self.view.y.range() * i as f64 / y_ticks as f64;
            let y = self.y_to_px(value);
            ctx.begin_path();
            ctx.move_to(MARGIN_LEFT, y);
            ctx.line_to(self.width() - MARGIN_RIGHT, y);
            ctx.stroke();
            ctx.fill_text(&format!("{value:.0}"), 4.0, y + 4.0).ok();
        }

        let x_ticks = 6usize;
        for i in 0..=x_ticks {
            let value = self.view.x.min + self.view.x.range() * i as f64 / x_ticks as f64;
            let x = self.x_to_px(value);
            ctx.begin_path();
            ctx.move_to(x, MARGIN_TOP);
            ctx.line_to(x, self.height() - MARGIN_BOTTOM);
            ctx.stroke();
            ctx.fill_text(&format_month(value as i64), x - 24.0, self.height() - 8.0)
                .ok();
        }
    }

    fn draw_dataset(&self, ds: &Dataset) {
        if ds.points.is_empty() {
            return;
        }
        let ctx = &self.ctx;
        ctx.set_stroke_style_str(ds.color);
        ctx.set_fill_style_str(ds.color);
        ctx.set_line_width(2.0);

        ctx.begin_path();
        let mut started = false;
        for p in &ds.points {
            let x = self.x_to_px(p.ts as f64);
            let y = self.y_to_px(p.value);
            if !started {
                ctx.move_to(x, y);
                started = true;
            } else {
                ctx.line_to(x, y);
            }
        }
        ctx.stroke();

        for p in &ds.points {
            let x = self.x_to_px(p.ts as f64);
            let y = self.y_to_px(p.value);
            ctx.begin_path();
            ctx.arc(x, y, 4.0, 0.0, std::f64::consts::PI * 2.0).ok();
            ctx.fill();
        }
    }

    fn draw_legend(&self, colors: &ThemeColors) {
        let ctx = &self.ctx;
        ctx.set_font("12px 'Inter', sans-serif");
        let mut x = MARGIN_LEFT;
        for ds in &self.datasets {
            if ds.points.is_empty() {
                continue;
            }
            ctx.set_fill_style_str(ds.color);
            ctx.fill_rect(x, 6.0, 10.0, 10.0);
            ctx.set_fill_style_str(colors.text);
            ctx.fill_text(&ds.label, x + 14.0, 15.0).ok();
            x += 14.0 + ds.label.len() as f64 * 6.5 + 16.0;
        }
    }

    fn draw_inspect_box(&self, colors: &ThemeColors, info: &InspectInfo) {
        let ctx = &self.ctx;
        let rank = info
            .rank
            .map(|r| r.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let text = format!(
            "{}: {} (Contest: {}, Rank: {rank})",
            info.label, info.value, info.contest
        );
        let box_w = text.len() as f64 * 6.5 + 12.0;
        ctx.set_fill_style_str(colors.background);
        ctx.fill_rect(MARGIN_LEFT + 4.0, MARGIN_TOP + 4.0, box_w, 20.0);
        ctx.set_stroke_style_str(colors.text);
        ctx.stroke_rect(MARGIN_LEFT + 4.0, MARGIN_TOP + 4.0, box_w, 20.0);
        ctx.set_fill_style_str(colors.text);
        ctx.set_font("12px 'Inter', sans-serif");
        ctx.fill_text(&text, MARGIN_LEFT + 10.0, MARGIN_TOP + 18.0).ok();
    }
}

fn format_month(ts_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.format("%b %Y").to_string(),
        None => String::new(),
    }
}

/// The live association between the canvas and one rendered chart: the model
/// plus every listener and observer that must go away with it.
struct ChartBinding {
    model: Rc<RefCell<ChartModel>>,
    canvas_listeners: Vec<(&'static str, Closure<dyn FnMut(MouseEvent)>)>,
    wheel_listener: Closure<dyn FnMut(WheelEvent)>,
    control_listeners: Vec<(HtmlElement, Closure<dyn FnMut()>)>,
    theme_observer: MutationObserver,
    _theme_callback: Closure<dyn FnMut()>,
}

/// Owns the single canvas/chart binding and the empty-state plumbing around
/// it. At most one binding exists at a time; `render` fully releases the old
/// one before installing a new one.
pub struct ChartSurface {
    canvas: HtmlCanvasElement,
    no_data: HtmlElement,
    fit_control: HtmlElement,
    reset_control: HtmlElement,
    binding: Option<ChartBinding>,
}

impl ChartSurface {
    pub fn new(
        canvas: HtmlCanvasElement,
        no_data: HtmlElement,
        fit_control: HtmlElement,
        reset_control: HtmlElement,
    ) -> Self {
        Self {
            canvas,
            no_data,
            fit_control,
            reset_control,
            binding: None,
        }
    }

    pub fn has_binding(&self) -> bool {
        self.binding.is_some()
    }

    /// Render datasets into a fresh binding. Returns `NoData` (and shows the
    /// placeholder) when no dataset has a finite point.
    pub fn render(
        &mut self,
        datasets: Vec<Dataset>,
        dark: bool,
        inspect_sink: InspectSink,
    ) -> Result<RenderOutcome, JsValue> {
        // Release the previous binding before anything else; two live charts
        // on one canvas is the bug class this type exists to prevent.
        self.destroy();

        let Some(fitted) = fit_view(
            datasets
                .iter()
                .flat_map(|ds| ds.points.iter().map(|p| (p.ts as f64, p.value))),
        ) else {
            self.set_empty_state(true);
            return Ok(RenderOutcome::NoData);
        };
        self.set_empty_state(false);

        let rect = self.canvas.get_bounding_client_rect();
        self.canvas.set_width(rect.width().max(1.0) as u32);
        self.canvas.set_height(rect.height().max(1.0) as u32);

        let ctx = self
            .canvas
            .get_context("2d")?
            .ok_or_else(|| JsValue::from_str("no 2d context"))?
            .dyn_into::<CanvasRenderingContext2d>()?;

        let model = Rc::new(RefCell::new(ChartModel {
            canvas: self.canvas.clone(),
            ctx,
            datasets,
            fitted,
            view: fitted.initial,
            dark,
            pan: PanState::Idle,
            inspected: None,
            inspect_sink,
            destroyed: false,
        }));
        model.borrow().draw();
        set_cursor(&self.canvas, "grab");

        let binding = self.install_binding(model)?;
        self.binding = Some(binding);
        Ok(RenderOutcome::Rendered)
    }

    /// Replace dataset contents without discarding pan/zoom state, unless the
    /// caller asks for a bounds reset. Falls back to a NoData transition when
    /// the new data has nothing to plot.
    pub fn update(&mut self, datasets: Vec<Dataset>, reset_bounds: bool) -> RenderOutcome {
        let Some(binding) = &self.binding else {
            return RenderOutcome::NoData;
        };
        let Some(fitted) = fit_view(
            datasets
                .iter()
                .flat_map(|ds| ds.points.iter().map(|p| (p.ts as f64, p.value))),
        ) else {
            self.destroy();
            self.set_empty_state(true);
            return RenderOutcome::NoData;
        };
        {
            let mut model = binding.model.borrow_mut();
            model.datasets = datasets;
            model.fitted = fitted;
            if reset_bounds {
                model.view = fitted.initial;
            }
            model.draw();
        }
        RenderOutcome::Rendered
    }

    /// Restore the originally fitted padded bounds.
    pub fn reset_view(&self) {
        if let Some(binding) = &self.binding {
            let mut model = binding.model.borrow_mut();
            model.reset_view();
            model.draw();
        }
        set_cursor(&self.canvas, "grab");
    }

    /// Recolor for the theme without recreating the chart or losing the view.
    pub fn apply_theme(&self, dark: bool) {
        if let Some(binding) = &self.binding {
            let mut model = binding.model.borrow_mut();
            model.dark = dark;
            model.draw();
        }
    }

    /// Release the chart, its canvas listeners and the theme observer.
    /// Idempotent: a second call is a no-op.
    pub fn destroy(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };
        binding.model.borrow_mut().destroyed = true;
        for (event, closure) in &binding.canvas_listeners {
            let _ = self
                .canvas
                .remove_event_listener_with_callback(event, closure.as_ref().unchecked_ref());
        }
        let _ = self.canvas.remove_event_listener_with_callback(
            "wheel",
            binding.wheel_listener.as_ref().unchecked_ref(),
        );
        for (element, closure) in &binding.control_listeners {
            let _ = element
                .remove_event_listener_with_callback("click", closure.as_ref().unchecked_ref());
        }
        binding.theme_observer.disconnect();
        set_cursor(&self.canvas, "default");
    }

    fn set_empty_state(&self, empty: bool) {
        let (placeholder, chart) = if empty {
            ("block", "none")
        } else {
            ("none", "block")
        };
        set_display(&self.no_data, placeholder);
        set_display(&self.fit_control, chart);
        set_display(&self.reset_control, chart);
        let _ = self.canvas.style().set_property("display", chart);
    }

    fn install_binding(&self, model: Rc<RefCell<ChartModel>>) -> Result<ChartBinding, JsValue> {
        let mut canvas_listeners = Vec::new();

        // mousedown: primary button starts a pan.
        {
            let model = model.clone();
            let canvas = self.canvas.clone();
            let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |e: MouseEvent| {
                if e.button() != 0 {
                    return;
                }
                e.prevent_default();
                model.borrow_mut().pan = PanState::Panning {
                    last_x: e.client_x() as f64,
                    last_y: e.client_y() as f64,
                    travel: 0.0,
                };
                set_cursor(&canvas, "grabbing");
            }));
            self.canvas
                .add_event_listener_with_callback("mousedown", closure.as_ref().unchecked_ref())?;
            canvas_listeners.push(("mousedown", closure));
        }

        // mousemove: translate the view while panning.
        {
            let model = model.clone();
            let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |e: MouseEvent| {
                let mut m = model.borrow_mut();
                if let PanState::Panning { last_x, last_y, travel } = m.pan {
                    let (cx, cy) = (e.client_x() as f64, e.client_y() as f64);
                    let (dx, dy) = (cx - last_x, cy - last_y);
                    m.pan = PanState::Panning {
                        last_x: cx,
                        last_y: cy,
                        travel: travel + dx.abs() + dy.abs(),
                    };
                    m.pan_by_pixels(dx, dy);
                    m.draw();
                }
            }));
            self.canvas
                .add_event_listener_with_callback("mousemove", closure.as_ref().unchecked_ref())?;
            canvas_listeners.push(("mousemove", closure));
        }

        // mouseup: end the pan; a short travel is a click-to-inspect.
        {
            let model = model.clone();
            let canvas = self.canvas.clone();
            let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |e: MouseEvent| {
                let travel = {
                    let mut m = model.borrow_mut();
                    let travel = match m.pan {
                        PanState::Panning { travel, .. } => Some(travel),
                        PanState::Idle => None,
                    };
                    m.pan = PanState::Idle;
                    travel
                };
                set_cursor(&canvas, "grab");
                if let Some(travel) = travel {
                    if travel <= CLICK_SLOP_PX {
                        let rect = canvas.get_bounding_client_rect();
                        let px = e.client_x() as f64 - rect.left();
                        let py = e.client_y() as f64 - rect.top();
                        let mut m = model.borrow_mut();
                        let hit = m.nearest_point(px, py);
                        m.set_inspected(hit);
                        m.draw();
                    }
                }
            }));
            self.canvas
                .add_event_listener_with_callback("mouseup", closure.as_ref().unchecked_ref())?;
            canvas_listeners.push(("mouseup", closure));
        }

        // mouseleave: same as ending the pan, without the click handling.
        {
            let model = model.clone();
            let canvas = self.canvas.clone();
            let closure = Closure::<dyn FnMut(MouseEvent)>::wrap(Box::new(move |_: MouseEvent| {
                model.borrow_mut().pan = PanState::Idle;
                set_cursor(&canvas, "grab");
            }));
            self.canvas
                .add_event_listener_with_callback("mouseleave", closure.as_ref().unchecked_ref())?;
            canvas_listeners.push(("mouseleave", closure));
        }

        // wheel: zoom about the cursor, clamped to the fitted limits.
        let wheel_listener = {
            let model = model.clone();
            let canvas = self.canvas.clone();
            let closure = Closure::<dyn FnMut(WheelEvent)>::wrap(Box::new(move |e: WheelEvent| {
                e.prevent_default();
                let rect = canvas.get_bounding_client_rect();
                let px = e.client_x() as f64 - rect.left();
                let py = e.client_y() as f64 - rect.top();
                let factor = if e.delta_y() < 0.0 { 0.9 } else { 1.1 };
                let mut m = model.borrow_mut();
                m.zoom_at(px, py, factor);
                m.draw();
            }));
            self.canvas
                .add_event_listener_with_callback("wheel", closure.as_ref().unchecked_ref())?;
            closure
        };

        // Theme observer: watch the body class for the dark-theme toggle and
        // recolor in place.
        let theme_callback = {
            let model = model.clone();
            Closure::<dyn FnMut()>::wrap(Box::new(move || {
                let dark = body_is_dark();
                let mut m = model.borrow_mut();
                if m.dark != dark {
                    m.dark = dark;
                    m.draw();
                }
            }))
        };
        // Fit snaps back to the padded data extent; reset does the same and
        // also clears any active inspection.
        let mut control_listeners = Vec::new();
        {
            let model = model.clone();
            let closure = Closure::<dyn FnMut()>::wrap(Box::new(move || {
                let mut m = model.borrow_mut();
                m.view = m.fitted.initial;
                m.draw();
            }));
            self.fit_control
                .add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())?;
            control_listeners.push((self.fit_control.clone(), closure));
        }
        {
            let model = model.clone();
            let closure = Closure::<dyn FnMut()>::wrap(Box::new(move || {
                let mut m = model.borrow_mut();
                m.reset_view();
                m.draw();
            }));
            self.reset_control
                .add_event_listener_with_callback("click", closure.as_ref().unchecked_ref())?;
            control_listeners.push((self.reset_control.clone(), closure));
        }

        let theme_observer = MutationObserver::new(theme_callback.as_ref().unchecked_ref())?;
        if let Some(body) = web_sys::window().and_then(|w| w.document()).and_then(|d| d.body()) {
            let init = MutationObserverInit::new();
            init.set_attributes(true);
            let filter = Array::new();
            filter.push(&JsValue::from_str("class"));
            init.set_attribute_filter(&filter);
            theme_observer.observe_with_options(&body, &init)?;
        }

        Ok(ChartBinding {
            model,
            canvas_listeners,
            wheel_listener,
            control_listeners,
            theme_observer,
            _theme_callback: theme_callback,
        })
    }
}

impl Drop for ChartSurface {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub fn body_is_dark() -> bool {
    web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.body())
        .map(|b| b.class_list().contains("dark-theme"))
        .unwrap_or(false)
}

fn set_cursor(canvas: &HtmlCanvasElement, cursor: &str) {
    let _ = canvas.style().set_property("cursor", cursor);
}

fn set_display(el: &HtmlElement, value: &str) {
    let _ = el.style().set_property("display", value);
}
