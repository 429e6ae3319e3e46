use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Fraction of the data range added as padding on each side of the fitted view.
pub const VIEW_PADDING: f64 = 0.2;

/// Hard cap on points per plotted dataset; longer histories are stride-sampled.
pub const MAX_SERIES_POINTS: usize = 1000;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;

/// Rated platforms tracked by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Codeforces,
    CodeChef,
    LeetCode,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Codeforces, Platform::CodeChef, Platform::LeetCode];

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Codeforces => "Codeforces",
            Platform::CodeChef => "CodeChef",
            Platform::LeetCode => "LeetCode",
        }
    }

    /// Case-insensitive parse; payload entries carry the platform as free text.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "codeforces" => Some(Platform::Codeforces),
            "codechef" => Some(Platform::CodeChef),
            "leetcode" => Some(Platform::LeetCode),
            _ => None,
        }
    }
}

/// One contest result as received from the server. Optional fields stay
/// optional here; defaulting decisions live in the accessors below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEntry {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub contest: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub old_rating: Option<i64>,
    #[serde(default)]
    pub new_rating: Option<i64>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub change: Option<i64>,
}

impl RatingEntry {
    pub fn platform_kind(&self) -> Option<Platform> {
        Platform::from_str(&self.platform)
    }

    /// Parsed contest date; entries without a parseable date are dropped upstream.
    pub fn timestamp(&self) -> Option<Timestamp> {
        parse_date(&self.date)
    }

    /// Explicit change if present, else derived from old/new when both exist.
    pub fn rating_change(&self) -> Option<i64> {
        self.change.or(match (self.new_rating, self.old_rating) {
            (Some(new), Some(old)) => Some(new - old),
            _ => None,
        })
    }

    fn is_complete(&self) -> bool {
        !self.platform.is_empty() && !self.contest.is_empty() && !self.date.is_empty()
    }
}

/// Per-user stats snapshot, produced fresh on every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserSnapshot {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub rating_history: Vec<RatingEntry>,
    #[serde(default)]
    pub codeforces_rating: Option<Value>,
    #[serde(default)]
    pub codechef_rating: Option<Value>,
    #[serde(default)]
    pub leetcode_rating: Option<Value>,
    #[serde(default)]
    pub leetcode_solved: Option<Value>,
    #[serde(default)]
    pub leetcode_contests: Option<Value>,
    #[serde(default)]
    pub has_no_ratings: bool,
}

impl UserSnapshot {
    /// Display text for a summary field, with the panel's default when absent.
    pub fn stat_text(value: &Option<Value>, default: &str) -> String {
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => default.to_string(),
            Some(v) => v.to_string(),
        }
    }

    /// Warning text for a user the server flagged as having nothing to plot.
    pub fn empty_history_notice(&self) -> Option<String> {
        self.has_no_ratings
            .then(|| format!("{} has no ratings or contest history", self.username))
    }
}

/// Inbound push frame: primary snapshot, optional comparison snapshot, or an
/// application-level error on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsMessage {
    #[serde(default)]
    pub user1: Option<UserSnapshot>,
    #[serde(default)]
    pub compare_to: Option<UserSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatsMessage {
    pub fn is_rate_limited(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.contains("Rate limit"))
    }
}

/// Outbound refresh/compare intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub user1: String,
    pub compare_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_refresh: Option<bool>,
}

/// Username-validity flags from the status lookup endpoint. All three fields
/// are required; a response missing any of them fails to deserialize rather
/// than defaulting silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub exists: bool,
    pub has_history_source: bool,
    pub has_valid_ratings: bool,
}

impl StatusFlags {
    pub fn is_comparable(&self) -> bool {
        self.exists && self.has_history_source && self.has_valid_ratings
    }

    /// Status-line text for a lookup result, shown while the user types.
    pub fn describe(&self) -> &'static str {
        if !self.exists {
            "User not found"
        } else if !self.has_history_source || !self.has_valid_ratings {
            "No ratings or history for this user"
        } else {
            "User found"
        }
    }
}

// --- date parsing ------------------------------------------------------------

/// Parse the formats the server has been observed to emit: RFC 3339,
/// `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS` and bare `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

// --- series extraction -------------------------------------------------------

/// One plottable point with the metadata surfaced in tooltips/inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPoint {
    pub ts: Timestamp,
    pub value: f64,
    pub contest: String,
    pub rank: Option<i64>,
}

/// Extract the plottable series for one platform: entries on other platforms
/// or without a parseable date are dropped, missing new ratings plot as 0,
/// and oversized histories are stride-sampled down to `MAX_SERIES_POINTS`.
pub fn platform_series(history: &[RatingEntry], platform: Platform) -> Vec<RatingPoint> {
    let mut points: Vec<RatingPoint> = history
        .iter()
        .filter(|e| e.platform_kind() == Some(platform))
        .filter_map(|e| {
            let ts = e.timestamp()?;
            Some(RatingPoint {
                ts,
                value: e.new_rating.unwrap_or(0) as f64,
                contest: e.contest.clone(),
                rank: e.rank,
            })
        })
        .collect();
    points.sort_by_key(|p| p.ts);

    if points.len() > MAX_SERIES_POINTS {
        let step = points.len() / MAX_SERIES_POINTS;
        points = points
            .into_iter()
            .step_by(step.max(1))
            .take(MAX_SERIES_POINTS)
            .collect();
    }
    points
}

// --- fitted view bounds ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBounds {
    pub x: AxisBounds,
    pub y: AxisBounds,
}

/// Pan/zoom clamp: absolute outer bounds plus the smallest allowed span per
/// axis, so the user cannot zoom into an empty or inverted range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanZoomLimits {
    pub x: AxisBounds,
    pub y: AxisBounds,
    pub x_min_range: f64,
    pub y_min_range: f64,
}

/// The fitted view for a set of datasets: padded initial bounds ("reset"
/// returns here, not to raw extent) and the interaction limits around them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedView {
    pub initial: ViewBounds,
    pub limits: PanZoomLimits,
}

/// Compute the fitted view over all finite points, or `None` when there is
/// nothing to plot. X is time (ms), Y is rating; the rating axis is clamped
/// at zero.
pub fn fit_view<I>(points: I) -> Option<FittedView>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut any = false;
    for (x, y) in points {
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        any = true;
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    if !any {
        return None;
    }

    // Range of zero degrades padding to a fixed unit instead of a point view.
    let x_range = if max_x > min_x { max_x - min_x } else { 1.0 };
    let y_range = if max_y > min_y { max_y - min_y } else { 1.0 };

    let initial = ViewBounds {
        x: AxisBounds {
            min: min_x - x_range * VIEW_PADDING,
            max: max_x + x_range * VIEW_PADDING,
        },
        y: AxisBounds {
            min: (min_y - y_range * VIEW_PADDING).max(0.0),
            max: max_y + y_range * VIEW_PADDING,
        },
    };
    let limits = PanZoomLimits {
        x: AxisBounds {
            min: min_x - x_range * VIEW_PADDING * 2.0,
            max: max_x + x_range * VIEW_PADDING * 2.0,
        },
        y: AxisBounds {
            min: (min_y - y_range * VIEW_PADDING * 2.0).max(0.0),
            max: max_y + y_range * VIEW_PADDING * 2.0,
        },
        x_min_range: x_range / 10.0,
        y_min_range: y_range / 10.0,
    };
    Some(FittedView { initial, limits })
}

// --- username validation -----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters")]
    Length,
    #[error("username may only contain letters, digits, '_' and '-'")]
    Charset,
    #[error("cannot compare the same username")]
    SameUsername,
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(ValidationError::Length);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::Charset);
    }
    Ok(())
}

/// Two usernames being compared must each be valid and must differ. The
/// same-username case reports its own reason, not a generic format error.
pub fn validate_pair(user1: &str, user2: &str) -> Result<(), ValidationError> {
    validate_username(user1)?;
    validate_username(user2)?;
    if user1 == user2 {
        return Err(ValidationError::SameUsername);
    }
    Ok(())
}

/// Strip characters outside the allowed charset (mirrors the input box
/// sanitization; validation still runs on the result).
pub fn sanitize_username(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

// --- history table rows ------------------------------------------------------

/// One row of the contest-history table, already merged and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    /// Present in compare mode, where rows from two users are interleaved.
    pub username: Option<String>,
    pub platform: String,
    pub contest: String,
    pub ts: Timestamp,
    pub date: String,
    pub rank: Option<i64>,
    pub old_rating: Option<i64>,
    pub new_rating: Option<i64>,
    pub change: Option<i64>,
}

/// Merge one or two histories into display rows, newest first. Incomplete
/// entries (missing platform/contest/date) are skipped rather than rendered
/// half-empty.
pub fn history_rows(primary: &UserSnapshot, compare: Option<&UserSnapshot>) -> Vec<HistoryRow> {
    let tagged = compare.is_some();
    let mut rows = Vec::new();
    let mut push_all = |snap: &UserSnapshot| {
        for entry in &snap.rating_history {
            if !entry.is_complete() {
                continue;
            }
            let Some(ts) = entry.timestamp() else {
                continue;
            };
            rows.push(HistoryRow {
                username: tagged.then(|| snap.username.clone()),
                platform: entry.platform.clone(),
                contest: entry.contest.clone(),
                ts,
                date: entry.date.clone(),
                rank: entry.rank,
                old_rating: entry.old_rating,
                new_rating: entry.new_rating,
                change: entry.rating_change(),
            });
        }
    };
    push_all(primary);
    if let Some(snap) = compare {
        push_all(snap);
    }
    rows.sort_by_key(|r| std::cmp::Reverse(r.ts));
    rows
}

/// Minimal HTML escaping for text interpolated into table markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(platform: &str, date: &str, new_rating: i64) -> RatingEntry {
        RatingEntry {
            platform: platform.to_string(),
            contest: format!("{platform} round"),
            date: date.to_string(),
            old_rating: None,
            new_rating: Some(new_rating),
            rank: Some(10),
            change: None,
        }
    }

    #[test]
    fn fit_view_pads_both_axes() {
        let view = fit_view([(0.0, 1500.0), (100.0, 1650.0)]).unwrap();
        assert_eq!(view.initial.x.min, -20.0);
        assert_eq!(view.initial.x.max, 120.0);
        assert_eq!(view.initial.y.min, 1500.0 - 150.0 * 0.2);
        assert_eq!(view.initial.y.max, 1650.0 + 150.0 * 0.2);
        assert_eq!(view.limits.y_min_range, 15.0);
        assert_eq!(view.limits.x.min, -40.0);
    }

    #[test]
    fn fit_view_clamps_rating_axis_at_zero() {
        let view = fit_view([(0.0, 5.0), (10.0, 100.0)]).unwrap();
        assert_eq!(view.initial.y.min, 0.0);
        assert_eq!(view.limits.y.min, 0.0);
    }

    #[test]
    fn fit_view_degenerate_range_uses_unit() {
        let view = fit_view([(50.0, 1400.0)]).unwrap();
        assert_eq!(view.initial.x.min, 50.0 - 0.2);
        assert_eq!(view.initial.x.max, 50.0 + 0.2);
        assert_eq!(view.initial.y.max, 1400.2);
    }

    #[test]
    fn fit_view_rejects_empty_and_non_finite() {
        assert!(fit_view(std::iter::empty::<(f64, f64)>()).is_none());
        assert!(fit_view([(f64::NAN, 1.0), (2.0, f64::INFINITY)]).is_none());
    }

    #[test]
    fn platform_series_filters_and_sorts() {
        let history = vec![
            entry("Codeforces", "2023-06-01", 1650),
            entry("CodeChef", "2023-02-01", 1800),
            entry("codeforces", "2023-01-01", 1500),
            entry("Codeforces", "not a date", 1700),
        ];
        let series = platform_series(&history, Platform::Codeforces);
        assert_eq!(series.len(), 2);
        assert!(series[0].ts < series[1].ts);
        assert_eq!(series[0].value, 1500.0);
        assert_eq!(series[1].value, 1650.0);
    }

    #[test]
    fn platform_series_caps_point_count() {
        let history: Vec<RatingEntry> = (0..2500)
            .map(|i| entry("LeetCode", &format!("2020-01-{:02}", (i % 28) + 1), i))
            .collect();
        let series = platform_series(&history, Platform::LeetCode);
        assert!(series.len() <= MAX_SERIES_POINTS);
    }

    #[test]
    fn missing_new_rating_plots_as_zero() {
        let mut e = entry("Codeforces", "2023-01-01", 0);
        e.new_rating = None;
        let series = platform_series(&[e], Platform::Codeforces);
        assert_eq!(series[0].value, 0.0);
    }

    #[test]
    fn rating_change_derives_from_old_and_new() {
        let mut e = entry("Codeforces", "2023-01-01", 1600);
        e.old_rating = Some(1500);
        assert_eq!(e.rating_change(), Some(100));
        e.change = Some(-7);
        assert_eq!(e.rating_change(), Some(-7));
        e.change = None;
        e.old_rating = None;
        assert_eq!(e.rating_change(), None);
    }

    #[test]
    fn two_point_codeforces_scenario() {
        let snapshot = UserSnapshot {
            username: "tourist".to_string(),
            rating_history: vec![
                entry("Codeforces", "2023-01-01", 1500),
                entry("Codeforces", "2023-06-01", 1650),
            ],
            ..Default::default()
        };
        let series = platform_series(&snapshot.rating_history, Platform::Codeforces);
        assert_eq!(series.len(), 2);
        let view = fit_view(series.iter().map(|p| (p.ts as f64, p.value))).unwrap();
        assert!(view.initial.y.min < 1500.0 && view.initial.y.min > 1400.0);
        assert!(view.initial.y.max > 1650.0 && view.initial.y.max < 1700.0);
        assert!(view.initial.x.min < series[0].ts as f64);
        assert!(view.initial.x.max > series[1].ts as f64);
    }

    #[test]
    fn username_validation_cases() {
        assert_eq!(validate_username("ab"), Err(ValidationError::Length));
        assert_eq!(validate_username("abc"), Ok(()));
        assert_eq!(validate_username("user name"), Err(ValidationError::Charset));
        assert_eq!(validate_username("under_score-ok"), Ok(()));
        assert_eq!(
            validate_pair("tourist", "tourist"),
            Err(ValidationError::SameUsername)
        );
        assert_eq!(validate_pair("tourist", "petr"), Ok(()));
    }

    #[test]
    fn sanitize_strips_disallowed_chars() {
        assert_eq!(sanitize_username(" user name! "), "username");
        assert_eq!(sanitize_username("ok_as-is"), "ok_as-is");
    }

    #[test]
    fn history_rows_merge_sort_and_skip_incomplete() {
        let user1 = UserSnapshot {
            username: "alice".to_string(),
            rating_history: vec![
                entry("Codeforces", "2023-01-01", 1500),
                RatingEntry {
                    contest: String::new(),
                    ..entry("Codeforces", "2023-03-01", 1550)
                },
            ],
            ..Default::default()
        };
        let user2 = UserSnapshot {
            username: "bob".to_string(),
            rating_history: vec![entry("CodeChef", "2023-02-01", 1700)],
            ..Default::default()
        };
        let rows = history_rows(&user1, Some(&user2));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username.as_deref(), Some("bob"));
        assert!(rows[0].ts > rows[1].ts);

        let solo = history_rows(&user1, None);
        assert_eq!(solo[0].username, None);
    }

    #[test]
    fn rate_limit_marker_detected() {
        let msg = StatsMessage {
            error: Some("Rate limit exceeded, try later".to_string()),
            ..Default::default()
        };
        assert!(msg.is_rate_limited());
        let other = StatsMessage {
            error: Some("unknown user".to_string()),
            ..Default::default()
        };
        assert!(!other.is_rate_limited());
    }

    #[test]
    fn empty_history_flag_produces_warning_text() {
        let flagged = UserSnapshot {
            username: "newbie".to_string(),
            has_no_ratings: true,
            ..Default::default()
        };
        assert_eq!(
            flagged.empty_history_notice().as_deref(),
            Some("newbie has no ratings or contest history")
        );
        let rated = UserSnapshot {
            username: "tourist".to_string(),
            ..Default::default()
        };
        assert_eq!(rated.empty_history_notice(), None);
    }

    #[test]
    fn status_description_per_flag_combination() {
        let missing = StatusFlags {
            exists: false,
            has_history_source: false,
            has_valid_ratings: false,
        };
        assert_eq!(missing.describe(), "User not found");
        let unrated = StatusFlags {
            exists: true,
            has_history_source: true,
            has_valid_ratings: false,
        };
        assert_eq!(unrated.describe(), "No ratings or history for this user");
        assert!(!unrated.is_comparable());
        let ok = StatusFlags {
            exists: true,
            has_history_source: true,
            has_valid_ratings: true,
        };
        assert_eq!(ok.describe(), "User found");
        assert!(ok.is_comparable());
    }

    #[test]
    fn status_flags_require_all_fields() {
        let ok: Result<StatusFlags, _> = serde_json::from_str(
            r#"{"exists":true,"has_history_source":true,"has_valid_ratings":false}"#,
        );
        assert!(ok.is_ok());
        let missing: Result<StatusFlags, _> = serde_json::from_str(r#"{"exists":true}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn escape_html_covers_markup_chars() {
        assert_eq!(escape_html("a<b>&\"c\"/'"), "a&lt;b&gt;&amp;&quot;c&quot;&#x2F;&#39;");
    }
}
