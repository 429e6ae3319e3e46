use stats_core::{escape_html, HistoryRow, UserSnapshot};
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement};

/// Display default for a summary field with no value yet.
const PENDING_TEXT: &str = "Loading...";

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

impl NoticeKind {
    fn class_name(self) -> &'static str {
        match self {
            NoticeKind::Info => "notice info",
            NoticeKind::Warning => "notice warning",
            NoticeKind::Error => "notice error",
        }
    }
}

/// Write the five summary stats for one user into the panel whose element ids
/// carry the given prefix ("" for solo, "user1-"/"user2-" in compare mode).
pub fn render_summary(document: &Document, prefix: &str, snapshot: &UserSnapshot) {
    let fields = [
        ("codeforces-rating", &snapshot.codeforces_rating, "N/A"),
        ("codechef-rating", &snapshot.codechef_rating, "N/A"),
        ("leetcode-rating", &snapshot.leetcode_rating, "N/A"),
        ("leetcode-solved", &snapshot.leetcode_solved, "0"),
        ("leetcode-contests", &snapshot.leetcode_contests, "0"),
    ];
    for (id, value, default) in fields {
        if let Some(el) = document.get_element_by_id(&format!("{prefix}{id}")) {
            el.set_text_content(Some(&UserSnapshot::stat_text(value, default)));
        }
    }
}

/// Write the server's free-text status line for one user into the panel.
pub fn render_status(document: &Document, prefix: &str, snapshot: &UserSnapshot) {
    if let Some(el) = document.get_element_by_id(&format!("{prefix}status")) {
        let text = if snapshot.status.is_empty() {
            "N/A"
        } else {
            snapshot.status.as_str()
        };
        el.set_text_content(Some(text));
    }
}

/// Validation feedback line under the username inputs.
pub fn set_status_text(document: &Document, text: &str) {
    if let Some(el) = document.get_element_by_id("status-text") {
        el.set_text_content(Some(text));
    }
}

/// Put every summary field for a prefix back to the loading placeholder.
pub fn reset_summary(document: &Document, prefix: &str) {
    for id in [
        "codeforces-rating",
        "codechef-rating",
        "leetcode-rating",
        "leetcode-solved",
        "leetcode-contests",
    ] {
        if let Some(el) = document.get_element_by_id(&format!("{prefix}{id}")) {
            el.set_text_content(Some(PENDING_TEXT));
        }
    }
}

/// Rebuild the contest-history table body from merged rows. The username
/// column only exists in compare mode, where rows from both users interleave.
pub fn render_history_table(tbody: &Element, rows: &[HistoryRow], compare: bool) {
    if rows.is_empty() {
        let span = if compare { 8 } else { 7 };
        tbody.set_inner_html(&format!(
            "<tr><td colspan=\"{span}\" class=\"empty-history\">No contest history available</td></tr>"
        ));
        return;
    }

    let mut html = String::with_capacity(rows.len() * 160);
    for row in rows {
        html.push_str("<tr>");
        if compare {
            push_cell(&mut html, row.username.as_deref().unwrap_or(""));
        }
        push_cell(&mut html, &row.platform);
        push_cell(&mut html, &row.contest);
        push_cell(&mut html, &row.date);
        push_cell(&mut html, &optional_num(row.rank));
        push_cell(&mut html, &optional_num(row.old_rating));
        push_cell(&mut html, &optional_num(row.new_rating));
        match row.change {
            Some(change) => {
                let class = if change >= 0 { "delta-up" } else { "delta-down" };
                let sign = if change >= 0 { "+" } else { "" };
                html.push_str(&format!("<td class=\"{class}\">{sign}{change}</td>"));
            }
            None => push_cell(&mut html, "N/A"),
        }
        html.push_str("</tr>");
    }
    tbody.set_inner_html(&html);
}

fn push_cell(html: &mut String, text: &str) {
    html.push_str("<td>");
    html.push_str(&escape_html(text));
    html.push_str("</td>");
}

fn optional_num(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Show a notice in the shared notification area. Later notices replace
/// earlier ones; there is no queue.
pub fn show_notice(document: &Document, text: &str, kind: NoticeKind) {
    let Some(el) = document.get_element_by_id("notification-area") else {
        return;
    };
    el.set_class_name(kind.class_name());
    el.set_text_content(Some(text));
    if let Ok(el) = el.dyn_into::<HtmlElement>() {
        let _ = el.style().set_property("display", "block");
    }
}

pub fn clear_notice(document: &Document) {
    let Some(el) = document.get_element_by_id("notification-area") else {
        return;
    };
    el.set_text_content(None);
    if let Ok(el) = el.dyn_into::<HtmlElement>() {
        let _ = el.style().set_property("display", "none");
    }
}
