// ============================================================
// CHART SELECTION
// ============================================================
// Classify result columns and pick a line or bar chart the page can draw

use crate::domain::query::ResultSet;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

const BAR_LIMIT: usize = 20;
const DATETIME_MIN_SHARE: f64 = 0.6;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Chart description rendered client-side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: String,
    pub title: String,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Numeric,
    Datetime,
    Categorical,
    Other,
}

/// Parse a cell as a point in time; plain dates land at midnight
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn classify(result: &ResultSet, index: usize) -> ColumnClass {
    let values: Vec<&Value> = result
        .rows
        .iter()
        .filter_map(|row| row.get(index))
        .collect();
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();

    if non_null.is_empty() {
        return ColumnClass::Other;
    }

    if non_null.iter().all(|v| v.is_number()) {
        return ColumnClass::Numeric;
    }

    let all_dates = non_null
        .iter()
        .all(|v| v.as_str().and_then(parse_datetime).is_some());
    let share = non_null.len() as f64 / values.len() as f64;
    if all_dates && share > DATETIME_MIN_SHARE {
        return ColumnClass::Datetime;
    }

    if non_null.iter().any(|v| v.is_string()) {
        ColumnClass::Categorical
    } else {
        ColumnClass::Other
    }
}

fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn build_chart(result: &ResultSet) -> Option<ChartSpec> {
    if result.is_empty() || result.columns.len() < 2 {
        return None;
    }

    let classes: Vec<ColumnClass> = (0..result.columns.len())
        .map(|i| classify(result, i))
        .collect();
    let first = |class: ColumnClass| classes.iter().position(|c| *c == class);

    let y = first(ColumnClass::Numeric)?;
    if let Some(x) = first(ColumnClass::Datetime) {
        return Some(line_chart(result, x, y));
    }
    let x = first(ColumnClass::Categorical)?;
    Some(bar_chart(result, x, y))
}

fn line_chart(result: &ResultSet, x: usize, y: usize) -> ChartSpec {
    let mut sums: HashMap<NaiveDateTime, (String, f64)> = HashMap::new();
    for row in &result.rows {
        let stamp = row.get(x).and_then(Value::as_str).and_then(|s| {
            parse_datetime(s).map(|parsed| (parsed, s.to_string()))
        });
        let value = row.get(y).and_then(Value::as_f64);
        if let (Some((parsed, label)), Some(value)) = (stamp, value) {
            sums.entry(parsed).or_insert((label, 0.0)).1 += value;
        }
    }

    let mut ordered: Vec<(NaiveDateTime, (String, f64))> = sums.into_iter().collect();
    ordered.sort_by_key(|(stamp, _)| *stamp);

    let (x_name, y_name) = (&result.columns[x], &result.columns[y]);
    ChartSpec {
        kind: ChartKind::Line,
        x: x_name.clone(),
        y: y_name.clone(),
        title: format!("{} over {}", y_name, x_name),
        points: ordered
            .into_iter()
            .map(|(_, (label, value))| ChartPoint { label, value })
            .collect(),
    }
}

fn bar_chart(result: &ResultSet, x: usize, y: usize) -> ChartSpec {
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, f64> = HashMap::new();
    for row in &result.rows {
        let label = row.get(x).and_then(label_of);
        let value = row.get(y).and_then(Value::as_f64);
        if let (Some(label), Some(value)) = (label, value) {
            if !sums.contains_key(&label) {
                order.push(label.clone());
            }
            *sums.entry(label).or_insert(0.0) += value;
        }
    }

    let mut points: Vec<ChartPoint> = order
        .into_iter()
        .map(|label| {
            let value = sums[&label];
            ChartPoint { label, value }
        })
        .collect();
    // stable sort keeps first-seen order among ties
    points.sort_by(|a, b| b.value.total_cmp(&a.value));
    points.truncate(BAR_LIMIT);

    let (x_name, y_name) = (&result.columns[x], &result.columns[y]);
    ChartSpec {
        kind: ChartKind::Bar,
        x: x_name.clone(),
        y: y_name.clone(),
        title: format!("Top {} by {}", points.len(), y_name),
        points,
    }
}
