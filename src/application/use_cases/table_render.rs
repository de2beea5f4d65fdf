use crate::domain::query::ResultSet;
use serde_json::Value;

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bootstrap-styled HTML table; empty string when there are no rows
pub fn render_html_table(result: &ResultSet) -> String {
    if result.is_empty() {
        return String::new();
    }

    let mut html = String::from("<table class=\"table table-striped\">\n<thead>\n<tr>");
    for column in &result.columns {
        html.push_str("<th>");
        html.push_str(&escape_html(column));
        html.push_str("</th>");
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");

    for row in &result.rows {
        html.push_str("<tr>");
        for value in row {
            html.push_str("<td>");
            html.push_str(&escape_html(&cell_text(value)));
            html.push_str("</td>");
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>");
    html
}
