use crate::application::use_cases::connection_manager::ConnectionManager;
use crate::domain::error::Result;
use crate::domain::schema::{ColumnDoc, EntityDoc, SchemaDoc};
use std::fmt::Write;
use std::sync::Arc;

/// Produces browsable documentation for a connected database
pub struct SchemaDocsUseCase {
    connections: Arc<ConnectionManager>,
}

impl SchemaDocsUseCase {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub async fn document(&self, connection_id: Option<&str>, refresh: bool) -> Result<SchemaDoc> {
        let connection = self.connections.resolve(connection_id).await?;
        self.connections.schema_doc(&connection, refresh).await
    }
}

fn markdown_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn yes_no(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "yes",
        Some(false) => "no",
        None => "",
    }
}

fn column_row(column: &ColumnDoc) -> String {
    format!(
        "| {} | {} | {} | {} |",
        markdown_cell(&column.name),
        markdown_cell(column.data_type.as_deref().unwrap_or("")),
        yes_no(column.nullable),
        if column.primary_key { "yes" } else { "" }
    )
}

fn entity_heading(entity: &EntityDoc) -> String {
    match entity.row_count {
        Some(count) => format!("## {} `{}` ({} rows)", entity.kind.label(), entity.name, count),
        None => format!("## {} `{}`", entity.kind.label(), entity.name),
    }
}

pub fn render_markdown(doc: &SchemaDoc) -> String {
    let mut out = String::new();
    let title = if doc.database.is_empty() {
        doc.db_type.to_string()
    } else {
        format!("{} ({})", doc.database, doc.db_type)
    };
    let _ = writeln!(out, "# {}\n", title);
    let _ = writeln!(
        out,
        "_Generated {}_\n",
        doc.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for entity in &doc.entities {
        let _ = writeln!(out, "{}\n", entity_heading(entity));

        if !entity.columns.is_empty() {
            out.push_str("| Column | Type | Nullable | PK |\n");
            out.push_str("|---|---|---|---|\n");
            for column in &entity.columns {
                out.push_str(&column_row(column));
                out.push('\n');
            }
            out.push('\n');
        }

        if !entity.foreign_keys.is_empty() {
            out.push_str("**Relationships**\n\n");
            for fk in &entity.foreign_keys {
                let target = match &fk.references_column {
                    Some(column) => format!("{}.{}", fk.references_table, column),
                    None => fk.references_table.clone(),
                };
                let _ = writeln!(out, "- `{}` → `{}`", fk.column, target);
            }
            out.push('\n');
        }

        if !entity.indexes.is_empty() {
            out.push_str("**Indexes**\n\n");
            for index in &entity.indexes {
                let _ = writeln!(
                    out,
                    "- `{}` ({}){}",
                    index.name,
                    index.columns.join(", "),
                    if index.unique { " unique" } else { "" }
                );
            }
            out.push('\n');
        }

        for note in &entity.notes {
            let _ = writeln!(out, "> {}\n", note);
        }
    }

    if !doc.notes.is_empty() {
        out.push_str("## Notes\n\n");
        for note in &doc.notes {
            let _ = writeln!(out, "- {}", note);
        }
    }

    out.trim_end().to_string() + "\n"
}
