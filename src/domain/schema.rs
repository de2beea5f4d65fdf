use serde::{Deserialize, Serialize};

/// Compact schema snapshot handed to the model when translating a question.
///
/// The serialized shapes are part of the prompt contract and stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaEntry {
    Table { table: String, columns: Vec<String> },
    Collection { collection: String, fields: Vec<String> },
    Index { index: String, fields: Vec<String> },
    Note { note: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Table,
    Collection,
    Index,
    Keyspace,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Table => "Table",
            EntityKind::Collection => "Collection",
            EntityKind::Index => "Index",
            EntityKind::Keyspace => "Keyspace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDoc {
    pub name: String,
    pub data_type: Option<String>,
    pub nullable: Option<bool>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDoc {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: None,
            primary_key: false,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            data_type: Some(data_type.into()),
            ..Self::named(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDoc {
    pub column: String,
    pub references_table: String,
    pub references_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDoc {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Documentation for one table, collection, index or keyspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDoc {
    pub name: String,
    pub kind: EntityKind,
    /// Row or document count; approximate where the store only offers estimates
    pub row_count: Option<i64>,
    pub columns: Vec<ColumnDoc>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDoc>,
    #[serde(default)]
    pub indexes: Vec<IndexDoc>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl EntityDoc {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            row_count: None,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDoc {
    pub database: String,
    pub db_type: crate::domain::db_kind::DbKind,
    pub entities: Vec<EntityDoc>,
    #[serde(default)]
    pub notes: Vec<String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl SchemaDoc {
    pub fn new(database: impl Into<String>, db_type: crate::domain::db_kind::DbKind) -> Self {
        Self {
            database: database.into(),
            db_type,
            entities: Vec::new(),
            notes: Vec::new(),
            generated_at: chrono::Utc::now(),
        }
    }

    /// Reduce the documentation to the name-only snapshot used in prompts
    pub fn snapshot(&self) -> Vec<SchemaEntry> {
        let mut entries: Vec<SchemaEntry> = self
            .entities
            .iter()
            .map(|entity| {
                let names: Vec<String> = entity.columns.iter().map(|c| c.name.clone()).collect();
                match entity.kind {
                    EntityKind::Table => SchemaEntry::Table {
                        table: entity.name.clone(),
                        columns: names,
                    },
                    EntityKind::Collection => SchemaEntry::Collection {
                        collection: entity.name.clone(),
                        fields: names,
                    },
                    EntityKind::Index => SchemaEntry::Index {
                        index: entity.name.clone(),
                        fields: names,
                    },
                    EntityKind::Keyspace => SchemaEntry::Note {
                        note: entity
                            .notes
                            .first()
                            .cloned()
                            .unwrap_or_else(|| format!("Keyspace {}", entity.name)),
                    },
                }
            })
            .collect();

        entries.extend(self.notes.iter().map(|note| SchemaEntry::Note { note: note.clone() }));
        entries
    }
}
