//! Admin resource definitions: forms, tables and pages over one table.
//!
//! A resource is plain data. The migrator uses bound resources to refuse
//! schema changes that would leave a form field without a compatible column.

pub mod form;
pub mod product;
pub mod slug;
pub mod table;

use std::collections::BTreeMap;
use std::fmt;

use crate::core::{DataType, MigrateError, Result, Value};
use crate::storage::TableSchema;

pub use form::{
    FieldKind, FormField, FormGroup, FormSchema, FormSection, InputType, Relationship,
    SlugDerivation,
};
pub use product::product_resource;
pub use slug::slugify;
pub use table::{BulkAction, ColumnDisplay, RowAction, SelectFilter, TableColumn, TableView};

/// Field name → submitted value.
pub type Record = BTreeMap<String, Value>;

/// Key identifying the edited record when checking uniqueness.
pub const RECORD_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Edit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub icon: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub name: String,
    pub route: String,
}

impl Page {
    pub fn new(name: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route: route.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    MaxLength(usize),
    Unique,
    MaxFiles(usize),
    Type(String),
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "is required"),
            Rule::MaxLength(max) => write!(f, "may not be longer than {} characters", max),
            Rule::Unique => write!(f, "has already been taken"),
            Rule::MaxFiles(max) => write!(f, "may not hold more than {} files", max),
            Rule::Type(expected) => write!(f, "must be {}", expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub rule: Rule,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.rule)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefinition {
    pub model: String,
    pub table: String,
    pub navigation: Navigation,
    pub form: FormSchema,
    pub table_view: TableView,
    pub pages: Vec<Page>,
}

impl ResourceDefinition {
    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.form.field(name)
    }

    pub fn page(&self, name: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.name == name)
    }

    /// Stores `value` under `field` and runs the field's live update rule.
    pub fn field_updated(
        &self,
        operation: Operation,
        field: &str,
        value: Value,
        record: &mut Record,
    ) {
        let derived = self
            .field(field)
            .and_then(|f| f.derives_slug.as_ref())
            .filter(|rule| rule.operation == operation)
            .map(|rule| {
                let slug = value.as_str().map(slugify).unwrap_or_default();
                (rule.target.clone(), Value::Text(slug))
            });

        record.insert(field.to_string(), value);
        if let Some((target, slug)) = derived {
            record.insert(target, slug);
        }
    }

    /// Fills fields the record leaves unset with their declared default.
    pub fn apply_defaults(&self, record: &mut Record) {
        for field in self.form.fields() {
            if let Some(default) = &field.default {
                let unset = record.get(&field.name).is_none_or(Value::is_null);
                if unset {
                    record.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    /// Every rule the record breaks. `existing` holds the records already
    /// stored; the one sharing the record's `id` is ignored for uniqueness.
    pub fn validate(
        &self,
        record: &Record,
        operation: Operation,
        existing: &[Record],
    ) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        let editing = match operation {
            Operation::Create => None,
            Operation::Edit => record.get(RECORD_KEY),
        };

        for field in self.form.fields().filter(|f| f.is_persisted()) {
            let mut fail = |rule| {
                violations.push(FieldViolation {
                    field: field.name.clone(),
                    rule,
                })
            };
            let value = record.get(&field.name).unwrap_or(&Value::Null);

            if is_blank(value) {
                if field.required {
                    fail(Rule::Required);
                }
                continue;
            }
            if !field.kind.accepts_value(value) {
                fail(Rule::Type(expected_shape(&field.kind).to_string()));
                continue;
            }
            if let (Some(max), Some(text)) = (field.max_length, value.as_str())
                && text.chars().count() > max
            {
                fail(Rule::MaxLength(max));
            }
            if let FieldKind::FileUpload {
                max_files: Some(max),
                ..
            } = &field.kind
            {
                match file_list(value) {
                    Some(files) if files.len() > *max => fail(Rule::MaxFiles(*max)),
                    Some(_) => {}
                    None => fail(Rule::Type("a list of files".to_string())),
                }
            }
            if field.unique {
                let taken = existing.iter().any(|other| {
                    other.get(&field.name) == Some(value)
                        && (editing.is_none() || other.get(RECORD_KEY) != editing)
                });
                if taken {
                    fail(Rule::Unique);
                }
            }
        }

        violations
    }

    /// Checks that every persisted field and every table column is backed
    /// by a compatible column of `schema`.
    pub fn check_compatibility(&self, schema: &TableSchema) -> Result<()> {
        for field in self.form.fields().filter(|f| f.is_persisted()) {
            let column = schema
                .column(&field.name)
                .ok_or_else(|| self.incompatible(&field.name, "column is missing".to_string()))?;

            if !field.kind.accepts(&column.data_type) {
                return Err(self.incompatible(
                    &field.name,
                    format!(
                        "{} cannot hold {}",
                        column.data_type,
                        expected_shape(&field.kind)
                    ),
                ));
            }
            if let (Some(max), DataType::Varchar(len)) = (field.max_length, &column.data_type)
                && max > *len as usize
            {
                return Err(self.incompatible(
                    &field.name,
                    format!("form allows {} characters but column is {}", max, column.data_type),
                ));
            }
        }

        for column in &self.table_view.columns {
            let source = column.source_column();
            if schema.column(&source).is_none() {
                return Err(self.incompatible(
                    &column.path,
                    format!("table column reads missing column '{}'", source),
                ));
            }
        }

        Ok(())
    }

    fn incompatible(&self, field: &str, reason: String) -> MigrateError {
        MigrateError::ResourceIncompatible {
            resource: self.model.clone(),
            field: field.to_string(),
            reason,
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn expected_shape(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::TextInput {
            input_type: InputType::Number,
            ..
        } => "a number",
        FieldKind::TextInput { .. } | FieldKind::MarkdownEditor { .. } => "text",
        FieldKind::FileUpload { .. } => "a list of files",
        FieldKind::Select { .. } => "a related record id",
        FieldKind::Toggle => "true or false",
    }
}

/// Uploaded files are stored as a JSON array of paths.
fn file_list(value: &Value) -> Option<Vec<String>> {
    serde_json::from_str(value.as_str()?).ok()
}
