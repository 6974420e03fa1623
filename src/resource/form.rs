use crate::core::{DataType, Value};

use super::Operation;

/// Relationship a select or filter reads its options from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub title_attribute: String,
}

impl Relationship {
    pub fn new(name: impl Into<String>, title_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title_attribute: title_attribute.into(),
        }
    }

    /// Foreign key column backing the relationship.
    pub fn foreign_key(&self) -> String {
        format!("{}_id", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Text,
    Number,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    TextInput {
        input_type: InputType,
        prefix: Option<String>,
        step: Option<String>,
    },
    MarkdownEditor {
        attachments_directory: Option<String>,
    },
    FileUpload {
        directory: String,
        multiple: bool,
        image: bool,
        accepted_file_types: Vec<String>,
        reorderable: bool,
        max_files: Option<usize>,
    },
    Select {
        relationship: Relationship,
        searchable: bool,
        preload: bool,
    },
    Toggle,
}

impl FieldKind {
    /// Whether a table column of `data_type` can back a field of this kind.
    pub fn accepts(&self, data_type: &DataType) -> bool {
        match self {
            Self::TextInput {
                input_type: InputType::Number,
                ..
            } => data_type.is_numeric(),
            Self::TextInput { .. } | Self::MarkdownEditor { .. } | Self::FileUpload { .. } => {
                data_type.is_textual()
            }
            Self::Select { .. } => *data_type == DataType::Integer,
            Self::Toggle => *data_type == DataType::Boolean,
        }
    }

    /// Whether a submitted value has the shape this kind produces.
    pub fn accepts_value(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (
                Self::TextInput {
                    input_type: InputType::Number,
                    ..
                },
                v,
            ) => v.as_f64().is_some(),
            (Self::TextInput { .. } | Self::MarkdownEditor { .. } | Self::FileUpload { .. }, v) => {
                v.as_str().is_some()
            }
            (Self::Select { .. }, v) => v.as_i64().is_some(),
            (Self::Toggle, v) => v.as_bool().is_some(),
        }
    }
}

/// Live update rule: when `source` changes, `target` receives the slug of
/// the new value, but only during `operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugDerivation {
    pub target: String,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub nullable: bool,
    pub disabled: bool,
    pub dehydrated: bool,
    pub max_length: Option<usize>,
    pub unique: bool,
    pub default: Option<Value>,
    pub column_span_full: bool,
    pub live_on_blur: bool,
    pub derives_slug: Option<SlugDerivation>,
}

impl FormField {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            nullable: false,
            disabled: false,
            dehydrated: true,
            max_length: None,
            unique: false,
            default: None,
            column_span_full: false,
            live_on_blur: false,
            derives_slug: None,
        }
    }

    pub fn text_input(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::TextInput {
                input_type: InputType::Text,
                prefix: None,
                step: None,
            },
        )
    }

    pub fn number_input(name: impl Into<String>, prefix: Option<&str>, step: Option<&str>) -> Self {
        Self::new(
            name,
            FieldKind::TextInput {
                input_type: InputType::Number,
                prefix: prefix.map(str::to_string),
                step: step.map(str::to_string),
            },
        )
    }

    pub fn markdown_editor(name: impl Into<String>, attachments_directory: Option<&str>) -> Self {
        Self::new(
            name,
            FieldKind::MarkdownEditor {
                attachments_directory: attachments_directory.map(str::to_string),
            },
        )
    }

    pub fn file_upload(name: impl Into<String>, kind: FieldKind) -> Self {
        Self::new(name, kind)
    }

    pub fn select(name: impl Into<String>, relationship: Relationship) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                relationship,
                searchable: true,
                preload: true,
            },
        )
    }

    pub fn toggle(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Toggle)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Disabled fields are shown read-only; `dehydrated` decides whether
    /// their value is still saved.
    pub fn disabled(mut self, dehydrated: bool) -> Self {
        self.disabled = true;
        self.dehydrated = dehydrated;
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn column_span_full(mut self) -> Self {
        self.column_span_full = true;
        self
    }

    pub fn live_on_blur(mut self) -> Self {
        self.live_on_blur = true;
        self
    }

    pub fn slug_into(mut self, target: impl Into<String>, operation: Operation) -> Self {
        self.derives_slug = Some(SlugDerivation {
            target: target.into(),
            operation,
        });
        self
    }

    /// Whether the field's value is written to the record on save.
    pub fn is_persisted(&self) -> bool {
        !self.disabled || self.dehydrated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormSection {
    pub title: String,
    pub fields: Vec<FormField>,
}

impl FormSection {
    pub fn new(title: impl Into<String>, fields: Vec<FormField>) -> Self {
        Self {
            title: title.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormGroup {
    pub column_span: u8,
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    pub columns: u8,
    pub groups: Vec<FormGroup>,
}

impl FormSchema {
    /// Every field in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FormField> {
        self.groups
            .iter()
            .flat_map(|group| group.sections.iter())
            .flat_map(|section| section.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields().find(|field| field.name == name)
    }

    pub fn section(&self, title: &str) -> Option<&FormSection> {
        self.groups
            .iter()
            .flat_map(|group| group.sections.iter())
            .find(|section| section.title == title)
    }
}
