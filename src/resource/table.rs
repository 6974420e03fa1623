use super::form::Relationship;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDisplay {
    Text,
    Money { currency: String },
    BooleanIcon,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    /// Attribute path; `category.name` reads through the `category` relationship.
    pub path: String,
    pub display: ColumnDisplay,
    pub label: Option<String>,
    pub searchable: bool,
    pub sortable: bool,
    pub toggleable: bool,
    pub hidden_by_default: bool,
}

impl TableColumn {
    fn new(path: impl Into<String>, display: ColumnDisplay) -> Self {
        Self {
            path: path.into(),
            display,
            label: None,
            searchable: false,
            sortable: false,
            toggleable: false,
            hidden_by_default: false,
        }
    }

    pub fn text(path: impl Into<String>) -> Self {
        Self::new(path, ColumnDisplay::Text)
    }

    pub fn money(path: impl Into<String>, currency: impl Into<String>) -> Self {
        Self::new(
            path,
            ColumnDisplay::Money {
                currency: currency.into(),
            },
        )
    }

    pub fn boolean_icon(path: impl Into<String>) -> Self {
        Self::new(path, ColumnDisplay::BooleanIcon)
    }

    pub fn date_time(path: impl Into<String>) -> Self {
        Self::new(path, ColumnDisplay::DateTime)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn toggleable(mut self, hidden_by_default: bool) -> Self {
        self.toggleable = true;
        self.hidden_by_default = hidden_by_default;
        self
    }

    /// `(relationship, attribute)` for dotted paths.
    pub fn relationship(&self) -> Option<(&str, &str)> {
        self.path.split_once('.')
    }

    /// Column of the resource's own table this column depends on.
    pub fn source_column(&self) -> String {
        match self.relationship() {
            Some((relation, _)) => format!("{}_id", relation),
            None => self.path.clone(),
        }
    }

    /// Explicit label, or the path turned into words: `created_at` → `Created at`.
    pub fn heading(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let words = self.path.replace(['.', '_'], " ");
        let mut chars = words.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectFilter {
    pub field: String,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    View,
    Edit,
    ForceDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub columns: Vec<TableColumn>,
    pub filters: Vec<SelectFilter>,
    /// Row actions, rendered together as one action group.
    pub actions: Vec<RowAction>,
    /// Bulk actions, rendered together as one bulk action group.
    pub bulk_actions: Vec<BulkAction>,
}

impl TableView {
    pub fn column(&self, path: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|column| column.path == path)
    }

    /// Columns shown when the user has not toggled anything.
    pub fn default_visible_columns(&self) -> impl Iterator<Item = &TableColumn> {
        self.columns.iter().filter(|column| !column.hidden_by_default)
    }

    pub fn searchable_columns(&self) -> impl Iterator<Item = &TableColumn> {
        self.columns.iter().filter(|column| column.searchable)
    }

    pub fn sortable_columns(&self) -> impl Iterator<Item = &TableColumn> {
        self.columns.iter().filter(|column| column.sortable)
    }
}
