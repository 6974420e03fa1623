use super::form::{FieldKind, FormField, FormGroup, FormSchema, FormSection, Relationship};
use super::table::{BulkAction, RowAction, SelectFilter, TableColumn, TableView};
use super::{Navigation, Operation, Page, ResourceDefinition};

/// Admin resource for the `products` table.
pub fn product_resource() -> ResourceDefinition {
    ResourceDefinition {
        model: "Product".to_string(),
        table: "products".to_string(),
        navigation: Navigation {
            icon: "heroicon-o-square-3-stack-3d".to_string(),
            group: "Shop".to_string(),
        },
        form: form(),
        table_view: table_view(),
        pages: vec![
            Page::new("index", "/"),
            Page::new("create", "/create"),
            Page::new("edit", "/{record}/edit"),
        ],
    }
}

fn form() -> FormSchema {
    let information = FormSection::new(
        "Product Information",
        vec![
            FormField::text_input("name")
                .required()
                .max_length(255)
                .live_on_blur()
                .slug_into("slug", Operation::Create),
            FormField::text_input("slug")
                .required()
                .disabled(true)
                .max_length(255)
                .unique(),
            FormField::markdown_editor("description", Some("products"))
                .nullable()
                .column_span_full(),
        ],
    );

    let images = FormSection::new(
        "Images",
        vec![FormField::file_upload(
            "images",
            FieldKind::FileUpload {
                directory: "products".to_string(),
                multiple: true,
                image: true,
                accepted_file_types: vec!["image/*".to_string()],
                reorderable: true,
                max_files: Some(10),
            },
        )],
    );

    let pricing = FormSection::new(
        "Pricing",
        vec![FormField::number_input("price", Some("$"), Some("0.01")).required()],
    );

    let associations = FormSection::new(
        "Associations",
        vec![
            FormField::select("category_id", Relationship::new("category", "name")).required(),
            FormField::select("brand_id", Relationship::new("brand", "name")).required(),
        ],
    );

    let status = FormSection::new(
        "Status",
        vec![
            FormField::toggle("is_active").required().default_value(true),
            FormField::toggle("is_featured").required().default_value(false),
            FormField::toggle("in_stock").required().default_value(true),
            FormField::toggle("on_sale").required().default_value(true),
        ],
    );

    FormSchema {
        columns: 3,
        groups: vec![
            FormGroup {
                column_span: 2,
                sections: vec![information, images],
            },
            FormGroup {
                column_span: 1,
                sections: vec![pricing, associations, status],
            },
        ],
    }
}

fn table_view() -> TableView {
    TableView {
        columns: vec![
            TableColumn::text("name").searchable().sortable(),
            TableColumn::text("category.name").searchable().sortable(),
            TableColumn::text("brand.name").searchable().sortable(),
            TableColumn::money("price", "USD").searchable().sortable(),
            TableColumn::boolean_icon("is_featured").label("Featured").sortable(),
            TableColumn::boolean_icon("is_active").label("Active").sortable(),
            TableColumn::boolean_icon("in_stock").label("In Stock").sortable(),
            TableColumn::boolean_icon("on_sale").label("On Sale").sortable(),
            TableColumn::date_time("created_at").sortable().toggleable(true),
            TableColumn::date_time("updated_at").sortable().toggleable(true),
        ],
        filters: vec![
            SelectFilter {
                field: "category_id".to_string(),
                relationship: Relationship::new("category", "name"),
            },
            SelectFilter {
                field: "brand_id".to_string(),
                relationship: Relationship::new("brand", "name"),
            },
        ],
        actions: vec![RowAction::View, RowAction::Edit, RowAction::ForceDelete],
        bulk_actions: vec![BulkAction::Delete],
    }
}
