use crate::core::{Column, DataType, StepId};
use crate::migration::MigrationStep;
use crate::storage::TableSchema;

pub const ID: StepId = StepId(2024_04_21_000000);

pub const ORDER_STATUSES: [&str; 6] = [
    "pending",
    "processing",
    "shipped",
    "declined",
    "delivered",
    "canceled",
];

pub fn order_status() -> Column {
    Column::new("status", DataType::enumeration(ORDER_STATUSES))
        .not_null()
        .default_value("pending")
}

pub fn products() -> TableSchema {
    TableSchema::new(
        "products",
        vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("category_id", DataType::Integer).not_null(),
            Column::new("brand_id", DataType::Integer).not_null(),
            Column::new("name", DataType::Varchar(255)).not_null(),
            Column::new("slug", DataType::Varchar(255)).not_null(),
            Column::new("images", DataType::Text),
            Column::new("description", DataType::Text),
            Column::new("price", DataType::Float).not_null(),
            Column::new("is_active", DataType::Boolean).not_null().default_value(true),
            Column::new("is_featured", DataType::Boolean).not_null().default_value(false),
            Column::new("in_stock", DataType::Boolean).not_null().default_value(true),
            Column::new("on_sale", DataType::Boolean).not_null().default_value(true),
            Column::new("created_at", DataType::Text),
            Column::new("updated_at", DataType::Text),
        ],
    )
}

pub fn orders() -> TableSchema {
    TableSchema::new(
        "orders",
        vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("user_id", DataType::Integer).not_null(),
            Column::new("grand_total", DataType::Float),
            order_status(),
            Column::new("created_at", DataType::Text),
        ],
    )
}

pub fn step() -> MigrationStep {
    MigrationStep::new(ID, "create shop tables")
        .create_table(products())
        .create_table(orders())
}
