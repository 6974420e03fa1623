use std::time::Duration;

use rowshift::migrations::{builtin_plan, m0001};
use rowshift::resource::{Operation, Record, Rule};
use rowshift::{
    Column, DataType, MemoryStateStore, MigrateError, Migrator, MigratorConfig, TableSchema, Value,
    product_resource,
};
use tempfile::TempDir;

fn new_product(name: &str) -> Record {
    let product = product_resource();
    let mut record = Record::new();
    product.field_updated(Operation::Create, "name", Value::from(name), &mut record);
    product.field_updated(Operation::Create, "price", Value::Float(19.99), &mut record);
    product.field_updated(Operation::Create, "category_id", Value::Integer(1), &mut record);
    product.field_updated(Operation::Create, "brand_id", Value::Integer(2), &mut record);
    product.apply_defaults(&mut record);
    record
}

#[tokio::test]
async fn test_validated_record_fits_migrated_table() {
    let dir = TempDir::new().unwrap();
    let config = MigratorConfig::new(dir.path().join("state.json"))
        .lock_timeout(Duration::from_secs(5))
        .lock_poll_interval(Duration::from_millis(10));
    let mut migrator = Migrator::open(builtin_plan().unwrap(), MemoryStateStore::new(), config)
        .await
        .unwrap()
        .with_resource(product_resource());
    migrator.migrate_up(None).await.unwrap();

    let product = product_resource();
    let mut record = new_product("Wireless Mouse");
    assert_eq!(record.get("slug"), Some(&Value::from("wireless-mouse")));
    assert!(product.validate(&record, Operation::Create, &[]).is_empty());

    record.insert("id".to_string(), Value::Integer(1));
    let products = migrator.storage_mut().get_table_mut("products").unwrap();
    let id = products
        .insert_named(record.iter().map(|(k, v)| (k.as_str(), v.clone())))
        .unwrap();
    assert_eq!(
        products.value(id, "on_sale").unwrap(),
        Some(&Value::Boolean(true))
    );

    // Same name again: the derived slug collides.
    let duplicate = new_product("Wireless  Mouse!");
    let violations = product.validate(&duplicate, Operation::Create, &[record]);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field, "slug");
    assert_eq!(violations[0].rule, Rule::Unique);
}

#[test]
fn test_compatibility_with_created_table() {
    let product = product_resource();
    assert!(product.check_compatibility(&m0001::products()).is_ok());
}

#[test]
fn test_compatibility_errors_name_the_field() {
    let product = product_resource();
    let products = m0001::products();

    let without_slug: Vec<Column> = products
        .schema()
        .columns()
        .iter()
        .filter(|c| c.name != "slug")
        .cloned()
        .collect();
    let err = product
        .check_compatibility(&TableSchema::new("products", without_slug))
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::ResourceIncompatible { ref field, .. } if field == "slug"
    ));

    let text_price: Vec<Column> = products
        .schema()
        .columns()
        .iter()
        .map(|c| match c.name.as_str() {
            "price" => c.clone().with_type(DataType::Text),
            _ => c.clone(),
        })
        .collect();
    let err = product
        .check_compatibility(&TableSchema::new("products", text_price))
        .unwrap_err();
    assert!(err.to_string().contains("'price'"));

    let without_brand: Vec<Column> = products
        .schema()
        .columns()
        .iter()
        .filter(|c| c.name != "brand_id")
        .cloned()
        .collect();
    let err = product
        .check_compatibility(&TableSchema::new("products", without_brand))
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::ResourceIncompatible { ref field, .. } if field == "brand_id"
    ));
}

#[test]
fn test_edit_keeps_slug_and_checks_lengths() {
    let product = product_resource();
    let mut record = new_product("Desk Lamp");
    record.insert("id".to_string(), Value::Integer(4));
    let stored = vec![record.clone()];

    product.field_updated(
        Operation::Edit,
        "name",
        Value::Text("L".repeat(256)),
        &mut record,
    );
    assert_eq!(record.get("slug"), Some(&Value::from("desk-lamp")));

    let violations = product.validate(&record, Operation::Edit, &stored);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, Rule::MaxLength(255));
    assert_eq!(
        violations[0].to_string(),
        "name may not be longer than 255 characters"
    );
}

#[test]
fn test_column_defaults_match_form_defaults() {
    let product = product_resource();
    let products = m0001::products();
    let mut checked = 0;
    for field in product.form.fields() {
        let Some(default) = &field.default else {
            continue;
        };
        let column = products.column(&field.name).unwrap();
        assert_eq!(column.default.as_ref(), Some(default), "{}", field.name);
        checked += 1;
    }
    assert_eq!(checked, 4);
    assert_eq!(
        products.column("on_sale").unwrap().fill_value(),
        Value::Boolean(true)
    );
}
