mod common;

use chrono::NaiveDate;
use common::{shop_schema, test_config};
use querypilot::context::{clip, ContextClipper};
use querypilot::error::PilotError;
use querypilot::intent::{ColumnRef, Intent, IntentExtractor};
use querypilot::knowledge::{KnowledgeIndex, KnowledgeStore};
use querypilot::semantic::{ColumnType, SemanticColumn, SemanticRelationship, SemanticSchema, SemanticTable};

fn extractor() -> IntentExtractor {
    let config = test_config();
    IntentExtractor::new(config.extraction.clone()).with_reference_date(config.reference_date)
}

#[test]
fn test_total_orders_by_status_stays_on_orders() {
    let index = KnowledgeIndex::build(shop_schema()).unwrap();
    let extraction = extractor().extract("total orders by status", &index).unwrap();
    let intent = &extraction.intent;

    assert_eq!(intent.tables, vec!["orders"]);
    assert!(intent.columns.contains(&ColumnRef::new("orders", "status")));
    assert!(intent.columns.contains(&ColumnRef::new("orders", "amount")));
    assert!(extraction.confidence > 0.0 && extraction.confidence <= 1.0);

    let context = ContextClipper::new(10).clip(intent, &index).unwrap();
    assert_eq!(context.tables.len(), 1);
    assert!(context.relationships.is_empty());
}

#[test]
fn test_orders_for_customer_last_month() {
    let index = KnowledgeIndex::build(shop_schema()).unwrap();
    let extraction = extractor()
        .extract("show orders for customer Acme last month", &index)
        .unwrap();
    let intent = &extraction.intent;

    let range = intent.date_range.as_ref().expect("date range");
    assert_eq!(range.alias, "last month");
    assert_eq!(range.start, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
    assert_eq!(range.end, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    assert_eq!(range.column, Some(ColumnRef::new("orders", "created_at")));

    let serialized = serde_json::to_value(intent).unwrap();
    assert_eq!(serialized["date_range"]["start"], "2025-02-01");

    let context = ContextClipper::new(10).clip(intent, &index).unwrap();
    assert!(context.table("customers").is_some());
    assert_eq!(context.relationships.len(), 1);
    assert!(context.relationships[0].connects("orders", "customers"));
    assert_eq!(context.date_aliases.len(), 1);
    assert_eq!(context.date_aliases[0].name, "last month");
}

#[test]
fn test_unrelated_question_is_an_explicit_failure() {
    let index = KnowledgeIndex::build(shop_schema()).unwrap();
    let err = extractor().extract("what is the weather in Paris", &index).unwrap_err();
    assert!(matches!(err, PilotError::NoIntentMatch { .. }));
}

#[test]
fn test_extraction_and_clipping_are_idempotent() {
    let index = KnowledgeIndex::build(shop_schema()).unwrap();
    let question = "top 3 orders for customer last month";
    let first = extractor().extract(question, &index).unwrap();
    let second = extractor().extract(question, &index).unwrap();
    assert_eq!(first, second);

    let a = clip(&first.intent, &index, 10).unwrap();
    let b = clip(&second.intent, &index, 10).unwrap();
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}

#[test]
fn test_index_build_is_deterministic_and_cached() {
    let a = KnowledgeIndex::build(shop_schema()).unwrap();
    let b = KnowledgeIndex::build(shop_schema()).unwrap();
    assert_eq!(a, b);

    let store = KnowledgeStore::new();
    let first = store.configure("shop", shop_schema()).unwrap();
    let again = store.configure("shop", shop_schema()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));

    let mut changed = shop_schema();
    changed.tables[0].description = "Purchases".into();
    let rebuilt = store.configure("shop", changed).unwrap();
    assert_ne!(rebuilt.fingerprint(), first.fingerprint());
    // readers holding the old index keep a consistent view
    assert_eq!(first.schema().tables[0].description, "Orders placed in the shop");
}

#[test]
fn test_dangling_relationship_rejected_before_indexing() {
    let mut schema = shop_schema();
    schema
        .relationships
        .push(SemanticRelationship::new("orders.region_id", "regions.id").unwrap());
    assert!(matches!(KnowledgeIndex::build(schema), Err(PilotError::SchemaInvalid(_))));
}

/// `n` satellite tables, each related to `facts` through its own key column
fn fan_schema(n: usize) -> SemanticSchema {
    let mut facts = vec![SemanticColumn::new("id", ColumnType::Integer)];
    let mut tables = Vec::new();
    let mut relationships = Vec::new();
    for i in 0..n {
        facts.push(SemanticColumn::new(format!("dim{}_id", i), ColumnType::Integer));
        tables.push(SemanticTable::new(
            format!("dim{}", i),
            vec![SemanticColumn::new("id", ColumnType::Integer)],
        ));
        relationships.push(
            SemanticRelationship::new(&format!("facts.dim{}_id", i), &format!("dim{}.id", i)).unwrap(),
        );
    }
    tables.insert(0, SemanticTable::new("facts", facts));
    SemanticSchema {
        tables,
        relationships,
        ..Default::default()
    }
}

#[test]
fn test_one_relationship_over_the_cap_drops_the_lowest_ranked() {
    let max = test_config().max_relationships;
    let index = KnowledgeIndex::build(fan_schema(max + 1)).unwrap();
    let intent = Intent {
        tables: index.tables().iter().map(|t| t.name.clone()).collect(),
        columns: vec![ColumnRef::new("facts", format!("dim{}_id", max))],
        ..Default::default()
    };

    let context = clip(&intent, &index, max).unwrap();
    assert_eq!(context.relationships.len(), max);
    // the referenced relationship is declared last but outranks the ties
    assert!(context.relationships.iter().any(|r| r.target_table == format!("dim{}", max)));
    assert!(context.relationships.iter().all(|r| r.target_table != format!("dim{}", max - 1)));
    for rel in &context.relationships {
        assert!(context.table(&rel.source_table).is_some());
        assert!(context.table(&rel.target_table).is_some());
    }

    let again = clip(&intent, &index, max).unwrap();
    assert_eq!(context, again);
}
