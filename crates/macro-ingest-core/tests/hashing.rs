use std::collections::{BTreeMap, HashMap};

use macro_ingest_core::{stable_payload_hash, CanonicalValue};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e12f64..1.0e12).prop_map(Value::from),
        "[a-zA-Z0-9 ,()é-]{0,12}".prop_map(Value::String),
    ]
}

fn payload() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[A-Za-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Same content, object entries inserted in reverse order.
fn reorder(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut reordered = Map::new();
            for (k, v) in map.iter().rev() {
                reordered.insert(k.clone(), reorder(v));
            }
            Value::Object(reordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(reorder).collect()),
        other => other.clone(),
    }
}

proptest! {
    #[test]
    fn key_order_never_changes_hash(value in payload()) {
        let original = stable_payload_hash(&value).unwrap();
        let shuffled = stable_payload_hash(&reorder(&value)).unwrap();
        prop_assert_eq!(original, shuffled);
    }

    #[test]
    fn hash_is_lowercase_sha256_hex(value in payload()) {
        let hash = stable_payload_hash(&value).unwrap();
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hashmap_and_btreemap_agree(entries in prop::collection::vec(("[a-z]{1,6}", any::<i32>()), 0..10)) {
        let hashed: HashMap<String, i32> = entries.iter().cloned().collect();
        let sorted: BTreeMap<String, i32> = hashed.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(
            stable_payload_hash(&hashed).unwrap(),
            stable_payload_hash(&sorted).unwrap()
        );
    }
}

#[test]
fn serde_value_and_typed_struct_hash_equally() {
    #[derive(serde::Serialize)]
    struct Params<'a> {
        #[serde(rename = "TableName")]
        table_name: &'a str,
        #[serde(rename = "Year")]
        year: &'a str,
    }

    let typed = Params {
        table_name: "SQPCE",
        year: "ALL",
    };
    let untyped = json!({"Year": "ALL", "TableName": "SQPCE"});
    assert_eq!(
        stable_payload_hash(&typed).unwrap(),
        stable_payload_hash(&untyped).unwrap()
    );
}

#[test]
fn whitespace_in_source_text_is_irrelevant() {
    let compact: Value = serde_json::from_str(r#"{"a":[1,2],"b":{"c":null}}"#).unwrap();
    let spaced: Value = serde_json::from_str("{\n  \"b\" : { \"c\" : null },\n  \"a\" : [ 1, 2 ]\n}").unwrap();
    assert_eq!(
        CanonicalValue::from(&compact).to_canonical_string(),
        CanonicalValue::from(&spaced).to_canonical_string()
    );
}
