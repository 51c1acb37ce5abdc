//! Deep key-case conversion for JSON payloads.
//!
//! Rails channels speak `snake_case`, Rust and JavaScript callers usually
//! think in `camelCase`. These helpers rename object keys at every depth
//! (arrays are walked, scalar values are never touched).
//!
//! # Example
//!
//! ```
//! use cable_session::transform::case::{to_camel_case_keys, to_snake_case_keys};
//! use serde_json::json;
//!
//! let outgoing = to_snake_case_keys(json!({ "roomId": 7, "tags": [{ "tagName": "x" }] }));
//! assert_eq!(outgoing, json!({ "room_id": 7, "tags": [{ "tag_name": "x" }] }));
//!
//! let incoming = to_camel_case_keys(outgoing);
//! assert_eq!(incoming, json!({ "roomId": 7, "tags": [{ "tagName": "x" }] }));
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

// ============================================================================
// Deep Conversion
// ============================================================================

/// Renames every object key to `snake_case`, recursively.
#[must_use]
pub fn to_snake_case_keys(value: Value) -> Value {
    map_keys(value, &snake_case)
}

/// Renames every object key to `camelCase`, recursively.
#[must_use]
pub fn to_camel_case_keys(value: Value) -> Value {
    map_keys(value, &camel_case)
}

fn map_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(object) => {
            let mut renamed = Map::with_capacity(object.len());
            for (key, inner) in object {
                renamed.insert(rename(&key), map_keys(inner, rename));
            }
            Value::Object(renamed)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| map_keys(item, rename)).collect())
        }
        scalar => scalar,
    }
}

// ============================================================================
// Key Conversion
// ============================================================================

/// Converts one key to `snake_case`.
///
/// Every ASCII uppercase letter starts a new word, so `fooBAR` becomes
/// `foo_b_a_r` and converts back to `fooBAR`. Hyphens and spaces become
/// underscores.
#[must_use]
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);

    for (index, ch) in key.chars().enumerate() {
        match ch {
            'A'..='Z' => {
                if index > 0 && !out.ends_with('_') {
                    out.push('_');
                }
                out.push(ch.to_ascii_lowercase());
            }
            '-' | ' ' => out.push('_'),
            _ => out.push(ch),
        }
    }

    out
}

/// Converts one key to `camelCase`.
///
/// Leading underscores are kept (`_id` stays `_id`); every other `_`, `-`
/// or space is dropped and the following character uppercased.
#[must_use]
pub fn camel_case(key: &str) -> String {
    let body = key.trim_start_matches('_');
    let mut out = String::with_capacity(key.len());
    out.push_str(&key[..key.len() - body.len()]);

    let mut upper_next = false;
    for (index, ch) in body.chars().enumerate() {
        match ch {
            '_' | '-' | ' ' => upper_next = true,
            _ if index == 0 => out.push(ch.to_ascii_lowercase()),
            _ if upper_next => {
                out.push(ch.to_ascii_uppercase());
                upper_next = false;
            }
            _ => out.push(ch),
        }
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_snake_case_keys() {
        assert_eq!(snake_case("roomId"), "room_id");
        assert_eq!(snake_case("RoomId"), "room_id");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("kebab-key"), "kebab_key");
        assert_eq!(snake_case("fooBAR"), "foo_b_a_r");
        assert_eq!(snake_case("item2Name"), "item2_name");
        assert_eq!(snake_case("_id"), "_id");
    }

    #[test]
    fn test_camel_case_keys() {
        assert_eq!(camel_case("room_id"), "roomId");
        assert_eq!(camel_case("Room_id"), "roomId");
        assert_eq!(camel_case("alreadyCamel"), "alreadyCamel");
        assert_eq!(camel_case("kebab-key"), "kebabKey");
        assert_eq!(camel_case("foo_b_a_r"), "fooBAR");
        assert_eq!(camel_case("_id"), "_id");
        assert_eq!(camel_case("__private_key"), "__privateKey");
    }

    #[test]
    fn test_deep_conversion_leaves_values() {
        let value = json!({
            "userName": "someValue",
            "nestedObject": { "innerKey": ["arrayValue", { "deepKey": null }] },
            "count": 3
        });

        let snake = to_snake_case_keys(value);
        assert_eq!(
            snake,
            json!({
                "user_name": "someValue",
                "nested_object": { "inner_key": ["arrayValue", { "deep_key": null }] },
                "count": 3
            })
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(to_snake_case_keys(json!("fooBar")), json!("fooBar"));
        assert_eq!(to_camel_case_keys(Value::Null), Value::Null);
        assert_eq!(to_camel_case_keys(json!(42)), json!(42));
    }

    #[test]
    fn test_snake_keys_do_not_round_trip() {
        // Only camelCase keys survive snake -> camel.
        let value = json!({ "room_id": 7, "roomName": "lobby" });
        assert_eq!(
            to_camel_case_keys(to_snake_case_keys(value)),
            json!({ "roomId": 7, "roomName": "lobby" })
        );

        // The opposite direction keeps them.
        assert_eq!(snake_case(&camel_case("room_id")), "room_id");
    }

    fn camel_key() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9]{0,12}"
    }

    fn camel_object() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z_ ]{0,8}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(camel_key(), inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_key_round_trip(key in camel_key()) {
            prop_assert_eq!(camel_case(&snake_case(&key)), key);
        }

        #[test]
        fn prop_deep_round_trip(value in camel_object()) {
            let round_tripped = to_camel_case_keys(to_snake_case_keys(value.clone()));
            prop_assert_eq!(round_tripped, value);
        }
    }
}
