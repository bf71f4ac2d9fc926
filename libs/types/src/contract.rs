//! Contract metadata extraction
//!
//! Feeds attach broker contract details either at the top level of the
//! snapshot metadata or nested under a `contract` object. Signals and
//! events carry a flattened copy of these fields.

use serde_json::{Map, Value};

/// Keys copied from snapshot metadata into signal metadata
pub const CONTRACT_METADATA_KEYS: [&str; 8] = [
    "subscription_id",
    "symbol",
    "sec_type",
    "exchange",
    "currency",
    "local_symbol",
    "trading_class",
    "primary_exchange",
];

/// Merge contract fields from `sources` into a flat map.
///
/// Each source is searched at its top level first, then inside its nested
/// `contract` object. The first non-null value per key wins. Strings are
/// trimmed and empty strings skipped.
pub fn extract_contract_metadata(sources: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut merged = Map::new();
    for source in sources {
        let mut stack: Vec<&Map<String, Value>> = vec![*source];
        if let Some(Value::Object(contract)) = source.get("contract") {
            stack.push(contract);
        }
        for candidate in stack {
            for key in CONTRACT_METADATA_KEYS {
                if merged.contains_key(key) {
                    continue;
                }
                let value = match candidate.get(key) {
                    None | Some(Value::Null) => continue,
                    Some(Value::String(text)) => {
                        let trimmed = text.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        Value::String(trimmed.to_string())
                    }
                    Some(other) => other.clone(),
                };
                merged.insert(key.to_string(), value);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_wins_over_nested_contract() {
        let metadata = json!({
            "symbol": " ES ",
            "exchange": "",
            "contract": {"symbol": "MES", "exchange": "CME", "currency": "USD"},
            "unrelated": 1
        });
        let map = metadata.as_object().unwrap();
        let extracted = extract_contract_metadata(&[map]);

        assert_eq!(extracted["symbol"], json!("ES"));
        assert_eq!(extracted["exchange"], json!("CME"));
        assert_eq!(extracted["currency"], json!("USD"));
        assert!(!extracted.contains_key("unrelated"));
    }

    #[test]
    fn test_empty_sources_yield_empty_map() {
        let empty = Map::new();
        assert!(extract_contract_metadata(&[&empty]).is_empty());
    }
}
