//! The per-app depot key registry (`Key.vdf`).
//!
//! Each app branch carries a VDF document accumulating every depot
//! decryption key ever seen for that app:
//!
//! ```text
//! "depots"
//! {
//!     "228983"
//!     {
//!         "DecryptionKey" "0123..ef"
//!     }
//! }
//! ```
//!
//! The registry is append-only across a branch's history: keys are upserted,
//! never removed. A malformed or missing document is treated as empty.

use keyvalues_parser::{Obj, Value, Vdf};
use std::borrow::Cow;
use std::collections::BTreeMap;

const ROOT_KEY: &str = "depots";
const DECRYPTION_KEY: &str = "DecryptionKey";

/// Upsert one depot key into the registry text, returning the new document.
///
/// `existing` is the current `Key.vdf` content, if any; decode failures fall
/// back to an empty registry rather than erroring.
pub fn upsert(existing: Option<&str>, depot_id: u32, key_hex: &str) -> String {
    let mut keys = decryption_keys(existing.unwrap_or_default());
    keys.insert(depot_id.to_string(), key_hex.to_string());
    render(&keys)
}

/// Extract the `depot id -> hex key` map from registry text.
///
/// Entries that do not follow the expected shape are skipped; undecodable
/// documents yield an empty map.
pub fn decryption_keys(text: &str) -> BTreeMap<String, String> {
    let mut keys = BTreeMap::new();
    let Ok(vdf) = Vdf::parse(text) else {
        return keys;
    };
    let Value::Obj(ref depots) = vdf.value else {
        return keys;
    };
    for (depot, values) in depots.iter() {
        let Some(Value::Obj(entry)) = values.first() else {
            continue;
        };
        let Some(Value::Str(key)) = entry.get(DECRYPTION_KEY).and_then(|v| v.first()) else {
            continue;
        };
        keys.insert(depot.to_string(), key.to_string());
    }
    keys
}

fn render(keys: &BTreeMap<String, String>) -> String {
    let mut depots = Obj::new();
    for (depot, key) in keys {
        let mut entry = Obj::new();
        entry.insert(
            Cow::Borrowed(DECRYPTION_KEY),
            vec![Value::Str(Cow::Owned(key.clone()))],
        );
        depots.insert(Cow::Owned(depot.clone()), vec![Value::Obj(entry)]);
    }
    let vdf = Vdf {
        key: Cow::Borrowed(ROOT_KEY),
        value: Value::Obj(depots),
    };
    vdf.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_into_empty() {
        let text = upsert(None, 20, "aa".repeat(32).as_str());
        let keys = decryption_keys(&text);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["20"], "aa".repeat(32));
    }

    #[test]
    fn test_upsert_accumulates_and_replaces() {
        let text = upsert(None, 20, "aa");
        let text = upsert(Some(&text), 21, "bb");
        let keys = decryption_keys(&text);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["20"], "aa");
        assert_eq!(keys["21"], "bb");

        // Same depot again replaces the key in place.
        let text = upsert(Some(&text), 20, "cc");
        let keys = decryption_keys(&text);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["20"], "cc");
        assert_eq!(keys["21"], "bb");
    }

    #[test]
    fn test_garbage_document_treated_as_empty() {
        assert!(decryption_keys("{{{{ not vdf").is_empty());
        assert!(decryption_keys("").is_empty());

        let text = upsert(Some("{{{{ not vdf"), 20, "aa");
        assert_eq!(decryption_keys(&text).len(), 1);
    }

    #[test]
    fn test_render_parses_back() {
        let text = upsert(None, 441, "0f".repeat(32).as_str());
        // The rendered document must be a parseable VDF with our root key.
        let vdf = Vdf::parse(&text).expect("rendered VDF parses");
        assert_eq!(vdf.key, "depots");
        assert!(matches!(vdf.value, Value::Obj(_)));
    }

    #[test]
    fn test_malformed_entries_skipped() {
        // A depot whose value is a string rather than an object.
        let text = "\"depots\"\n{\n\t\"20\"\t\"oops\"\n\t\"21\"\n\t{\n\t\t\"DecryptionKey\"\t\"bb\"\n\t}\n}\n";
        let keys = decryption_keys(text);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["21"], "bb");
    }
}
