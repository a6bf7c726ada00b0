//! Property tests for canonical cache keys.

use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};

use stac_search::cache::cache_key;

fn distinct_pairs() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z:_]{1,12}", any::<i64>(), 0..16)
        .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn map_key_ignores_insertion_order(pairs in distinct_pairs()) {
        let forward: HashMap<String, i64> = pairs.iter().cloned().collect();
        let mut backward = HashMap::new();
        for (k, v) in pairs.iter().rev() {
            backward.insert(k.clone(), *v);
        }
        let sorted: BTreeMap<String, i64> = pairs.iter().cloned().collect();

        prop_assert_eq!(cache_key("f", &forward), cache_key("f", &backward));
        prop_assert_eq!(cache_key("f", &forward), cache_key("f", &sorted));
    }

    #[test]
    fn set_key_ignores_order_and_duplicates(items in prop::collection::vec("[a-z0-9-]{1,10}", 0..16)) {
        let once: HashSet<String> = items.iter().cloned().collect();
        let twice: HashSet<String> = items.iter().chain(items.iter()).rev().cloned().collect();
        prop_assert_eq!(cache_key("f", &once), cache_key("f", &twice));
    }

    #[test]
    fn sequence_key_keeps_order(items in prop::collection::vec(any::<u32>(), 2..16)) {
        let reversed: Vec<u32> = items.iter().rev().cloned().collect();
        prop_assume!(items != reversed);
        prop_assert_ne!(cache_key("f", &items), cache_key("f", &reversed));
    }

    #[test]
    fn whole_floats_match_integers(n in -(1i64 << 52)..(1i64 << 52)) {
        prop_assert_eq!(cache_key("f", &n), cache_key("f", &(n as f64)));
    }

    #[test]
    fn large_whole_floats_match_integers(mantissa in any::<i32>(), shift in 0u32..31) {
        // At most 32 significant bits, so the float is exact.
        let n = (mantissa as i64) << shift;
        prop_assert_eq!(cache_key("f", &n), cache_key("f", &(n as f64)));
        prop_assert_eq!(cache_key("f", &vec![n]), cache_key("f", &serde_json::json!([n as f64])));
    }

    #[test]
    fn function_identity_separates_keys(arg in ".{0,32}", a in "[a-z_]{1,16}", b in "[a-z_]{1,16}") {
        prop_assume!(a != b);
        prop_assert_ne!(cache_key(&a, arg.as_str()), cache_key(&b, arg.as_str()));
    }

    #[test]
    fn json_and_native_maps_agree(pairs in distinct_pairs()) {
        let native: HashMap<String, i64> = pairs.iter().cloned().collect();
        let json = serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
                .collect(),
        );
        prop_assert_eq!(cache_key("f", &native), cache_key("f", &json));
    }
}
