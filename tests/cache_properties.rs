//! Property-based checks for cache bounds and compile/render invariants

use doctemplate::cache::{CacheKey, CacheLimits, LruCache};
use doctemplate::{compile, render, render_str, Fingerprint, Value, Variables};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    group: u8,
    n: u8,
}

impl CacheKey for Key {
    type Group = u8;

    fn group(&self) -> &u8 {
        &self.group
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(Key, usize),
    Get(Key),
    InvalidateGroup(u8),
}

fn key_strategy() -> impl Strategy<Value = Key> {
    (0u8..4, 0u8..16).prop_map(|(group, n)| Key { group, n })
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (key_strategy(), 0usize..40).prop_map(|(key, len)| Op::Put(key, len)),
        2 => key_strategy().prop_map(Op::Get),
        1 => (0u8..4).prop_map(Op::InvalidateGroup),
    ]
}

fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("reserved word", |name| name != "else")
}

proptest! {
    /// Property: no operation sequence pushes a cache past either budget
    #[test]
    fn cache_never_exceeds_its_limits(
        max_entries in 0usize..8,
        max_bytes in 0usize..64,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let cache: LruCache<Key, String> =
            LruCache::new(CacheLimits::new(max_entries, max_bytes), String::len);

        for op in ops {
            match op {
                Op::Put(key, len) => {
                    let admitted = cache.put(key.clone(), "x".repeat(len));
                    if admitted {
                        // The entry just written is never its own eviction victim.
                        prop_assert_eq!(cache.peek(&key).map(|v| v.len()), Some(len));
                    } else {
                        prop_assert!(max_entries == 0 || len > max_bytes);
                    }
                }
                Op::Get(key) => {
                    let _ = cache.get(&key);
                }
                Op::InvalidateGroup(group) => {
                    cache.invalidate_group(&group);
                    for n in 0..16 {
                        let key = Key { group, n };
                        prop_assert!(!cache.contains(&key));
                    }
                }
            }

            let stats = cache.stats();
            prop_assert!(cache.len() <= max_entries);
            prop_assert!(cache.total_bytes() <= max_bytes);
            prop_assert_eq!(stats.entries, cache.len());
            prop_assert_eq!(stats.bytes, cache.total_bytes());
        }
    }

    /// Property: text without tags renders unchanged
    #[test]
    fn plain_text_renders_verbatim(text in "[^{]{0,64}") {
        let out = render_str(&text, &Variables::new()).unwrap();
        prop_assert_eq!(out, text);
    }

    /// Property: a bound string variable substitutes exactly
    #[test]
    fn substitution_inserts_the_bound_string(
        name in identifier_strategy(),
        value in "[^{]{0,20}",
        prefix in "[^{]{0,10}",
    ) {
        let source = format!("{prefix}{{{{{name}}}}}");
        let mut variables = Variables::new();
        variables.insert(name.clone(), Value::from(value.as_str()));

        let compiled = compile(&source).unwrap();
        prop_assert_eq!(compiled.variables().len(), 1);
        let out = render(&compiled, &variables, true).unwrap();
        prop_assert_eq!(out, format!("{prefix}{value}"));
    }

    /// Property: rendering depends only on the template and the variables
    #[test]
    fn render_is_deterministic(
        items in prop::collection::vec("[a-z]{1,6}", 0..6),
        flag in any::<bool>(),
    ) {
        let source = "{{#if flag}}on{{else}}off{{/if}}:{{#each items}}<{{.}}>{{/each}}";
        let mut variables = Variables::new();
        variables.insert("flag".into(), Value::from(flag));
        variables.insert("items".into(), Value::from(items.clone()));

        let first = render_str(source, &variables).unwrap();
        let second = render_str(source, &variables.clone()).unwrap();
        prop_assert_eq!(&first, &second);

        let expected_items: String = items.iter().map(|item| format!("<{item}>")).collect();
        let expected = format!("{}:{}", if flag { "on" } else { "off" }, expected_items);
        prop_assert_eq!(first, expected);
    }

    /// Property: equal variable sets fingerprint equally, different ones do not collide
    #[test]
    fn variable_fingerprints_track_equality(
        a in prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..5),
        b in prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..5),
    ) {
        let to_vars = |map: &std::collections::BTreeMap<String, String>| -> Variables {
            map.iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect()
        };
        let (va, vb) = (to_vars(&a), to_vars(&b));
        prop_assert_eq!(
            Fingerprint::of_variables(&va) == Fingerprint::of_variables(&vb),
            a == b
        );
    }
}
