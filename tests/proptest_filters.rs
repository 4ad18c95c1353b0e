//! Property-based tests using proptest
//!
//! These cover the laws the output pipeline and the argument and resource
//! parsers promise for arbitrary inputs.

use futures::stream::{self, StreamExt};
use gcmd::cli::{ArgType, ArgValue};
use gcmd::config::Environment;
use gcmd::console::Console;
use gcmd::output::{print_stream, OutputOptions};
use gcmd::resource::{ParseContext, Registry};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Generate arbitrary VM instance data for testing
fn arb_instance() -> impl Strategy<Value = Value> {
    (
        "[a-z][a-z0-9-]{0,20}",
        prop_oneof!["RUNNING", "STOPPED", "TERMINATED", "STAGING"],
        0i64..1000,
    )
        .prop_map(|(name, status, size)| json!({"name": name, "status": status, "size": size}))
}

fn arb_instance_list() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(arb_instance(), 0..60)
}

/// Run `items` through the pipeline with `--format=disable`, which returns
/// what would have been printed.
fn pipeline(items: &[Value], filter: Option<&str>, sort_by: &[String], limit: Option<usize>) -> Vec<Value> {
    let options = OutputOptions::new(Some("disable"), "json", filter, sort_by, limit, false).unwrap();
    let (console, _captured) = Console::captured("", false);
    let source = stream::iter(items.to_vec().into_iter().map(Ok)).boxed();
    tokio_test::block_on(print_stream(source, &options, &console)).unwrap()
}

fn size(item: &Value) -> i64 {
    item["size"].as_i64().unwrap_or_default()
}

proptest! {
    /// Filtering then limiting keeps the first `limit` matches in server order.
    #[test]
    fn filter_then_limit_is_prefix_of_matches(
        items in arb_instance_list(),
        threshold in 0i64..1000,
        limit in 0usize..20,
    ) {
        let filter = format!("size>={threshold}");
        let printed = pipeline(&items, Some(&filter), &[], Some(limit));
        let expected: Vec<Value> = items.iter().filter(|i| size(i) >= threshold).take(limit).cloned().collect();
        prop_assert_eq!(printed, expected);
    }

    /// Status equality is exact on the enumerated values.
    #[test]
    fn status_filter_selects_exactly(items in arb_instance_list()) {
        let printed = pipeline(&items, Some("status=RUNNING"), &[], None);
        prop_assert!(printed.iter().all(|i| i["status"] == "RUNNING"));
        let running = items.iter().filter(|i| i["status"] == "RUNNING").count();
        prop_assert_eq!(printed.len(), running);
    }

    /// Sorting orders every adjacent pair and never drops items.
    #[test]
    fn sort_by_orders_and_preserves(items in arb_instance_list(), descending in any::<bool>()) {
        let key = if descending { "~size" } else { "size" };
        let printed = pipeline(&items, None, &[key.to_string()], None);
        prop_assert_eq!(printed.len(), items.len());
        for pair in printed.windows(2) {
            if descending {
                prop_assert!(size(&pair[0]) >= size(&pair[1]));
            } else {
                prop_assert!(size(&pair[0]) <= size(&pair[1]));
            }
        }
    }

    /// A negated filter selects exactly the complement.
    #[test]
    fn negation_is_complement(items in arb_instance_list(), threshold in 0i64..1000) {
        let filter = format!("size>={threshold}");
        let kept = pipeline(&items, Some(&filter), &[], None).len();
        let dropped = pipeline(&items, Some(&format!("NOT {filter}")), &[], None).len();
        prop_assert_eq!(kept + dropped, items.len());
    }

    /// Durations print in a form that parses back to the same value.
    #[test]
    fn duration_text_parses_back(seconds in 0u64..10_000_000) {
        let env = Environment::default();
        let value = ArgValue::Duration(Duration::from_secs(seconds));
        let text = ArgType::Duration.format(&value);
        prop_assert_eq!(ArgType::Duration.parse("--timeout", &text, &env).unwrap(), value);
    }

    /// Lists print in a form that parses back, whatever the items hold.
    #[test]
    fn list_text_parses_back(
        items in prop::collection::vec("[a-z,;=\\\\ ]{0,6}", 0..5),
        delim in prop_oneof![Just(','), Just(';')],
    ) {
        prop_assume!(items != vec![String::new()]);
        let env = Environment::default();
        let kind = ArgType::List(delim);
        let value = ArgValue::List(items);
        let text = kind.format(&value);
        prop_assert_eq!(kind.parse("--zones", &text, &env).unwrap(), value);
    }

    /// Key/value pairs print in a form that parses back.
    #[test]
    fn key_values_text_parses_back(
        pairs in prop::collection::btree_map("[a-z,=\\\\]{1,5}", "[a-z,=\\\\ ]{0,5}", 0..4),
    ) {
        let env = Environment::default();
        let value = ArgValue::KeyValues(pairs.into_iter().collect());
        let text = ArgType::KeyValueList.format(&value);
        prop_assert_eq!(ArgType::KeyValueList.parse("--labels", &text, &env).unwrap(), value);
    }

    /// Integer bounds are enforced for every value.
    #[test]
    fn int_bounds_are_enforced(n in -1000i64..1000) {
        let env = Environment::default();
        let result = ArgType::int_at_least(1).parse("--threads", &n.to_string(), &env);
        prop_assert_eq!(result.is_ok(), n >= 1);
    }

    /// A self link parses back to the reference it came from.
    #[test]
    fn instance_self_link_parses_back(
        project in "[a-z][a-z0-9-]{4,20}[a-z0-9]",
        zone in "[a-z]{2,6}-[a-z]{2,8}[0-9]-[a-c]",
        instance in "[a-z][a-z0-9-]{0,20}[a-z0-9]",
    ) {
        let registry = Registry::builtin().unwrap();
        let ctx = ParseContext::default();
        let created = registry
            .create(
                "compute.instances",
                &[("project", project.as_str()), ("zone", zone.as_str()), ("instance", instance.as_str())],
            )
            .unwrap();
        let parsed = registry.parse("compute.instances", created.self_link(), &ctx).unwrap();
        prop_assert_eq!(parsed.name(), instance.as_str());
        prop_assert_eq!(parsed.get("zone"), Some(zone.as_str()));
        prop_assert_eq!(parsed, created);
    }
}
