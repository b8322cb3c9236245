use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use httpmock::prelude::*;
use serde_json::{json, Map, Value};

use mixpanel_flags::{
    FlagContext, LocalFlagsConfig, LocalFlagsProvider, SelectedVariant, EXPOSURE_EVENT_NAME,
};

type Tracked = Arc<Mutex<Vec<(String, String, Map<String, Value>)>>>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn serve(server: &MockServer, flags: Value) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/flags/definitions");
        then.status(200).json_body(json!({ "flags": flags }));
    })
}

fn start(server: &MockServer) -> (LocalFlagsProvider<'static>, Tracked) {
    init();
    let tracked = Tracked::default();
    let sink = tracked.clone();
    let provider = LocalFlagsConfig::from_token("test-token")
        .api_host(server.base_url())
        .enable_polling(false)
        .exposure_tracker(
            move |distinct_id: &str, event_name: &str, properties: Map<String, Value>| {
                sink.lock().unwrap().push((
                    distinct_id.to_owned(),
                    event_name.to_owned(),
                    properties,
                ));
            },
        )
        .to_provider()
        .unwrap();
    provider.start_polling_for_definitions().unwrap();
    (provider, tracked)
}

fn user(distinct_id: &str) -> FlagContext {
    [("distinct_id".to_owned(), json!(distinct_id))].into()
}

fn user_with_plan(distinct_id: &str, plan: &str) -> FlagContext {
    [
        ("distinct_id".to_owned(), json!(distinct_id)),
        ("custom_properties".to_owned(), json!({ "plan": plan })),
    ]
    .into()
}

#[test]
fn unknown_flag_returns_fallback_without_exposure() {
    let server = MockServer::start();
    serve(&server, json!([]));
    let (provider, tracked) = start(&server);

    assert!(provider.are_flags_ready());
    assert_eq!(
        provider.get_variant_value("missing", "fallback", &user("u")),
        json!("fallback")
    );
    assert!(tracked.lock().unwrap().is_empty());
}

#[test]
fn context_without_subject_returns_fallback() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "by-device",
            "context": "device_id",
            "ruleset": {
                "variants": [{"key": "on", "value": true, "split": 1.0}],
                "rollout": [{"rollout_percentage": 1.0}]
            }
        }]),
    );
    let (provider, tracked) = start(&server);

    let fallback = SelectedVariant::fallback("off");
    let result = provider.get_variant("by-device", fallback.clone(), &user("u"), true);

    assert_eq!(result, fallback);
    assert!(tracked.lock().unwrap().is_empty());
}

#[test]
fn test_user_override_takes_precedence() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "qa-flag",
            "context": "distinct_id",
            "ruleset": {
                "variants": [
                    {"key": "A", "value": "a", "split": 1.0},
                    {"key": "B", "value": "b", "split": 0.0}
                ],
                "rollout": [{"rollout_percentage": 1.0, "variant_override": {"key": "A"}}],
                "test": {"users": {"qa-user": "b"}}
            }
        }]),
    );
    let (provider, _) = start(&server);

    let qa = provider.get_variant("qa-flag", SelectedVariant::default(), &user("qa-user"), false);
    assert_eq!(qa.variant_key.as_deref(), Some("B"));
    assert_eq!(qa.variant_value, json!("b"));
    assert_eq!(qa.is_qa_tester, Some(true));

    let other = provider.get_variant("qa-flag", SelectedVariant::default(), &user("other"), false);
    assert_eq!(other.variant_key.as_deref(), Some("A"));
    assert_ne!(other.is_qa_tester, Some(true));
}

#[test]
fn runtime_rule_gates_rollout() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "premium-only",
            "context": "distinct_id",
            "ruleset": {
                "variants": [{"key": "on", "value": true, "split": 1.0}],
                "rollout": [{
                    "rollout_percentage": 1.0,
                    "runtime_evaluation_rule": {"==": [{"var": "plan"}, "Premium"]}
                }]
            }
        }]),
    );
    let (provider, _) = start(&server);

    assert!(provider.is_enabled("premium-only", &user_with_plan("u", "PREMIUM")));
    assert!(!provider.is_enabled("premium-only", &user_with_plan("u", "free")));
    assert!(!provider.is_enabled("premium-only", &user("u")));
}

#[test]
fn malformed_rules_fall_back() {
    let rules = [
        json!({"no_such_operation": [1, 2]}),
        json!({"==": [{"var": "plan"}]}),
        json!({"missing_some": [1, "plan"]}),
        json!({"==": [{"substr": [{"var": "plan"}, 1, 1e300]}, "remium"]}),
        json!({"==": [{"substr": [{"var": "plan"}, -1e300, -1e300]}, ""]}),
        json!({"if": []}),
        json!("true"),
    ];
    let flags: Vec<Value> = rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            json!({
                "key": format!("rule-{i}"),
                "context": "distinct_id",
                "ruleset": {
                    "variants": [{"key": "on", "value": "served", "split": 1.0}],
                    "rollout": [{"rollout_percentage": 1.0, "runtime_evaluation_rule": rule}]
                }
            })
        })
        .collect();
    let server = MockServer::start();
    serve(&server, Value::Array(flags));
    let (provider, tracked) = start(&server);

    let context = user_with_plan("u", "premium");
    for (i, rule) in rules.iter().enumerate() {
        assert_eq!(
            provider.get_variant_value(&format!("rule-{i}"), "fallback", &context),
            json!("fallback"),
            "rule {rule}"
        );
    }
    assert!(provider.get_all_variants(&context).is_empty());
    assert!(tracked.lock().unwrap().is_empty());
}

#[test]
fn rule_failure_moves_on_to_next_rollout() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "guarded",
            "context": "distinct_id",
            "ruleset": {
                "variants": [
                    {"key": "broken", "value": "broken", "split": 0.0},
                    {"key": "safe", "value": "safe", "split": 1.0}
                ],
                "rollout": [
                    {
                        "rollout_percentage": 1.0,
                        "runtime_evaluation_rule": {"substr": [{"var": "plan"}, 1, 1e300]},
                        "variant_override": {"key": "broken"}
                    },
                    {"rollout_percentage": 1.0, "variant_override": {"key": "safe"}}
                ]
            }
        }]),
    );
    let (provider, _) = start(&server);

    assert_eq!(
        provider.get_variant_value("guarded", "fallback", &user_with_plan("u", "premium")),
        json!("safe")
    );
}

#[test]
fn variant_splits_are_honored() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "split-flag",
            "context": "distinct_id",
            "ruleset": {
                "variants": [
                    {"key": "control", "value": "control", "split": 0.5},
                    {"key": "treatment", "value": "treatment", "split": 0.5}
                ],
                "rollout": [{
                    "rollout_percentage": 1.0,
                    "variant_splits": {"control": 0.9, "treatment": 0.1}
                }]
            }
        }]),
    );
    let (provider, _) = start(&server);

    let control = (0..200)
        .filter(|i| {
            provider.get_variant_value("split-flag", "fallback", &user(&format!("user-{i}")))
                == json!("control")
        })
        .count();

    assert!(control > 100, "control selected {control} times out of 200");
}

#[test]
fn exposure_payload() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "experiment-flag",
            "context": "distinct_id",
            "experiment_id": "exp-123",
            "is_experiment_active": true,
            "ruleset": {
                "variants": [{"key": "treatment", "value": "yes", "split": 1.0}],
                "rollout": [{"rollout_percentage": 1.0}]
            }
        }]),
    );
    let (provider, tracked) = start(&server);

    assert_eq!(
        provider.get_variant_value("experiment-flag", "no", &user("user-1")),
        json!("yes")
    );

    let tracked = tracked.lock().unwrap();
    assert_eq!(tracked.len(), 1);
    let (distinct_id, event_name, properties) = &tracked[0];
    assert_eq!(distinct_id, "user-1");
    assert_eq!(event_name, EXPOSURE_EVENT_NAME);
    assert_eq!(properties["Experiment name"], json!("experiment-flag"));
    assert_eq!(properties["Variant name"], json!("treatment"));
    assert_eq!(properties["$experiment_type"], json!("feature_flag"));
    assert_eq!(properties["Flag evaluation mode"], json!("local"));
    assert_eq!(properties["$experiment_id"], json!("exp-123"));
    assert_eq!(properties["$is_experiment_active"], json!(true));
    assert!(properties.contains_key("Variant fetch latency (ms)"));
}

#[test]
fn get_variant_can_skip_exposure() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "flag",
            "context": "distinct_id",
            "ruleset": {
                "variants": [{"key": "on", "value": true, "split": 1.0}],
                "rollout": [{"rollout_percentage": 1.0}]
            }
        }]),
    );
    let (provider, tracked) = start(&server);

    let variant = provider.get_variant("flag", SelectedVariant::default(), &user("u"), false);
    assert_eq!(variant.variant_key.as_deref(), Some("on"));
    assert!(tracked.lock().unwrap().is_empty());

    provider.track_exposure_event("flag", &variant, &user("u"));
    let tracked = tracked.lock().unwrap();
    assert_eq!(tracked.len(), 1);
    assert!(!tracked[0].2.contains_key("Variant fetch latency (ms)"));
}

#[test]
fn get_all_variants_omits_undecided_flags() {
    let server = MockServer::start();
    serve(
        &server,
        json!([
            {
                "key": "on-for-all",
                "context": "distinct_id",
                "ruleset": {
                    "variants": [{"key": "on", "value": true, "split": 1.0}],
                    "rollout": [{"rollout_percentage": 1.0}]
                }
            },
            {
                "key": "off-for-all",
                "context": "distinct_id",
                "ruleset": {
                    "variants": [{"key": "on", "value": true, "split": 1.0}],
                    "rollout": [{"rollout_percentage": 0.0}]
                }
            }
        ]),
    );
    let (provider, tracked) = start(&server);

    let variants = provider.get_all_variants(&user("u"));

    assert_eq!(variants.len(), 1);
    assert_eq!(variants["on-for-all"].variant_value, json!(true));
    assert!(tracked.lock().unwrap().is_empty());
}

#[test]
fn is_enabled_requires_boolean_true() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "string-true",
            "context": "distinct_id",
            "ruleset": {
                "variants": [{"key": "on", "value": "true", "split": 1.0}],
                "rollout": [{"rollout_percentage": 1.0}]
            }
        }]),
    );
    let (provider, _) = start(&server);

    assert!(!provider.is_enabled("string-true", &user("u")));
    assert!(!provider.is_enabled("missing", &user("u")));
}

#[test]
fn polling_start_and_stop_are_idempotent() {
    init();
    let server = MockServer::start();
    let mock = serve(&server, json!([]));
    let provider = LocalFlagsConfig::from_token("test-token")
        .api_host(server.base_url())
        .polling_interval(Duration::from_secs(3600))
        .to_provider()
        .unwrap();

    provider.stop_polling_for_definitions().unwrap();
    provider.start_polling_for_definitions().unwrap();
    provider.start_polling_for_definitions().unwrap();
    assert_eq!(mock.hits(), 1);

    provider.stop_polling_for_definitions().unwrap();
    provider.stop_polling_for_definitions().unwrap();

    // Can be restarted after stop.
    provider.start_polling_for_definitions().unwrap();
    assert_eq!(mock.hits(), 2);
}

#[test]
fn provider_is_shareable_between_threads() {
    let server = MockServer::start();
    serve(
        &server,
        json!([{
            "key": "flag",
            "context": "distinct_id",
            "ruleset": {
                "variants": [{"key": "on", "value": true, "split": 1.0}],
                "rollout": [{"rollout_percentage": 1.0}]
            }
        }]),
    );
    let (provider, tracked) = start(&server);

    std::thread::scope(|scope| {
        for i in 0..4 {
            let provider = &provider;
            scope.spawn(move || {
                assert!(provider.is_enabled("flag", &user(&format!("user-{i}"))));
            });
        }
    });

    assert_eq!(tracked.lock().unwrap().len(), 4);
}
