use chrono::{DateTime, TimeZone, Utc};
use expql::compile::compile_experiment_query;
use expql::model::{
    CappingSettings, ColumnRef, Condition, ConditionOperator, DimensionSpec, ExperimentSettings,
    MetricDefinition, MetricKind, MetricOverride, WindowKind, WindowSettings,
};

fn settings() -> ExperimentSettings {
    let start: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let end: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
    ExperimentSettings::new("checkout-v2", start, end)
}

fn revenue() -> MetricDefinition {
    MetricDefinition::new(
        "fact__revenue",
        "Revenue",
        MetricKind::Mean,
        "purchase",
        ColumnRef::new("events").with_column("amount"),
    )
    .with_window(WindowSettings::conversion(2.0, 24.0))
    .with_capping(CappingSettings::absolute(100.0))
}

fn signed_up() -> MetricDefinition {
    MetricDefinition::new("fact__signup", "Signed up", MetricKind::Proportion, "signup OR register", ColumnRef::new("events"))
        .with_condition(Condition::new("country", ConditionOperator::Eq, "US"))
}

#[test]
fn test_compile_is_deterministic() {
    let metrics = [revenue(), signed_up()];
    let a = compile_experiment_query(&settings(), &metrics, None, None);
    let b = compile_experiment_query(&settings(), &metrics, None, None);
    assert_eq!(a, b);
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn test_compile_is_stable_under_key_reordering() {
    let settings_a: ExperimentSettings = serde_json::from_str(
        r#"{"experimentId": "checkout-v2", "start": "2024-03-01T00:00:00Z", "end": "2024-03-10T00:00:00Z"}"#,
    )
    .unwrap();
    let settings_b: ExperimentSettings = serde_json::from_str(
        r#"{"end": "2024-03-10T00:00:00Z", "experimentId": "checkout-v2", "start": "2024-03-01T00:00:00Z"}"#,
    )
    .unwrap();

    let metric_a: MetricDefinition = serde_json::from_str(
        r#"{
            "id": "fact__revenue", "name": "Revenue", "datasource": "ds_1", "metricType": "mean",
            "events": "purchase",
            "numerator": {"factTableId": "events", "column": "amount"},
            "windowSettings": {"type": "conversion", "delayValue": 2, "delayUnit": "hours", "windowValue": 1, "windowUnit": "days"},
            "cappingSettings": {"type": "absolute", "value": 100}
        }"#,
    )
    .unwrap();
    let metric_b: MetricDefinition = serde_json::from_str(
        r#"{
            "cappingSettings": {"value": 100, "type": "absolute"},
            "windowSettings": {"windowUnit": "days", "windowValue": 1, "delayUnit": "hours", "delayValue": 2, "type": "conversion"},
            "numerator": {"column": "amount", "factTableId": "events"},
            "events": "purchase", "metricType": "mean", "datasource": "ds_1", "name": "Revenue", "id": "fact__revenue"
        }"#,
    )
    .unwrap();

    let a = compile_experiment_query(&settings_a, &[metric_a], None, None);
    let b = compile_experiment_query(&settings_b, &[metric_b], None, None);
    assert_eq!(a.as_str(), b.as_str());
    assert_eq!(a, compile_experiment_query(&settings(), &[revenue()], None, None));
}

#[test]
fn test_events_source_and_predicates() {
    let query = compile_experiment_query(&settings(), &[revenue(), signed_up()], None, None);
    let script = query.as_str();

    assert!(script.contains(r#""from_date": "2024-03-01","#));
    assert!(script.contains(r#""to_date": "2024-03-10","#));
    // Selectors are sorted and deduplicated.
    let selectors = [
        r#"{"event": "$experiment_started"},"#,
        r#"{"event": "purchase"},"#,
        r#"{"event": "register"},"#,
        r#"{"event": "signup"}"#,
    ];
    let positions: Vec<usize> = selectors.iter().map(|s| script.find(s).unwrap()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    assert!(script.contains(r#"event.name === "$experiment_started""#));
    assert!(script.contains(r#"event.properties["Experiment name"] === "checkout-v2""#));
    assert!(script.contains("event.time >= 1709251200000"));
    assert!(script.contains("event.time <= 1710028800000"));
    assert!(script.contains("function isMetric0(event) {"));
    assert!(script.contains(r#"return event.name === "purchase";"#));
    assert!(script.contains(
        r#"return ["signup", "register"].includes(event.name) && event.properties["country"] + "" == "US";"#
    ));
    assert!(script.contains(r#"state.variation = event.properties["Variant name"];"#));
}

#[test]
fn test_windows_aggregation_and_capping() {
    let query = compile_experiment_query(&settings(), &[revenue(), signed_up()], None, None);
    let script = query.as_str();

    assert!(script.contains(
        "if (isMetric0(event) && event.time - state.start >= 7200000 && event.time - state.start < 93600000) {"
    ));
    assert!(script.contains(r#"state.m0.push(event.properties["amount"]);"#));
    assert!(script.contains("if (isMetric1(event)) {"));
    assert!(script.contains("state.m1.push(1);"));

    assert!(script.contains(
        "user.value.m0 = !user.value.m0.length ? 0 : (function(values) { return sum(values); })(user.value.m0);"
    ));
    assert!(script.contains("user.value.m0 = user.value.m0 && Math.min(user.value.m0, 100);"));
    assert!(script.contains("user.value.m1 = user.value.m1.length ? 1 : 0;"));
    assert!(!script.contains("Math.min(user.value.m1"));

    assert!(script.contains(r#".groupBy(["value.variation"], ["#));
    assert!(script.contains(r#"mixpanel.reducer.numeric_summary("value.m0"),"#));
    assert!(script.contains(r#"var metricIds = ["fact__revenue", "fact__signup"];"#));
    assert!(script.contains(r#"var metricTypes = ["mean", "proportion"];"#));
    assert!(script.contains("if (state.variation !== event.properties[\"Variant name\"]) {"));
    assert!(script.contains("if (user.value.multipleVariants) return false;"));
}

#[test]
fn test_activation_dimension_and_user_key() {
    let mut settings = settings();
    settings.extra_user_id_property = Some("device_id".into());
    let activation = MetricDefinition::new("fact__cart", "Viewed cart", MetricKind::Proportion, "view_cart", ColumnRef::new("events"));
    let dimension = DimensionSpec::new("Browser", "browser");

    let query = compile_experiment_query(&settings, &[revenue()], Some(&activation), Some(&dimension));
    let script = query.as_str();

    assert!(script.contains("function isActivationMetric(event) {"));
    assert!(script.contains("activated: false,"));
    assert!(script.contains("if (!isActivationMetric(event)) {"));
    assert!(script.contains("state.activated = true;"));
    assert!(script.contains("if (!user.value.activated) return false;"));
    assert!(script.contains(r#"state.dimension = (event.properties["browser"]) || null;"#));
    assert!(script.contains(r#".groupBy(["value.variation", "value.dimension"], ["#));
    assert!(script.contains(r#"dimension: row.key[1] || "","#));
    assert!(script.contains(r#".groupByUser(["device_id"], function(state, events) {"#));
    assert!(script.contains(r#"{"event": "view_cart"}"#));
}

#[test]
fn test_backlog_only_with_early_start_metric() {
    let plain = compile_experiment_query(&settings(), &[revenue()], None, None);
    assert!(!plain.as_str().contains("queuedEvents"));

    let early = revenue().with_window(WindowSettings::conversion(-1.0, 24.0));
    let query = compile_experiment_query(&settings(), &[early], None, None);
    let script = query.as_str();
    assert!(script.contains("queuedEvents: [],"));
    assert!(script.contains("state.queuedEvents.push(event);"));
    assert!(script.contains("state.queuedEvents.forEach(function(event) {"));
    assert!(script.contains("event.time - state.start >= -3600000"));
}

#[test]
fn test_overrides_change_the_window() {
    let overridden = settings().with_override(MetricOverride {
        id: "fact__revenue".into(),
        window_type: Some(WindowKind::Lookback),
        window_hours: Some(48.0),
        delay_hours: Some(0.0),
    });
    let query = compile_experiment_query(&overridden, &[revenue()], None, None);
    let script = query.as_str();
    assert!(script.contains("1710028800000 - event.time <= 172800000"));
    assert!(!script.contains("event.time - state.start"));
}

#[test]
fn test_later_override_refines_earlier_one() {
    let overridden = settings()
        .with_override(MetricOverride {
            id: "fact__revenue".into(),
            window_type: Some(WindowKind::Lookback),
            window_hours: Some(48.0),
            delay_hours: Some(0.0),
        })
        .with_override(MetricOverride {
            id: "fact__revenue".into(),
            window_type: None,
            window_hours: Some(24.0),
            delay_hours: None,
        });
    let query = compile_experiment_query(&overridden, &[revenue(), signed_up()], None, None);
    let script = query.as_str();
    assert!(script.contains("1710028800000 - event.time <= 86400000"));
    assert!(!script.contains("172800000"));
    assert!(!script.contains("event.time - state.start"));
    assert!(script.contains("if (isMetric1(event)) {"));
}

#[test]
fn test_strings_are_escaped() {
    let metric = MetricDefinition::new("fact__q", "Quote \"test\"", MetricKind::Count, "say \"hi\"", ColumnRef::new("events"));
    let query = compile_experiment_query(&settings(), &[metric], None, None);
    assert!(query.as_str().contains(r#"return event.name === "say \"hi\"";"#));
}
