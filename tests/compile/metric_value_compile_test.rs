use chrono::{TimeZone, Utc};
use expql::compile::compile_metric_value_query;
use expql::model::{
    CappingSettings, ColumnRef, Condition, ConditionOperator, MetricDefinition, MetricKind,
    MetricValueParams, SegmentSpec, WindowSettings,
};

fn params(metric: MetricDefinition) -> MetricValueParams {
    MetricValueParams {
        name: "Weekly check".into(),
        metric,
        from: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        to: Utc.with_ymd_and_hms(2024, 5, 7, 23, 59, 59).unwrap(),
        segment: None,
        include_by_date: false,
        extra_user_id_property: None,
    }
}

fn revenue() -> MetricDefinition {
    MetricDefinition::new(
        "fact__revenue",
        "Revenue",
        MetricKind::Mean,
        "purchase OR refund",
        ColumnRef::new("events").with_column("amount"),
    )
    .with_capping(CappingSettings::absolute(100.0))
    .with_window(WindowSettings::conversion(2.0, 24.0))
}

#[test]
fn test_overall_only() {
    let query = compile_metric_value_query(&params(revenue()));
    let script = query.as_str();

    assert!(script.contains("// Weekly check - Metric value (Revenue)"));
    assert!(script.contains(r#""from_date": "2024-05-01","#));
    assert!(script.contains(r#""to_date": "2024-05-07","#));
    assert!(script.contains(r#"{"event": "purchase"},"#));
    assert!(script.contains(r#"{"event": "refund"}"#));
    assert!(script.contains(r#"return ["purchase", "refund"].includes(event.name);"#));
    assert!(script.contains("state.date = state.date || event.time;"));
    assert!(script.contains(r#"state.metricValue.push(event.properties["amount"]);"#));
    assert!(script.contains("return user.value.date && user.value.metricValue.length > 0;"));
    assert!(script.contains("user.value.metricValue = user.value.metricValue && Math.min(user.value.metricValue, 100);"));
    assert!(script.contains(r#"mixpanel.reducer.numeric_summary("value.metricValue")"#));
    assert!(script.contains(r#"if (val.count) return Object.assign({type: "overall"}, val);"#));
    assert!(!script.contains("byDate"));
}

#[test]
fn test_windows_do_not_apply() {
    let query = compile_metric_value_query(&params(revenue()));
    assert!(!query.as_str().contains("state.start"));
}

#[test]
fn test_by_date_and_segment() {
    let mut p = params(revenue());
    p.include_by_date = true;
    p.extra_user_id_property = Some("device_id".into());
    p.segment = Some(SegmentSpec {
        name: "Mobile".into(),
        conditions: vec![Condition::new("platform", ConditionOperator::Matches, "^(ios|android)$")],
    });

    let query = compile_metric_value_query(&p);
    let script = query.as_str();

    assert!(script.contains("// Limit to Segment - Mobile"));
    assert!(script.contains(r#"if (!((event.properties["platform"] || "").match("^(ios|android)$"))) return false;"#));
    assert!(script.contains(r#"mixpanel.reducer.numeric_summary("value.metricValue"),"#));
    assert!(script.contains("// Summary metrics by date"));
    assert!(script.contains(r#"type: "byDate","#));
    assert!(script.contains(r#".groupByUser(["device_id"], function(state, events) {"#));
}

#[test]
fn test_deterministic() {
    let a = compile_metric_value_query(&params(revenue()));
    let b = compile_metric_value_query(&params(revenue()));
    assert_eq!(a, b);
}
