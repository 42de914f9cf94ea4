use chrono::{DateTime, TimeZone, Utc};
use expql::decode::{decode_experiment_rows, decode_metric_value_rows, SummaryRow};
use expql::engine::{Engine, Phase, UserState};
use expql::model::{
    CappingSettings, ColumnRef, DimensionSpec, Event, ExperimentSettings, MetricDefinition,
    MetricKind, MetricValueParams, WindowSettings,
};
use expql::plan::{ExperimentPlan, MetricValuePlan};

const HOUR: i64 = 3_600_000;
const MINUTE: i64 = 60_000;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
}

fn settings() -> ExperimentSettings {
    ExperimentSettings::new("checkout-v2", start(), end())
}

/// Exposure time used by most tests: six hours after the experiment start.
fn t0() -> i64 {
    start().timestamp_millis() + 6 * HOUR
}

fn exposure(user: &str, variation: &str, time: i64) -> Event {
    Event::new("$experiment_started", user, time)
        .with_property("Experiment name", "checkout-v2")
        .with_property("Variant name", variation)
}

fn purchase(user: &str, time: i64, amount: f64) -> Event {
    Event::new("purchase", user, time).with_property("amount", amount)
}

fn run(metrics: &[MetricDefinition], activation: Option<&MetricDefinition>, events: &[Event]) -> Vec<SummaryRow> {
    let plan = ExperimentPlan::build(&settings(), metrics, activation, None);
    decode_experiment_rows(Engine::default().run_experiment(&plan, events))
}

fn purchases() -> MetricDefinition {
    MetricDefinition::new("fact__purchases", "Purchases", MetricKind::Count, "purchase", ColumnRef::new("events"))
}

#[test]
fn test_multiple_variations_are_excluded() {
    let events = vec![
        exposure("switcher", "control", t0()),
        purchase("switcher", t0() + HOUR, 10.0),
        exposure("switcher", "treatment", t0() + 2 * HOUR),
        exposure("steady", "control", t0()),
        purchase("steady", t0() + HOUR, 10.0),
        exposure("other", "treatment", t0()),
    ];

    let rows = run(&[purchases()], None, &events);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].variation, "control");
    assert_eq!(rows[0].users, 1);
    assert_eq!(rows[0].metrics[0].main_sum, 1.0);
    assert_eq!(rows[1].variation, "treatment");
    assert_eq!(rows[1].users, 1);
    assert_eq!(rows[1].metrics[0].main_sum, 0.0);
    assert_eq!(rows.iter().map(|r| r.users).sum::<u64>(), 2);
}

#[test]
fn test_repeated_same_variation_is_kept() {
    let events = vec![
        exposure("u1", "control", t0()),
        exposure("u1", "control", t0() + HOUR),
        purchase("u1", t0() + 2 * HOUR, 1.0),
    ];
    let rows = run(&[purchases()], None, &events);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].users, 1);
    assert_eq!(rows[0].metrics[0].count, 1);
}

#[test]
fn test_conversion_window_boundaries() {
    let metric = purchases().with_window(WindowSettings::conversion(2.0, 24.0));
    let cases = [
        (HOUR + 59 * MINUTE, false),
        (2 * HOUR, true),
        (25 * HOUR + 59 * MINUTE, true),
        (26 * HOUR, false),
    ];

    for (elapsed, counted) in cases {
        let events = vec![exposure("u1", "control", t0()), purchase("u1", t0() + elapsed, 1.0)];
        let rows = run(std::slice::from_ref(&metric), None, &events);
        let expected = if counted { 1.0 } else { 0.0 };
        assert_eq!(rows[0].metrics[0].main_sum, expected, "elapsed {} ms", elapsed);
    }
}

#[test]
fn test_binomial_is_one_regardless_of_magnitude_and_cap() {
    let metric = MetricDefinition::new(
        "fact__bought",
        "Bought",
        MetricKind::Proportion,
        "purchase",
        ColumnRef::new("events").with_column("amount"),
    )
    .with_capping(CappingSettings::absolute(10.0));

    let events = vec![
        exposure("big", "control", t0()),
        purchase("big", t0() + HOUR, 5000.0),
        purchase("big", t0() + 2 * HOUR, 7000.0),
        exposure("none", "control", t0()),
    ];
    let rows = run(&[metric], None, &events);

    let summary = &rows[0].metrics[0];
    assert_eq!(rows[0].users, 2);
    assert_eq!(summary.count, 2);
    assert_eq!(summary.main_sum, 1.0);
    assert_eq!(summary.main_sum_squares, 1.0);
}

#[test]
fn test_absolute_cap_clamps_user_sum() {
    let revenue = MetricDefinition::new(
        "fact__revenue",
        "Revenue",
        MetricKind::Mean,
        "purchase",
        ColumnRef::new("events").with_column("amount"),
    )
    .with_capping(CappingSettings::absolute(100.0));

    let events = vec![
        exposure("u1", "control", t0()),
        purchase("u1", t0() + HOUR, 100.0),
        purchase("u1", t0() + 2 * HOUR, 50.0),
    ];
    let rows = run(&[revenue], None, &events);
    assert_eq!(rows[0].metrics[0].main_sum, 100.0);
    assert_eq!(rows[0].metrics[0].main_sum_squares, 10_000.0);
}

#[test]
fn test_activation_gate() {
    let activation = MetricDefinition::new("fact__cart", "Viewed cart", MetricKind::Proportion, "view_cart", ColumnRef::new("events"));
    let events = vec![
        exposure("active", "control", t0()),
        purchase("active", t0() + HOUR, 1.0),
        Event::new("view_cart", "active", t0() + 2 * HOUR),
        purchase("active", t0() + 3 * HOUR, 1.0),
        exposure("idle", "control", t0()),
        purchase("idle", t0() + HOUR, 1.0),
    ];

    let rows = run(&[purchases()], Some(&activation), &events);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].users, 1);
    assert_eq!(rows[0].metrics[0].main_sum, 1.0);
}

#[test]
fn test_early_start_metric_replays_backlog_once() {
    let early = purchases().with_window(WindowSettings::conversion(-1.0, 24.0));
    let plan = ExperimentPlan::build(&settings(), std::slice::from_ref(&early), None, None);
    assert!(plan.has_early_start());

    let events = vec![
        purchase("u1", t0() - 2 * HOUR, 1.0),
        purchase("u1", t0() - 30 * MINUTE, 1.0),
        exposure("u1", "control", t0()),
        purchase("u1", t0() + HOUR, 1.0),
    ];

    let mut state = UserState::new(&plan);
    for event in &events {
        state.observe(event);
    }
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.start, Some(t0()));
    assert_eq!(state.values[0].len(), 2);
    assert_eq!(state.aggregate(), vec![2.0]);
}

#[test]
fn test_early_start_with_activation_replays_backlog_at_activation() {
    let early = purchases().with_window(WindowSettings::conversion(-1.0, 24.0));
    let activation = MetricDefinition::new("fact__cart", "Viewed cart", MetricKind::Proportion, "view_cart", ColumnRef::new("events"));
    let plan = ExperimentPlan::build(&settings(), std::slice::from_ref(&early), Some(&activation), None);

    let activated_at = t0() + HOUR;
    let events = vec![
        purchase("u1", t0() - 30 * MINUTE, 1.0),
        exposure("u1", "control", t0()),
        purchase("u1", t0() + 30 * MINUTE, 1.0),
        Event::new("view_cart", "u1", activated_at),
        Event::new("view_cart", "u1", t0() + 2 * HOUR),
        purchase("u1", t0() + 3 * HOUR, 1.0),
    ];

    let mut state = UserState::new(&plan);
    for event in &events[..3] {
        state.observe(event);
    }
    assert_eq!(state.phase, Phase::Exposed);
    assert_eq!(state.start, None);
    assert!(state.values[0].is_empty());

    state.observe(&events[3]);
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.start, Some(activated_at));
    // Only the purchase within an hour before activation is replayed.
    assert_eq!(state.values[0], vec![1.0]);

    for event in &events[4..] {
        state.observe(event);
    }
    assert_eq!(state.start, Some(activated_at));
    assert_eq!(state.values[0], vec![1.0, 1.0]);
    assert!(state.is_included());
}

#[test]
fn test_backlog_replay_includes_the_delay_boundary() {
    let early = purchases().with_window(WindowSettings::conversion(-1.0, 24.0));
    let plan = ExperimentPlan::build(&settings(), std::slice::from_ref(&early), None, None);

    let cases = [
        (t0() - HOUR - 1, false),
        (t0() - HOUR, true),
        (t0() - HOUR + 1, true),
    ];
    for (time, counted) in cases {
        let events = vec![purchase("u1", time, 1.0), exposure("u1", "control", t0())];
        let mut state = UserState::new(&plan);
        for event in &events {
            state.observe(event);
        }
        let expected = if counted { 1 } else { 0 };
        assert_eq!(state.values[0].len(), expected, "purchase {} ms before exposure", t0() - time);
    }
}

#[test]
fn test_missing_variation_is_dropped() {
    let events = vec![
        Event::new("$experiment_started", "u1", t0()).with_property("Experiment name", "checkout-v2"),
        purchase("u1", t0() + HOUR, 1.0),
    ];
    assert!(run(&[purchases()], None, &events).is_empty());
}

#[test]
fn test_other_experiment_and_out_of_range_exposures_ignored() {
    let events = vec![
        Event::new("$experiment_started", "u1", t0())
            .with_property("Experiment name", "another")
            .with_property("Variant name", "control"),
        exposure("u2", "control", start().timestamp_millis() - HOUR),
    ];
    assert!(run(&[purchases()], None, &events).is_empty());
}

#[test]
fn test_dimension_groups() {
    let plan = ExperimentPlan::build(&settings(), &[purchases()], None, Some(&DimensionSpec::new("Browser", "browser")));
    let events = vec![
        exposure("u1", "control", t0()).with_property("browser", "firefox"),
        exposure("u2", "control", t0()).with_property("browser", "chrome"),
        exposure("u3", "control", t0()),
    ];

    let rows = decode_experiment_rows(Engine::default().run_experiment(&plan, &events));
    let dims: Vec<&str> = rows.iter().map(|r| r.dimension.as_str()).collect();
    assert_eq!(dims, vec!["", "chrome", "firefox"]);
    assert!(rows.iter().all(|r| r.users == 1));
}

#[test]
fn test_metric_value_by_date() {
    let mut metric = purchases();
    metric.numerator = ColumnRef::new("events").with_column("amount");
    let params = MetricValueParams {
        name: "Revenue check".into(),
        metric,
        from: start(),
        to: end(),
        segment: None,
        include_by_date: true,
        extra_user_id_property: None,
    };
    let plan = MetricValuePlan::build(&params);

    let day2 = start().timestamp_millis() + 30 * HOUR;
    let events = vec![
        purchase("u1", day2, 3.0),
        purchase("u1", day2 + 48 * HOUR, 4.0),
        purchase("u2", t0(), 5.0),
        purchase("u3", day2 + HOUR, 1.0),
    ];

    let rows = decode_metric_value_rows(&Engine::new(1).run_metric_value(&plan, &events));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].date, "");
    assert_eq!(rows[0].count, 3);
    assert_eq!(rows[0].main_sum, 13.0);
    assert_eq!(rows[1].date, "2024-03-01");
    assert_eq!(rows[1].main_sum, 5.0);
    assert_eq!(rows[2].date, "2024-03-02");
    assert_eq!(rows[2].count, 2);
    assert_eq!(rows[2].main_sum, 8.0);
}
