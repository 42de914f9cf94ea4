//! Rendering of plans into engine scripts.
//!
//! The output is a pure function of the plan: no timestamps, random ids or
//! hash-map iteration order leak into the text.

use super::expr::{
    and_all, condition_expr, event_predicate_expr, exposure_expr, lit_str, property, value_expr,
    window_expr, JsExpr,
};
use super::format::IndentWriter;
use super::token::{format_number, quote_string};
use crate::plan::{AggregateFilter, ExperimentPlan, FilterColumn, MetricStep, MetricValuePlan};

/// Aggregation helpers referenced by per-user aggregation code.
const MATH_HELPERS: &str = r#"// Helper aggregation functions
function sum(values) {
  return values.reduce(function(total, n) { return total + n; }, 0);
}
function min(values) {
  return Math.min.apply(null, values);
}
function max(values) {
  return Math.max.apply(null, values);
}
function avg(values) {
  return sum(values) / values.length;
}
function median(values) {
  var sorted = values.slice().sort(function(a, b) { return a - b; });
  var mid = Math.floor(sorted.length / 2);
  return sorted.length % 2 ? sorted[mid] : (sorted[mid - 1] + sorted[mid]) / 2;
}
function countDistinct(values) {
  var seen = {};
  values.forEach(function(v) { seen[v] = true; });
  return Object.keys(seen).length;
}"#;

const BY_DATE_REDUCER: &str = r#"function(prevs, users) {
  var dates = {};
  prevs.forEach(function(prev) {
    prev.dates.forEach(function(d) {
      dates[d.date] = dates[d.date] || {count: 0, sum: 0, sum_squares: 0};
      dates[d.date].count += d.count;
      dates[d.date].sum += d.sum;
      dates[d.date].sum_squares += d.sum_squares;
    });
  });
  users.forEach(function(user) {
    var date = new Date(user.value.date).toISOString().substr(0, 10);
    dates[date] = dates[date] || {count: 0, sum: 0, sum_squares: 0};
    dates[date].count++;
    dates[date].sum += user.value.metricValue;
    dates[date].sum_squares += Math.pow(user.value.metricValue, 2);
  });
  return {
    type: "byDate",
    dates: Object.keys(dates).map(function(date) {
      return {date: date, count: dates[date].count, sum: dates[date].sum, sum_squares: dates[date].sum_squares};
    })
  };
}"#;

fn write_predicate_function(w: &mut IndentWriter, comment: &str, name: &str, body: &JsExpr) {
    w.write_comment(comment);
    w.scope(&format!("function {}(event) {{", name), "}", |w| {
        w.write_line(&format!("return {};", body.render()));
    });
    w.blank_line();
}

/// `return Events({...})` with the date range and selectors.
fn write_events_source(
    w: &mut IndentWriter,
    from: chrono::DateTime<chrono::Utc>,
    to: chrono::DateTime<chrono::Utc>,
    selectors: &[String],
) {
    w.write_line("return Events({");
    w.indent();
    w.write_line(&format!("\"from_date\": {},", quote_string(&from.format("%Y-%m-%d").to_string())));
    w.write_line(&format!("\"to_date\": {},", quote_string(&to.format("%Y-%m-%d").to_string())));
    w.write_line("\"event_selectors\": [");
    w.indent();
    for (i, selector) in selectors.iter().enumerate() {
        let sep = if i + 1 < selectors.len() { "," } else { "" };
        w.write_line(&format!("{{\"event\": {}}}{}", quote_string(selector), sep));
    }
    w.dedent();
    w.write_line("]");
    w.dedent();
    w.write_line("})");
}

fn group_by_user_prefix(user_key: Option<&str>) -> String {
    match user_key {
        Some(key) => format!("[{}], ", quote_string(key)),
        None => String::new(),
    }
}

fn push_value(w: &mut IndentWriter, dest: &str, metric: &MetricStep) {
    w.write_line(&format!("{}.push({});", dest, value_expr(&metric.value).render()));
}

fn aggregate_filter_test(filter: &AggregateFilter, values: &str) -> String {
    let observed = match filter.column {
        FilterColumn::RowCount => format!("{}.length", values),
        FilterColumn::Column(_) => format!("sum({})", values),
    };
    let checks: Vec<String> = filter
        .comparisons
        .iter()
        .map(|c| format!("x {} {}", c.op.as_script(), format_number(c.value)))
        .collect();
    format!("(function(x) {{ return {}; }})({})", checks.join(" && "), observed)
}

/// Collapse `dest` (a value list) into a single number in place.
fn write_aggregation(w: &mut IndentWriter, metric: &MetricStep, dest: &str) {
    w.write_comment(&format!("Metric - {}", metric.name));
    if metric.kind.is_binomial() {
        match &metric.aggregate_filter {
            Some(filter) => w.write_line(&format!(
                "{dest} = {dest}.length && {} ? 1 : 0;",
                aggregate_filter_test(filter, dest)
            )),
            None => w.write_line(&format!("{dest} = {dest}.length ? 1 : 0;")),
        }
        return;
    }
    w.write_line(&format!(
        "{dest} = !{dest}.length ? 0 : (function(values) {{ return {}; }})({dest});",
        metric.aggregation.script_expression()
    ));
    if let Some(cap) = metric.cap {
        w.write_line(&format!("{dest} = {dest} && Math.min({dest}, {});", format_number(cap)));
    }
}

/// Metric test with its window bounds relative to `state.start`.
fn metric_capture_condition(index: usize, metric: &MetricStep) -> String {
    let call = format!("isMetric{}(event)", index);
    match window_expr(&metric.window, "state.start") {
        Some(window) => format!("{} && {}", call, window.render()),
        None => call,
    }
}

// ============================================================================
// Experiment script
// ============================================================================

fn write_activation(w: &mut IndentWriter, plan: &ExperimentPlan) {
    if plan.activation.is_some() {
        w.write_line("state.activated = true;");
    }
    w.write_line("state.start = event.time;");
    if !plan.has_early_start() {
        return;
    }
    w.write_comment("Process queued values");
    w.scope("state.queuedEvents.forEach(function(event) {", "});", |w| {
        for (i, metric) in plan.metrics.iter().enumerate() {
            if !metric.is_early_start() {
                continue;
            }
            w.write_comment(&format!("Metric - {}", metric.name));
            w.scope(&format!("if ({}) {{", metric_capture_condition(i, metric)), "}", |w| {
                push_value(w, &format!("state.m{}", i), metric);
            });
        }
    });
    w.write_line("state.queuedEvents = [];");
}

fn write_user_reducer(w: &mut IndentWriter, plan: &ExperimentPlan) {
    let early = plan.has_early_start();
    let variation = property(&plan.variation_path).render();

    w.write_line("state = state || {");
    w.indent();
    w.write_line("inExperiment: false,");
    w.write_line("multipleVariants: false,");
    if plan.dimension.is_some() {
        w.write_line("dimension: null,");
    }
    if plan.activation.is_some() {
        w.write_line("activated: false,");
    }
    w.write_line("start: null,");
    w.write_line("variation: null,");
    for i in 0..plan.metrics.len() {
        w.write_line(&format!("m{}: [],", i));
    }
    if early {
        w.write_line("queuedEvents: [],");
    }
    w.dedent();
    w.write_line("};");

    w.scope("for (var i = 0; i < events.length; i++) {", "}", |w| {
        w.write_line("var event = events[i];");
        w.write_comment("User is put into the experiment");
        w.scope("if (isExposureEvent(event)) {", "}", |w| {
            w.scope("if (!state.inExperiment) {", "}", |w| {
                w.write_line("state.inExperiment = true;");
                w.write_line(&format!("state.variation = {};", variation));
                if let Some(dimension) = &plan.dimension {
                    w.write_line(&format!(
                        "state.dimension = ({}) || null;",
                        property(&dimension.path).render()
                    ));
                }
                if plan.activation.is_none() {
                    write_activation(w, plan);
                }
                w.write_line("continue;");
            });
            w.scope(&format!("if (state.variation !== {}) {{", variation), "}", |w| {
                w.write_line("state.multipleVariants = true;");
            });
            w.write_line("continue;");
        });

        w.write_comment("Not in the experiment yet");
        w.scope("if (!state.inExperiment) {", "}", |w| {
            if early {
                w.write_line("state.queuedEvents.push(event);");
            }
            w.write_line("continue;");
        });
        w.write_comment("Saw multiple variants so ignore");
        w.scope("if (state.multipleVariants) {", "}", |w| {
            w.write_line("continue;");
        });

        if let Some(activation) = &plan.activation {
            w.write_comment("Not activated yet");
            w.scope("if (!state.activated) {", "}", |w| {
                w.write_comment(&format!("Does this event activate it? ({})", activation.name));
                w.scope("if (!isActivationMetric(event)) {", "}", |w| {
                    if early {
                        w.write_line("state.queuedEvents.push(event);");
                    }
                    w.write_line("continue;");
                });
                write_activation(w, plan);
            });
        }

        for (i, metric) in plan.metrics.iter().enumerate() {
            w.write_comment(&format!("Metric - {}", metric.name));
            w.scope(&format!("if ({}) {{", metric_capture_condition(i, metric)), "}", |w| {
                push_value(w, &format!("state.m{}", i), metric);
            });
        }
    });
    w.write_line("return state;");
}

/// Render the experiment results script.
pub fn render_experiment(plan: &ExperimentPlan) -> String {
    let mut w = IndentWriter::default();
    w.write_block(MATH_HELPERS);
    w.blank_line();

    write_predicate_function(&mut w, "Experiment exposure event", "isExposureEvent", &exposure_expr(&plan.exposure));
    if let Some(activation) = &plan.activation {
        write_predicate_function(
            &mut w,
            &activation.name,
            "isActivationMetric",
            &event_predicate_expr(&activation.predicate),
        );
    }
    for (i, metric) in plan.metrics.iter().enumerate() {
        write_predicate_function(&mut w, &metric.name, &format!("isMetric{}", i), &event_predicate_expr(&metric.predicate));
    }

    write_events_source(&mut w, plan.from, plan.to, &plan.selectors);

    w.scope(".filter(function(event) {", "})", |w| {
        w.write_comment("Experiment exposure event");
        w.write_line("if (isExposureEvent(event)) return true;");
        if let Some(activation) = &plan.activation {
            w.write_comment(&activation.name);
            w.write_line("if (isActivationMetric(event)) return true;");
        }
        for (i, metric) in plan.metrics.iter().enumerate() {
            w.write_comment(&metric.name);
            w.write_line(&format!("if (isMetric{}(event)) return true;", i));
        }
        w.write_comment("Otherwise, ignore the event");
        w.write_line("return false;");
    });

    w.write_comment("Array of metric values for each user");
    w.scope(
        &format!(".groupByUser({}function(state, events) {{", group_by_user_prefix(plan.user_key.as_deref())),
        "})",
        |w| write_user_reducer(w, plan),
    );

    w.write_comment("Remove users that are not in the experiment");
    w.scope(".filter(function(user) {", "})", |w| {
        w.write_line("if (!user.value.inExperiment) return false;");
        w.write_line("if (user.value.multipleVariants) return false;");
        w.write_line("if (user.value.variation === null || user.value.variation === undefined) return false;");
        if plan.activation.is_some() {
            w.write_line("if (!user.value.activated) return false;");
        }
        w.write_line("return true;");
    });

    w.write_comment("Aggregate the metric value arrays for each user");
    w.scope(".map(function(user) {", "})", |w| {
        for (i, metric) in plan.metrics.iter().enumerate() {
            write_aggregation(w, metric, &format!("user.value.m{}", i));
        }
        w.write_line("return user;");
    });

    let keys = if plan.dimension.is_some() {
        r#"["value.variation", "value.dimension"]"#
    } else {
        r#"["value.variation"]"#
    };
    w.write_comment(if plan.dimension.is_some() {
        "One group per experiment variation/dimension with summary data"
    } else {
        "One group per experiment variation with summary data"
    });
    w.scope(&format!(".groupBy({}, [", keys), "])", |w| {
        w.write_comment("Total users in the group");
        let last = plan.metrics.len();
        w.write_line(&format!("mixpanel.reducer.count(){}", if last > 0 { "," } else { "" }));
        for (i, metric) in plan.metrics.iter().enumerate() {
            w.write_comment(&format!("Metric - {}", metric.name));
            let sep = if i + 1 < last { "," } else { "" };
            w.write_line(&format!("mixpanel.reducer.numeric_summary({}){}", quote_string(&format!("value.m{}", i)), sep));
        }
    });

    let ids: Vec<JsExpr> = plan.metrics.iter().map(|m| lit_str(&m.id)).collect();
    let kinds: Vec<JsExpr> = plan.metrics.iter().map(|m| lit_str(m.kind.as_str())).collect();
    w.write_comment("Convert to an object that's easier to work with");
    w.scope(".map(function(row) {", "});", |w| {
        w.write_line(&format!("var metricIds = {};", JsExpr::Array(ids).render()));
        w.write_line(&format!("var metricTypes = {};", JsExpr::Array(kinds).render()));
        w.scope("var result = {", "};", |w| {
            w.write_line("variation: row.key[0],");
            if plan.dimension.is_some() {
                w.write_line("dimension: row.key[1] || \"\",");
            } else {
                w.write_line("dimension: \"\",");
            }
            w.write_line("users: row.value[0],");
            w.write_line("metrics: []");
        });
        w.scope("for (var i = 1; i < row.value.length; i++) {", "}", |w| {
            w.scope("result.metrics.push({", "});", |w| {
                w.write_line("id: metricIds[i - 1],");
                w.write_line("metric_type: metricTypes[i - 1],");
                w.write_line("count: row.value[i].count,");
                w.write_line("main_sum: row.value[i].sum,");
                w.write_line("main_sum_squares: row.value[i].sum_squares");
            });
        });
        w.write_line("return result;");
    });

    w.into_string()
}

// ============================================================================
// Metric-value script
// ============================================================================

/// Render the metric-value script.
pub fn render_metric_value(plan: &MetricValuePlan) -> String {
    let metric = &plan.metric;
    let mut w = IndentWriter::default();
    w.write_block(MATH_HELPERS);
    w.blank_line();

    write_predicate_function(&mut w, &metric.name, "isMetric", &event_predicate_expr(&metric.predicate));

    w.write_comment(&format!("{} - Metric value ({})", plan.name, metric.name));
    write_events_source(&mut w, plan.from, plan.to, &plan.selectors);

    w.scope(".filter(function(event) {", "})", |w| {
        if let Some(segment) = &plan.segment {
            let test = and_all(segment.conditions.iter().map(condition_expr));
            w.write_comment(&format!("Limit to Segment - {}", segment.name));
            w.write_line(&format!("if (!({})) return false;", test.render()));
        }
        w.write_line("if (isMetric(event)) return true;");
        w.write_line("return false;");
    });

    w.write_comment("Metric value per user");
    w.scope(
        &format!(".groupByUser({}function(state, events) {{", group_by_user_prefix(plan.user_key.as_deref())),
        "})",
        |w| {
            w.write_line("state = state || {date: null, metricValue: []};");
            w.scope("for (var i = 0; i < events.length; i++) {", "}", |w| {
                w.write_line("var event = events[i];");
                w.write_line("state.date = state.date || event.time;");
                w.scope("if (isMetric(event)) {", "}", |w| {
                    push_value(w, "state.metricValue", metric);
                });
            });
            w.write_line("return state;");
        },
    );

    w.write_comment("Remove users that did not convert");
    w.scope(".filter(function(user) {", "})", |w| {
        w.write_line("return user.value.date && user.value.metricValue.length > 0;");
    });

    w.write_comment("Aggregate metric values per user");
    w.scope(".map(function(user) {", "})", |w| {
        write_aggregation(w, metric, "user.value.metricValue");
        w.write_line("return user;");
    });

    w.scope(".reduce([", "])", |w| {
        w.write_comment("Overall summary metrics");
        let overall = format!("mixpanel.reducer.numeric_summary({})", quote_string("value.metricValue"));
        if plan.include_by_date {
            w.write_line(&format!("{},", overall));
            w.write_comment("Summary metrics by date");
            w.write_block(BY_DATE_REDUCER);
        } else {
            w.write_line(&overall);
        }
    });

    w.write_comment("Transform into easy-to-use objects");
    w.scope(".map(function(vals) {", "});", |w| {
        w.scope("return vals.map(function(val) {", "});", |w| {
            w.write_line("if (val.count) return Object.assign({type: \"overall\"}, val);");
            w.write_line("return val;");
        });
    });

    w.into_string()
}

// ============================================================================
// Connection check
// ============================================================================

/// Count the events of a single day; used to verify credentials.
pub fn render_connection_check(date: chrono::NaiveDate) -> String {
    let day = quote_string(&date.format("%Y-%m-%d").to_string());
    let mut w = IndentWriter::default();
    w.write_line("return Events({");
    w.indent();
    w.write_line(&format!("\"from_date\": {},", day));
    w.write_line(&format!("\"to_date\": {}", day));
    w.dedent();
    w.write_line("})");
    w.write_line(".reduce(mixpanel.reducer.count());");
    w.into_string()
}
