//! End-to-end admission scenarios through the public API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sluice::{
    AuthorityRule, AuthorityStrategy, BlockError, Config, ControlBehavior, DegradeGrade,
    DegradeRule, EntryArgs, FlowGrade, FlowRule, Node, ParamFlowItem, ParamFlowRule, ParamValue,
    Sluice,
};

fn qps_rule(resource: &str, count: f64) -> FlowRule {
    FlowRule {
        resource: resource.into(),
        grade: FlowGrade::Qps,
        count,
        ..FlowRule::default()
    }
}

#[test]
fn default_reject_admits_up_to_count() {
    let sluice = Sluice::new();
    sluice.load_flow_rules(vec![qps_rule("R", 2.0)]).unwrap();

    let first = sluice.entry("R").expect("first call fits");
    let second = sluice.entry("R").expect("second call fits");
    let third = sluice.entry("R");

    match third {
        Err(BlockError::Flow { resource, .. }) => assert_eq!(&*resource, "R"),
        other => panic!("expected a flow rejection, got {other:?}"),
    }

    second.exit();
    first.exit();
}

#[test]
fn batch_acquisitions_consume_their_full_weight() {
    let sluice = Sluice::new();
    sluice.load_flow_rules(vec![qps_rule("bulk", 2.0)]).unwrap();

    sluice
        .entry_with(EntryArgs::new("bulk").with_batch(2))
        .expect("batch of two fills the budget exactly")
        .exit();
    assert!(sluice.entry("bulk").is_err());
}

#[test]
fn admin_reset_clears_rates_but_not_totals() {
    let sluice = Sluice::new();
    for _ in 0..4 {
        sluice.entry("resettable").unwrap().exit();
    }

    let cluster = sluice.cluster_node("resettable").unwrap();
    assert_eq!(cluster.pass_qps(), 4.0);

    sluice.reset_metrics("resettable");
    assert_eq!(cluster.pass_qps(), 0.0);
    assert_eq!(cluster.total_pass(), 4, "the 60 s totals survive a reset");
}

#[test]
fn counters_are_shared_across_threads() {
    let sluice = Sluice::new();
    sluice.load_flow_rules(vec![qps_rule("mt", 2.0)]).unwrap();

    // Two admissions on another thread exhaust the budget for this one.
    let other = sluice.clone();
    std::thread::spawn(move || {
        other.entry("mt").expect("first").exit();
        other.entry("mt").expect("second").exit();
    })
    .join()
    .unwrap();

    assert!(matches!(sluice.entry("mt"), Err(BlockError::Flow { .. })));
}

#[test]
fn throttling_paces_a_burst_and_sheds_the_tail() {
    let sluice = Sluice::new();
    sluice
        .load_flow_rules(vec![FlowRule {
            resource: "paced".into(),
            count: 5.0,
            control_behavior: ControlBehavior::Throttling,
            max_queueing_time_ms: 400,
            ..FlowRule::default()
        }])
        .unwrap();

    // Head call pins the pace line.
    let head = sluice.entry("paced").expect("head of the queue");
    head.exit();

    let started = Instant::now();
    let mut handles = vec![];
    for _ in 0..9 {
        let sluice = sluice.clone();
        handles.push(std::thread::spawn(move || match sluice.entry("paced") {
            Ok(entry) => {
                entry.exit();
                true
            }
            Err(err) => {
                assert!(matches!(err, BlockError::Flow { .. }));
                false
            }
        }));
    }

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    // One request every 200 ms and a 400 ms queue: two waiters fit.
    assert_eq!(admitted, 2);
    assert!(started.elapsed() >= Duration::from_millis(350));
}

#[test]
fn slow_calls_open_the_circuit_and_the_window_closes_it() {
    let sluice = Sluice::new();
    sluice
        .load_degrade_rules(vec![DegradeRule {
            resource: "slow".into(),
            grade: DegradeGrade::AvgRt,
            count: 50.0,
            time_window_sec: 2,
        }])
        .unwrap();

    let mut rejected_at = None;
    for i in 1..=10 {
        match sluice.entry("slow") {
            Ok(entry) => {
                std::thread::sleep(Duration::from_millis(60));
                entry.exit();
            }
            Err(err) => {
                assert!(matches!(err, BlockError::Degrade { .. }));
                rejected_at = Some(i);
                break;
            }
        }
    }
    // Call 1 sees an empty metric; calls 2..=5 burn the tolerated streak.
    assert_eq!(rejected_at, Some(6));

    std::thread::sleep(Duration::from_millis(2_200));
    let reopened = sluice.entry("slow").expect("window elapsed, circuit closed");
    reopened.exit();
}

#[test]
fn authority_blacklist_matches_whole_tokens() {
    let sluice = Sluice::new();
    sluice
        .load_authority_rules(vec![AuthorityRule {
            resource: "api".into(),
            limit_origin: "bad,evil".into(),
            strategy: AuthorityStrategy::Black,
        }])
        .unwrap();

    sluice.enter_context("gateway", Some("bad"));
    assert!(matches!(
        sluice.entry("api"),
        Err(BlockError::Authority { .. })
    ));
    sluice.exit_context();

    sluice.enter_context("gateway", Some("bader"));
    sluice.entry("api").expect("'bader' is not 'bad'").exit();
    sluice.exit_context();

    // No origin at all: admitted.
    sluice.entry("api").expect("empty origin passes").exit();
}

#[test]
fn excluded_param_value_runs_at_its_own_threshold() {
    let sluice = Sluice::new();
    sluice
        .load_param_flow_rules(vec![ParamFlowRule {
            resource: "lookup".into(),
            param_idx: 0,
            count: 1.0,
            exclusion_items: vec![ParamFlowItem {
                value: ParamValue::from(42),
                threshold: 10,
            }],
            ..ParamFlowRule::default()
        }])
        .unwrap();

    for _ in 0..10 {
        sluice
            .entry_with(EntryArgs::new("lookup").with_args(vec![ParamValue::from(42)]))
            .expect("hot value runs under its exclusion threshold")
            .exit();
    }

    sluice
        .entry_with(EntryArgs::new("lookup").with_args(vec![ParamValue::from(43)]))
        .expect("first sighting of 43")
        .exit();
    let blocked = sluice.entry_with(EntryArgs::new("lookup").with_args(vec![ParamValue::from(43)]));
    match blocked {
        Err(BlockError::ParamFlow { value, .. }) => assert_eq!(value, ParamValue::from(43)),
        other => panic!("expected a param-flow rejection, got {other:?}"),
    }

    let top = sluice.hot_param_values("lookup", 0, 1);
    assert_eq!(top.first(), Some(&(ParamValue::from(42), 10)));
}

#[test]
fn param_counters_are_isolated_per_slot() {
    let sluice = Sluice::new();
    sluice
        .load_param_flow_rules(vec![
            ParamFlowRule {
                resource: "multi".into(),
                param_idx: 0,
                count: 1.0,
                ..ParamFlowRule::default()
            },
            ParamFlowRule {
                resource: "multi".into(),
                param_idx: 1,
                count: 100.0,
                ..ParamFlowRule::default()
            },
        ])
        .unwrap();

    let x = ParamValue::from("x");
    sluice
        .entry_with(EntryArgs::new("multi").with_args(vec![x.clone(), x.clone()]))
        .expect("fresh counters")
        .exit();

    // Slot 0 is exhausted for `x`; slot 1 is nowhere near its limit.
    assert!(sluice
        .entry_with(EntryArgs::new("multi").with_args(vec![x.clone()]))
        .is_err());
    sluice
        .entry_with(EntryArgs::new("multi").with_args(vec![ParamValue::from("y"), x.clone()]))
        .expect("slot 0 sees a fresh value, slot 1 is far below threshold")
        .exit();
}

#[test]
fn prioritized_call_borrows_future_capacity() {
    let sluice = Sluice::new();
    sluice.load_flow_rules(vec![qps_rule("borrow", 10.0)]).unwrap();

    // Fill the current window.
    let mut held = Vec::new();
    for _ in 0..10 {
        held.push(sluice.entry("borrow").expect("within threshold"));
    }
    for entry in held.into_iter().rev() {
        entry.exit();
    }

    // Step into the next bucket so the filled one is the aging window.
    std::thread::sleep(Duration::from_millis(600));

    let prioritized = sluice
        .entry_with(EntryArgs::new("borrow").with_priority(true))
        .expect("prioritized call borrows instead of failing");
    let wait = prioritized
        .wait_duration()
        .expect("borrowed admissions report their wait");
    assert!(wait > Duration::ZERO && wait <= Duration::from_millis(500));

    let cluster = sluice.cluster_node("borrow").unwrap();
    // The borrowed permit was transferred into the window we just woke in.
    assert!(cluster.pass_qps() >= 1.0);
    // Borrowed admissions never enter the thread counters.
    assert_eq!(cluster.cur_thread_num(), 0);

    prioritized.exit();
    assert_eq!(cluster.cur_thread_num(), 0);
}

#[test]
fn dropped_entry_is_unwound() {
    let sluice = Sluice::new();
    let entry = sluice.entry("leaky").unwrap();
    let cluster = sluice.cluster_node("leaky").unwrap();
    assert_eq!(cluster.cur_thread_num(), 1);

    drop(entry);
    assert_eq!(cluster.cur_thread_num(), 0);
}

#[test]
fn nested_entries_exit_in_reverse_order() {
    let sluice = Sluice::new();
    sluice.enter_context("web", None);

    let outer = sluice.entry("svc-a").unwrap();
    let inner = sluice.entry("svc-b").unwrap();
    inner.exit();
    outer.exit();

    sluice.exit_context();

    let a = sluice.cluster_node("svc-a").unwrap();
    let b = sluice.cluster_node("svc-b").unwrap();
    assert_eq!(a.total_pass(), 1);
    assert_eq!(b.total_pass(), 1);
    assert_eq!(a.cur_thread_num(), 0);
    assert_eq!(b.cur_thread_num(), 0);
}

#[test]
fn chain_strategy_only_applies_in_the_named_context() {
    let sluice = Sluice::new();
    sluice
        .load_flow_rules(vec![FlowRule {
            resource: "shared-db".into(),
            count: 1.0,
            strategy: sluice::RelationStrategy::Chain,
            ref_resource: Some("batch-job".into()),
            ..FlowRule::default()
        }])
        .unwrap();

    // Outside the named entry chain the rule selects no node and admits.
    sluice.enter_context("interactive", None);
    sluice.entry("shared-db").unwrap().exit();
    sluice.entry("shared-db").unwrap().exit();
    sluice.exit_context();

    // Inside it, the per-context node is measured and the limit bites.
    sluice.enter_context("batch-job", None);
    let first = sluice.entry("shared-db").unwrap();
    first.exit();
    assert!(sluice.entry("shared-db").is_err());
    sluice.exit_context();
}

#[test]
fn metric_log_records_completed_seconds() {
    let path = std::env::temp_dir().join(format!("sluice-metrics-{}.log", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let sluice = Sluice::with_config(Config {
        metric_log_path: Some(path.clone()),
        metric_flush_interval_ms: 200,
        ..Config::default()
    });

    for _ in 0..3 {
        sluice.entry("logged").unwrap().exit();
    }

    // Let the second complete and the writer flush it.
    std::thread::sleep(Duration::from_millis(2_400));

    let contents = std::fs::read_to_string(&path).expect("metric file written");
    let line = contents
        .lines()
        .find(|l| l.contains("|logged|"))
        .expect("a line for the resource");
    // timestamp|localDate|resource|pass|block|success|exception|rt|occupied|concurrency
    assert_eq!(line.split('|').count(), 10);
    assert_eq!(line.split('|').nth(3), Some("3"), "pass column");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn rule_listeners_observe_every_successful_load() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let sluice = Sluice::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    sluice.flow_rule_manager().on_change(move |rules| {
        counter.store(rules.len(), Ordering::Release);
    });

    sluice
        .load_flow_rules(vec![qps_rule("a", 1.0), qps_rule("b", 2.0)])
        .unwrap();
    assert_eq!(seen.load(Ordering::Acquire), 2);

    // A failed load never reaches the listeners.
    assert!(sluice.load_flow_rules(vec![FlowRule::default()]).is_err());
    assert_eq!(seen.load(Ordering::Acquire), 2);
}

#[test]
fn file_fed_rules_govern_admission() {
    use sluice::{FileRuleSource, JsonArrayConverter};

    let path = std::env::temp_dir().join(format!("sluice-rules-{}.json", std::process::id()));
    std::fs::write(&path, r#"[{"resource": "fed", "count": 1.0}]"#).unwrap();

    let sluice = Sluice::new();
    let sink_runtime = sluice.clone();
    let _source = FileRuleSource::spawn(
        &path,
        Duration::from_millis(20),
        JsonArrayConverter::<FlowRule>::default(),
        move |rules: Vec<FlowRule>| sink_runtime.load_flow_rules(rules),
    );

    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(sluice.flow_rules().len(), 1);

    sluice.entry("fed").unwrap().exit();
    assert!(sluice.entry("fed").is_err(), "file-fed limit of 1 applies");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn thread_grade_limits_live_concurrency_not_rate() {
    let sluice = Sluice::new();
    sluice
        .load_flow_rules(vec![FlowRule {
            resource: "conn".into(),
            grade: FlowGrade::Thread,
            count: 1.0,
            ..FlowRule::default()
        }])
        .unwrap();

    let held = sluice.entry("conn").unwrap();
    assert!(sluice.entry("conn").is_err(), "one holder saturates");
    held.exit();
    // Rate does not matter for thread grade; a new holder fits at once.
    sluice.entry("conn").unwrap().exit();
}
