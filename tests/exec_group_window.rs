//! Grouping, windowing, and union staging

use aeroflow::{execute, EngineConfig, ExecCtx, Op, RowCollector, Vars};
use serde_json::json;

fn sorted(mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    rows.sort();
    rows
}

#[test]
fn test_group_by_count_order_insensitive() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "group",
        &["dept", "n"],
        json!({
            "by": [["field", "dept"]],
            "aggs": [["count", ["field", "emp"]]],
        }),
        vec![Op::leaf(
            "scan",
            &["emp", "dept"],
            json!(["csv", "\"dan\",\"dev\"\n\"doug\",\"dev\"\n\"frank\",\"finance\""]),
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        sorted(out.as_strings()),
        vec![
            vec!["\"dev\"".to_string(), "2".to_string()],
            vec!["\"finance\"".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn test_group_then_order_deterministic_output() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "orderByOffsetLimit",
        &["k", "total"],
        json!({"order": [[["field", "k"], "asc"]]}),
        vec![Op::node(
            "group",
            &["k", "total"],
            json!({
                "by": [["field", "k"]],
                "aggs": [["sum", ["field", "v"]]],
            }),
            vec![Op::leaf(
                "scan",
                &["k", "v"],
                json!(["csv", "2,5\n1,10\n2,7\n1,30"]),
            )],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        out.as_strings(),
        vec![vec!["1", "40"], vec!["2", "12"]]
    );
}

/// A full window pipeline: partition, frame maintenance, and a projection
/// reading the frame through the shared slot.
#[test]
fn test_window_frame_count_end_to_end() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "project",
        &["k", "v", "n"],
        json!([["field", "k"], ["field", "v"], ["windowFrameCount", 0, 0]]),
        vec![Op::node(
            "window-frames",
            &["k", "v"],
            json!({
                "slot": 0,
                "frames": [{"type": "rows", "begin": ["preceding", 1], "end": "current"}],
            }),
            vec![Op::node(
                "window-partition",
                &["k", "v"],
                json!({"by": [["field", "k"]], "order": [["field", "v"]], "slot": 0}),
                vec![Op::leaf(
                    "scan",
                    &["k", "v"],
                    json!(["csv", "1,10\n1,20\n1,30\n2,40"]),
                )],
            )],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        out.as_strings(),
        vec![
            vec!["1", "10", "1"],
            vec!["1", "20", "2"],
            vec!["1", "30", "2"],
            vec!["2", "40", "1"],
        ]
    );
}

#[test]
fn test_window_unbounded_frame_sees_whole_partition() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "project",
        &["k", "n"],
        json!([["field", "k"], ["windowFrameCount", 0, 0]]),
        vec![Op::node(
            "window-frames",
            &["k", "v"],
            json!({"slot": 0, "frames": [{"type": "rows"}]}),
            vec![Op::node(
                "window-partition",
                &["k", "v"],
                json!({"by": [["field", "k"]], "order": [["field", "v"]], "slot": 0}),
                vec![Op::leaf(
                    "scan",
                    &["k", "v"],
                    json!(["csv", "1,10\n1,20\n2,30"]),
                )],
            )],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        out.as_strings(),
        vec![vec!["1", "2"], vec!["1", "2"], vec!["2", "1"]]
    );
}

#[test]
fn test_union_then_group_composition() {
    let mut config = EngineConfig::default();
    config.union_batch_size = 2;
    let ctx = ExecCtx::new(config);

    let plan = Op::node(
        "group",
        &["k", "n"],
        json!({
            "by": [["field", "k"]],
            "aggs": [["count", ["json", 1]]],
        }),
        vec![Op::node(
            "unionAll",
            &["k"],
            json!({}),
            vec![
                Op::leaf("scan", &["k"], json!(["csv", "1\n2\n1"])),
                Op::leaf("scan", &["k"], json!(["csv", "2\n2"])),
                Op::leaf("scan", &["k"], json!(["csv", "3"])),
            ],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        sorted(out.as_strings()),
        vec![
            vec!["1".to_string(), "2".to_string()],
            vec!["2".to_string(), "3".to_string()],
            vec!["3".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn test_set_operations_compose_with_order() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "orderByOffsetLimit",
        &["v"],
        json!({"order": [[["field", "v"], "asc"]]}),
        vec![Op::node(
            "except-distinct",
            &["v"],
            json!({}),
            vec![
                Op::leaf("scan", &["v"], json!(["csv", "5\n3\n1\n3"])),
                Op::leaf("scan", &["v"], json!(["csv", "3"])),
            ],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(out.as_strings(), vec![vec!["1"], vec!["5"]]);
}
