//! End-to-end pipeline execution

use std::sync::Arc;

use aeroflow::store::SpillStoreFactory;
use aeroflow::{execute, EngineConfig, ExecCtx, Op, RowCollector, Vars};
use serde_json::json;

#[test]
fn test_scan_filter_project() {
    let ctx = ExecCtx::default();
    let plan = Op::node(
        "project",
        &["a", "c"],
        json!([["field", "a"], ["field", "c"]]),
        vec![Op::node(
            "filter",
            &["a", "b", "c"],
            json!(["eq", ["field", "c"], ["json", 3000]]),
            vec![Op::leaf(
                "scan",
                &["a", "b", "c"],
                json!(["csv", "00,00,0000\n10,20,3000\n11,21,3000\n12,22,1000"]),
            )],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    assert_eq!(
        out.as_strings(),
        vec![vec!["10", "3000"], vec!["11", "3000"]]
    );
}

#[test]
fn test_order_by_offset_limit_boundaries() {
    let ctx = ExecCtx::default();
    let sorted_input = Op::leaf("scan", &["a"], json!(["csv", "1\n2\n3"]));
    let order = json!([[["field", "a"], "asc"]]);

    let cases: Vec<(serde_json::Value, Vec<Vec<&str>>)> = vec![
        (json!({"order": order, "offset": 100, "limit": 100}), vec![]),
        (json!({"order": order, "offset": 1, "limit": 0}), vec![]),
        (json!({"order": order, "offset": 1, "limit": 1}), vec![vec!["2"]]),
    ];
    for (params, expect) in cases {
        let plan = Op::node(
            "orderByOffsetLimit",
            &["a"],
            params.clone(),
            vec![sorted_input.clone()],
        );
        let mut out = RowCollector::new();
        execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
        let expect: Vec<Vec<String>> = expect
            .into_iter()
            .map(|row| row.into_iter().map(String::from).collect())
            .collect();
        assert_eq!(out.as_strings(), expect, "params {params}");
    }
}

#[test]
fn test_pipeline_over_spill_stores() {
    // The same plans must behave identically when join/group state spills
    // to disk-backed stores.
    let dir = tempfile::TempDir::new().unwrap();
    let stores = Arc::new(SpillStoreFactory::new(dir.path().join("spill")).unwrap());
    let ctx = ExecCtx::new(EngineConfig::default()).with_stores(stores);

    let plan = Op::node(
        "group",
        &["dept", "n"],
        json!({
            "by": [["field", "dept"]],
            "aggs": [["count", ["field", "emp"]]],
        }),
        vec![Op::node(
            "joinHash-inner",
            &["dept", "city", "emp", "empDept"],
            json!({
                "leftKey": [["field", "dept"]],
                "rightKey": [["field", "empDept"]],
            }),
            vec![
                Op::leaf(
                    "scan",
                    &["dept", "city"],
                    json!(["csv", "\"dev\",\"paris\"\n\"finance\",\"london\""]),
                ),
                Op::leaf(
                    "scan",
                    &["emp", "empDept"],
                    json!(["csv", "\"dan\",\"dev\"\n\"doug\",\"dev\"\n\"frank\",\"finance\""]),
                ),
            ],
        )],
    );

    let mut out = RowCollector::new();
    execute(&ctx, &plan, &Vars::new(), &mut out).unwrap();
    let mut rows = out.as_strings();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["\"dev\"".to_string(), "2".to_string()],
            vec!["\"finance\"".to_string(), "1".to_string()],
        ]
    );
}

#[test]
fn test_unknown_operator_fails_cleanly() {
    let ctx = ExecCtx::default();
    let plan = Op::leaf("mystery", &[], json!({}));
    let mut out = RowCollector::new();
    let result = execute(&ctx, &plan, &Vars::new(), &mut out);
    assert!(result.is_err());
    assert!(out.rows.is_empty());
}
