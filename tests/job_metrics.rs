#![cfg(unix)]

mod support;

use std::collections::HashSet;

use axum::http::StatusCode;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use support::{COMPILER_UNTERMINATED, Harness};

#[tokio::test]
async fn job_outcomes_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let ok = Harness::builder().build();
    let (status, _) = ok
        .compile("\\documentclass{article}\\begin{document}x\\end{document}")
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ok.compile("").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let failing = Harness::builder().compiler(COMPILER_UNTERMINATED).build();
    let (status, _) = failing.compile("\\begin{document}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let snapshot = snapshotter.snapshot().into_vec();

    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();
    for metric in [
        "texpreview_jobs_total",
        "texpreview_job_ms",
        "texpreview_compile_ms",
        "texpreview_rejected_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let outcomes: HashSet<(String, String)> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "texpreview_jobs_total")
        .filter(|(_, _, _, value)| matches!(value, DebugValue::Counter(count) if *count > 0))
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(outcomes.contains(&("outcome".to_string(), "succeeded".to_string())));
    assert!(outcomes.contains(&("outcome".to_string(), "compile_failed".to_string())));
}
