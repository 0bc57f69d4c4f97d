//! End-to-end editing scenarios: edits flow through the session into the
//! debounced execution callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fq_core::{ModelError, QueryModel, StructuredQuery};
use fq_editor::{DebounceScheduler, EditorSession, SchedulerState, DEFAULT_QUIET_PERIOD};
use serde_json::json;
use tokio::time::sleep;

type Log = Arc<Mutex<Vec<QueryModel>>>;

fn session(initial: QueryModel) -> (EditorSession, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let scheduler = DebounceScheduler::new(DEFAULT_QUIET_PERIOD, move |model: QueryModel| {
        sink.lock().unwrap().push(model);
    });
    (EditorSession::new(initial, scheduler), log)
}

fn limit_of(model: &QueryModel) -> u64 {
    match model {
        QueryModel::Structured(StructuredQuery { limit, .. }) => *limit,
        QueryModel::FreeForm(_) => panic!("expected structured query"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rapid_limit_edits_execute_once_with_last_value() {
    let (mut editor, log) = session(QueryModel::structured("users"));

    editor.apply_edit("limit", &json!(10)).unwrap();
    sleep(Duration::from_millis(100)).await;
    editor.apply_edit("limit", &json!(20)).unwrap();
    sleep(Duration::from_millis(100)).await;

    sleep(Duration::from_millis(500)).await;

    let executed = log.lock().unwrap().clone();
    assert_eq!(executed.len(), 1);
    assert_eq!(limit_of(&executed[0]), 20);
}

#[tokio::test(start_paused = true)]
async fn test_run_right_after_edit_executes_once_immediately() {
    let (mut editor, log) = session(QueryModel::structured("users"));

    editor.apply_edit("limit", &json!(5)).unwrap();
    editor.run();
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(limit_of(&log.lock().unwrap()[0]), 5);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_edit_does_not_schedule() {
    let (mut editor, log) = session(QueryModel::free_form("select * from users"));

    let err = editor.apply_edit("collectionPath", &json!("users")).unwrap_err();
    assert!(matches!(err, ModelError::InvalidField { .. }));
    assert_eq!(editor.scheduler().state(), SchedulerState::Idle);
    assert_eq!(editor.model(), &QueryModel::free_form("select * from users"));

    sleep(Duration::from_millis(1000)).await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_change_collection_resets_limit() {
    let (mut editor, log) = session(QueryModel::structured("users"));
    editor.apply_edit("limit", &json!(50)).unwrap();
    editor.change_collection("orders").unwrap();

    sleep(Duration::from_millis(600)).await;
    let executed = log.lock().unwrap().clone();
    assert_eq!(executed, vec![QueryModel::structured("orders")]);
}

#[tokio::test(start_paused = true)]
async fn test_replace_switches_variant() {
    let (mut editor, log) = session(QueryModel::structured("users"));
    editor.replace(QueryModel::free_form("select id from users"));
    editor.apply_edit("query", &json!("select id from users limit 3")).unwrap();

    sleep(Duration::from_millis(600)).await;
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[QueryModel::free_form("select id from users limit 3")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_teardown_and_drop_cancel_pending_run() {
    let (mut editor, log) = session(QueryModel::structured("users"));
    editor.apply_edit("limit", &json!(1)).unwrap();
    editor.teardown();
    sleep(Duration::from_millis(1000)).await;
    assert!(log.lock().unwrap().is_empty());

    editor.apply_edit("limit", &json!(2)).unwrap();
    drop(editor);
    sleep(Duration::from_millis(1000)).await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_executable_model_still_reaches_callback() {
    let (mut editor, log) = session(QueryModel::structured("users"));
    editor.apply_edit("collectionPath", &json!("")).unwrap();
    sleep(Duration::from_millis(600)).await;

    let executed = log.lock().unwrap().clone();
    assert_eq!(executed.len(), 1);
    assert!(!executed[0].is_executable());
}
