use changekeeper_backend::{
    models::{actor::Actor, change_entry::ChangeOperation},
    repositories::{audit_log as audit_log_repo, change_log as change_log_repo},
    state::AppState,
    types::ChangeId,
};
use changekeeper_backend::error::ChangeError;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;

#[path = "support/mod.rs"]
mod support;

async fn record_create(state: &AppState, actor: &str, entity_type: &str, entity_id: &str) -> ChangeId {
    let after = support::snapshot(state, entity_type, entity_id).await;
    state
        .recorder
        .record(actor, entity_type, entity_id, ChangeOperation::Create, None, Some(after))
        .await
        .expect("record create")
}

/// Records a delete with the given before state, undoes it and checks the
/// failed undo left the entry available.
async fn undo_recorded_delete(state: &AppState, pool: &PgPool, entity_type: &str, entity_id: &str, before: Value) -> ChangeError {
    let before = before.as_object().cloned().expect("object");
    let change_id = state
        .recorder
        .record("alice", entity_type, entity_id, ChangeOperation::Delete, Some(before), None)
        .await
        .expect("record delete");
    let err = state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .expect_err("undo should fail");
    let entry = change_log_repo::fetch_change(pool, change_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!entry.consumed);
    err
}

#[sqlx::test(migrations = "./migrations")]
async fn vendor_create_undo_redo_round_trip(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let alice = Actor::member("alice");

    support::seed_vendor(&pool, "v1", "Acme").await;
    let created = support::snapshot(&state, "vendors", "v1").await;
    let change_id = record_create(&state, "alice", "vendors", "v1").await;

    let undo = state.undo.undo(change_id, &alice).await.expect("undo create");
    assert_eq!(undo.status, "undone");
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM vendors WHERE id = $1", "v1").await,
        0
    );

    let redo_entry = change_log_repo::fetch_change(&pool, undo.redo_id)
        .await
        .unwrap()
        .expect("redo entry");
    assert_eq!(redo_entry.operation, "delete");
    assert_eq!(redo_entry.before(), Some(&Value::Object(created.clone())));
    assert!(redo_entry.after().is_none());

    let redo = state.undo.undo(undo.redo_id, &alice).await.expect("redo");
    let restored = support::snapshot(&state, "vendors", "v1").await;
    assert_eq!(restored, created);

    let third = change_log_repo::fetch_change(&pool, redo.redo_id)
        .await
        .unwrap()
        .expect("second inverse");
    assert_eq!(third.operation, "create");
    assert!(third.before().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn undoing_resolution_clears_resolved_timestamp(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_quality_record(&pool, "q1", "Burr on bracket").await;
    let before = support::snapshot(&state, "quality_records", "q1").await;

    sqlx::query(
        "UPDATE quality_records SET status = 'resolved', resolution = 'Deburred', \
         resolved_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind("q1")
    .execute(&pool)
    .await
    .unwrap();
    let after = support::snapshot(&state, "quality_records", "q1").await;
    assert_ne!(after["resolved_at"], Value::Null);

    let change_id = state
        .recorder
        .record("alice", "quality_records", "q1", ChangeOperation::Update, Some(before.clone()), Some(after.clone()))
        .await
        .unwrap();

    let undo = state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .expect("undo update");

    let current = support::snapshot(&state, "quality_records", "q1").await;
    assert_eq!(current["status"], json!("open"));
    assert_eq!(current["resolved_at"], Value::Null);
    assert_eq!(current["resolution"], Value::Null);
    assert_eq!(current, before);

    let inverse = change_log_repo::fetch_change(&pool, undo.redo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inverse.operation, "update");
    assert_eq!(inverse.before(), Some(&Value::Object(after)));
    assert_eq!(inverse.after(), Some(&Value::Object(before)));
}

#[sqlx::test(migrations = "./migrations")]
async fn undoing_purchase_order_delete_restores_every_line(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    support::seed_purchase_order(&pool, "po1", "v1", 3).await;
    let before = support::snapshot(&state, "purchase_orders", "po1").await;
    assert_eq!(before["_children"].as_array().map(Vec::len), Some(3));

    sqlx::query("DELETE FROM purchase_orders WHERE id = $1")
        .bind("po1")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM purchase_order_lines WHERE purchase_order_id = $1", "po1").await,
        0
    );

    let change_id = state
        .recorder
        .record("alice", "purchase_orders", "po1", ChangeOperation::Delete, Some(before.clone()), None)
        .await
        .unwrap();
    state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .expect("undo delete");

    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM purchase_order_lines WHERE purchase_order_id = $1", "po1").await,
        3
    );
    let restored = support::snapshot(&state, "purchase_orders", "po1").await;
    assert_eq!(restored, before);
}

#[sqlx::test(migrations = "./migrations")]
async fn purchase_order_update_reconciles_lines_exactly(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    support::seed_purchase_order(&pool, "po1", "v1", 2).await;
    let before = support::snapshot(&state, "purchase_orders", "po1").await;

    // The edit adds a third line and changes the first.
    sqlx::query("UPDATE purchase_order_lines SET quantity = 99 WHERE id = 'po1-l1'")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO purchase_order_lines (id, purchase_order_id, line_no, part_number, quantity) \
         VALUES ('po1-l3', 'po1', 3, 'PN-3', 5)",
    )
    .execute(&pool)
    .await
    .unwrap();
    let after = support::snapshot(&state, "purchase_orders", "po1").await;

    let change_id = state
        .recorder
        .record("alice", "purchase_orders", "po1", ChangeOperation::Update, Some(before.clone()), Some(after))
        .await
        .unwrap();
    state.undo.undo(change_id, &Actor::member("alice")).await.unwrap();

    assert_eq!(support::snapshot(&state, "purchase_orders", "po1").await, before);
}

#[sqlx::test(migrations = "./migrations")]
async fn second_undo_conflicts_and_changes_nothing(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let alice = Actor::member("alice");
    support::seed_vendor(&pool, "v1", "Acme").await;
    let change_id = record_create(&state, "alice", "vendors", "v1").await;

    state.undo.undo(change_id, &alice).await.expect("first undo");
    let entries_after_first = change_log_repo::list_recent_changes(&pool, &Default::default(), 200)
        .await
        .unwrap()
        .len();

    let err = state.undo.undo(change_id, &alice).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.to_string(), "already undone");

    let entries_after_second = change_log_repo::list_recent_changes(&pool, &Default::default(), 200)
        .await
        .unwrap()
        .len();
    assert_eq!(entries_after_first, entries_after_second);
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM vendors WHERE id = $1", "v1").await,
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_undos_of_one_entry_succeed_once(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    let change_id = record_create(&state, "alice", "vendors", "v1").await;

    let first = {
        let undo = state.undo.clone();
        tokio::spawn(async move { undo.undo(change_id, &Actor::member("alice")).await })
    };
    let second = {
        let undo = state.undo.clone();
        tokio::spawn(async move { undo.undo(change_id, &Actor::member("alice")).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).expect("one failure");
    assert!(failure.is_conflict());
}

#[sqlx::test(migrations = "./migrations")]
async fn failed_restore_leaves_entry_unconsumed(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    let mut before = support::snapshot(&state, "vendors", "v1").await;
    before.insert("rating".into(), json!(5));

    let change_id = state
        .recorder
        .record("alice", "vendors", "v1", ChangeOperation::Delete, Some(before), None)
        .await
        .unwrap();

    let err = state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("unknown column rating"));

    let entry = change_log_repo::fetch_change(&pool, change_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!entry.consumed);
}

#[sqlx::test(migrations = "./migrations")]
async fn injected_column_names_never_reach_sql(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    let mut before = support::snapshot(&state, "vendors", "v1").await;
    before.insert("name\" = 'x'; DROP TABLE vendors; --".into(), json!("boom"));

    let change_id = state
        .recorder
        .record("alice", "vendors", "v1", ChangeOperation::Update, Some(before.clone()), Some(before))
        .await
        .unwrap();
    let err = state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM vendors WHERE id = $1", "v1").await,
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn key_mapped_entities_restore_by_their_own_key(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_part(&pool, "PN-100", "Hex bolt").await;
    let before = support::snapshot(&state, "parts", "PN-100").await;
    assert_eq!(before["part_number"], json!("PN-100"));

    sqlx::query("DELETE FROM parts WHERE part_number = $1")
        .bind("PN-100")
        .execute(&pool)
        .await
        .unwrap();
    let change_id = state
        .recorder
        .record("alice", "parts", "PN-100", ChangeOperation::Delete, Some(before.clone()), None)
        .await
        .unwrap();

    state.undo.undo(change_id, &Actor::member("alice")).await.unwrap();
    assert_eq!(support::snapshot(&state, "parts", "PN-100").await, before);
}

#[sqlx::test(migrations = "./migrations")]
async fn undo_is_scoped_to_the_recording_actor(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    let change_id = record_create(&state, "alice", "vendors", "v1").await;

    let err = state
        .undo
        .undo(change_id, &Actor::member("bob"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    // Admins only reach other actors' entries when the deployment allows it.
    let err = state
        .undo
        .undo(change_id, &Actor::admin("root"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let mut config = support::test_config();
    config.admin_undo_any = true;
    let permissive = support::build_state_with(&pool, config).await;
    permissive
        .undo
        .undo(change_id, &Actor::admin("root"))
        .await
        .expect("admin undo");
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_change_id_is_not_found(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let err = state
        .undo
        .undo(ChangeId::new(424242), &Actor::member("alice"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[sqlx::test(migrations = "./migrations")]
async fn reversal_writes_an_audit_note(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_quality_record(&pool, "q1", "Scratch").await;
    let before = support::snapshot(&state, "quality_records", "q1").await;
    sqlx::query("UPDATE quality_records SET status = 'closed' WHERE id = 'q1'")
        .execute(&pool)
        .await
        .unwrap();
    let after = support::snapshot(&state, "quality_records", "q1").await;
    let change_id = state
        .recorder
        .record("alice", "quality_records", "q1", ChangeOperation::Update, Some(before), Some(after))
        .await
        .unwrap();

    state.undo.undo(change_id, &Actor::member("alice")).await.unwrap();

    let notes = audit_log_repo::list_for_target(&pool, "quality_records", "q1")
        .await
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].event_type, "change_undone");
    assert_eq!(notes[0].actor_id.as_deref(), Some("alice"));
    assert!(notes[0].summary.contains("restored fields: status"));
}

#[sqlx::test(migrations = "./migrations")]
async fn recent_changes_are_newest_first_and_filterable(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    support::seed_vendor(&pool, "v2", "Globex").await;
    let first = record_create(&state, "alice", "vendors", "v1").await;
    let second = record_create(&state, "alice", "vendors", "v2").await;
    record_create(&state, "bob", "vendors", "v2").await;
    assert!(second > first);

    let alice = Actor::member("alice");
    let all = state
        .recorder
        .list_recent(&alice, &Default::default())
        .await
        .unwrap();
    let ids: Vec<ChangeId> = all.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![second, first]);

    let query = changekeeper_backend::models::ChangeListQuery {
        limit: 50,
        entity_type: Some("vendors".into()),
        entity_id: Some("v1".into()),
    };
    let filtered = state.recorder.list_recent(&alice, &query).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, first);
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_without_required_column_is_a_validation_error(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let err = undo_recorded_delete(
        &state,
        &pool,
        "vendors",
        "v1",
        json!({"id": "v1", "contact_email": "ops@acme.test"}),
    )
    .await;
    assert!(err.is_validation(), "{err:?}");
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM vendors WHERE id = $1", "v1").await,
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_line_of_missing_order_is_a_validation_error(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let err = undo_recorded_delete(
        &state,
        &pool,
        "purchase_order_lines",
        "gone-l1",
        json!({
            "id": "gone-l1",
            "purchase_order_id": "gone",
            "line_no": 1,
            "part_number": "PN-1",
            "quantity": 10
        }),
    )
    .await;
    assert!(err.is_validation(), "{err:?}");
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_rows_failing_check_constraints_is_a_validation_error(pool: PgPool) {
    let state = support::build_state(&pool).await;
    let err = undo_recorded_delete(
        &state,
        &pool,
        "work_orders",
        "wo1",
        json!({"id": "wo1", "part_number": "PN-1", "quantity": 0}),
    )
    .await;
    assert!(err.is_validation(), "{err:?}");
}

#[sqlx::test(migrations = "./migrations")]
async fn restoring_a_clashing_unique_value_is_a_conflict(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;
    support::seed_purchase_order(&pool, "po1", "v1", 1).await;

    let err = undo_recorded_delete(
        &state,
        &pool,
        "purchase_orders",
        "po2",
        json!({"id": "po2", "po_number": "PO-po1", "vendor_id": "v1", "_children": []}),
    )
    .await;
    assert!(err.is_conflict(), "{err:?}");
    assert_eq!(
        support::count_rows(&pool, "SELECT COUNT(*) FROM purchase_orders WHERE id = $1", "po2").await,
        0
    );
}

#[derive(Clone, Serialize)]
struct VendorForm {
    id: String,
    name: String,
    contact_email: Option<String>,
    status: String,
}

#[sqlx::test(migrations = "./migrations")]
async fn structured_update_is_recorded_and_undone(pool: PgPool) {
    let state = support::build_state(&pool).await;
    support::seed_vendor(&pool, "v1", "Acme").await;

    let before = VendorForm {
        id: "v1".into(),
        name: "Acme".into(),
        contact_email: Some("v1@example.com".into()),
        status: "active".into(),
    };
    let after = VendorForm {
        name: "Acme Industries".into(),
        status: "blocked".into(),
        contact_email: None,
        ..before.clone()
    };
    sqlx::query("UPDATE vendors SET name = $2, status = $3, contact_email = NULL WHERE id = $1")
        .bind("v1")
        .bind(&after.name)
        .bind(&after.status)
        .execute(&pool)
        .await
        .unwrap();

    let change_id = state
        .recorder
        .record_updated("alice", "vendors", "v1", &before, &after)
        .await
        .expect("record structured update");

    let entry = change_log_repo::fetch_change(&pool, change_id)
        .await
        .unwrap()
        .expect("entry");
    assert_eq!(entry.operation, "update");
    assert_eq!(entry.before(), Some(&serde_json::to_value(&before).unwrap()));
    assert_eq!(entry.after(), Some(&serde_json::to_value(&after).unwrap()));

    state
        .undo
        .undo(change_id, &Actor::member("alice"))
        .await
        .expect("undo structured update");

    let restored = support::snapshot(&state, "vendors", "v1").await;
    assert_eq!(restored["name"], json!("Acme"));
    assert_eq!(restored["status"], json!("active"));
    assert_eq!(restored["contact_email"], json!("v1@example.com"));
}
