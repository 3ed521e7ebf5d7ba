//! Child reconciliation and nested tree synchronization.

use duplex_engine::reconcile::sync_children;
use duplex_engine::{
    DesiredNode, EntityRecord, EntityRegistry, Error, Fault, LevelSpec, MemoryStore,
    NodeOperation, ReplicationTx, StoreRole, Stores, TreeSpec, TreeSynchronizer,
};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    primary: MemoryStore,
    secondary: MemoryStore,
    stores: Stores,
}

fn harness() -> Harness {
    let primary = MemoryStore::new("primary");
    let secondary = MemoryStore::new("secondary");
    let registry = EntityRegistry::new()
        .with_entity("Category", "categories")
        .with_entity("Contract", "contract")
        .with_entity("ContractClause", "contract_clause")
        .with_entity("ContractClausePoint", "contract_clause_point")
        .with_entity("ContractClauseLog", "contract_clause_log");
    let stores = Stores::new(
        Arc::new(primary.clone()),
        Arc::new(secondary.clone()),
        registry,
    );
    Harness {
        primary,
        secondary,
        stores,
    }
}

fn record(v: Value) -> EntityRecord {
    EntityRecord::from(v)
}

fn contract_tree() -> TreeSpec {
    TreeSpec::new("Contract").with_child(
        LevelSpec::new("clauses", "ContractClause", "id_contract").with_child(
            LevelSpec::new("points", "ContractClausePoint", "id_contract_clause").with_child(
                LevelSpec::new("logs", "ContractClauseLog", "id_contract_clause_point")
                    .with_ancestor_key("id_contract_clause", 1)
                    .with_ancestor_key("id_contract", 2),
            ),
        ),
    )
}

const TABLES: [&str; 4] = [
    "contract",
    "contract_clause",
    "contract_clause_point",
    "contract_clause_log",
];

fn assert_stores_match(h: &Harness) {
    for table in TABLES {
        let p = h.primary.rows(table);
        let s = h.secondary.rows(table);
        assert_eq!(p.len(), s.len(), "row count of {}", table);
        for (a, b) in p.iter().zip(&s) {
            assert!(a.content_eq(b), "{} row {:?} differs", table, a.id);
        }
    }
}

// ============================================================================
// One level
// ============================================================================

#[tokio::test]
async fn reconciles_children_of_one_parent() {
    let h = harness();
    for store in [&h.primary, &h.secondary] {
        store.put_raw("categories", record(json!({"id": 10, "name": "a", "parent": 5})));
        store.put_raw("categories", record(json!({"id": 11, "name": "b", "parent": 5})));
        store.put_raw("categories", record(json!({"id": 12, "name": "z", "parent": 6})));
    }
    let pair = h.stores.pair("Category").unwrap();

    let mut tx = ReplicationTx::begin(&h.stores, true).await.unwrap();
    let result = sync_children(
        &mut tx,
        &pair,
        "parent",
        5,
        vec![
            record(json!({"id": 10, "name": "a2"})),
            record(json!({"name": "c"})),
        ],
    )
    .await
    .unwrap();
    tx.commit("Category").await.unwrap();

    assert_eq!(result.deleted, vec![11]);
    assert_eq!(result.updated.len(), 1);
    assert_eq!(result.updated[0].id, Some(10));
    assert_eq!(result.updated[0].get("name"), Some(&json!("a2")));
    assert_eq!(result.created.len(), 1);
    assert_eq!(result.created[0].get("name"), Some(&json!("c")));
    assert_eq!(result.created[0].get("parent"), Some(&json!(5)));

    let new_id = result.created[0].id.unwrap();
    assert!(h.secondary.row("categories", new_id).is_some());
    assert!(h.secondary.row("categories", 11).is_none());
    // Other parents are untouched
    assert!(h.primary.row("categories", 12).is_some());
}

#[tokio::test]
async fn second_pass_with_output_is_idempotent() {
    let h = harness();
    let pair = h.stores.pair("Category").unwrap();

    let mut tx = ReplicationTx::begin(&h.stores, true).await.unwrap();
    let first = sync_children(
        &mut tx,
        &pair,
        "parent",
        1,
        vec![record(json!({"name": "a"})), record(json!({"name": "b"}))],
    )
    .await
    .unwrap();
    tx.commit("Category").await.unwrap();

    let mut tx = ReplicationTx::begin(&h.stores, true).await.unwrap();
    let second = sync_children(&mut tx, &pair, "parent", 1, first.created.clone())
        .await
        .unwrap();
    tx.commit("Category").await.unwrap();

    assert_eq!(second.summary.total_created, 0);
    assert_eq!(second.summary.total_deleted, 0);
    assert_eq!(second.summary.total_updated, 2);
}

#[tokio::test]
async fn foreign_id_is_not_pulled_under_another_parent() {
    let h = harness();
    h.primary
        .put_raw("categories", record(json!({"id": 7, "name": "x", "parent": 2})));
    let pair = h.stores.pair("Category").unwrap();

    let mut tx = ReplicationTx::begin(&h.stores, false).await.unwrap();
    let result = sync_children(
        &mut tx,
        &pair,
        "parent",
        1,
        vec![record(json!({"id": 7, "name": "stolen"}))],
    )
    .await
    .unwrap();
    tx.commit("Category").await.unwrap();

    assert!(result.updated.is_empty());
    let row = h.primary.row("categories", 7).unwrap();
    assert_eq!(row.get("parent"), Some(&json!(2)));
    assert_eq!(row.get("name"), Some(&json!("x")));
}

// ============================================================================
// Nested trees
// ============================================================================

fn contract_payload() -> Value {
    json!({
        "number": "C-1",
        "clauses": [
            {
                "title": "Payment",
                "points": [
                    {"text": "30 days", "logs": [{"note": "drafted"}, {"note": "agreed"}]},
                    {"text": "in EUR"}
                ]
            },
            {"title": "Delivery", "points": [{"text": "on site"}]}
        ]
    })
}

#[tokio::test]
async fn creates_a_whole_tree_in_both_stores() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();

    let nodes = sync
        .upsert(&tree, tree.parse(contract_payload()).unwrap(), true)
        .await
        .unwrap();

    assert_eq!(nodes.len(), 1);
    let root = &nodes[0];
    assert_eq!(root.operation, NodeOperation::Created);
    let contract_id = root.record.id.unwrap();

    let clauses = &root.children["clauses"];
    assert_eq!(clauses.nodes.len(), 2);
    let payment = &clauses.nodes[0];
    assert_eq!(payment.record.get("title"), Some(&json!("Payment")));
    assert_eq!(payment.record.get("id_contract"), Some(&json!(contract_id)));

    let points = &payment.children["points"];
    assert_eq!(points.nodes.len(), 2);
    let logs = &points.nodes[0].children["logs"];
    assert_eq!(logs.nodes.len(), 2);
    let log = &logs.nodes[0].record;
    let point_id = points.nodes[0].record.id.unwrap();
    let clause_id = payment.record.id.unwrap();
    assert_eq!(log.get("id_contract_clause_point"), Some(&json!(point_id)));
    assert_eq!(log.get("id_contract_clause"), Some(&json!(clause_id)));
    assert_eq!(log.get("id_contract"), Some(&json!(contract_id)));

    assert_eq!(h.primary.rows("contract_clause").len(), 2);
    assert_eq!(h.primary.rows("contract_clause_point").len(), 3);
    assert_eq!(h.primary.rows("contract_clause_log").len(), 2);
    assert_stores_match(&h);
}

#[tokio::test]
async fn children_follow_their_parent_under_reordering() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();
    let created = sync
        .upsert(&tree, tree.parse(contract_payload()).unwrap(), true)
        .await
        .unwrap();
    let contract_id = created[0].record.id.unwrap();
    let clauses = &created[0].children["clauses"].nodes;
    let payment_id = clauses[0].record.id.unwrap();
    let delivery_id = clauses[1].record.id.unwrap();

    // New clauses interleaved with existing ones, in a different order
    let payload = json!({
        "id": contract_id,
        "clauses": [
            {"title": "New A", "points": [{"text": "a1"}]},
            {"id": delivery_id, "title": "Delivery", "points": []},
            {"title": "New B", "points": [{"text": "b1"}, {"text": "b2"}]},
            {"id": payment_id, "title": "Payment v2"}
        ]
    });
    let nodes = sync
        .upsert(&tree, tree.parse(payload).unwrap(), true)
        .await
        .unwrap();

    let level = &nodes[0].children["clauses"];
    let titles: Vec<_> = level
        .nodes
        .iter()
        .map(|n| n.record.get("title").cloned())
        .collect();
    assert_eq!(
        titles,
        vec![
            Some(json!("New A")),
            Some(json!("Delivery")),
            Some(json!("New B")),
            Some(json!("Payment v2")),
        ]
    );

    // Each new clause got exactly its own points
    let expectations = [(&level.nodes[0], vec!["a1"]), (&level.nodes[2], vec!["b1", "b2"])];
    for (node, expected) in expectations {
        let clause_id = node.record.id.unwrap();
        let texts: Vec<_> = h
            .primary
            .rows("contract_clause_point")
            .into_iter()
            .filter(|p| p.get("id_contract_clause") == Some(&json!(clause_id)))
            .map(|p| p.get("text").cloned())
            .collect();
        let expected: Vec<_> = expected.into_iter().map(|t| Some(json!(t))).collect();
        assert_eq!(texts, expected);
    }
    assert!(level.unresolved.is_empty());
    assert_stores_match(&h);
}

#[tokio::test]
async fn empty_or_absent_collection_deletes_descendants() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();
    let created = sync
        .upsert(&tree, tree.parse(contract_payload()).unwrap(), true)
        .await
        .unwrap();
    let contract_id = created[0].record.id.unwrap();
    let payment_id = created[0].children["clauses"].nodes[0].record.id.unwrap();

    // Payment keeps no points; Delivery is dropped entirely
    let payload = json!({
        "id": contract_id,
        "clauses": [{"id": payment_id, "title": "Payment"}]
    });
    let nodes = sync
        .upsert(&tree, tree.parse(payload).unwrap(), true)
        .await
        .unwrap();

    let clauses = &nodes[0].children["clauses"];
    assert_eq!(clauses.deleted.len(), 1);
    assert_eq!(clauses.nodes[0].children["points"].deleted.len(), 2);

    assert_eq!(h.primary.rows("contract_clause").len(), 1);
    assert!(h.primary.rows("contract_clause_point").is_empty());
    assert!(h.primary.rows("contract_clause_log").is_empty());
    assert_stores_match(&h);
}

#[tokio::test]
async fn deleting_a_root_leaves_no_orphans() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();
    let payloads = json!([contract_payload(), contract_payload()]);
    let created = sync
        .upsert(&tree, tree.parse(payloads).unwrap(), true)
        .await
        .unwrap();
    let doomed = created[0].record.id.unwrap();

    let removed = sync.remove(&tree, doomed, true).await.unwrap();

    // root + 2 clauses + 3 points + 2 logs
    assert_eq!(removed, 8);
    for store in [&h.primary, &h.secondary] {
        assert!(store.row("contract", doomed).is_none());
        assert_eq!(store.rows("contract_clause").len(), 2);
        assert_eq!(store.rows("contract_clause_point").len(), 3);
        assert_eq!(store.rows("contract_clause_log").len(), 2);
        assert!(store
            .rows("contract_clause_log")
            .iter()
            .all(|l| l.get("id_contract") != Some(&json!(doomed))));
    }

    let err = sync.remove(&tree, doomed, true).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn failure_deep_in_the_tree_rolls_back_every_level() {
    let h = harness();
    h.secondary.inject(Fault::Insert {
        table: "contract_clause_log".into(),
    });
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();

    let err = sync
        .upsert(&tree, tree.parse(contract_payload()).unwrap(), true)
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        Error::Store {
            store: StoreRole::Secondary,
            ..
        }
    ));
    for table in TABLES {
        assert!(h.primary.rows(table).is_empty(), "{} not rolled back", table);
        assert!(h.secondary.rows(table).is_empty());
    }
}

#[tokio::test]
async fn unknown_root_id_fails_the_call() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();

    let err = sync
        .upsert(
            &tree,
            vec![DesiredNode::new(record(json!({"id": 404, "number": "X"})))],
            true,
        )
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn root_present_only_in_secondary_writes_nothing() {
    let h = harness();
    h.secondary
        .put_raw("contract", record(json!({"id": 3, "number": "S-only"})));
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();

    let payload = json!({
        "id": 3,
        "number": "S-only v2",
        "clauses": [{"title": "a", "points": [{"text": "p"}]}]
    });
    let err = sync
        .upsert(&tree, tree.parse(payload).unwrap(), true)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(h.primary.rows("contract").is_empty());
    assert!(h.primary.rows("contract_clause").is_empty());
    assert!(h.secondary.rows("contract_clause").is_empty());
    assert_eq!(
        h.secondary.row("contract", 3).unwrap().get("number"),
        Some(&json!("S-only"))
    );
}

#[test]
fn unreadable_id_in_a_tree_payload_is_rejected() {
    let tree = contract_tree();
    let err = tree
        .parse(json!({"number": "C", "clauses": [{"id": "abc", "title": "t"}]}))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPayload(_)));

    let nodes = tree
        .parse(json!({"number": "C", "clauses": [{"id": "12", "title": "t"}]}))
        .unwrap();
    assert_eq!(nodes[0].children["clauses"][0].record.id, Some(12));
}

/// Clause logs hang off a clause directly or off one of its points; both
/// live in one table.
fn logged_clause_tree() -> TreeSpec {
    TreeSpec::new("Contract").with_child(
        LevelSpec::new("clauses", "ContractClause", "id_contract")
            .with_child(
                LevelSpec::new("points", "ContractClausePoint", "id_contract_clause").with_child(
                    LevelSpec::new("logs", "ContractClauseLog", "id_contract_clause_point")
                        .with_ancestor_key("id_contract_clause", 1),
                ),
            )
            .with_child(
                LevelSpec::new("logs", "ContractClauseLog", "id_contract_clause")
                    .with_null_key("id_contract_clause_point"),
            ),
    )
}

fn log_notes(store: &MemoryStore) -> Vec<(Option<Value>, String)> {
    let mut notes: Vec<_> = store
        .rows("contract_clause_log")
        .into_iter()
        .map(|log| {
            (
                log.get("id_contract_clause_point").cloned(),
                log.get("note").and_then(Value::as_str).unwrap_or_default().to_string(),
            )
        })
        .collect();
    notes.sort_by(|a, b| a.1.cmp(&b.1));
    notes
}

#[tokio::test]
async fn clause_and_point_logs_do_not_delete_each_other() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = logged_clause_tree();

    let created = sync
        .upsert(
            &tree,
            tree.parse(json!({
                "number": "C-1",
                "clauses": [{
                    "title": "Payment",
                    "points": [{"text": "p", "logs": [{"note": "point log"}]}],
                    "logs": [{"note": "clause log"}]
                }]
            }))
            .unwrap(),
            true,
        )
        .await
        .unwrap();
    let contract_id = created[0].record.id.unwrap();
    let clause = &created[0].children["clauses"].nodes[0];
    let clause_id = clause.record.id.unwrap();
    let point_id = clause.children["points"].nodes[0].record.id.unwrap();
    assert_eq!(log_notes(&h.primary).len(), 2);

    // Resend the clause without clause-level logs: only those go
    sync.upsert(
        &tree,
        tree.parse(json!({
            "id": contract_id,
            "clauses": [{
                "id": clause_id,
                "points": [{"id": point_id, "logs": [{"note": "point log 2"}]}],
                "logs": []
            }]
        }))
        .unwrap(),
        true,
    )
    .await
    .unwrap();

    let expected = vec![(Some(json!(point_id)), "point log 2".to_string())];
    assert_eq!(log_notes(&h.primary), expected);
    assert_eq!(log_notes(&h.secondary), expected);

    // And the other way round
    sync.upsert(
        &tree,
        tree.parse(json!({
            "id": contract_id,
            "clauses": [{
                "id": clause_id,
                "points": [{"id": point_id}],
                "logs": [{"note": "clause log 2"}]
            }]
        }))
        .unwrap(),
        true,
    )
    .await
    .unwrap();
    let notes = log_notes(&h.primary);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].1, "clause log 2");
    assert_eq!(notes[0].0, Some(Value::Null));

    // Deleting the contract removes both kinds
    sync.remove(&tree, contract_id, true).await.unwrap();
    assert!(h.primary.rows("contract_clause_log").is_empty());
    assert!(h.secondary.rows("contract_clause_log").is_empty());
}

#[tokio::test]
async fn unmappable_items_are_skipped_not_fatal() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let tree = contract_tree();
    let created = sync
        .upsert(&tree, tree.parse(contract_payload()).unwrap(), true)
        .await
        .unwrap();
    let contract_id = created[0].record.id.unwrap();

    // 9999 is not a clause of this contract; its points must not be written
    let payload = json!({
        "id": contract_id,
        "clauses": [
            {"id": 9999, "title": "ghost", "points": [{"text": "lost"}]},
            {"title": "Real", "points": [{"text": "kept"}]}
        ]
    });
    let nodes = sync
        .upsert(&tree, tree.parse(payload).unwrap(), true)
        .await
        .unwrap();

    let clauses = &nodes[0].children["clauses"];
    assert_eq!(clauses.unresolved, vec![0]);
    assert_eq!(clauses.nodes.len(), 1);
    let texts: Vec<_> = h
        .primary
        .rows("contract_clause_point")
        .into_iter()
        .map(|p| p.get("text").cloned())
        .collect();
    assert_eq!(texts, vec![Some(json!("kept"))]);
}

#[tokio::test]
async fn syncs_one_collection_under_an_existing_parent() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let contract_id = h.primary.put_raw("contract", record(json!({"number": "C-9"})));
    h.secondary
        .put_raw("contract", record(json!({"id": contract_id, "number": "C-9"})));
    let mut tree = contract_tree();
    let level = tree.children.remove(0);

    let outcome = sync
        .sync(
            &level,
            contract_id,
            vec![DesiredNode::new(record(json!({"title": "Only"})))],
            true,
        )
        .await
        .unwrap();

    assert_eq!(outcome.summary.total_created, 1);
    assert_eq!(outcome.nodes[0].children["points"].nodes.len(), 0);
    assert_stores_match(&h);
}

#[tokio::test]
async fn sync_under_checks_the_parent_inside_the_transaction() {
    let h = harness();
    let sync = TreeSynchronizer::new(h.stores.clone());
    let mut tree = contract_tree();
    let level = tree.children.remove(0);
    let items = vec![DesiredNode::new(record(json!({"title": "Only"})))];

    // Present in Secondary only: nothing may be written anywhere
    h.secondary
        .put_raw("contract", record(json!({"id": 8, "number": "C-8"})));
    let err = sync
        .sync_under("Contract", &level, 8, items.clone(), true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.primary.rows("contract_clause").is_empty());
    assert!(h.secondary.rows("contract_clause").is_empty());

    let contract_id = h.primary.put_raw("contract", record(json!({"number": "C-9"})));
    let outcome = sync
        .sync_under("Contract", &level, contract_id, items, true)
        .await
        .unwrap();
    assert_eq!(outcome.summary.total_created, 1);
    assert_eq!(
        h.primary.rows("contract_clause")[0].get("id_contract"),
        Some(&json!(contract_id))
    );
}
