//! End-to-end tests for the material-flow engine
//!
//! Cover the batch lifecycle (accumulate, threshold, allocate, complete),
//! contributor ranking, mirror behavior, and concurrency safety.

use ledger_core::{
    BatchStatus, EntryStatus, ProjectId, ProjectStatus, StateUpdates, UserId,
};
use material_flow::{FlowConfig, MaterialFlow, StaticWeightTable};
use mirror_sync::{MemoryMirror, MirrorSync};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn test_flow() -> (MaterialFlow, Arc<MemoryMirror>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = FlowConfig::default();
    config.ledger_data_dir = temp_dir.path().to_path_buf();

    let store = Arc::new(MemoryMirror::new());
    let flow = MaterialFlow::new(config)
        .unwrap()
        .with_mirror(MirrorSync::new(store.clone(), true));

    (flow, store, temp_dir)
}

async fn wait_for_mirror(store: &MemoryMirror, expected: usize) {
    for _ in 0..100 {
        if store.len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_threshold_linking_scenario() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(10000), Some("bench".into()))
        .await
        .unwrap();

    // 600 g: under threshold, no link
    let first = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(600)))
        .await
        .unwrap();
    assert_eq!(first.batch_total_grams, dec!(600));
    assert!(first.linked_project_id.is_none());

    // +500 g: 1100 >= 1000, batch allocates
    let second = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(500)))
        .await
        .unwrap();
    assert_eq!(second.batch_id, first.batch_id);
    assert_eq!(second.batch_total_grams, dec!(1100));
    assert_eq!(second.linked_project_id.as_ref(), Some(&project.project_id));

    let batch = flow.ledger().get_batch(&second.batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Allocated);
    assert_eq!(batch.linked_project_id.as_ref(), Some(&project.project_id));

    // Exactly one allocated entry on the project's chain
    let history = flow.ledger().history(&project.project_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, EntryStatus::Allocated);
    assert_eq!(history[0].batch_reference.as_ref(), Some(&second.batch_id));
    assert!(flow.verify_chain(&project.project_id).unwrap());

    let updated = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(updated.allocated_grams, dec!(1100));
}

#[tokio::test]
async fn test_no_project_leaves_batch_pending() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let record = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(1500)))
        .await
        .unwrap();

    assert!(record.linked_project_id.is_none());
    let batch = flow.ledger().get_batch(&record.batch_id).unwrap();
    assert!(batch.is_open());
}

#[tokio::test]
async fn test_process_pending_batches_links_later() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    // Over threshold but no project yet
    flow.record_scanned_item(&user, "Metal", Some(dec!(2000)))
        .await
        .unwrap();
    assert_eq!(flow.process_pending_batches().await.unwrap(), 0);

    let project = flow
        .create_project("Bus stop", dec!(50000), Some("shelter".into()))
        .await
        .unwrap();

    assert_eq!(flow.process_pending_batches().await.unwrap(), 1);

    let updated = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(updated.allocated_grams, dec!(2000));

    // Nothing left to sweep
    assert_eq!(flow.process_pending_batches().await.unwrap(), 0);
}

#[tokio::test]
async fn test_relinking_rejected_not_double_counted() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(10000), None)
        .await
        .unwrap();
    let other = flow
        .create_project("Planter", dec!(10000), None)
        .await
        .unwrap();

    let record = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(1200)))
        .await
        .unwrap();
    assert_eq!(record.linked_project_id.as_ref(), Some(&project.project_id));

    let relink = flow
        .link_batch_to_project(&record.batch_id, &other.project_id, "user_1")
        .await;
    assert!(matches!(relink, Err(material_flow::Error::Validation(_))));

    // No double allocation anywhere
    let p1 = flow.ledger().get_project(&project.project_id).unwrap();
    let p2 = flow.ledger().get_project(&other.project_id).unwrap();
    assert_eq!(p1.allocated_grams, dec!(1200));
    assert_eq!(p2.allocated_grams, dec!(0));
    assert_eq!(flow.ledger().history(&project.project_id).unwrap().len(), 1);
    assert!(flow.ledger().history(&other.project_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_allocation_monotonic_and_promotion() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Pavement", dec!(100000), Some("pavement_tile".into()))
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Planned);

    let mut last_allocated = Decimal::ZERO;
    for round in 0..4 {
        flow.record_scanned_item(&user, "Glass", Some(dec!(3000)))
            .await
            .unwrap();

        let current = flow.ledger().get_project(&project.project_id).unwrap();
        assert!(current.allocated_grams >= last_allocated, "round {}", round);
        last_allocated = current.allocated_grams;
    }

    // 12000 allocated >= 10% of 100000: project broke ground
    let current = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(current.allocated_grams, dec!(12000));
    assert_eq!(current.status, ProjectStatus::InProgress);
    assert!(current.date_started.is_some());
    assert!(flow.verify_chain(&project.project_id).unwrap());
}

#[tokio::test]
async fn test_any_material_counts_toward_any_open_project() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    // Project conceived for plastic output; matching ignores material type,
    // so a paper batch is absorbed all the same
    let project = flow
        .create_project("Recycled-plastic bench", dec!(20000), Some("bench".into()))
        .await
        .unwrap();

    let record = flow
        .record_scanned_item(&user, "Paper", Some(dec!(1000)))
        .await
        .unwrap();

    assert_eq!(record.linked_project_id.as_ref(), Some(&project.project_id));
    let updated = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(updated.allocated_grams, dec!(1000));
}

#[tokio::test]
async fn test_find_project_prefers_oldest_unmet() {
    let (flow, _store, _temp) = test_flow();

    let a = flow.create_project("First", dec!(1500), None).await.unwrap();
    let b = flow.create_project("Second", dec!(9000), None).await.unwrap();

    // Oldest unmet project wins
    let picked = flow.find_project_for("Plastic").unwrap().unwrap();
    assert_eq!(picked.project_id, a.project_id);

    // Fill the first; the second becomes the target
    let user = UserId::new("user_1");
    flow.record_scanned_item(&user, "Plastic", Some(dec!(1600)))
        .await
        .unwrap();

    let picked = flow.find_project_for("Plastic").unwrap().unwrap();
    assert_eq!(picked.project_id, b.project_id);
}

#[tokio::test]
async fn test_find_project_falls_back_to_oldest_planned() {
    let (flow, _store, _temp) = test_flow();

    let a = flow.create_project("First", dec!(1000), None).await.unwrap();
    let b = flow.create_project("Second", dec!(1000), None).await.unwrap();

    // Force both to look fully allocated while still planned
    for project in [&a, &b] {
        let mut full = flow.ledger().get_project(&project.project_id).unwrap();
        full.allocated_grams = full.required_grams;
        flow.ledger()
            .commit_state(StateUpdates {
                project: Some(full),
                ..Default::default()
            })
            .unwrap();
    }

    let picked = flow.find_project_for("Plastic").unwrap().unwrap();
    assert_eq!(picked.project_id, a.project_id);
}

#[tokio::test]
async fn test_top_contributors_three_users_one_flagged() {
    let (flow, _store, _temp) = test_flow();

    // Contribute before any project exists so nothing auto-links
    for (name, grams) in [("user_a", 500), ("user_b", 300), ("user_c", 200)] {
        flow.record_scanned_item(&UserId::new(name), "Plastic", Some(Decimal::from(grams)))
            .await
            .unwrap();
    }

    let project = flow
        .create_project("Park bench", dec!(10000), None)
        .await
        .unwrap();
    assert_eq!(flow.process_pending_batches().await.unwrap(), 1);

    let batches = flow.ledger().batches_for_project(&project.project_id).unwrap();
    assert_eq!(batches.len(), 1);

    let contributions = flow
        .ledger()
        .contributions_for_batch(&batches[0].batch_id)
        .unwrap();
    assert_eq!(contributions.len(), 3);

    let flagged: Vec<&str> = contributions
        .iter()
        .filter(|c| c.is_top_contributor)
        .map(|c| c.user_id.as_str())
        .collect();
    assert_eq!(flagged, vec!["user_a"]);
}

#[tokio::test]
async fn test_top_contributors_twenty_five_users_three_flagged() {
    let (flow, _store, _temp) = test_flow();

    // user_00 .. user_24, weights 10 .. 250 g
    for i in 0..25u32 {
        let user = UserId::new(format!("user_{:02}", i));
        let grams = Decimal::from((i + 1) * 10);
        flow.record_scanned_item(&user, "Plastic", Some(grams))
            .await
            .unwrap();
    }

    let project = flow
        .create_project("Playground", dec!(100000), None)
        .await
        .unwrap();
    assert_eq!(flow.process_pending_batches().await.unwrap(), 1);

    let flagged = flow
        .recompute_top_contributors(&project.project_id)
        .await
        .unwrap();
    assert_eq!(flagged, 3);

    let batches = flow.ledger().batches_for_project(&project.project_id).unwrap();
    let mut top: Vec<String> = flow
        .ledger()
        .contributions_for_batch(&batches[0].batch_id)
        .unwrap()
        .into_iter()
        .filter(|c| c.is_top_contributor)
        .map(|c| c.user_id.to_string())
        .collect();
    top.sort();
    assert_eq!(top, vec!["user_22", "user_23", "user_24"]);
}

#[tokio::test]
async fn test_top_contributor_recomputation_idempotent() {
    let (flow, _store, _temp) = test_flow();

    for (name, grams) in [("user_a", 100), ("user_b", 100), ("user_c", 100)] {
        flow.record_scanned_item(&UserId::new(name), "Metal", Some(Decimal::from(grams)))
            .await
            .unwrap();
    }

    let project = flow
        .create_project("Bike rack", dec!(5000), None)
        .await
        .unwrap();
    flow.process_pending_batches().await.unwrap();

    let snapshot = |flow: &MaterialFlow| -> Vec<(String, bool)> {
        let batches = flow.ledger().batches_for_project(&project.project_id).unwrap();
        let mut all: Vec<(String, bool)> = flow
            .ledger()
            .contributions_for_batch(&batches[0].batch_id)
            .unwrap()
            .into_iter()
            .map(|c| (c.user_id.to_string(), c.is_top_contributor))
            .collect();
        all.sort();
        all
    };

    let first = snapshot(&flow);
    flow.recompute_top_contributors(&project.project_id)
        .await
        .unwrap();
    let second = snapshot(&flow);

    assert_eq!(first, second);
    // Equal totals tie-break on user id ascending: exactly user_a flagged
    assert_eq!(
        first,
        vec![
            ("user_a".to_string(), true),
            ("user_b".to_string(), false),
            ("user_c".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_repeat_contribution_accumulates_not_duplicates() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let first = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(100)))
        .await
        .unwrap();
    flow.record_scanned_item(&user, "Plastic", Some(dec!(150)))
        .await
        .unwrap();

    let contributions = flow
        .ledger()
        .contributions_for_batch(&first.batch_id)
        .unwrap();
    assert_eq!(contributions.len(), 1);
    assert_eq!(contributions[0].weight_grams, dec!(250));
}

#[tokio::test]
async fn test_concurrent_recording_loses_no_weight() {
    let (flow, _store, _temp) = test_flow();
    let flow = Arc::new(flow);

    let project = flow
        .create_project("Playground", dec!(1000000), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let flow = flow.clone();
        handles.push(tokio::spawn(async move {
            let user = UserId::new(format!("user_{:02}", i));
            flow.record_scanned_item(&user, "Plastic", Some(dec!(30)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // No lost updates: every gram landed in some plastic batch
    let total: Decimal = flow
        .ledger()
        .batches_for_material("Plastic")
        .unwrap()
        .iter()
        .map(|b| b.total_weight_grams)
        .sum();
    assert_eq!(total, dec!(1500));

    // Whatever got linked is consistently accounted and the chain verifies
    let linked: Decimal = flow
        .ledger()
        .batches_for_project(&project.project_id)
        .unwrap()
        .iter()
        .map(|b| b.total_weight_grams)
        .sum();
    let current = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(current.allocated_grams, linked);
    assert!(current.allocated_grams > Decimal::ZERO);
    assert!(flow.verify_chain(&project.project_id).unwrap());
}

#[tokio::test]
async fn test_complete_project_closes_batches() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(1000), None)
        .await
        .unwrap();
    let record = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(1100)))
        .await
        .unwrap();
    assert!(record.linked_project_id.is_some());

    let entry = flow
        .complete_project(&project.project_id, "system")
        .await
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Completed);

    let finished = flow.ledger().get_project(&project.project_id).unwrap();
    assert_eq!(finished.status, ProjectStatus::Completed);
    assert!(finished.date_completed.is_some());

    let batch = flow.ledger().get_batch(&record.batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    // allocated -> completed, fully linked
    let history = flow.ledger().history(&project.project_id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(flow.verify_chain(&project.project_id).unwrap());

    // Completing twice is rejected
    let again = flow.complete_project(&project.project_id, "system").await;
    assert!(matches!(again, Err(material_flow::Error::Validation(_))));
}

#[tokio::test]
async fn test_user_contribution_chain() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(10000), None)
        .await
        .unwrap();

    // One linked contribution, one still pending in a different material
    flow.record_scanned_item(&user, "Plastic", Some(dec!(1200)))
        .await
        .unwrap();
    flow.record_scanned_item(&user, "Paper", Some(dec!(50)))
        .await
        .unwrap();

    let chains = flow.get_user_contribution_chain(&user).unwrap();
    assert_eq!(chains.len(), 2);

    let linked: Vec<_> = chains.iter().filter(|c| c.project.is_some()).collect();
    assert_eq!(linked.len(), 1);
    assert_eq!(
        linked[0].project.as_ref().unwrap().project_id,
        project.project_id
    );

    let chain = linked[0].chain.as_ref().unwrap();
    assert_eq!(chain.len(), 1);
    assert!(chain.iter().all(|block| block.is_valid));

    let pending: Vec<_> = chains.iter().filter(|c| c.project.is_none()).collect();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].chain.is_none());
    assert_eq!(pending[0].batch.material_type, "Paper");
}

#[tokio::test]
async fn test_allocation_mirrored_keyed_by_hash() {
    let (flow, store, _temp) = test_flow();
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(10000), None)
        .await
        .unwrap();
    flow.record_scanned_item(&user, "Plastic", Some(dec!(1100)))
        .await
        .unwrap();

    wait_for_mirror(&store, 1).await;

    let entry = &flow.ledger().history(&project.project_id).unwrap()[0];
    let doc = store
        .get(project.project_id.as_str(), &entry.hash)
        .expect("allocation entry mirrored");
    assert_eq!(doc.status, "allocated");
    assert_eq!(doc.weight_grams, Some(dec!(1100)));
    assert_eq!(doc.verified_by, "user_1");
}

#[tokio::test]
async fn test_mirror_failure_never_fails_allocation() {
    let (flow, store, _temp) = test_flow();
    store.fail_writes(true);
    let user = UserId::new("user_1");

    let project = flow
        .create_project("Park bench", dec!(10000), None)
        .await
        .unwrap();
    let record = flow
        .record_scanned_item(&user, "Plastic", Some(dec!(1100)))
        .await
        .unwrap();

    // Local ledger write landed despite the mirror being down
    assert_eq!(record.linked_project_id.as_ref(), Some(&project.project_id));
    assert_eq!(flow.ledger().history(&project.project_id).unwrap().len(), 1);
    assert!(flow.verify_chain(&project.project_id).unwrap());

    for _ in 0..100 {
        if flow.mirror().failures() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(flow.mirror().failures(), 1);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_estimated_weight_used_when_unknown() {
    let (flow, _store, _temp) = test_flow();
    let user = UserId::new("user_1");

    // Catalogue average for glass is 300 g
    let glass = flow
        .record_scanned_item(&user, "Glass", None)
        .await
        .unwrap();
    assert_eq!(glass.weight_added_grams, dec!(300));

    // Unknown material falls back to the configured default
    let unknown = flow
        .record_scanned_item(&user, "Ceramic", None)
        .await
        .unwrap();
    assert_eq!(unknown.weight_added_grams, dec!(25));
}

#[tokio::test]
async fn test_custom_weight_estimator() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = FlowConfig::default();
    config.ledger_data_dir = temp_dir.path().to_path_buf();

    let flow = MaterialFlow::new(config)
        .unwrap()
        .with_weights(Arc::new(StaticWeightTable::new().with_entry("Textile", dec!(150))));

    let record = flow
        .record_scanned_item(&UserId::new("user_1"), "Textile", None)
        .await
        .unwrap();
    assert_eq!(record.weight_added_grams, dec!(150));
}

#[tokio::test]
async fn test_validation_rejected() {
    let (flow, _store, _temp) = test_flow();

    let empty_user = flow
        .record_scanned_item(&UserId::new(""), "Plastic", Some(dec!(100)))
        .await;
    assert!(matches!(
        empty_user,
        Err(material_flow::Error::Validation(_))
    ));

    let negative = flow
        .record_scanned_item(&UserId::new("user_1"), "Plastic", Some(dec!(-5)))
        .await;
    assert!(matches!(negative, Err(material_flow::Error::Validation(_))));

    let missing_batch = flow
        .link_batch_to_project(
            &ledger_core::BatchId::new("nope"),
            &ProjectId::new("nope"),
            "system",
        )
        .await;
    assert!(matches!(
        missing_batch,
        Err(material_flow::Error::Ledger(
            ledger_core::Error::BatchNotFound(_)
        ))
    ));
}
