//! Integration tests for modified_at propagation
//!
//! Tests cover:
//! - Inserts, renames and moves stamping every ancestor
//! - Monotonic, idempotent propagation
//! - Batch propagation over shared ancestors
//! - Payload updates and status changes

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use libsql::Connection;
use std::sync::Arc;
use synergia_core::db::DatabaseService;
use synergia_core::models::time::ManualTimeProvider;
use synergia_core::models::{LifecycleStatus, NewNode, Node, NodeType};
use synergia_core::services::{
    HierarchyEngine, HierarchyError, NoPayload, PayloadBuilder, PayloadUpdater,
};
use synergia_core::HierarchyConfig;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Test helper: Create a test environment driven by a manual clock
async fn create_test_env() -> Result<(HierarchyEngine, Arc<ManualTimeProvider>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = HierarchyConfig::with_db_path(temp_dir.path().join("test.db"));
    let db = Arc::new(DatabaseService::open(&config).await?);
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS trial_data (
            node_id INTEGER PRIMARY KEY REFERENCES nodes(id),
            hardness REAL
        )",
    )
    .await?;

    let clock = Arc::new(ManualTimeProvider::with_time(t0()));
    let engine = HierarchyEngine::new(db, config).with_clock(clock.clone());
    Ok((engine, clock, temp_dir))
}

async fn create_chain(engine: &HierarchyEngine) -> Result<(Node, Node, Node, Node)> {
    let c = engine
        .insert_node(NewNode::root(NodeType::Client, "C"), &NoPayload)
        .await?;
    let o = engine
        .insert_node(NewNode::child(NodeType::TrialRequest, "ORD1", c.id), &NoPayload)
        .await?;
    let p = engine
        .insert_node(NewNode::child(NodeType::Part, "P", o.id), &NoPayload)
        .await?;
    let t = engine
        .insert_node(NewNode::child(NodeType::Trial, "T", p.id), &NoPayload)
        .await?;
    Ok((c, o, p, t))
}

async fn modified(engine: &HierarchyEngine, node: &Node) -> Result<DateTime<Utc>> {
    Ok(engine.require_node(node.id).await?.modified_at)
}

// =========================================================================
// Mutation Stamping Tests
// =========================================================================

#[tokio::test]
async fn test_insert_stamps_all_ancestors() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, _t) = create_chain(&engine).await?;

    clock.advance(Duration::minutes(5));
    let steel = engine
        .insert_node(NewNode::child(NodeType::Steel, "S355", p.id), &NoPayload)
        .await?;

    let stamp = t0() + Duration::minutes(5);
    assert_eq!(steel.created_at, stamp);
    for node in [&c, &o, &p] {
        assert_eq!(modified(&engine, node).await?, stamp, "node {}", node.name);
    }
    Ok(())
}

#[tokio::test]
async fn test_insert_does_not_touch_siblings() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, t) = create_chain(&engine).await?;

    clock.advance(Duration::minutes(1));
    engine
        .insert_node(NewNode::child(NodeType::Part, "Q", o.id), &NoPayload)
        .await?;

    assert_eq!(modified(&engine, &p).await?, t0());
    assert_eq!(modified(&engine, &t).await?, t0());
    assert_eq!(modified(&engine, &c).await?, t0() + Duration::minutes(1));
    Ok(())
}

#[tokio::test]
async fn test_move_stamps_old_and_new_ancestors() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, t) = create_chain(&engine).await?;
    let other = engine
        .insert_node(NewNode::child(NodeType::TrialRequest, "ORD2", c.id), &NoPayload)
        .await?;

    clock.advance(Duration::minutes(10));
    engine.move_node(p.id, other.id).await?;

    let stamp = t0() + Duration::minutes(10);
    for node in [&c, &o, &other, &p] {
        assert_eq!(modified(&engine, node).await?, stamp, "node {}", node.name);
    }
    assert_eq!(modified(&engine, &t).await?, t0(), "Descendants are not touched");
    Ok(())
}

#[tokio::test]
async fn test_sub_microsecond_clock_is_truncated() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    clock.set(t0() + Duration::nanoseconds(1_234_567));

    let c = engine
        .insert_node(NewNode::root(NodeType::Client, "C"), &NoPayload)
        .await?;

    let stamp = t0() + Duration::microseconds(1_234);
    assert_eq!(c.modified_at, stamp);
    assert_eq!(engine.require_node(c.id).await?, c);
    Ok(())
}

#[tokio::test]
async fn test_noop_rename_or_move_leaves_timestamps() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, _t) = create_chain(&engine).await?;

    clock.advance(Duration::minutes(7));
    let unchanged = engine.rename_or_move(p.id, None, None).await?;
    assert_eq!(unchanged, engine.require_node(p.id).await?);
    assert_eq!(unchanged.modified_at, t0());

    engine.rename_or_move(p.id, Some("P"), Some(o.id)).await?;
    for node in [&c, &o, &p] {
        assert_eq!(modified(&engine, node).await?, t0(), "node {}", node.name);
    }
    Ok(())
}

// =========================================================================
// Propagation Semantics Tests
// =========================================================================

#[tokio::test]
async fn test_propagation_is_idempotent() -> Result<()> {
    let (engine, _clock, _temp_dir) = create_test_env().await?;
    let (c, _o, _p, t) = create_chain(&engine).await?;

    let when = t0() + Duration::hours(2);
    assert_eq!(engine.propagate_modified(t.id, when).await?, 4);
    assert_eq!(engine.propagate_modified(t.id, when).await?, 0);
    assert_eq!(modified(&engine, &c).await?, when);
    Ok(())
}

#[tokio::test]
async fn test_propagation_never_moves_backwards() -> Result<()> {
    let (engine, _clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, t) = create_chain(&engine).await?;

    let later = t0() + Duration::hours(3);
    let earlier = t0() + Duration::hours(1);

    engine.propagate_modified(p.id, later).await?;
    let changed = engine.propagate_modified(t.id, earlier).await?;
    assert_eq!(changed, 1, "Only T was older than the earlier stamp");

    assert_eq!(modified(&engine, &t).await?, earlier);
    for node in [&p, &o, &c] {
        assert_eq!(modified(&engine, node).await?, later);
    }
    Ok(())
}

#[tokio::test]
async fn test_propagation_order_does_not_matter() -> Result<()> {
    let (engine, _clock, _temp_dir) = create_test_env().await?;
    let (c, _o, p, t) = create_chain(&engine).await?;

    let a = t0() + Duration::seconds(30);
    let b = t0() + Duration::seconds(90);

    engine.propagate_modified(t.id, b).await?;
    engine.propagate_modified(p.id, a).await?;

    assert_eq!(modified(&engine, &c).await?, b);
    assert_eq!(modified(&engine, &p).await?, b);
    Ok(())
}

#[tokio::test]
async fn test_propagate_many_updates_shared_ancestors_once() -> Result<()> {
    let (engine, _clock, _temp_dir) = create_test_env().await?;
    let (c, o, p, t) = create_chain(&engine).await?;
    let q = engine
        .insert_node(NewNode::child(NodeType::Part, "Q", o.id), &NoPayload)
        .await?;

    let when = t0() + Duration::days(1);
    let changed = engine
        .propagate_modified_many(&[t.id, q.id, 9999], when)
        .await?;
    assert_eq!(changed, 5, "T, P, Q, O and C each updated once");

    for node in [&c, &o, &p, &t, &q] {
        assert_eq!(modified(&engine, node).await?, when);
    }
    assert_eq!(engine.propagate_modified_many(&[], when).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_propagate_missing_node() -> Result<()> {
    let (engine, _clock, _temp_dir) = create_test_env().await?;

    assert!(matches!(
        engine.propagate_modified(5, t0()).await,
        Err(HierarchyError::NodeNotFound { id: 5 })
    ));
    Ok(())
}

// =========================================================================
// Payload and Status Updates
// =========================================================================

struct TrialResult {
    hardness: f64,
}

#[async_trait]
impl PayloadBuilder for TrialResult {
    async fn build(&self, conn: &Connection, node: &Node) -> Result<()> {
        conn.execute(
            "INSERT INTO trial_data (node_id, hardness) VALUES (?, ?)",
            (node.id, self.hardness),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PayloadUpdater for TrialResult {
    async fn update(&self, conn: &Connection, node: &Node) -> Result<()> {
        let changed = conn
            .execute(
                "UPDATE trial_data SET hardness = ? WHERE node_id = ?",
                (self.hardness, node.id),
            )
            .await?;
        if changed == 0 {
            bail!("no trial data for node {}", node.id);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_update_payload_propagates() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, _o, p, _t) = create_chain(&engine).await?;
    let trial = engine
        .insert_node(
            NewNode::child(NodeType::Trial, "T2", p.id),
            &TrialResult { hardness: 210.0 },
        )
        .await?;

    clock.advance(Duration::minutes(45));
    let updated = engine
        .update_payload(trial.id, &TrialResult { hardness: 235.5 })
        .await?;

    let stamp = t0() + Duration::minutes(45);
    assert_eq!(updated.modified_at, stamp);
    assert_eq!(modified(&engine, &c).await?, stamp);

    let conn = engine.database().connect_with_timeout().await?;
    let mut rows = conn
        .query("SELECT hardness FROM trial_data WHERE node_id = ?", [trial.id])
        .await?;
    let row = rows.next().await?.expect("trial row");
    assert_eq!(row.get::<f64>(0)?, 235.5);
    Ok(())
}

#[tokio::test]
async fn test_failed_payload_update_rolls_back() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, _o, _p, t) = create_chain(&engine).await?;

    clock.advance(Duration::minutes(45));
    let result = engine
        .update_payload(t.id, &TrialResult { hardness: 1.0 })
        .await;

    assert!(matches!(result, Err(HierarchyError::PayloadFailed { .. })));
    assert_eq!(modified(&engine, &c).await?, t0());
    Ok(())
}

#[tokio::test]
async fn test_status_change_touches_only_the_node() -> Result<()> {
    let (engine, clock, _temp_dir) = create_test_env().await?;
    let (c, o, _p, _t) = create_chain(&engine).await?;

    clock.advance(Duration::minutes(3));
    let updated = engine.update_status(o.id, LifecycleStatus::Old).await?;

    assert_eq!(updated.status, LifecycleStatus::Old);
    assert_eq!(updated.modified_at, t0() + Duration::minutes(3));
    assert_eq!(modified(&engine, &c).await?, t0());

    // Clock behind the stored stamp: status changes, timestamp does not regress
    clock.set(t0());
    let again = engine.update_status(o.id, LifecycleStatus::Opened).await?;
    assert_eq!(again.status, LifecycleStatus::Opened);
    assert_eq!(again.modified_at, t0() + Duration::minutes(3));
    Ok(())
}
