//! Performance benchmarks for the hierarchy engine
//!
//! Run with: `cargo bench -p synergia-core`
//!
//! These benchmarks measure the operations every domain service leans on:
//! - Inserting a node under a deep parent (closure fan-in)
//! - Ancestor and descendant lookups through the closure table
//! - Propagating modified_at up a full chain

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use synergia_core::models::{NewNode, NodeId, NodeType};
use synergia_core::services::{HierarchyEngine, NoPayload};
use synergia_core::HierarchyConfig;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Setup an engine over a fresh database
async fn setup_engine() -> (HierarchyEngine, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = HierarchyConfig::with_db_path(temp_dir.path().join("bench.db"));
    let engine = HierarchyEngine::open(config).await.unwrap();
    (engine, temp_dir)
}

/// Client → request → 10 parts → 10 trials each; returns (client, a deep trial)
async fn seed_tree(engine: &HierarchyEngine) -> (NodeId, NodeId) {
    let client = engine
        .insert_node(NewNode::root(NodeType::Client, "ACME"), &NoPayload)
        .await
        .unwrap();
    let request = engine
        .insert_node(
            NewNode::child(NodeType::TrialRequest, "ORD1", client.id),
            &NoPayload,
        )
        .await
        .unwrap();

    let mut last_trial = request.id;
    for p in 0..10 {
        let part = engine
            .insert_node(
                NewNode::child(NodeType::Part, format!("Part{}", p), request.id),
                &NoPayload,
            )
            .await
            .unwrap();
        for t in 0..10 {
            last_trial = engine
                .insert_node(
                    NewNode::child(NodeType::Trial, format!("T{}", t), part.id),
                    &NoPayload,
                )
                .await
                .unwrap()
                .id;
        }
    }
    (client.id, last_trial)
}

fn bench_insert(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, _temp) = rt.block_on(setup_engine());
    let (_, trial) = rt.block_on(seed_tree(&engine));

    let mut n = 0u64;
    c.bench_function("insert_node_depth_5", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(engine.insert_node(
                NewNode::child(NodeType::Steel, format!("S{}", n), trial),
                &NoPayload,
            ))
            .unwrap()
        })
    });
}

fn bench_queries(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, _temp) = rt.block_on(setup_engine());
    let (client, trial) = rt.block_on(seed_tree(&engine));

    c.bench_function("ancestors_of", |b| {
        b.iter(|| rt.block_on(engine.ancestors_of(black_box(trial), 1)).unwrap())
    });

    c.bench_function("descendants_of_root", |b| {
        b.iter(|| rt.block_on(engine.descendants_of(black_box(client), 1)).unwrap())
    });

    c.bench_function("nearest_ancestor_of_type", |b| {
        b.iter(|| {
            rt.block_on(engine.nearest_ancestor_of_type(black_box(trial), NodeType::Client))
                .unwrap()
        })
    });
}

fn bench_propagation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, _temp) = rt.block_on(setup_engine());
    let (_, trial) = rt.block_on(seed_tree(&engine));

    let mut when = Utc::now();
    c.bench_function("propagate_modified_chain", |b| {
        b.iter(|| {
            when += Duration::milliseconds(1);
            rt.block_on(engine.propagate_modified(black_box(trial), when))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_insert, bench_queries, bench_propagation);
criterion_main!(benches);
