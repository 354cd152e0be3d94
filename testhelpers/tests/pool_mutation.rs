//! End-to-end pool mutations against the in-memory resource client.

use testhelpers::core::cluster::{ClusterResource, MachinePool};
use testhelpers::io::kubectl::{ReplaceMode, ResourceClient};
use testhelpers::mutate::{ClusterMutator, MutateError, WriteMode};
use testhelpers::test_support::{InMemoryResourceClient, cluster};

const NAMESPACE: &str = "fleet-default";

fn three_pool_cluster() -> InMemoryResourceClient {
    let mut etcd = MachinePool::new("etcd", 3);
    etcd.etcd_role = true;
    let mut control_plane = MachinePool::new("cp", 2);
    control_plane.control_plane_role = true;
    let mut worker = MachinePool::new("worker", 3);
    worker.worker_role = true;
    worker.unhealthy_node_timeout = "10m".to_string();
    InMemoryResourceClient::new(&cluster(
        "c1",
        NAMESPACE,
        vec![etcd, control_plane, worker],
    ))
}

fn quantities(resource: &ClusterResource) -> Vec<(String, i64)> {
    resource
        .pools()
        .iter()
        .map(|pool| (pool.name.clone(), pool.quantity))
        .collect()
}

#[test]
fn scale_up_then_down_touches_only_the_target_pool() {
    let client = three_pool_cluster();
    let mutator = ClusterMutator::new(&client);

    assert_eq!(
        mutator
            .adjust_pool_quantity(NAMESPACE, "c1", "worker", 2)
            .expect("scale up"),
        5
    );
    assert_eq!(
        mutator
            .adjust_pool_quantity(NAMESPACE, "c1", "worker", -4)
            .expect("scale down"),
        1
    );

    let stored = client.current();
    assert_eq!(
        quantities(&stored),
        vec![
            ("etcd".to_string(), 3),
            ("cp".to_string(), 2),
            ("worker".to_string(), 1),
        ]
    );
    assert_eq!(
        stored.pool("worker").expect("worker").unhealthy_node_timeout,
        "10m"
    );
    assert_eq!(client.write_count(), 2);
}

#[test]
fn zero_delta_still_writes_back() {
    let client = three_pool_cluster();
    let quantity = ClusterMutator::new(&client)
        .adjust_pool_quantity(NAMESPACE, "c1", "cp", 0)
        .expect("no-op");
    assert_eq!(quantity, 2);
    assert_eq!(client.write_count(), 1);
}

#[test]
fn roles_follow_a_promote_then_demote_sequence() {
    let client = three_pool_cluster();
    let mutator = ClusterMutator::new(&client);

    mutator
        .set_pool_role(NAMESPACE, "c1", "worker", "controlPlaneRole", true)
        .expect("promote");
    mutator
        .set_pool_role(NAMESPACE, "c1", "worker", "drainBeforeDelete", true)
        .expect("drain");
    let worker = client.current().pool("worker").cloned().expect("worker");
    assert!(worker.control_plane_role && worker.worker_role && worker.drain_before_delete);

    mutator
        .set_pool_role(NAMESPACE, "c1", "worker", "controlPlaneRole", false)
        .expect("demote");
    let worker = client.current().pool("worker").cloned().expect("worker");
    assert!(!worker.control_plane_role);
    assert!(worker.drain_before_delete);
}

#[test]
fn missing_cluster_surfaces_collaborator_error() {
    let client = three_pool_cluster();
    let err = ClusterMutator::new(&client)
        .adjust_pool_quantity(NAMESPACE, "c2", "worker", 1)
        .expect_err("no such cluster");
    assert!(matches!(err, MutateError::Collaborator(_)));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn interleaved_unconditional_writers_lose_an_update() {
    let client = three_pool_cluster();

    // A reads, B completes a full mutation, then A writes its stale copy back.
    let stale = client.fetch_resource(NAMESPACE, "c1").expect("fetch");
    ClusterMutator::new(&client)
        .adjust_pool_quantity(NAMESPACE, "c1", "worker", 2)
        .expect("writer b");
    let mut resource = ClusterResource::from_yaml(&stale).expect("decode");
    resource.adjust_quantity("cp", 1).expect("cp exists");
    resource.metadata.resource_version = None;
    client
        .replace_resource(
            NAMESPACE,
            &resource.to_yaml().expect("encode"),
            ReplaceMode::Overwrite,
        )
        .expect("writer a");

    let stored = client.current();
    assert_eq!(stored.pool("cp").expect("cp").quantity, 3);
    assert_eq!(stored.pool("worker").expect("worker").quantity, 3);
}

#[test]
fn conditional_writes_reject_the_stale_copy() {
    let client = three_pool_cluster();

    let stale = client.fetch_resource(NAMESPACE, "c1").expect("fetch");
    ClusterMutator::new(&client)
        .with_write_mode(WriteMode::Conditional { max_attempts: 3 })
        .adjust_pool_quantity(NAMESPACE, "c1", "worker", 2)
        .expect("writer b");

    let err = client
        .replace_resource(NAMESPACE, &stale, ReplaceMode::IfUnchanged)
        .expect_err("stale version");
    assert!(err.to_string().contains("modified concurrently"));

    // Rerunning the whole cycle keeps both updates.
    ClusterMutator::new(&client)
        .with_write_mode(WriteMode::Conditional { max_attempts: 3 })
        .adjust_pool_quantity(NAMESPACE, "c1", "cp", 1)
        .expect("writer a retries");
    let stored = client.current();
    assert_eq!(stored.pool("cp").expect("cp").quantity, 3);
    assert_eq!(stored.pool("worker").expect("worker").quantity, 5);
}
