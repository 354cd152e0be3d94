//! In-memory model of a `cluster.v1.provisioning.cattle.io` object and the
//! field-level mutations applied to its machine pools.
//!
//! Only the fields the mutations need are typed. Everything else is kept in
//! flattened maps so a fetched document is written back unchanged apart from
//! the mutated field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::core::role::PoolRole;

/// Unknown fields preserved across a read-modify-write cycle.
pub type Extra = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResource {
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Opaque store version. Only honored by conditional writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub rke_config: RkeConfig,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RkeConfig {
    #[serde(default)]
    pub machine_pools: Vec<MachinePool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachinePool {
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub control_plane_role: bool,
    #[serde(default)]
    pub etcd_role: bool,
    #[serde(default)]
    pub worker_role: bool,
    #[serde(default)]
    pub drain_before_delete: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unhealthy_node_timeout: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MachinePool {
    pub fn new(name: impl Into<String>, quantity: i64) -> Self {
        Self {
            name: name.into(),
            quantity,
            control_plane_role: false,
            etcd_role: false,
            worker_role: false,
            drain_before_delete: false,
            unhealthy_node_timeout: String::new(),
            extra: Extra::new(),
        }
    }
}

/// Name lookup failure raised before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("pool '{0}' does not exist")]
    PoolNotFound(String),
    #[error("role '{0}' does not exist")]
    UnknownRole(String),
}

impl ClusterResource {
    pub fn from_yaml(document: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn pools(&self) -> &[MachinePool] {
        &self.spec.rke_config.machine_pools
    }

    /// First pool named `name`.
    pub fn pool(&self, name: &str) -> Option<&MachinePool> {
        self.pools().iter().find(|pool| pool.name == name)
    }

    pub fn pool_mut(&mut self, name: &str) -> Option<&mut MachinePool> {
        self.spec
            .rke_config
            .machine_pools
            .iter_mut()
            .find(|pool| pool.name == name)
    }

    /// Add `delta` to the first pool named `pool` and return the new quantity.
    ///
    /// Negative results are not rejected.
    pub fn adjust_quantity(&mut self, pool: &str, delta: i64) -> Result<i64, LookupError> {
        let entry = self
            .pool_mut(pool)
            .ok_or_else(|| LookupError::PoolNotFound(pool.to_string()))?;
        entry.quantity = entry.quantity.saturating_add(delta);
        Ok(entry.quantity)
    }

    /// Set the boolean attribute named `role` on the first pool named `pool`.
    ///
    /// The pool is looked up first, so a missing pool wins over an unknown role.
    pub fn set_role(&mut self, pool: &str, role: &str, value: bool) -> Result<(), LookupError> {
        let entry = self
            .pool_mut(pool)
            .ok_or_else(|| LookupError::PoolNotFound(pool.to_string()))?;
        let role = PoolRole::from_field_name(role)
            .ok_or_else(|| LookupError::UnknownRole(role.to_string()))?;
        role.set(entry, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"apiVersion: provisioning.cattle.io/v1
kind: Cluster
metadata:
  name: cluster-1
  namespace: fleet-default
  resourceVersion: "4242"
  annotations:
    example.io/owner: qa
spec:
  kubernetesVersion: v1.30.4+k3s1
  rkeConfig:
    machineGlobalConfig:
      disable: [traefik]
    machinePools:
    - name: pool-master
      quantity: 1
      controlPlaneRole: true
      etcdRole: true
      machineConfigRef:
        apiVersion: elemental.cattle.io/v1beta1
        kind: MachineInventorySelectorTemplate
        name: selector-master
    - name: pool-worker
      quantity: 3
      workerRole: true
      unhealthyNodeTimeout: 0s
status:
  ready: true
"#;

    #[test]
    fn parses_typed_fields() {
        let cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        assert_eq!(cluster.metadata.name, "cluster-1");
        assert_eq!(cluster.metadata.resource_version.as_deref(), Some("4242"));
        let worker = cluster.pool("pool-worker").expect("worker");
        assert_eq!(worker.quantity, 3);
        assert!(worker.worker_role);
        assert!(!worker.etcd_role);
        assert_eq!(worker.unhealthy_node_timeout, "0s");
    }

    #[test]
    fn unknown_fields_survive_serialization() {
        let cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        let encoded = cluster.to_yaml().expect("encode");
        let reparsed = ClusterResource::from_yaml(&encoded).expect("parse");
        assert_eq!(reparsed, cluster);
        assert!(reparsed.extra.contains_key("status"));
        assert!(reparsed.spec.extra.contains_key("kubernetesVersion"));
        assert!(reparsed.spec.rke_config.extra.contains_key("machineGlobalConfig"));
        assert!(reparsed.pools()[0].extra.contains_key("machineConfigRef"));
        assert!(reparsed.metadata.extra.contains_key("annotations"));
    }

    #[test]
    fn adjust_quantity_changes_only_the_named_pool() {
        let mut cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        let before = cluster.clone();
        assert_eq!(cluster.adjust_quantity("pool-worker", 2), Ok(5));
        assert_eq!(cluster.pool("pool-worker").expect("worker").quantity, 5);
        assert_eq!(cluster.pools()[0], before.pools()[0]);
    }

    #[test]
    fn adjust_quantity_allows_going_below_zero() {
        let mut cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        assert_eq!(cluster.adjust_quantity("pool-master", -3), Ok(-2));
    }

    #[test]
    fn adjust_quantity_targets_first_duplicate() {
        let mut cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        cluster
            .spec
            .rke_config
            .machine_pools
            .push(MachinePool::new("pool-worker", 10));
        assert_eq!(cluster.adjust_quantity("pool-worker", 1), Ok(4));
        assert_eq!(cluster.pools()[2].quantity, 10);
    }

    #[test]
    fn missing_pool_is_reported_before_role() {
        let mut cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        let before = cluster.clone();
        assert_eq!(
            cluster.set_role("pool-missing", "bogusRole", true),
            Err(LookupError::PoolNotFound("pool-missing".to_string()))
        );
        assert_eq!(
            cluster.set_role("pool-worker", "bogusRole", true),
            Err(LookupError::UnknownRole("bogusRole".to_string()))
        );
        assert_eq!(cluster, before);
    }

    #[test]
    fn set_role_toggles_single_flag() {
        let mut cluster = ClusterResource::from_yaml(DOCUMENT).expect("parse");
        cluster.set_role("pool-worker", "etcdRole", true).expect("set");
        let worker = cluster.pool("pool-worker").expect("worker");
        assert!(worker.etcd_role);
        assert!(worker.worker_role);
        assert!(!worker.control_plane_role);
    }
}
