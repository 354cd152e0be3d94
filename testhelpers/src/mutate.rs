//! Read-modify-write mutations of machine pools on a remote cluster resource.
//!
//! Every call runs FETCH -> MUTATE -> REPLACE from scratch. Nothing is cached
//! between calls and no lock is held between the read and the write, so with
//! the default [`WriteMode::LastWriteWins`] two concurrent callers mutating the
//! same cluster lose one of the updates. Callers must serialize mutations of
//! one cluster themselves, or opt into [`WriteMode::Conditional`].

use tracing::{debug, info, instrument, warn};

use crate::core::cluster::{ClusterResource, LookupError};
use crate::io::kubectl::{ReplaceConflict, ReplaceMode, ResourceClient};

/// How the mutated document is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop the resource version and overwrite unconditionally, no retry.
    #[default]
    LastWriteWins,
    /// Keep the resource version, let the store reject stale writes, and
    /// rerun the whole cycle up to `max_attempts` times.
    Conditional { max_attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum MutateError {
    /// Pool or role lookup failed; nothing was written.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("decode cluster {namespace}/{name}")]
    Decode {
        namespace: String,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("encode cluster {namespace}/{name}")]
    Encode {
        namespace: String,
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cluster {namespace}/{name} still modified concurrently after {attempts} attempts")]
    Conflict {
        namespace: String,
        name: String,
        attempts: u32,
    },

    /// Failure reported by the resource client, unchanged.
    #[error(transparent)]
    Collaborator(anyhow::Error),
}

impl MutateError {
    pub fn is_lookup(&self) -> bool {
        matches!(self, MutateError::Lookup(_))
    }
}

/// Pool mutations against clusters reachable through a [`ResourceClient`].
pub struct ClusterMutator<'a, C: ResourceClient + ?Sized> {
    client: &'a C,
    mode: WriteMode,
}

impl<'a, C: ResourceClient + ?Sized> ClusterMutator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            mode: WriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add `delta` to the quantity of `pool` and return the new quantity.
    #[instrument(
        skip_all,
        fields(namespace = %namespace, cluster = %cluster, pool = %pool, delta = delta)
    )]
    pub fn adjust_pool_quantity(
        &self,
        namespace: &str,
        cluster: &str,
        pool: &str,
        delta: i64,
    ) -> Result<i64, MutateError> {
        let quantity = self.read_modify_write(namespace, cluster, |resource| {
            resource.adjust_quantity(pool, delta)
        })?;
        info!(quantity, "pool quantity updated");
        Ok(quantity)
    }

    /// Set the boolean attribute `role` (e.g. `etcdRole`) of `pool` to `value`.
    #[instrument(
        skip_all,
        fields(namespace = %namespace, cluster = %cluster, pool = %pool, role = %role, value = value)
    )]
    pub fn set_pool_role(
        &self,
        namespace: &str,
        cluster: &str,
        pool: &str,
        role: &str,
        value: bool,
    ) -> Result<(), MutateError> {
        self.read_modify_write(namespace, cluster, |resource| {
            resource.set_role(pool, role, value)
        })?;
        info!("pool role updated");
        Ok(())
    }

    fn read_modify_write<T>(
        &self,
        namespace: &str,
        name: &str,
        mut mutate: impl FnMut(&mut ClusterResource) -> Result<T, LookupError>,
    ) -> Result<T, MutateError> {
        let (replace_mode, attempts) = match self.mode {
            WriteMode::LastWriteWins => (ReplaceMode::Overwrite, 1),
            WriteMode::Conditional { max_attempts } => {
                (ReplaceMode::IfUnchanged, max_attempts.max(1))
            }
        };
        // Only conditional writes treat a conflict as a signal to re-read.
        let retries_conflicts = replace_mode == ReplaceMode::IfUnchanged;

        for attempt in 1..=attempts {
            let document = self
                .client
                .fetch_resource(namespace, name)
                .map_err(MutateError::Collaborator)?;
            let mut resource =
                ClusterResource::from_yaml(&document).map_err(|source| MutateError::Decode {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;

            let outcome = mutate(&mut resource)?;

            if replace_mode == ReplaceMode::Overwrite {
                resource.metadata.resource_version = None;
            }
            let encoded = resource.to_yaml().map_err(|source| MutateError::Encode {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

            debug!(attempt, ?replace_mode, "replacing cluster resource");
            match self.client.replace_resource(namespace, &encoded, replace_mode) {
                Ok(()) => return Ok(outcome),
                Err(err)
                    if retries_conflicts && err.downcast_ref::<ReplaceConflict>().is_some() =>
                {
                    warn!(attempt, attempts, "cluster changed since it was read");
                }
                Err(err) => return Err(MutateError::Collaborator(err)),
            }
        }

        Err(MutateError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::MachinePool;
    use crate::test_support::{InMemoryResourceClient, cluster};

    fn fixture() -> InMemoryResourceClient {
        let mut worker = MachinePool::new("worker", 3);
        worker.worker_role = true;
        let mut master = MachinePool::new("master", 1);
        master.control_plane_role = true;
        master.etcd_role = true;
        InMemoryResourceClient::new(&cluster("c1", "fleet-default", vec![master, worker]))
    }

    #[test]
    fn adjust_returns_new_quantity_and_writes_once() {
        let client = fixture();
        let mutator = ClusterMutator::new(&client);
        let quantity = mutator
            .adjust_pool_quantity("fleet-default", "c1", "worker", 2)
            .expect("adjust");
        assert_eq!(quantity, 5);
        assert_eq!(client.write_count(), 1);
        let stored = client.current();
        assert_eq!(stored.pool("worker").expect("worker").quantity, 5);
        assert_eq!(stored.pool("master").expect("master").quantity, 1);
    }

    #[test]
    fn overwrite_drops_resource_version() {
        let client = fixture();
        ClusterMutator::new(&client)
            .adjust_pool_quantity("fleet-default", "c1", "worker", 1)
            .expect("adjust");
        let (_, document, mode) = client.last_write().expect("write");
        assert_eq!(mode, ReplaceMode::Overwrite);
        assert!(!document.contains("resourceVersion"));
    }

    #[test]
    fn lookup_failures_do_not_write() {
        let client = fixture();
        let mutator = ClusterMutator::new(&client);

        let err = mutator
            .adjust_pool_quantity("fleet-default", "c1", "missing", 1)
            .expect_err("missing pool");
        assert!(matches!(
            err,
            MutateError::Lookup(LookupError::PoolNotFound(ref p)) if p == "missing"
        ));

        let err = mutator
            .set_pool_role("fleet-default", "c1", "worker", "bogusRole", true)
            .expect_err("bogus role");
        assert!(matches!(
            err,
            MutateError::Lookup(LookupError::UnknownRole(ref r)) if r == "bogusRole"
        ));
        assert!(err.is_lookup());

        assert_eq!(client.write_count(), 0);
    }

    #[test]
    fn fetch_failure_propagates_verbatim() {
        let client = fixture();
        client.fail_fetch("connection refused");
        let err = ClusterMutator::new(&client)
            .adjust_pool_quantity("fleet-default", "c1", "worker", 1)
            .expect_err("fetch fails");
        assert!(matches!(err, MutateError::Collaborator(_)));
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(client.write_count(), 0);
    }

    #[test]
    fn write_failure_leaves_store_untouched() {
        let client = fixture();
        client.fail_write("admission webhook denied");
        let err = ClusterMutator::new(&client)
            .set_pool_role("fleet-default", "c1", "worker", "etcdRole", true)
            .expect_err("write fails");
        assert_eq!(err.to_string(), "admission webhook denied");
        assert!(!client.current().pool("worker").expect("worker").etcd_role);
    }

    #[test]
    fn set_role_twice_is_idempotent() {
        let client = fixture();
        let mutator = ClusterMutator::new(&client);
        mutator
            .set_pool_role("fleet-default", "c1", "worker", "etcdRole", true)
            .expect("first");
        let after_first = client.current();
        mutator
            .set_pool_role("fleet-default", "c1", "worker", "etcdRole", true)
            .expect("second");
        assert_eq!(client.current().pools(), after_first.pools());
        assert_eq!(client.write_count(), 2);
    }

    #[test]
    fn default_mode_returns_conflicts_verbatim() {
        let client = fixture();
        client.conflict_next_writes(1);
        let err = ClusterMutator::new(&client)
            .adjust_pool_quantity("fleet-default", "c1", "worker", 1)
            .expect_err("store rejects the write");
        assert!(matches!(err, MutateError::Collaborator(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "fleet-default: object was modified concurrently: the object has been modified"
        );
        assert_eq!(client.fetch_count(), 1);
        assert_eq!(client.current().pool("worker").expect("worker").quantity, 3);
    }

    #[test]
    fn conditional_mode_retries_whole_cycle_on_conflict() {
        let client = fixture();
        client.conflict_next_writes(2);
        let quantity = ClusterMutator::new(&client)
            .with_write_mode(WriteMode::Conditional { max_attempts: 3 })
            .adjust_pool_quantity("fleet-default", "c1", "worker", 1)
            .expect("third attempt wins");
        assert_eq!(quantity, 4);
        assert_eq!(client.fetch_count(), 3);
        let (_, document, mode) = client.last_write().expect("write");
        assert_eq!(mode, ReplaceMode::IfUnchanged);
        assert!(document.contains("resourceVersion"));
    }

    #[test]
    fn conditional_mode_gives_up_after_max_attempts() {
        let client = fixture();
        client.conflict_next_writes(5);
        let err = ClusterMutator::new(&client)
            .with_write_mode(WriteMode::Conditional { max_attempts: 2 })
            .adjust_pool_quantity("fleet-default", "c1", "worker", 1)
            .expect_err("conflicts");
        assert!(matches!(err, MutateError::Conflict { attempts: 2, .. }));
        assert_eq!(client.current().pool("worker").expect("worker").quantity, 3);
    }
}
