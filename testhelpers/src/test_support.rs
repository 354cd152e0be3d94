//! Test-only fakes for the helm and kubectl collaborators.

use std::cell::{Cell, RefCell};

use anyhow::{Result, anyhow, bail};

use crate::core::cluster::{ClusterResource, ClusterSpec, MachinePool, ObjectMeta, RkeConfig};
use crate::io::helm::PackageManager;
use crate::io::kubectl::{ReplaceConflict, ReplaceMode, ResourceClient};

/// Build a provisioning cluster with the given pools.
pub fn cluster(name: &str, namespace: &str, pools: Vec<MachinePool>) -> ClusterResource {
    ClusterResource {
        api_version: "provisioning.cattle.io/v1".to_string(),
        kind: "Cluster".to_string(),
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource_version: Some("1".to_string()),
            ..ObjectMeta::default()
        },
        spec: ClusterSpec {
            rke_config: RkeConfig {
                machine_pools: pools,
                ..RkeConfig::default()
            },
            ..ClusterSpec::default()
        },
        extra: Default::default(),
    }
}

/// One recorded package-manager call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageCall {
    AddRepository { name: String, url: String },
    RefreshRepositories,
    Upgrade(Vec<String>),
}

/// Step at which [`RecordingPackageManager`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStep {
    AddRepository,
    RefreshRepositories,
    Upgrade,
}

/// Package manager that records calls instead of running helm.
///
/// Like helm, it rejects a repository registration with an empty URL.
#[derive(Debug, Default)]
pub struct RecordingPackageManager {
    calls: RefCell<Vec<PackageCall>>,
    fail_at: Option<PackageStep>,
}

impl RecordingPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(step: PackageStep) -> Self {
        Self {
            calls: RefCell::default(),
            fail_at: Some(step),
        }
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, step: PackageStep, call: PackageCall) -> Result<()> {
        self.calls.borrow_mut().push(call);
        if self.fail_at == Some(step) {
            bail!("scripted failure at {step:?}");
        }
        Ok(())
    }
}

impl PackageManager for RecordingPackageManager {
    fn add_repository(&self, name: &str, url: &str) -> Result<()> {
        let call = PackageCall::AddRepository {
            name: name.to_string(),
            url: url.to_string(),
        };
        self.record(PackageStep::AddRepository, call)?;
        if url.is_empty() {
            bail!("could not find protocol handler for: ");
        }
        Ok(())
    }

    fn refresh_repositories(&self) -> Result<()> {
        self.record(
            PackageStep::RefreshRepositories,
            PackageCall::RefreshRepositories,
        )
    }

    fn upgrade(&self, args: &[String]) -> Result<()> {
        self.record(PackageStep::Upgrade, PackageCall::Upgrade(args.to_vec()))
    }
}

/// In-memory store for a single cluster document.
///
/// Successful writes bump the resource version. Conditional writes carrying a
/// stale version are rejected with [`ReplaceConflict`].
#[derive(Debug)]
pub struct InMemoryResourceClient {
    stored: RefCell<ClusterResource>,
    version: Cell<u64>,
    fetches: Cell<usize>,
    writes: RefCell<Vec<(String, String, ReplaceMode)>>,
    fetch_error: RefCell<Option<String>>,
    write_error: RefCell<Option<String>>,
    forced_conflicts: Cell<u32>,
}

impl InMemoryResourceClient {
    pub fn new(resource: &ClusterResource) -> Self {
        Self {
            stored: RefCell::new(resource.clone()),
            version: Cell::new(1),
            fetches: Cell::new(0),
            writes: RefCell::default(),
            fetch_error: RefCell::default(),
            write_error: RefCell::default(),
            forced_conflicts: Cell::new(0),
        }
    }

    /// Snapshot of the stored resource.
    pub fn current(&self) -> ClusterResource {
        self.stored.borrow().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }

    /// Last attempted write: namespace, document, mode.
    pub fn last_write(&self) -> Option<(String, String, ReplaceMode)> {
        self.writes.borrow().last().cloned()
    }

    pub fn fail_fetch(&self, message: &str) {
        *self.fetch_error.borrow_mut() = Some(message.to_string());
    }

    pub fn fail_write(&self, message: &str) {
        *self.write_error.borrow_mut() = Some(message.to_string());
    }

    /// Reject the next `count` writes as if another client wrote first.
    pub fn conflict_next_writes(&self, count: u32) {
        self.forced_conflicts.set(count);
    }

    fn conflict(&self, namespace: &str, detail: &str) -> anyhow::Error {
        ReplaceConflict {
            namespace: namespace.to_string(),
            detail: detail.to_string(),
        }
        .into()
    }
}

impl ResourceClient for InMemoryResourceClient {
    fn fetch_resource(&self, namespace: &str, name: &str) -> Result<String> {
        self.fetches.set(self.fetches.get() + 1);
        if let Some(message) = self.fetch_error.borrow().as_ref() {
            return Err(anyhow!("{message}"));
        }
        let mut resource = self.current();
        if resource.metadata.namespace != namespace || resource.metadata.name != name {
            bail!("clusters.provisioning.cattle.io \"{name}\" not found");
        }
        resource.metadata.resource_version = Some(self.version.get().to_string());
        Ok(resource.to_yaml()?)
    }

    fn replace_resource(&self, namespace: &str, document: &str, mode: ReplaceMode) -> Result<()> {
        self.writes
            .borrow_mut()
            .push((namespace.to_string(), document.to_string(), mode));
        if let Some(message) = self.write_error.borrow().as_ref() {
            return Err(anyhow!("{message}"));
        }

        let forced = self.forced_conflicts.get();
        if forced > 0 {
            self.forced_conflicts.set(forced - 1);
            self.version.set(self.version.get() + 1);
            return Err(self.conflict(namespace, "the object has been modified"));
        }

        let mut incoming = ClusterResource::from_yaml(document)?;
        if mode == ReplaceMode::IfUnchanged {
            let current = self.version.get().to_string();
            if incoming.metadata.resource_version.as_deref() != Some(current.as_str()) {
                return Err(self.conflict(namespace, "stale resourceVersion"));
            }
        }

        self.version.set(self.version.get() + 1);
        incoming.metadata.resource_version = None;
        *self.stored.borrow_mut() = incoming;
        Ok(())
    }
}
