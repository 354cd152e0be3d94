//! Named boolean flags of a machine pool.

use std::fmt;

use crate::core::cluster::MachinePool;

/// Boolean attribute of a [`MachinePool`] that can be toggled by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    ControlPlane,
    Etcd,
    Worker,
    DrainBeforeDelete,
}

impl PoolRole {
    pub const ALL: [PoolRole; 4] = [
        PoolRole::ControlPlane,
        PoolRole::Etcd,
        PoolRole::Worker,
        PoolRole::DrainBeforeDelete,
    ];

    /// Field name as it appears in the cluster document.
    pub fn field_name(self) -> &'static str {
        match self {
            PoolRole::ControlPlane => "controlPlaneRole",
            PoolRole::Etcd => "etcdRole",
            PoolRole::Worker => "workerRole",
            PoolRole::DrainBeforeDelete => "drainBeforeDelete",
        }
    }

    /// Resolve a field name. Matching ignores ASCII case so both
    /// `etcdRole` and `EtcdRole` are accepted.
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.field_name().eq_ignore_ascii_case(name))
    }

    pub fn get(self, pool: &MachinePool) -> bool {
        match self {
            PoolRole::ControlPlane => pool.control_plane_role,
            PoolRole::Etcd => pool.etcd_role,
            PoolRole::Worker => pool.worker_role,
            PoolRole::DrainBeforeDelete => pool.drain_before_delete,
        }
    }

    pub fn set(self, pool: &mut MachinePool, value: bool) {
        let flag = match self {
            PoolRole::ControlPlane => &mut pool.control_plane_role,
            PoolRole::Etcd => &mut pool.etcd_role,
            PoolRole::Worker => &mut pool.worker_role,
            PoolRole::DrainBeforeDelete => &mut pool.drain_before_delete,
        };
        *flag = value;
    }
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_document_and_struct_style_names() {
        assert_eq!(PoolRole::from_field_name("etcdRole"), Some(PoolRole::Etcd));
        assert_eq!(
            PoolRole::from_field_name("ControlPlaneRole"),
            Some(PoolRole::ControlPlane)
        );
        assert_eq!(PoolRole::from_field_name("bogusRole"), None);
        assert_eq!(PoolRole::from_field_name("quantity"), None);
        assert_eq!(PoolRole::from_field_name("name"), None);
    }

    #[test]
    fn set_touches_only_the_named_flag() {
        for role in PoolRole::ALL {
            let mut pool = MachinePool::new("pool", 1);
            role.set(&mut pool, true);
            for other in PoolRole::ALL {
                assert_eq!(other.get(&pool), other == role, "{role} -> {other}");
            }
        }
    }
}
