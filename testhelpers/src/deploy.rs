//! Install or upgrade Rancher Manager through a [`PackageManager`].

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::release::{DeploymentRequest, ResolvedRelease, ResolverConfig, resolve};
use crate::io::helm::PackageManager;

/// Register the channel's repository, refresh indexes, then run the upgrade.
///
/// Stops at the first failing step and returns the package manager's error
/// unchanged; later steps are not attempted. An unknown channel resolves to an
/// empty repository URL and fails at registration.
#[instrument(
    skip_all,
    fields(hostname = %request.hostname, channel = %request.channel, version = %request.version)
)]
pub fn deploy_rancher_manager<P: PackageManager + ?Sized>(
    package_manager: &P,
    config: &ResolverConfig,
    request: &DeploymentRequest,
) -> Result<ResolvedRelease> {
    let release = resolve(config, request);

    debug!(
        repository = %release.repository_name,
        url = %release.repository_url,
        "registering chart repository"
    );
    package_manager.add_repository(&release.repository_name, &release.repository_url)?;
    package_manager.refresh_repositories()?;
    debug!(args = ?release.args, "installing chart");
    package_manager.upgrade(&release.args)?;

    info!(chart = %release.chart(), "rancher manager deployed");
    Ok(release)
}
