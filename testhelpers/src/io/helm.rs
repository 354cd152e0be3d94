//! Package-manager collaborator backed by the `helm` CLI.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::io::process::{ProcessLimits, run_checked};

/// Operations the deployment flow needs from a package manager.
///
/// Every call is fail-fast: errors are returned as-is and never retried.
pub trait PackageManager {
    /// Register (or re-register) a chart repository.
    fn add_repository(&self, name: &str, url: &str) -> Result<()>;
    /// Refresh the local index of every registered repository.
    fn refresh_repositories(&self) -> Result<()>;
    /// Run an install/upgrade with a fully resolved argument list.
    fn upgrade(&self, args: &[String]) -> Result<()>;
}

/// [`PackageManager`] that shells out to `helm`.
#[derive(Debug, Clone)]
pub struct HelmCli {
    command: String,
    limits: ProcessLimits,
}

impl HelmCli {
    pub fn new(command: impl Into<String>, limits: ProcessLimits) -> Self {
        Self {
            command: command.into(),
            limits,
        }
    }

    fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        run_checked(&self.command, &args, None, self.limits)
    }
}

impl PackageManager for HelmCli {
    #[instrument(skip_all, fields(name = %name, url = %url))]
    fn add_repository(&self, name: &str, url: &str) -> Result<()> {
        debug!("adding helm repository");
        self.run(&["repo", "add", name, url])?;
        Ok(())
    }

    fn refresh_repositories(&self) -> Result<()> {
        debug!("updating helm repositories");
        self.run(&["repo", "update"])?;
        Ok(())
    }

    #[instrument(skip_all, fields(arg_count = args.len()))]
    fn upgrade(&self, args: &[String]) -> Result<()> {
        info!("running helm upgrade");
        self.run(args)?;
        Ok(())
    }
}
