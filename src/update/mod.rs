pub mod build_server;
pub mod installer;
pub mod process;
pub mod version;

use colored::Colorize;
use std::fmt;

use crate::config::RecordPolicy;
use crate::error::Result;

pub use build_server::{ArtifactLocation, BuildClient, BuildSource};
pub use installer::Installer;
pub use process::{ManagedApp, ProcessController, ProcessHandle, ProcessTable, SystemProcessTable};
pub use version::{is_stale, BuildId, FileVersionStore, MemoryVersionStore, VersionStore};

/// Where a run currently is. `UpToDate` and `Done` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Checking,
    UpToDate,
    Stale,
    Resolving,
    Stopping,
    Installing,
    Starting,
    Done,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Checking => "checking",
            Self::UpToDate => "up-to-date",
            Self::Stale => "stale",
            Self::Resolving => "resolving the artifact",
            Self::Stopping => "stopping",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of comparing the local record with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCheck {
    pub local: Option<BuildId>,
    pub latest: BuildId,
}

impl UpdateCheck {
    pub fn is_stale(&self) -> bool {
        is_stale(self.local, self.latest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate {
        local: Option<BuildId>,
        latest: BuildId,
    },
    Updated {
        previous: Option<BuildId>,
        installed: BuildId,
        stopped: usize,
        launched: ProcessHandle,
    },
}

/// Runs one check-and-update pass. Single use, strictly sequential, and the
/// first error aborts the whole run.
pub struct Updater<S, V, P> {
    source: S,
    store: V,
    processes: ProcessController<P>,
    installer: Installer,
    app: ManagedApp,
    policy: RecordPolicy,
    stage: UpdateStage,
}

impl<S, V, P> Updater<S, V, P>
where
    S: BuildSource,
    V: VersionStore,
    P: ProcessTable,
{
    pub fn new(
        source: S,
        store: V,
        processes: P,
        installer: Installer,
        app: ManagedApp,
        policy: RecordPolicy,
    ) -> Self {
        Self {
            source,
            store,
            processes: ProcessController::new(processes),
            installer,
            app,
            policy,
            stage: UpdateStage::Checking,
        }
    }

    /// Last stage entered; after a failure, the stage that failed.
    pub fn stage(&self) -> UpdateStage {
        self.stage
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    pub fn processes(&self) -> &P {
        self.processes.table()
    }

    fn enter(&mut self, stage: UpdateStage) {
        tracing::debug!(from = %self.stage, to = %stage, "update stage");
        self.stage = stage;
    }

    /// Query and compare only. Touches neither the record nor the app.
    pub fn check(&self) -> Result<UpdateCheck> {
        let latest = self.source.latest_build_id()?;
        let local = self.store.read_last_applied()?;
        Ok(UpdateCheck { local, latest })
    }

    pub fn run(&mut self) -> Result<UpdateOutcome> {
        self.enter(UpdateStage::Checking);
        println!("{}", "Getting latest build id...".cyan());

        let check = self.check()?;
        println!("Latest build id is {}.", check.latest.to_string().bold());
        tracing::info!(local = ?check.local, latest = %check.latest, "compared builds");

        if self.policy == RecordPolicy::BeforeInstall {
            self.store.record_applied(check.latest)?;
        }

        if !check.is_stale() {
            self.enter(UpdateStage::UpToDate);
            println!("{} Local app is up-to-date.", "✓".green());
            return Ok(UpdateOutcome::UpToDate {
                local: check.local,
                latest: check.latest,
            });
        }

        self.enter(UpdateStage::Stale);
        let previous = check
            .local
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "{} New build available: {} → {}",
            "↑".yellow(),
            previous.dimmed(),
            check.latest.to_string().green()
        );

        // Resolve the artifact while the old install is still intact
        self.enter(UpdateStage::Resolving);
        let location = self.source.artifact_location(check.latest)?;

        self.enter(UpdateStage::Stopping);
        let stopped = self.processes.stop_all(&self.app.name)?;
        println!("Stopped {} running instance(s) of {}.", stopped, self.app.name);

        self.enter(UpdateStage::Installing);
        self.installer.clear_installation()?;
        println!("{}", "Downloading latest build's artifact...".cyan());
        let archive = self.installer.fetch_and_unpack(&self.source, &location)?;
        installer::mark_executable(&self.app.command)?;
        tracing::info!(archive = %archive.display(), "artifact installed");

        if self.policy == RecordPolicy::AfterInstall {
            self.store.record_applied(check.latest)?;
        }

        self.enter(UpdateStage::Starting);
        let launched = self.processes.start(&self.app)?;
        println!("Launch requested for {}.", self.app.command.display());

        self.enter(UpdateStage::Done);
        println!(
            "\n{} Updated to build {}",
            "✓".green(),
            check.latest.to_string().green()
        );

        Ok(UpdateOutcome::Updated {
            previous: check.local,
            installed: check.latest,
            stopped,
            launched,
        })
    }
}
