use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Result, UpdateError};

/// The desktop program whose lifecycle the agent controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedApp {
    /// Exact process name as the OS reports it
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
}

/// What the agent knows about one instance of the managed app.
///
/// `Running` returned from a launch only means the OS accepted the spawn;
/// the app may still fail to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessHandle {
    NotRunning,
    Running { pid: u32 },
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::NotRunning => None,
            Self::Running { pid } => Some(*pid),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// OS process capabilities the controller needs.
pub trait ProcessTable {
    /// Every live process whose name equals `name` exactly.
    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessHandle>>;

    /// Forcibly terminate; does not wait for the process to exit.
    fn kill(&mut self, pid: u32) -> Result<()>;

    /// Whether `pid` still exists.
    fn is_alive(&self, pid: u32) -> Result<bool>;

    /// Spawn `app` detached from the caller.
    fn launch(&mut self, app: &ManagedApp) -> Result<ProcessHandle>;
}

pub struct ProcessController<T> {
    table: T,
}

impl<T: ProcessTable> ProcessController<T> {
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// First running instance, if any.
    pub fn status(&self, name: &str) -> Result<ProcessHandle> {
        Ok(self
            .table
            .find_by_name(name)?
            .into_iter()
            .find(ProcessHandle::is_running)
            .unwrap_or(ProcessHandle::NotRunning))
    }

    /// Kill every instance named `name`. Returns how many were signalled.
    ///
    /// An instance that exits on its own between listing and killing counts
    /// as stopped; only a kill that leaves the process alive is an error.
    pub fn stop_all(&mut self, name: &str) -> Result<usize> {
        let mut killed = 0;
        for handle in self.table.find_by_name(name)? {
            let Some(pid) = handle.pid() else { continue };
            tracing::debug!(pid, name, "killing process");
            match self.table.kill(pid) {
                Ok(()) => killed += 1,
                Err(e) if !self.table.is_alive(pid)? => {
                    tracing::debug!(pid, error = %e, "process already gone");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(killed)
    }

    /// Request a launch. Never waits for the app to become ready.
    pub fn start(&mut self, app: &ManagedApp) -> Result<ProcessHandle> {
        let handle = self.table.launch(app)?;
        tracing::debug!(?handle, command = %app.command.display(), "launch requested");
        Ok(handle)
    }
}

/// The real process table, driven through the platform's own tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn find_by_name(&self, name: &str) -> Result<Vec<ProcessHandle>> {
        let own_pid = std::process::id();
        let pids = list_pids(name)?;
        Ok(pids
            .into_iter()
            .filter(|pid| *pid != own_pid)
            .map(|pid| ProcessHandle::Running { pid })
            .collect())
    }

    fn kill(&mut self, pid: u32) -> Result<()> {
        kill_pid(pid)
    }

    fn is_alive(&self, pid: u32) -> Result<bool> {
        pid_alive(pid)
    }

    fn launch(&mut self, app: &ManagedApp) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&app.command);
        cmd.args(&app.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| {
            UpdateError::Process(format!("failed to launch {}: {}", app.command.display(), e))
        })?;

        Ok(ProcessHandle::Running { pid: child.id() })
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // New process group so the app outlives the agent's session
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// Linux reports at most this many bytes of a process name to `pgrep`.
const COMM_NAME_MAX: usize = 15;

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn exceeds_comm_limit(name: &str) -> bool {
    name.len() > COMM_NAME_MAX
}

#[cfg(unix)]
fn list_pids(name: &str) -> Result<Vec<u32>> {
    #[cfg(target_os = "linux")]
    {
        if exceeds_comm_limit(name) {
            tracing::warn!(
                name,
                "name over {} bytes is truncated by Linux and will never match",
                COMM_NAME_MAX
            );
        }
    }

    let output = Command::new("pgrep")
        .args(["-x", name])
        .output()
        .map_err(|e| UpdateError::Process(format!("failed to run pgrep: {}", e)))?;

    // pgrep exits 1 when nothing matched
    match output.status.code() {
        Some(0) => Ok(parse_pgrep(&String::from_utf8_lossy(&output.stdout))),
        Some(1) => Ok(Vec::new()),
        _ => Err(UpdateError::Process(format!(
            "pgrep failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
    }
}

#[cfg(windows)]
fn list_pids(name: &str) -> Result<Vec<u32>> {
    let image = if name.to_lowercase().ends_with(".exe") {
        name.to_string()
    } else {
        format!("{}.exe", name)
    };
    let filter = format!("IMAGENAME eq {}", image);

    let output = Command::new("tasklist")
        .args(["/FI", &filter, "/FO", "CSV", "/NH"])
        .output()
        .map_err(|e| UpdateError::Process(format!("failed to run tasklist: {}", e)))?;

    if !output.status.success() {
        return Err(UpdateError::Process(format!(
            "tasklist failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_tasklist(&String::from_utf8_lossy(&output.stdout), &image))
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map_err(|e| UpdateError::Process(format!("failed to run kill: {}", e)))?;

    if !status.success() {
        return Err(UpdateError::Process(format!("could not kill pid {}", pid)));
    }
    Ok(())
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> Result<bool> {
    // Signal 0 only checks that the pid exists
    let status = Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map_err(|e| UpdateError::Process(format!("failed to run kill: {}", e)))?;
    Ok(status.success())
}

#[cfg(windows)]
fn pid_alive(pid: u32) -> Result<bool> {
    let filter = format!("PID eq {}", pid);
    let output = Command::new("tasklist")
        .args(["/FI", &filter, "/FO", "CSV", "/NH"])
        .output()
        .map_err(|e| UpdateError::Process(format!("failed to run tasklist: {}", e)))?;

    if !output.status.success() {
        return Err(UpdateError::Process(format!(
            "tasklist failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_tasklist_pids(&String::from_utf8_lossy(&output.stdout)).contains(&pid))
}

#[cfg(windows)]
fn kill_pid(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| UpdateError::Process(format!("failed to run taskkill: {}", e)))?;

    if !status.success() {
        return Err(UpdateError::Process(format!("could not kill pid {}", pid)));
    }
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
fn parse_pgrep(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// Rows look like `"ShareY.exe","1234","Console","1","12,345 K"`.
#[cfg_attr(not(windows), allow(dead_code))]
fn tasklist_rows(stdout: &str) -> impl Iterator<Item = (&str, u32)> {
    stdout.lines().filter_map(|line| {
        let mut fields = line.split("\",\"").map(|f| f.trim_matches('"'));
        let name = fields.next()?;
        let pid = fields.next()?.parse().ok()?;
        Some((name, pid))
    })
}

#[cfg_attr(not(windows), allow(dead_code))]
fn parse_tasklist(stdout: &str, image: &str) -> Vec<u32> {
    tasklist_rows(stdout)
        .filter(|(name, _)| name.eq_ignore_ascii_case(image))
        .map(|(_, pid)| pid)
        .collect()
}

#[cfg_attr(not(windows), allow(dead_code))]
fn parse_tasklist_pids(stdout: &str) -> Vec<u32> {
    tasklist_rows(stdout).map(|(_, pid)| pid).collect()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// In-memory process table: a list of `(pid, name)` pairs.
    #[derive(Debug, Default)]
    pub struct FakeProcessTable {
        pub processes: Vec<(u32, String)>,
        pub launches: Vec<ManagedApp>,
        pub kills: Vec<u32>,
        /// Listed by `find_by_name` but already exited, so `kill` fails
        pub exited: Vec<(u32, String)>,
        /// Alive, but `kill` is refused
        pub protected: Vec<u32>,
        next_pid: u32,
    }

    impl FakeProcessTable {
        pub fn with_running(name: &str, count: usize) -> Self {
            let mut table = Self {
                next_pid: 1000,
                ..Self::default()
            };
            for _ in 0..count {
                table.spawn(name);
            }
            table
        }

        fn spawn(&mut self, name: &str) -> u32 {
            self.next_pid += 1;
            self.processes.push((self.next_pid, name.to_string()));
            self.next_pid
        }

        pub fn count(&self, name: &str) -> usize {
            self.processes.iter().filter(|(_, n)| n == name).count()
        }
    }

    impl ProcessTable for FakeProcessTable {
        fn find_by_name(&self, name: &str) -> Result<Vec<ProcessHandle>> {
            Ok(self
                .processes
                .iter()
                .chain(self.exited.iter())
                .filter(|(_, n)| n == name)
                .map(|(pid, _)| ProcessHandle::Running { pid: *pid })
                .collect())
        }

        fn kill(&mut self, pid: u32) -> Result<()> {
            if self.protected.contains(&pid) || self.exited.iter().any(|(p, _)| *p == pid) {
                return Err(UpdateError::Process(format!("could not kill pid {}", pid)));
            }
            self.kills.push(pid);
            self.processes.retain(|(p, _)| *p != pid);
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> Result<bool> {
            Ok(self.processes.iter().any(|(p, _)| *p == pid))
        }

        fn launch(&mut self, app: &ManagedApp) -> Result<ProcessHandle> {
            self.launches.push(app.clone());
            let pid = self.spawn(&app.name);
            Ok(ProcessHandle::Running { pid })
        }
    }
}
