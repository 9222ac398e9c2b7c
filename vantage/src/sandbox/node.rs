//! Node.js sandbox runtime
//!
//! Each launch gets a fresh temp directory and a child `node` process with a
//! cleared environment. When bubblewrap can create namespaces the child runs
//! inside it with read-only system mounts and only the work directory bound.
//! Node's permission model limits file reads to the work directory. The
//! harness mounts the component inside a new `vm` context and reports back
//! over stdout.

use super::harness::{write_harness, HARNESS_FILE};
use super::{
    SandboxEvent, SandboxPage, SandboxRuntime, SandboxSession, SessionControl, VerificationMode,
};
use crate::config::{JailMode, SandboxConfig};
use crate::error::{VantageError, VantageResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Extra time granted to the in-harness evaluation timeout so the verifier's
/// own deadline always fires first.
const EVAL_TIMEOUT_MARGIN_MS: u64 = 1_000;
const KILL_WAIT: Duration = Duration::from_secs(2);
/// Mount point of the work directory inside the jail
const JAIL_WORKSPACE: &str = "/workspace";

/// Resolved once per sandbox: which binaries run and which flags apply.
#[derive(Debug, Clone)]
struct LaunchPlan {
    node: PathBuf,
    bwrap: Option<PathBuf>,
    permission_flag: Option<&'static str>,
}

pub struct NodeSandbox {
    config: SandboxConfig,
    plan: OnceCell<LaunchPlan>,
}

impl NodeSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            plan: OnceCell::new(),
        }
    }

    /// Check if the configured node binary can be executed
    pub async fn is_available(binary: &str) -> bool {
        Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Check if bubblewrap is installed and can create namespaces here
    pub async fn is_bwrap_usable(node: &Path) -> bool {
        let Some(bwrap) = find_program("bwrap") else {
            return false;
        };
        Command::new(bwrap)
            .args(["--unshare-all", "--die-with-parent", "--ro-bind", "/", "/"])
            .arg(node)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn timeout_ms(&self, mode: VerificationMode) -> u64 {
        match mode {
            VerificationMode::Validation => self.config.validation_timeout_ms,
            VerificationMode::Live => self.config.live_timeout_ms,
        }
    }

    async fn plan(&self) -> VantageResult<&LaunchPlan> {
        self.plan.get_or_try_init(|| probe(&self.config)).await
    }
}

async fn probe(config: &SandboxConfig) -> VantageResult<LaunchPlan> {
    let node = find_program(&config.node_binary)
        .and_then(|path| std::fs::canonicalize(path).ok())
        .unwrap_or_else(|| PathBuf::from(&config.node_binary));

    let permission_flag = match node_major_version(&node).await {
        Some(major) => permission_flag(major),
        None => None,
    };
    if permission_flag.is_none() {
        warn!(
            node = %node.display(),
            "Node has no permission model; sandbox file reads are not restricted"
        );
    }

    let bwrap = match config.jail {
        JailMode::Off => None,
        JailMode::Auto | JailMode::Bubblewrap => {
            if NodeSandbox::is_bwrap_usable(&node).await {
                find_program("bwrap")
            } else if config.jail == JailMode::Bubblewrap {
                return Err(VantageError::Sandbox(
                    "bubblewrap not found or cannot create namespaces. Install with: sudo apt install bubblewrap"
                        .to_string(),
                ));
            } else {
                warn!("bubblewrap unavailable; running the sandbox without a process jail");
                None
            }
        }
    };

    info!(
        node = %node.display(),
        jailed = bwrap.is_some(),
        permission = permission_flag.unwrap_or("none"),
        "Node sandbox launch plan resolved"
    );
    Ok(LaunchPlan {
        node,
        bwrap,
        permission_flag,
    })
}

/// Flag enabling Node's permission model for a given major version.
fn permission_flag(major: u32) -> Option<&'static str> {
    match major {
        0..=19 => None,
        20..=22 => Some("--experimental-permission"),
        _ => Some("--permission"),
    }
}

/// Parse the major version out of `node --version` output (`v20.11.1`).
fn parse_major_version(output: &str) -> Option<u32> {
    output
        .trim()
        .strip_prefix('v')?
        .split('.')
        .next()?
        .parse()
        .ok()
}

async fn node_major_version(node: &Path) -> Option<u32> {
    let output = Command::new(node)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_major_version(&String::from_utf8_lossy(&output.stdout))
}

/// Locate `name` on the host PATH; names containing a slash are taken as-is.
fn find_program(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Arguments passed to `node` itself, with `root` the work directory as the
/// child sees it.
fn node_args(plan: &LaunchPlan, root: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--max-old-space-size=256".into()];
    if let Some(flag) = plan.permission_flag {
        args.push(flag.into());
        args.push(format!("--allow-fs-read={}/", root.display()).into());
    }
    args.push(root.join(HARNESS_FILE).into_os_string());
    args
}

/// Bubblewrap arguments: every namespace unshared, system directories
/// read-only, the work directory bound at [`JAIL_WORKSPACE`].
fn jail_args(node: &Path, work_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["--unshare-all", "--die-with-parent", "--new-session"]
        .iter()
        .map(OsString::from)
        .collect();

    let mut ro_bind = |path: &Path| {
        args.push("--ro-bind".into());
        args.push(path.as_os_str().to_owned());
        args.push(path.as_os_str().to_owned());
    };
    let system = ["/usr", "/lib", "/lib64", "/bin", "/sbin"];
    for dir in system {
        if Path::new(dir).exists() {
            ro_bind(Path::new(dir));
        }
    }
    // Node installed outside the system prefixes (nvm, /opt, /usr/local links)
    if let Some(prefix) = node.parent().and_then(Path::parent) {
        let covered = system.iter().any(|dir| prefix.starts_with(dir));
        if !covered && prefix != Path::new("/") {
            ro_bind(prefix);
        }
    }

    for arg in ["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"] {
        args.push(arg.into());
    }
    args.push("--bind".into());
    args.push(work_dir.as_os_str().to_owned());
    args.push(JAIL_WORKSPACE.into());
    args.push("--chdir".into());
    args.push(JAIL_WORKSPACE.into());
    args.push(node.as_os_str().to_owned());
    args
}

/// Node prints process warnings as `(node:PID) ...` followed by a hint line.
fn is_process_warning(line: &str) -> bool {
    line.starts_with("(node:") || line.starts_with("(Use `node --trace-warnings")
}

#[async_trait]
impl SandboxRuntime for NodeSandbox {
    async fn launch(&self, page: SandboxPage) -> VantageResult<SandboxSession> {
        let work_dir = tempfile::tempdir()
            .map_err(|e| VantageError::Sandbox(format!("Failed to create temp dir: {}", e)))?;

        let plan = self.plan().await?;
        let eval_timeout_ms = self.timeout_ms(page.mode) + EVAL_TIMEOUT_MARGIN_MS;
        write_harness(work_dir.path(), &page, &self.config, eval_timeout_ms).await?;

        let mut cmd = match &plan.bwrap {
            Some(bwrap) => {
                let mut cmd = Command::new(bwrap);
                cmd.args(jail_args(&plan.node, work_dir.path()))
                    .args(node_args(plan, Path::new(JAIL_WORKSPACE)));
                cmd
            }
            None => {
                let mut cmd = Command::new(&plan.node);
                cmd.args(node_args(plan, work_dir.path()));
                cmd
            }
        };
        cmd.current_dir(work_dir.path())
            .env_clear()
            .env("NODE_ENV", "production")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            VantageError::Sandbox(format!("Failed to spawn {}: {}", plan.node.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VantageError::Sandbox("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VantageError::Sandbox("Failed to capture stderr".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let stdout_tx = tx.clone();
        let stdout_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<SandboxEvent>(&line) {
                    Ok(event) => {
                        if stdout_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!(line = %line, "Ignoring non-event harness output"),
                }
            }
        });

        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let event = if is_process_warning(&line) {
                    SandboxEvent::Warning { message: line }
                } else {
                    SandboxEvent::Error {
                        message: format!("Sandbox stderr: {}", line),
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        debug!(
            dir = %work_dir.path().display(),
            jailed = plan.bwrap.is_some(),
            "Node sandbox launched"
        );

        Ok(SandboxSession::new(
            rx,
            Box::new(NodeSessionControl {
                child,
                work_dir: Some(work_dir),
                readers: vec![stdout_reader, stderr_reader],
            }),
        ))
    }

    fn name(&self) -> &str {
        "node"
    }
}

struct NodeSessionControl {
    child: Child,
    work_dir: Option<TempDir>,
    readers: Vec<JoinHandle<()>>,
}

#[async_trait]
impl SessionControl for NodeSessionControl {
    async fn teardown(&mut self) -> VantageResult<()> {
        if let Err(e) = self.child.start_kill() {
            // Already exited
            debug!("Sandbox process kill skipped: {}", e);
        }
        if timeout(KILL_WAIT, self.child.wait()).await.is_err() {
            warn!("Sandbox process did not exit within {:?} after kill", KILL_WAIT);
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if let Some(dir) = self.work_dir.take() {
            dir.close().map_err(|e| {
                VantageError::Sandbox(format!("Failed to remove sandbox directory: {}", e))
            })?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        let _ = self.child.start_kill();
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.work_dir.take();
    }
}
