//! Shared fixtures for unit tests.
//!
//! [`FakeCluster`] is an in-memory [`Connector`] whose sessions interpret a
//! handful of shell commands against a simulated filesystem, including
//! replicated storage volumes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;

use crate::error::{ConnectionError, RemoteExecutionError};
use crate::plan::{
    ClusterSpec, MasterGroupSpec, NodeGroupSpec, NodeSpec, Plan, PlanFile, SshSpec,
};
use crate::ssh::{BatchFailure, CommandOutput, Connector, Session, SshTarget};

/// Unencrypted Ed25519 key.
pub const VALID_KEY: &str = include_str!("../tests/fixtures/keys/ed25519.key");

/// Passphrase protected Ed25519 key.
pub const ENCRYPTED_KEY: &str = include_str!("../tests/fixtures/keys/ed25519_encrypted.key");

/// Three-node plan: node1 is etcd and master, node2 and node3 are workers.
/// `storage` hosts are added to the storage group, reusing the address of a
/// host that already exists.
pub fn sample_spec(storage: &[&str]) -> PlanFile {
    let etcd = vec![NodeSpec::new("node1", "10.0.0.1")];
    let master = vec![NodeSpec::new("node1", "10.0.0.1")];
    let worker = vec![
        NodeSpec::new("node2", "10.0.0.2"),
        NodeSpec::new("node3", "10.0.0.3"),
    ];

    let storage_nodes = storage
        .iter()
        .enumerate()
        .map(|(i, host)| {
            let known = etcd
                .iter()
                .chain(&worker)
                .find(|n| n.host == *host)
                .map(|n| n.ip.clone());
            NodeSpec::new(*host, known.unwrap_or_else(|| format!("10.0.1.{}", i + 1)))
        })
        .collect();

    PlanFile {
        cluster: ClusterSpec {
            name: String::from("test-cluster"),
            allow_package_installation: true,
            ssh: SshSpec {
                user: String::from("ubuntu"),
                ssh_key: String::from("/keys/cluster.pem"),
                ssh_port: 22,
            },
        },
        etcd: NodeGroupSpec::with_nodes(etcd),
        master: MasterGroupSpec {
            expected_count: None,
            primary_master_fqdn: String::from("node1"),
            primary_master_short_name: String::from("node1"),
            nodes: master,
        },
        worker: NodeGroupSpec::with_nodes(worker),
        storage: NodeGroupSpec::with_nodes(storage_nodes),
    }
}

/// Writes a key file into `dir`.
pub fn key_fixture(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write key fixture");
    path
}

/// Builds [`sample_spec`] with every node using `key`.
pub fn plan_with_key_path(key: &Path, storage: &[&str]) -> Plan {
    let mut spec = sample_spec(storage);
    spec.cluster.ssh.ssh_key = key.display().to_string();
    Plan::from_spec(&spec)
        .expect("sample plan is valid")
        .with_fingerprint("0123456789abcdef")
}

/// Builds [`sample_spec`] with a valid key written into `dir`.
pub fn plan_with_key(dir: &TempDir, storage: &[&str]) -> Plan {
    let key = key_fixture(dir, "id_ed25519", VALID_KEY);
    plan_with_key_path(&key, storage)
}

/// How a simulated node behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeBehavior {
    /// Commands are interpreted normally.
    #[default]
    Healthy,
    /// Connections are refused.
    Unreachable,
    /// Every operation runs until its timeout.
    Hang,
    /// Commands are delayed, then interpreted normally.
    Slow(Duration),
    /// Every command batch fails with this exit code.
    FailCommands(i32),
}

#[derive(Debug, Default)]
struct FakeState {
    storage_hosts: Vec<String>,
    behaviors: HashMap<String, NodeBehavior>,
    connections: usize,
    open: usize,
    peak: usize,
    commands: Vec<(String, String)>,
    files: HashMap<(String, String), Vec<u8>>,
    volumes: HashMap<String, Vec<String>>,
    mounts: HashMap<(String, String), String>,
}

/// In-memory cluster acting as a [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// Creates a cluster whose volumes place bricks on `storage_hosts`, in order.
    pub fn new(storage_hosts: &[&str]) -> Self {
        let cluster = Self::default();
        cluster.lock().storage_hosts = storage_hosts.iter().map(ToString::to_string).collect();
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets how `host` behaves.
    pub fn set_behavior(&self, host: &str, behavior: NodeBehavior) {
        self.lock().behaviors.insert(host.to_string(), behavior);
    }

    fn behavior(&self, host: &str) -> NodeBehavior {
        self.lock().behaviors.get(host).copied().unwrap_or_default()
    }

    /// Number of sessions opened so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Number of sessions not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.lock().open
    }

    /// Highest number of sessions open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.lock().peak
    }

    /// Commands received by `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Contents of a file on `host`.
    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }
}

impl FakeState {
    fn execute(&mut self, host: &str, command: &str) -> CommandOutput {
        self.commands.push((host.to_string(), command.to_string()));

        let (exit_code, output) = if command.contains("_volume-add.yaml") {
            self.add_volume(command)
        } else if let Some(rest) = command.strip_prefix("sudo mount -t glusterfs ") {
            self.mount(host, rest)
        } else if let Some(path) = command.strip_prefix("sudo touch ") {
            self.touch(host, path)
        } else if let Some(path) = command.strip_prefix("sudo cat ") {
            match self.files.get(&(host.to_string(), path.to_string())) {
                Some(bytes) => (0, String::from_utf8_lossy(bytes).into_owned()),
                None => (1, format!("cat: {path}: No such file or directory")),
            }
        } else {
            (0, String::new())
        };

        CommandOutput {
            command: command.to_string(),
            exit_code,
            output,
        }
    }

    /// Creates a volume from the JSON variables passed to the play.
    fn add_volume(&mut self, command: &str) -> (i32, String) {
        let vars: BTreeMap<String, String> = command
            .find('{')
            .zip(command.rfind('}'))
            .and_then(|(start, end)| serde_json::from_str(&command[start..=end]).ok())
            .unwrap_or_default();

        let Some(name) = vars.get("volume_name") else {
            return (2, String::from("volume_name is undefined"));
        };
        let replicas: usize = vars
            .get("volume_replica_count")
            .and_then(|r| r.parse().ok())
            .unwrap_or(1);
        if replicas > self.storage_hosts.len() {
            return (2, format!("not enough storage nodes for {replicas} replicas"));
        }

        let bricks = self.storage_hosts.iter().take(replicas).cloned().collect();
        self.volumes.entry(name.clone()).or_insert(bricks);
        (0, format!("volume {name} ready"))
    }

    fn mount(&mut self, host: &str, args: &str) -> (i32, String) {
        let mut parts = args.split_whitespace();
        let source = parts.next().and_then(|s| s.split_once(":/"));
        match (source, parts.next()) {
            (Some((_, volume)), Some(mountpoint)) if self.volumes.contains_key(volume) => {
                self.mounts
                    .insert((host.to_string(), mountpoint.to_string()), volume.to_string());
                (0, String::new())
            }
            _ => (32, format!("mount: {args}: failed")),
        }
    }

    fn touch(&mut self, host: &str, path: &str) -> (i32, String) {
        let mounted = self
            .mounts
            .iter()
            .find(|((h, mountpoint), _)| h == host && path.starts_with(&format!("{mountpoint}/")))
            .map(|((_, mountpoint), volume)| (mountpoint.clone(), volume.clone()));

        match mounted {
            Some((mountpoint, volume)) => {
                let relative = &path[mountpoint.len() + 1..];
                let bricks = self.volumes.get(&volume).cloned().unwrap_or_default();
                for brick in bricks {
                    self.files
                        .insert((brick, format!("/data/{volume}/{relative}")), Vec::new());
                }
            }
            None => {
                self.files.insert((host.to_string(), path.to_string()), Vec::new());
            }
        }
        (0, String::new())
    }
}

#[async_trait]
impl Connector for FakeCluster {
    async fn connect(
        &self,
        target: &SshTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn Session>, ConnectionError> {
        if self.behavior(&target.hostname) == NodeBehavior::Unreachable {
            return Err(target.connection_error("connection refused"));
        }
        {
            let mut state = self.lock();
            state.connections += 1;
            state.open += 1;
            state.peak = state.peak.max(state.open);
        }
        Ok(Box::new(FakeSession {
            cluster: self.clone(),
            host: target.hostname.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    cluster: FakeCluster,
    host: String,
    closed: bool,
}

#[async_trait]
impl Session for FakeSession {
    async fn run_commands(
        &mut self,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<CommandOutput>, BatchFailure> {
        let first = commands.first().cloned().unwrap_or_default();
        match self.cluster.behavior(&self.host) {
            NodeBehavior::Hang => {
                tokio::time::sleep(timeout).await;
                return Err(RemoteExecutionError::timeout(first, timeout).into());
            }
            NodeBehavior::Slow(delay) => tokio::time::sleep(delay).await,
            NodeBehavior::FailCommands(exit_code) => {
                return Err(RemoteExecutionError::NonZeroExit {
                    command: first,
                    exit_code,
                    output: String::from("simulated failure"),
                }
                .into());
            }
            NodeBehavior::Healthy | NodeBehavior::Unreachable => {}
        }

        let mut outputs = Vec::new();
        for command in commands {
            let output = self.cluster.lock().execute(&self.host, command);
            if output.exit_code != 0 {
                return Err(BatchFailure {
                    completed: outputs,
                    error: RemoteExecutionError::NonZeroExit {
                        command: output.command,
                        exit_code: output.exit_code,
                        output: output.output,
                    },
                });
            }
            outputs.push(output);
        }
        Ok(outputs)
    }

    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<u64, RemoteExecutionError> {
        if self.cluster.behavior(&self.host) == NodeBehavior::Hang {
            tokio::time::sleep(timeout).await;
            return Err(RemoteExecutionError::timeout(format!("upload to {remote}"), timeout));
        }

        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| RemoteExecutionError::RemoteWriteError {
                remote_path: remote.to_string(),
                message: format!("cannot read local file {}: {e}", local.display()),
            })?;
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.cluster
            .lock()
            .files
            .insert((self.host.clone(), remote.to_string()), bytes);
        Ok(len)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cluster.lock().open -= 1;
        }
    }
}
