//! Containerlab deployment, teardown, and per-host packet capture.
//!
//! Deploy and destroy shell out to containerlab through
//! [`CommandRunner`] and are serialized process-wide: containerlab
//! manipulates kernel network namespaces over netlink, which is not safe to
//! run concurrently even for disjoint labs. Everything that happens against
//! an already running lab stays outside the lock.

pub mod logs;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::device::DeviceData;
use crate::runtime::{CommandError, CommandRunner};
use crate::scenario::Scenario;
use crate::subnet::{self, SubnetError};

/// Serializes containerlab deploy and destroy across every worker thread.
///
/// Only network setup and teardown take this lock; scenario events keep
/// running in parallel while another worker deploys.
static NETWORK_OPS: Mutex<()> = Mutex::new(());

fn lock_network_ops() -> MutexGuard<'static, ()> {
    // The guarded section holds no state, so a poisoned lock is still safe
    // to reuse after a panicking trial.
    NETWORK_OPS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The containerlab container name for a host of the given lab.
pub fn container_name(lab_name: &str, host: &str) -> String {
    format!("clab-{}-{}", lab_name, host)
}

/// Network lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error(transparent)]
    Subnet(#[from] SubnetError),
    #[error("containerlab deploy failed for lab {lab}: {source}")]
    Deploy {
        lab: String,
        #[source]
        source: CommandError,
    },
    #[error("containerlab destroy failed for lab {lab}: {source}")]
    Destroy {
        lab: String,
        #[source]
        source: CommandError,
    },
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("capture setup failed for {container}: {source}")]
    CaptureSetup {
        container: String,
        #[source]
        source: CommandError,
    },
    #[error("failed to collect capture logs from {container}: {source}")]
    CaptureCollect {
        container: String,
        #[source]
        source: CommandError,
    },
    #[error("failed to stage capture script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect log file {}: {source}", path.display())]
    Collect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Drives the containerlab lifecycle for one lab instance.
///
/// Holds only borrows of trial-owned state, so controllers for different
/// labs never share anything mutable. The lab name doubles as the
/// containerlab `--name` and the prefix of every container.
pub struct NetworkController<'a> {
    scenario: &'a Scenario,
    devices: &'a DeviceData,
    lab_name: &'a str,
    runner: &'a dyn CommandRunner,
}

impl<'a> NetworkController<'a> {
    pub fn new(
        scenario: &'a Scenario,
        devices: &'a DeviceData,
        lab_name: &'a str,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        NetworkController {
            scenario,
            devices,
            lab_name,
            runner,
        }
    }

    /// The containerlab container name for a topology host.
    pub fn container_name(&self, host: &str) -> String {
        container_name(self.lab_name, host)
    }

    /// Device count used for subnet sizing. Sized for 254 devices when no
    /// device data is loaded.
    fn device_count(&self) -> u32 {
        match self.devices.nodes.len() {
            0 => 254,
            n => n as u32,
        }
    }

    /// Deploys this lab with its own disjoint IPv4 and IPv6 management
    /// subnets.
    ///
    /// Subnet allocation is pure and happens before the network lock, so a
    /// full batch fails fast on exhausted address space without touching
    /// the system.
    pub fn deploy(&self) -> Result<(), NetworkError> {
        let ipv4 = subnet::generate_subnet(self.lab_name, self.device_count())?;
        let ipv6 = subnet::generate_ipv6_subnet(self.lab_name)?;
        let network = format!("clab-{}", self.lab_name);

        let _ops = lock_network_ops();
        // Logged after acquiring the lock so log order reflects actual
        // execution order.
        info!("Deploying network with lab name: {}", self.lab_name);
        let args = [
            "containerlab",
            "deploy",
            "--name",
            self.lab_name,
            "--topo",
            self.scenario.topo.as_str(),
            "--network",
            network.as_str(),
            "--ipv4-subnet",
            ipv4.as_str(),
            "--ipv6-subnet",
            ipv6.as_str(),
        ];
        let output = self
            .runner
            .run("sudo", &args)
            .map_err(|source| NetworkError::Deploy {
                lab: self.lab_name.to_string(),
                source,
            })?;
        debug!("Containerlab deploy output: {}", output);
        Ok(())
    }

    /// Destroys this lab and cleans up its containers and links.
    pub fn destroy(&self) -> Result<(), NetworkError> {
        let _ops = lock_network_ops();
        info!("Destroying network with lab name: {}", self.lab_name);
        let args = ["containerlab", "destroy", "--name", self.lab_name, "--cleanup"];
        let output = self
            .runner
            .run("sudo", &args)
            .map_err(|source| NetworkError::Destroy {
                lab: self.lab_name.to_string(),
                source,
            })?;
        debug!("Containerlab destroy output: {}", output);
        Ok(())
    }

    /// Starts a tcpdump per interface inside a host's container.
    ///
    /// Stages a capture script next to the topology, copies it into the
    /// container, and launches it detached. Capture files land in the
    /// container's `/tcpdump` directory until [`collect_capture`] pulls
    /// them out.
    ///
    /// [`collect_capture`]: NetworkController::collect_capture
    pub fn setup_capture(&self, host: &str) -> Result<(), NetworkError> {
        let node = self
            .devices
            .node(host)
            .ok_or_else(|| NetworkError::DeviceNotFound(host.to_string()))?;
        let container = self.container_name(host);

        let host_dir = self.scenario.topo_dir().join(host);
        let script_path = host_dir.join("tcpdump.sh");

        let mut script = String::from("#!/bin/sh \n");
        for interface in &node.interfaces {
            script.push_str(&format!(
                "tcpdump -i {} -n -v > /tcpdump/tcpdump_{}.log & \n",
                interface.name, interface.name
            ));
        }

        let stage = |source| NetworkError::Script {
            path: script_path.clone(),
            source,
        };
        fs::create_dir_all(&host_dir).map_err(stage)?;
        fs::write(&script_path, &script).map_err(stage)?;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o775)).map_err(stage)?;

        let capture = |source| NetworkError::CaptureSetup {
            container: container.clone(),
            source,
        };
        self.runner
            .run("sudo", &["docker", "exec", "-d", &container, "mkdir", "/tcpdump"])
            .map_err(capture)?;

        let script_arg = script_path.display().to_string();
        let copy_target = format!("{}:/", container);
        self.runner
            .run("sudo", &["docker", "cp", script_arg.as_str(), copy_target.as_str()])
            .map_err(capture)?;

        self.runner
            .run("sudo", &["docker", "exec", "-d", &container, "/tcpdump.sh"])
            .map_err(capture)?;
        debug!("Started capture on {}", container);
        Ok(())
    }

    /// Pulls each monitored host's `/tcpdump` directory out of its
    /// container into the host's directory next to the topology.
    ///
    /// Must run before [`destroy`], while the containers still exist.
    ///
    /// [`destroy`]: NetworkController::destroy
    pub fn collect_capture(&self) -> Result<(), NetworkError> {
        for host in &self.scenario.hosts {
            let container = self.container_name(host);
            let src = format!("{}:/tcpdump", container);
            let dest = format!("{}/", self.scenario.topo_dir().join(host).display());
            self.runner
                .run("sudo", &["docker", "cp", src.as_str(), dest.as_str()])
                .map_err(|source| NetworkError::CaptureCollect {
                    container: container.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Copies every changed log file into the trial directory, preserving
    /// its path relative to the topology directory, then stashes the
    /// capture logs of each monitored host.
    ///
    /// Sources stay in place; the runner truncates them afterwards so the
    /// next trial on this topology starts from empty files. `control.log`
    /// is written directly into the trial directory and never appears in
    /// `changed`.
    pub fn collect_logs(&self, changed: &[PathBuf], trial_log_dir: &Path) -> Result<(), NetworkError> {
        let topo_dir = self.scenario.topo_dir();
        for path in changed {
            // Changed paths come from a walk rooted at the topology
            // directory.
            let relative = path.strip_prefix(&topo_dir).unwrap_or(path.as_path());
            let dest = trial_log_dir.join(relative);
            let collect = |source| NetworkError::Collect {
                path: path.clone(),
                source,
            };
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(collect)?;
            }
            fs::copy(path, &dest).map_err(collect)?;
            debug!("Moved log file {} to {}", path.display(), dest.display());
        }

        for host in &self.scenario.hosts {
            self.stash_capture_logs(trial_log_dir, host)?;
        }
        Ok(())
    }

    /// Copies the per-interface capture logs collected under the topology
    /// directory into `{trial}/{host}/tcpdump/`.
    fn stash_capture_logs(&self, trial_log_dir: &Path, host: &str) -> Result<(), NetworkError> {
        let node = self
            .devices
            .node(host)
            .ok_or_else(|| NetworkError::DeviceNotFound(host.to_string()))?;

        let capture_dir = trial_log_dir.join(host).join("tcpdump");
        fs::create_dir_all(&capture_dir).map_err(|source| NetworkError::Collect {
            path: capture_dir.clone(),
            source,
        })?;

        let host_dir = self.scenario.topo_dir().join(host).join("tcpdump");
        for interface in &node.interfaces {
            let file = format!("tcpdump_{}.log", interface.name);
            let src = host_dir.join(&file);
            fs::copy(&src, capture_dir.join(&file)).map_err(|source| NetworkError::Collect {
                path: src.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
