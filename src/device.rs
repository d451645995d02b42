//! Topology device data: the node and interface description consumed for
//! host validation and telemetry setup. Read-only to the rest of the crate.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Device data errors.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to read device data file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid device data {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("host {0} not found in the topology")]
    HostNotFound(String),
}

/// The topology description emitted by the topology generator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub params: NodeParams,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeParams {
    #[serde(rename = "as", default)]
    pub asn: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub params: InterfaceParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub src_node: String,
    pub src_interface: String,
    pub dst_node: String,
    pub dst_interface: String,
}

impl DeviceData {
    /// Looks up a node by its containerlab name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Checks that every declared host exists in the topology.
    pub fn validate_hosts(&self, hosts: &[String]) -> Result<(), DeviceError> {
        for host in hosts {
            if self.node(host).is_none() {
                return Err(DeviceError::HostNotFound(host.clone()));
            }
        }
        Ok(())
    }
}

/// Loads device data (JSON) into an owned value.
pub fn load_device_data(path: &Path) -> Result<DeviceData, DeviceError> {
    let text = std::fs::read_to_string(path).map_err(|source| DeviceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| DeviceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
