//! # Faultlab - Network fault-injection trial orchestration
//!
//! This library runs reproducible network-fault-injection experiments
//! ("trials") against emulated containerlab topologies, many trials in
//! parallel, each executing a timed sequence of events (fault injection,
//! shell commands, file transfer, configuration edits) inside an isolated,
//! ephemeral network environment.
//!
//! ## Overview
//!
//! A scenario file declares a topology, a set of hosts, and a list of timed
//! events. A plan file bundles scenario patterns with repeat counts. The
//! executor expands a plan into uniquely named tasks, runs a bounded number
//! of them concurrently, and guarantees that every trial's network is torn
//! down and its logs collected no matter how the trial ended.
//!
//! Trials never share state: each one derives its lab name, IPv4/IPv6
//! subnets, and log directory deterministically from its run ID, so any
//! number of trials can deploy side by side without address collisions.
//! The only process-wide serialization point is the containerlab
//! deploy/destroy call itself, which races in the kernel when invoked
//! concurrently.
//!
//! ## Architecture
//!
//! - `scenario`: scenario and event data model, pure file loading
//! - `device`: topology device data and host validation
//! - `subnet`: deterministic IPv4/IPv6 subnet allocation per lab
//! - `network`: containerlab deploy/destroy and tcpdump capture
//! - `events`: concurrent event scheduling and per-kind execution
//! - `executor`: task generation, the bounded worker pool, trial runner,
//!   progress display, batch logging, and container cleanup
//! - `runtime`: external command execution behind a testable trait
//!
//! ## Example scenario
//!
//! ```yaml
//! scenarioName: baseline
//! topo: topo/frr.yaml
//! data: topo/frr.json
//! logPath: logs
//! duration: "5m"
//! hosts: [r1, r2]
//! event:
//!   - beginTime: "30s"
//!     type: fault-injection
//!     host: r1
//!     faultCommand:
//!       name: delay
//!       options:
//!         duration: "1m"
//!         interface: eth1
//!   - beginTime: "2m"
//!     type: shell
//!     host: r2
//!     shellCommands: ["vtysh -c 'show ip route'"]
//! ```
//!
//! ## Error Handling
//!
//! Modules expose typed errors via `thiserror`; the binary wraps them with
//! `color_eyre` for reporting. Event failures are logged and aggregated but
//! never cancel sibling events; trial failures never stop the batch.

pub mod device;
pub mod events;
pub mod executor;
pub mod network;
pub mod runtime;
pub mod scenario;
pub mod subnet;
