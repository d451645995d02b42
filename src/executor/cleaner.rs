//! Removal of leftover containers and networks from aborted runs.
//!
//! A killed batch leaves containerlab containers and docker networks
//! behind, named after lab names the batch would have used. Cleaning
//! regenerates those names from the same plan or scenario file and
//! removes whatever still matches.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info, warn};

use super::plan::{generate_tasks_from_plan, Plan, PlanError};
use super::generate_tasks;
use crate::runtime::{CommandError, CommandRunner};
use crate::scenario::is_yaml_path;

#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("failed to list containers: {0}")]
    ListContainers(#[source] CommandError),
    #[error("failed to remove containers: {0}")]
    RemoveContainers(#[source] CommandError),
    #[error("failed to list networks: {0}")]
    ListNetworks(#[source] CommandError),
}

/// Lab names the plan's tasks would occupy.
pub fn lab_names_from_plan(plan: &Plan, base_dir: &Path) -> Result<Vec<String>, PlanError> {
    let tasks = generate_tasks_from_plan(plan, base_dir)?;
    Ok(tasks.into_iter().map(|task| task.run_id).collect())
}

/// Lab names `count` repetitions of one scenario would occupy. A count
/// of zero targets a single run, which uses the `_001` suffix like any
/// other task.
pub fn lab_names_from_scenario(scenario_path: &Path, count: usize) -> Vec<String> {
    let yaml = is_yaml_path(&scenario_path.to_string_lossy());
    generate_tasks(scenario_path, count.max(1), yaml)
        .into_iter()
        .map(|task| task.run_id)
        .collect()
}

/// Removes containers whose names belong to any of `lab_names`.
///
/// Containerlab names containers `clab-{lab}-{node}`, so one listing
/// call finds every candidate and one `docker rm -f` removes them all.
/// Returns how many containers were removed, or would be in dry-run
/// mode.
pub fn clean_containers(
    runner: &dyn CommandRunner,
    lab_names: &[String],
    dry_run: bool,
) -> Result<usize, CleanError> {
    if lab_names.is_empty() {
        return Ok(0);
    }

    let listing = runner
        .run(
            "sudo",
            &[
                "docker", "ps", "-a", "--filter", "name=clab-", "--format", "{{.ID}}\t{{.Names}}",
            ],
        )
        .map_err(CleanError::ListContainers)?;

    if listing.trim().is_empty() {
        info!("No containers found to clean");
        return Ok(0);
    }

    let prefixes: Vec<String> = lab_names.iter().map(|lab| format!("clab-{lab}-")).collect();

    let mut ids = Vec::new();
    let mut names = Vec::new();
    for line in listing.lines() {
        let Some((id, name)) = line.split_once('\t') else {
            continue;
        };
        if prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
            ids.push(id.to_string());
            names.push(name.to_string());
        }
    }

    if ids.is_empty() {
        info!("No matching containers found to clean");
        return Ok(0);
    }

    if dry_run {
        println!("Found {} containers to remove:", ids.len());
        for name in &names {
            println!("  {name}");
        }
        return Ok(ids.len());
    }

    let mut args: Vec<&str> = vec!["docker", "rm", "-f"];
    args.extend(ids.iter().map(String::as_str));
    runner
        .run("sudo", &args)
        .map_err(CleanError::RemoveContainers)?;

    Ok(ids.len())
}

/// Removes docker networks named `clab-{lab}` for any of `lab_names`.
///
/// Per-network removal failures are logged and skipped; a network still
/// wired to a half-removed container should not abort the rest of the
/// cleanup.
pub fn clean_networks(
    runner: &dyn CommandRunner,
    lab_names: &[String],
    dry_run: bool,
) -> Result<usize, CleanError> {
    if lab_names.is_empty() {
        return Ok(0);
    }

    let listing = runner
        .run(
            "sudo",
            &["docker", "network", "ls", "--filter", "name=clab-", "--format", "{{.Name}}"],
        )
        .map_err(CleanError::ListNetworks)?;

    let expected: HashSet<String> = lab_names.iter().map(|lab| format!("clab-{lab}")).collect();
    let matching: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && expected.contains(*line))
        .collect();

    if matching.is_empty() {
        return Ok(0);
    }

    if dry_run {
        println!("Found {} Docker networks to remove:", matching.len());
        for name in &matching {
            println!("  {name}");
        }
        return Ok(matching.len());
    }

    let mut removed = 0;
    for name in matching {
        if let Err(err) = runner.run("sudo", &["docker", "network", "rm", name]) {
            warn!("Failed to remove network {}: {}", name, err);
            continue;
        }
        debug!("Removed network: {}", name);
        removed += 1;
    }

    if removed > 0 {
        info!("Removed {} Docker networks", removed);
    }
    Ok(removed)
}
