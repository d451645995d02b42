//! Copy events: file transfer between the host and running containers,
//! with optional ownership and mode fixups afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{EventError, EventExecutor};
use crate::network::container_name;
use crate::scenario::{Event, FileCopy};

/// Path the copied file ends up at: a trailing-slash destination means the
/// source basename lands inside that directory.
fn copy_destination(dst: &str, src: &str) -> String {
    match dst.strip_suffix('/') {
        Some(dir) => {
            let base = Path::new(src)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| src.to_string());
            format!("{}/{}", dir, base)
        }
        None => dst.to_string(),
    }
}

impl EventExecutor<'_> {
    /// Runs the host-to-container transfers, then the container-to-host
    /// ones, for every target host. Each transfer failure is logged and
    /// the remaining transfers still run.
    pub(crate) fn exec_copy(
        &self,
        index: usize,
        event: &Event,
        to_container: &[FileCopy],
        from_container: &[FileCopy],
    ) -> Result<(), EventError> {
        for host in event.target_hosts() {
            let container = container_name(self.lab_name, host);

            for copy in to_container {
                if let Err(err) = self.copy_to_container(index, &container, copy) {
                    warn!("Error copying to container {}: {}", container, err);
                }
            }
            for copy in from_container {
                if let Err(err) = self.copy_from_container(index, &container, copy) {
                    warn!("Error copying from container {}: {}", container, err);
                }
            }
        }
        Ok(())
    }

    fn copy_to_container(
        &self,
        index: usize,
        container: &str,
        copy: &FileCopy,
    ) -> Result<(), EventError> {
        let dst = format!("{}:{}", container, copy.dst);
        debug!("Event {}: Execute docker cp {} {}", index, copy.src, dst);
        self.runner
            .run("docker", &["cp", copy.src.as_str(), dst.as_str()])
            .map_err(|source| EventError::CopyFailed {
                src: copy.src.clone(),
                dst: dst.clone(),
                source,
            })?;

        let dst_path = copy_destination(&copy.dst, &copy.src);
        if !copy.owner.is_empty() {
            debug!(
                "Event {}: Execute docker exec {} chown {} {}",
                index, container, copy.owner, dst_path
            );
            self.runner
                .run(
                    "docker",
                    &["exec", container, "chown", copy.owner.as_str(), dst_path.as_str()],
                )
                .map_err(|source| EventError::Chown {
                    target: dst_path.clone(),
                    source,
                })?;
        }
        if !copy.mode.is_empty() {
            debug!(
                "Event {}: Execute docker exec {} chmod {} {}",
                index, container, copy.mode, dst_path
            );
            self.runner
                .run(
                    "docker",
                    &["exec", container, "chmod", copy.mode.as_str(), dst_path.as_str()],
                )
                .map_err(|source| EventError::Chmod {
                    target: dst_path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn copy_from_container(
        &self,
        index: usize,
        container: &str,
        copy: &FileCopy,
    ) -> Result<(), EventError> {
        // The destination directory may not exist yet on the host side.
        let dst_dir = if copy.dst.ends_with('/') {
            PathBuf::from(&copy.dst)
        } else {
            Path::new(&copy.dst)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        };
        fs::create_dir_all(&dst_dir).map_err(|source| EventError::CreateDir {
            path: dst_dir.clone(),
            source,
        })?;

        let src = format!("{}:{}", container, copy.src);
        debug!("Event {}: Execute docker cp {} {}", index, src, copy.dst);
        self.runner
            .run("docker", &["cp", src.as_str(), copy.dst.as_str()])
            .map_err(|source| EventError::CopyFailed {
                src: src.clone(),
                dst: copy.dst.clone(),
                source,
            })?;

        let dst_path = copy_destination(&copy.dst, &copy.src);
        if !copy.owner.is_empty() {
            debug!("Event {}: Execute chown {} {}", index, copy.owner, dst_path);
            self.runner
                .run("chown", &[copy.owner.as_str(), dst_path.as_str()])
                .map_err(|source| EventError::Chown {
                    target: dst_path.clone(),
                    source,
                })?;
        }
        if !copy.mode.is_empty() {
            debug!("Event {}: Execute chmod {} {}", index, copy.mode, dst_path);
            self.runner
                .run("chmod", &[copy.mode.as_str(), dst_path.as_str()])
                .map_err(|source| EventError::Chmod {
                    target: dst_path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
