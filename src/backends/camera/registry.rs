// SPDX-License-Identifier: GPL-3.0-only

//! Multi-backend registry
//!
//! The registry provides:
//! - Probing of the configured backends at startup
//! - One flat device-number space spanning every started backend
//! - Routing of device-scoped calls to the owning backend

use super::context::{CamContext, ContextConstructor};
use super::types::CameraIdentity;
use super::{CameraBackend, compiled_candidates};
use crate::config::{Config, LoadPolicy};
use crate::errors::{CamError, CamResult};
use std::ops::Range;
use tracing::{info, warn};

/// Factory for one backend; fails when the backend cannot be used on this system
pub type BackendLoader = Box<dyn Fn(&Config) -> CamResult<Box<dyn CameraBackend>> + Send>;

/// A backend that may be probed at startup
pub struct BackendCandidate {
    pub name: String,
    loader: BackendLoader,
}

impl BackendCandidate {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn(&Config) -> CamResult<Box<dyn CameraBackend>> + Send + 'static,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
        }
    }

    fn load(&self, config: &Config) -> CamResult<Box<dyn CameraBackend>> {
        (self.loader)(config)
    }
}

impl std::fmt::Debug for BackendCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCandidate")
            .field("name", &self.name)
            .finish()
    }
}

/// Device numbers owned by one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRange {
    pub name: String,
    pub range: Range<usize>,
    /// `false` when the backend could not be loaded (the range is then empty)
    pub loaded: bool,
}

struct StartedBackend {
    backend: Box<dyn CameraBackend>,
    range: Range<usize>,
}

/// Registry of started backends
///
/// Owns the backends, never the contexts they create.
pub struct BackendRegistry {
    config: Config,
    candidates: Vec<BackendCandidate>,
    started: Vec<StartedBackend>,
    ranges: Vec<BackendRange>,
    num_cameras: usize,
    running: bool,
}

impl BackendRegistry {
    /// Registry over the compiled-in backends, ordered by `config.backends`
    pub fn new(config: &Config) -> Self {
        let mut available = compiled_candidates();
        let mut ordered = Vec::new();

        for name in &config.backends {
            match available.iter().position(|c| c.name == *name) {
                Some(pos) => ordered.push(available.remove(pos)),
                None => {
                    warn!(backend = %name, "Backend is not built into this binary");
                    let missing = name.clone();
                    ordered.push(BackendCandidate::new(name.clone(), move |_| {
                        Err(CamError::BackendUnavailable(format!(
                            "backend '{}' is not built into this binary",
                            missing
                        )))
                    }));
                }
            }
        }

        Self::with_candidates(config, ordered)
    }

    /// Registry over an explicit candidate list, probed in list order
    pub fn with_candidates(config: &Config, candidates: Vec<BackendCandidate>) -> Self {
        Self {
            config: config.clone(),
            candidates,
            started: Vec::new(),
            ranges: Vec::new(),
            num_cameras: 0,
            running: false,
        }
    }

    /// Probe every candidate and assign device numbers.
    ///
    /// A backend that fails to load is skipped under the permissive policy and
    /// fails startup under the strict one. A backend whose own startup fails
    /// stops the probe; ranges recorded up to that point stay valid.
    pub fn startup(&mut self) -> CamResult<()> {
        if self.running {
            return Err(CamError::Other("backends already started".to_string()));
        }
        self.running = true;

        for candidate in &self.candidates {
            let start = self.num_cameras;

            let mut backend = match candidate.load(&self.config) {
                Ok(backend) => backend,
                Err(e) => {
                    if self.config.load_policy == LoadPolicy::Strict {
                        warn!(backend = %candidate.name, error = %e, "Backend unavailable, aborting startup");
                        return Err(CamError::BackendUnavailable(format!(
                            "{}: {}",
                            candidate.name, e
                        )));
                    }
                    info!(backend = %candidate.name, error = %e, "Backend unavailable, skipping");
                    self.ranges.push(BackendRange {
                        name: candidate.name.clone(),
                        range: start..start,
                        loaded: false,
                    });
                    continue;
                }
            };

            if let Err(e) = backend.startup() {
                warn!(backend = backend.driver_name(), error = %e, "Backend startup failed");
                return Err(e);
            }

            let count = backend.num_cameras();
            let range = start..start + count;
            info!(
                backend = backend.driver_name(),
                cameras = count,
                first = range.start,
                "Backend started"
            );

            self.ranges.push(BackendRange {
                name: backend.driver_name().to_string(),
                range: range.clone(),
                loaded: true,
            });
            self.started.push(StartedBackend { backend, range });
            self.num_cameras = start + count;
        }

        info!(total = self.num_cameras, "All backends started");
        Ok(())
    }

    /// Shut down every backend that was started. Returns the first error.
    pub fn shutdown(&mut self) -> CamResult<()> {
        let mut first_error = None;

        for started in self.started.drain(..).rev() {
            let mut backend = started.backend;
            if let Err(e) = backend.shutdown() {
                warn!(backend = backend.driver_name(), error = %e, "Backend shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        self.ranges.clear();
        self.num_cameras = 0;
        self.running = false;
        info!("Backends shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn num_cameras(&self) -> usize {
        self.num_cameras
    }

    /// Ranges in probe order, including empty ranges of skipped backends
    pub fn backend_ranges(&self) -> &[BackendRange] {
        &self.ranges
    }

    /// Owning backend and local index of a global device number
    fn route(&self, device_number: usize) -> CamResult<(&dyn CameraBackend, usize)> {
        self.started
            .iter()
            .find(|s| s.range.contains(&device_number))
            .map(|s| (s.backend.as_ref(), device_number - s.range.start))
            .ok_or_else(|| {
                CamError::DeviceNotFound(format!(
                    "device {} is out of range (0..{})",
                    device_number, self.num_cameras
                ))
            })
    }

    pub fn camera_info(&self, device_number: usize) -> CamResult<CameraIdentity> {
        let (backend, local) = self.route(device_number)?;
        backend.camera_info(local)
    }

    pub fn num_modes(&self, device_number: usize) -> CamResult<usize> {
        let (backend, local) = self.route(device_number)?;
        backend.num_modes(local)
    }

    pub fn mode_string(&self, device_number: usize, mode: usize) -> CamResult<String> {
        let (backend, local) = self.route(device_number)?;
        backend.mode_string(local, mode)
    }

    /// Constructor of the backend owning `device_number`
    pub fn constructor(&self, device_number: usize) -> CamResult<ContextConstructor<'_>> {
        let (backend, local_index) = self.route(device_number)?;
        Ok(ContextConstructor {
            backend,
            local_index,
            device_number,
        })
    }

    pub fn new_context(
        &self,
        device_number: usize,
        num_buffers: usize,
        mode: usize,
    ) -> CamResult<CamContext> {
        self.constructor(device_number)?
            .construct(num_buffers, mode)
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        if self.running {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("ranges", &self.ranges)
            .field("num_cameras", &self.num_cameras)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::blank::BlankBackend;
    use crate::config::BlankConfig;

    fn blank(n: usize) -> BackendCandidate {
        BackendCandidate::new("blank", move |_| {
            Ok(Box::new(BlankBackend::new(&BlankConfig { num_cameras: n })) as Box<dyn CameraBackend>)
        })
    }

    fn missing(name: &'static str) -> BackendCandidate {
        BackendCandidate::new(name, |_| {
            Err(CamError::BackendUnavailable("library not found".to_string()))
        })
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let config = Config::default();
        let mut registry =
            BackendRegistry::with_candidates(&config, vec![blank(2), missing("vendor"), blank(3)]);
        registry.startup().unwrap();

        assert_eq!(registry.num_cameras(), 5);
        let ranges: Vec<_> = registry.backend_ranges().iter().map(|r| r.range.clone()).collect();
        assert_eq!(ranges, vec![0..2, 2..2, 2..5]);

        let ctor = registry.constructor(3).unwrap();
        assert_eq!(ctor.local_index(), 1);
        assert!(matches!(
            registry.camera_info(5),
            Err(CamError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_strict_policy_fails_on_missing_backend() {
        let config = Config {
            load_policy: LoadPolicy::Strict,
            ..Config::default()
        };
        let mut registry =
            BackendRegistry::with_candidates(&config, vec![blank(1), missing("vendor")]);
        assert!(matches!(
            registry.startup(),
            Err(CamError::BackendUnavailable(_))
        ));
        // The backend started before the failure keeps its range
        assert_eq!(registry.num_cameras(), 1);
        assert!(registry.camera_info(0).is_ok());
        registry.shutdown().unwrap();
        assert_eq!(registry.num_cameras(), 0);
    }

    #[test]
    fn test_unknown_names_contribute_nothing() {
        let config = Config {
            backends: vec!["no-such-backend".to_string(), "blank".to_string()],
            ..Config::default()
        };
        let mut registry = BackendRegistry::new(&config);
        registry.startup().unwrap();
        assert_eq!(registry.num_cameras(), 1);
        assert_eq!(registry.backend_ranges().len(), 2);
        assert!(!registry.backend_ranges()[0].loaded);
    }

    #[test]
    fn test_startup_twice_is_rejected() {
        let mut registry = BackendRegistry::with_candidates(&Config::default(), vec![blank(1)]);
        registry.startup().unwrap();
        assert!(registry.startup().is_err());
        assert_eq!(registry.num_cameras(), 1);
    }
}
