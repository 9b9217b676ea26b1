//! Canonical on-disk layout of the stepman home directory.
//!
//! ```text
//! <home>/
//!   config.toml
//!   routing.json
//!   step_collections/<alias>/
//!     collection/            library checkout (steplib.yml, steps/...)
//!     spec/spec.json         generated index
//!     spec/slim-spec.json    latest-only index
//!     cache/<id>/<version>/  immutable step sources
//!   toolkits/go/{tmp,inst,cache}
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StepmanPaths {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub routing_path: PathBuf,
    pub collections_dir: PathBuf,
    pub toolkits_dir: PathBuf,
}

impl StepmanPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            config_path: home.join("config.toml"),
            routing_path: home.join("routing.json"),
            collections_dir: home.join("step_collections"),
            toolkits_dir: home.join("toolkits"),
            home,
        }
    }

    pub fn route(&self, alias: &str) -> RoutePaths {
        RoutePaths::new(self.collections_dir.join(alias))
    }
}

/// Paths belonging to one library route.
#[derive(Debug, Clone)]
pub struct RoutePaths {
    pub root: PathBuf,
    pub library_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub spec_path: PathBuf,
    pub slim_spec_path: PathBuf,
    pub cache_dir: PathBuf,
}

impl RoutePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let spec_dir = root.join("spec");
        Self {
            library_dir: root.join("collection"),
            spec_path: spec_dir.join("spec.json"),
            slim_spec_path: spec_dir.join("slim-spec.json"),
            cache_dir: root.join("cache"),
            spec_dir,
            root,
        }
    }

    /// Directory holding `step.yml` for one version inside the library checkout.
    pub fn step_definition_dir(&self, id: &str, version: &str) -> PathBuf {
        self.library_dir.join("steps").join(id).join(version)
    }

    pub fn step_definition_path(&self, id: &str, version: &str) -> PathBuf {
        self.step_definition_dir(id, version).join("step.yml")
    }
}

/// Paths used by the Go toolkit.
#[derive(Debug, Clone)]
pub struct GoToolkitPaths {
    pub root: PathBuf,
    pub tmp_dir: PathBuf,
    pub install_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl GoToolkitPaths {
    pub fn new(toolkits_dir: &Path) -> Self {
        let root = toolkits_dir.join("go");
        Self {
            tmp_dir: root.join("tmp"),
            install_dir: root.join("inst"),
            cache_dir: root.join("cache"),
            root,
        }
    }

    /// GOROOT of the toolkit-managed installation.
    pub fn goroot(&self) -> PathBuf {
        self.install_dir.join("go")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.goroot().join("bin")
    }

    pub fn go_binary(&self) -> PathBuf {
        self.bin_dir().join("go")
    }
}
