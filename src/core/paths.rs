//! Path helpers shared by the build cache, dispatcher and scheduler.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Name of the build directory under the test root.
pub const BUILD_DIR_NAME: &str = "sim_build";

/// Default test root: `<cwd>/tvla_run/<top>`.
#[must_use]
pub fn default_test_root(top: &str) -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.join("tvla_run").join(top)
}

/// Build directory for a test root.
#[must_use]
pub fn build_dir(test_root: &Path) -> PathBuf {
    test_root.join(BUILD_DIR_NAME)
}

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths are canonicalized. Paths that do not exist yet (a fresh
/// test root, for instance) are made absolute against the working directory
/// and `.`/`..` components are folded syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// `path` relative to `base`, or `None` when `path` is not under `base`.
#[must_use]
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
