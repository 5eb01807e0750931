use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the service reads its config from and writes its state to.
///
/// `config.yml` lives in the project root. Everything written at runtime
/// (databases, uploads, logs, generated secrets) lives under
/// `user_data_dir`, which `PAPERTRAIL_DATA_DIR` overrides.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub rag_db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub secrets_path: PathBuf,
    pub jwt_secret_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = project_root();
        let data_dir = resolve_data_dir(
            env_path("PAPERTRAIL_DATA_DIR"),
            env_path("XDG_DATA_HOME"),
            env_path("HOME"),
            &project_root,
            cfg!(debug_assertions),
        );
        Self::layout(project_root, data_dir)
    }

    /// Lays every path out under `data_dir`, which also serves as the
    /// project root.
    pub fn from_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self::layout(data_dir.clone(), data_dir)
    }

    fn layout(project_root: PathBuf, data_dir: PathBuf) -> Self {
        AppPaths {
            log_dir: data_dir.join("logs"),
            upload_dir: data_dir.join("uploads"),
            db_path: data_dir.join("papertrail.db"),
            rag_db_path: data_dir.join("rag.db"),
            secrets_path: data_dir.join("secrets.yaml"),
            jwt_secret_path: data_dir.join(".jwt_secret"),
            project_root,
            user_data_dir: data_dir,
        }
    }

    /// Creates the directories the service writes into.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.user_data_dir, &self.log_dir, &self.upload_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn project_root() -> PathBuf {
    if let Some(root) = env_path("PAPERTRAIL_ROOT") {
        return root;
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").is_file() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

/// Debug builds keep state in `<project_root>/data` so a checkout is
/// self-contained; release builds follow the XDG base directory layout.
fn resolve_data_dir(
    explicit: Option<PathBuf>,
    xdg_data_home: Option<PathBuf>,
    home: Option<PathBuf>,
    project_root: &Path,
    debug: bool,
) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if debug {
        return project_root.join("data");
    }

    xdg_data_home
        .or_else(|| home.map(|home| home.join(".local").join("share")))
        .map(|base| base.join("papertrail"))
        .unwrap_or_else(|| project_root.join("data"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
