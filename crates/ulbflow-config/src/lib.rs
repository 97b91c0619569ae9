pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{AllocationMode, Credentials, ReconcileSettings, UlbflowConfig};

use std::path::{Path, PathBuf};

/// 設定ファイルの候補を優先順に列挙
///
/// 1. 環境変数 ULBFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: ulbflow.local.yaml, ulbflow.yaml
/// 3. ./.ulbflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/ulbflow/config.yaml (グローバル設定)
pub fn config_candidates() -> Result<Vec<PathBuf>> {
    const NAMES: [&str; 2] = ["ulbflow.local.yaml", "ulbflow.yaml"];

    let cwd = std::env::current_dir()?;
    let mut candidates: Vec<PathBuf> = std::env::var_os("ULBFLOW_CONFIG_PATH")
        .map(PathBuf::from)
        .into_iter()
        .collect();

    for dir in [cwd.clone(), cwd.join(".ulbflow")] {
        candidates.extend(NAMES.iter().map(|name| dir.join(name)));
    }
    candidates.extend(dirs::config_dir().map(|d| d.join("ulbflow").join("config.yaml")));

    Ok(candidates)
}

/// 最初に存在する設定ファイルを返す
pub fn find_config_file() -> Result<PathBuf> {
    config_candidates()?
        .into_iter()
        .find(|path| path.is_file())
        .ok_or(ConfigError::ConfigFileNotFound)
}

/// 指定パスの設定ファイルを読み込む
pub fn load_from(path: &Path) -> Result<UlbflowConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: UlbflowConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// 設定を読み込み、環境変数で上書きする
///
/// 設定ファイルが無い場合はデフォルト値から始める。
pub fn load() -> Result<UlbflowConfig> {
    let mut config = match find_config_file() {
        Ok(path) => load_from(&path)?,
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No config file found, using defaults");
            UlbflowConfig::default()
        }
        Err(e) => return Err(e),
    };

    config.credentials.apply_env();
    config.reconcile.validate()?;
    Ok(config)
}
