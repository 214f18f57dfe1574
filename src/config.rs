//! 設定ファイル管理モジュール
//!
//! 解析ツールの設定をJSON形式で永続化

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::machine::MachineType;

/// 設定ファイルのデフォルトファイル名
const CONFIG_FILENAME: &str = "bankscope_config.json";

/// 実行ファイルのディレクトリ（相対パスの既定の基準）
fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// home を基準に相対パスを解決する（home も相対なら実行ファイル基準）
fn resolve_from_home(home: &str, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let home = Path::new(home);
    let base = if home.as_os_str().is_empty() {
        exe_dir()
    } else if home.is_absolute() {
        home.to_path_buf()
    } else {
        exe_dir().join(home)
    };
    base.join(relative)
}

/// ツール設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// ホームディレクトリ（相対パスの基準）
    /// 空の場合は実行ファイルのディレクトリ
    #[serde(default)]
    pub home: String,
    /// 解析するマシン（`c64`, `cpc6128`, `spectrum128` など）
    #[serde(default = "default_machine")]
    pub machine: String,
    /// ROMディレクトリ
    #[serde(default = "default_rom_dir")]
    pub rom_dir: String,
    /// 解析ファイルのディレクトリ
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: String,
    /// 最後に使用したROMのパス
    pub last_rom: Option<String>,
    /// 最後に保存した解析ファイルのパス
    pub last_analysis: Option<String>,
    /// ジャンプ先に自動でラベルを付ける
    #[serde(default = "default_true")]
    pub auto_label_jumps: bool,
    /// ログレベル（off / error / warn / info / debug / trace）
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_machine() -> String { "spectrum128".to_string() }
fn default_rom_dir() -> String { "roms".to_string() }
fn default_analysis_dir() -> String { "analysis".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for Config {
    fn default() -> Self {
        Config {
            home: String::new(),
            machine: default_machine(),
            rom_dir: default_rom_dir(),
            analysis_dir: default_analysis_dir(),
            last_rom: None,
            last_analysis: None,
            auto_label_jumps: true,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// 設定ファイルを探して読み込み、保存先のパスと一緒に返す
    ///
    /// `--config` があればそれを、無ければ `--home` 内、最後に実行ファイルの隣を使う。
    /// `--home` は読み込んだ設定の home より優先する。
    pub fn load_with_options(config_path: Option<&str>, home_path: Option<&str>) -> (Self, PathBuf) {
        let path = match (config_path, home_path) {
            (Some(path), _) => PathBuf::from(path),
            (None, Some(home)) if Path::new(home).join(CONFIG_FILENAME).exists() => {
                Path::new(home).join(CONFIG_FILENAME)
            }
            _ => exe_dir().join(CONFIG_FILENAME),
        };
        let mut config = Self::load_from(&path);
        if let Some(home) = home_path {
            config.home = home.to_string();
        }
        (config, path)
    }

    /// 読めなければ既定値（壊れたファイルは警告を出す）
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let Ok(content) = fs::read_to_string(&path) else {
            return Config::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {:?}: {}, using defaults", path.as_ref(), e);
            Config::default()
        })
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(&path, json).map_err(|e| format!("Failed to write config {:?}: {}", path.as_ref(), e))
    }

    pub fn machine_type(&self) -> Result<MachineType, String> {
        self.machine.parse()
    }

    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        resolve_from_home(&self.home, relative)
    }

    pub fn rom_dir_path(&self) -> PathBuf {
        self.resolve_path(&self.rom_dir)
    }

    pub fn analysis_dir_path(&self) -> PathBuf {
        self.resolve_path(&self.analysis_dir)
    }

    /// 解析ファイルのディレクトリが無ければ作る
    pub fn ensure_analysis_dir(&self) -> Result<PathBuf, String> {
        let dir = self.analysis_dir_path();
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create {:?}: {}", dir, e))?;
        Ok(dir)
    }

    /// マシンごとの既定の解析ファイル
    pub fn analysis_path(&self, machine: MachineType) -> PathBuf {
        self.analysis_dir_path().join(format!("{}_analysis.json", machine.name()))
    }
}
