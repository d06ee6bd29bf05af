//! 注入器配置

use injection_common::{InjectionMode, InjectorError, InjectorResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 注入器配置
///
/// ```toml
/// name = "app"
/// default_mode = "explicit"
/// plugin_root = "/opt/app/plugins"
/// property_files = ["app.toml", "overrides.json"]
/// environment_prefix = "APP"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorSettings {
    /// 根作用域名称
    pub name: String,
    /// 单例依赖未声明模式时使用的注入模式
    pub default_mode: InjectionMode,
    /// 相对插件目录的根目录
    pub plugin_root: Option<PathBuf>,
    /// 加载到根属性存储的属性文件，按扩展名识别 TOML 或 JSON
    pub property_files: Vec<PathBuf>,
    /// 环境变量前缀，设置后环境变量以最高优先级参与属性解析
    pub environment_prefix: Option<String>,
}

impl Default for InjectorSettings {
    fn default() -> Self {
        Self {
            name: "root".to_string(),
            default_mode: InjectionMode::Eager,
            plugin_root: None,
            property_files: Vec::new(),
            environment_prefix: None,
        }
    }
}

impl InjectorSettings {
    /// 解析 TOML 配置
    pub fn from_toml_str(content: &str) -> InjectorResult<Self> {
        toml::from_str(content)
            .map_err(|e| InjectorError::illegal_argument(format!("注入器配置解析失败: {}", e)))
    }

    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> InjectorResult<Self> {
        let path = path.as_ref();
        debug!("加载注入器配置: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            InjectorError::illegal_argument(format!("无法读取 {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 将相对插件目录解析到插件根目录下
    pub fn plugin_directory(&self, directory: &Path) -> PathBuf {
        match &self.plugin_root {
            Some(root) if directory.is_relative() => root.join(directory),
            _ => directory.to_path_buf(),
        }
    }
}
