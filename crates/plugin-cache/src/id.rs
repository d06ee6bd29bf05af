//! 插件标识解析

use injection_common::{PluginError, PluginResult, VersionRange};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 插件归档扩展名
pub const ARCHIVE_EXTENSION: &str = "tar";

/// 解析后的插件标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginId {
    /// 规范化后的插件目录
    pub directory: PathBuf,
    /// 基础名称
    pub name: String,
    /// 版本，未带版本后缀的归档为 0
    pub version: u32,
    /// 归档路径
    pub path: PathBuf,
}

impl PluginId {
    /// 是否与另一标识属于同一目录下的同一基础名称
    pub fn same_lineage(&self, directory: &Path, name: &str) -> bool {
        self.directory == directory && self.name == name
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}_v{}", self.name, self.version)
        }
    }
}

/// 校验插件请求
///
/// 使用方只能请求不带版本后缀和扩展名的基础名称。
pub fn validate_request(name: &str) -> PluginResult<()> {
    let illegal = |message: &str| PluginError::IllegalRequest {
        name: name.to_string(),
        message: message.to_string(),
    };

    if name.is_empty() {
        return Err(illegal("插件名称为空"));
    }
    if name.contains(['/', '\\']) {
        return Err(illegal("插件名称不能包含路径分隔符"));
    }
    if Path::new(name).extension().is_some() {
        return Err(illegal("插件名称不能包含扩展名"));
    }
    if has_version_suffix(name) {
        return Err(illegal("插件名称不能包含版本后缀"));
    }
    Ok(())
}

fn has_version_suffix(name: &str) -> bool {
    name.rsplit_once("_v").map_or(false, |(_, digits)| {
        !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
    })
}

/// 在目录中选择请求的插件归档
///
/// 不带版本的归档视为版本 0，版本最高者胜出；提供版本范围时只考虑范围内的版本。
pub fn resolve_plugin(
    directory: &Path,
    name: &str,
    versions: Option<VersionRange>,
) -> PluginResult<PluginId> {
    validate_request(name)?;

    let not_found = || PluginError::NotFound {
        directory: directory.to_path_buf(),
        name: name.to_string(),
    };

    if !directory.is_dir() {
        return Err(not_found());
    }
    let directory = directory
        .canonicalize()
        .map_err(|source| PluginError::Io {
            path: directory.to_path_buf(),
            source,
        })?;

    let pattern = Regex::new(&format!(
        r"^{}(?:_v([1-9]\d*))?\.{}$",
        regex::escape(name),
        ARCHIVE_EXTENSION
    ))
    .map_err(|e| PluginError::IllegalRequest {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    let entries = std::fs::read_dir(&directory).map_err(|source| PluginError::Io {
        path: directory.clone(),
        source,
    })?;

    let mut best: Option<(u32, PathBuf)> = None;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = pattern.captures(file_name) else {
            continue;
        };

        let version = match captures.get(1) {
            Some(digits) => match digits.as_str().parse::<u32>() {
                Ok(version) => version,
                Err(_) => continue,
            },
            None => 0,
        };
        if versions.map_or(false, |range| !range.contains(version)) {
            continue;
        }
        if best.as_ref().map_or(true, |(current, _)| version > *current) {
            best = Some((version, entry.path()));
        }
    }

    let (version, path) = best.ok_or_else(not_found)?;
    debug!("插件 {} 解析为 {}", name, path.display());
    Ok(PluginId {
        directory,
        name: name.to_string(),
        version,
        path,
    })
}
