//! 声明式标记模型
//!
//! 描述一个元素是否可注入、可解析、来自插件或可聚合，以及对应的设置。
//! 这里只有数据，行为由注入引擎在编译描述符时赋予。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 单例注入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InjectionMode {
    /// 没有显式分配时按依赖声明的类型即时构造
    #[default]
    Eager,
    /// 只使用显式分配，没有分配时保持未设置
    Explicit,
}

/// 单例作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SingletonScope {
    /// 当前注入序列
    #[default]
    Sequence,
    /// 根注入器，所有序列共享
    Global,
}

/// 注入标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectMarker {
    /// 是否为单例引用
    pub singleton: bool,
    /// 单例限定符，为空时使用请求类型的名称
    pub qualifier: String,
    /// 单例作用域
    pub scope: SingletonScope,
    /// 注入模式，未设置时使用注入器的默认模式
    pub mode: Option<InjectionMode>,
    /// 是否允许保持未设置
    pub optional: bool,
}

impl InjectMarker {
    /// 独立 Bean，每次注入都创建新实例
    pub fn independent() -> Self {
        Self {
            singleton: false,
            qualifier: String::new(),
            scope: SingletonScope::Sequence,
            mode: None,
            optional: false,
        }
    }

    /// 以限定符标识的单例
    pub fn singleton(qualifier: impl Into<String>) -> Self {
        Self {
            singleton: true,
            qualifier: qualifier.into(),
            ..Self::independent()
        }
    }

    /// 以请求类型标识的单例
    pub fn singleton_by_type() -> Self {
        Self::singleton(String::new())
    }

    /// 设置为全局作用域
    pub fn global(mut self) -> Self {
        self.scope = SingletonScope::Global;
        self
    }

    /// 设置为显式模式
    pub fn explicit(mut self) -> Self {
        self.mode = Some(InjectionMode::Explicit);
        self
    }

    /// 设置为即时模式
    pub fn eager(mut self) -> Self {
        self.mode = Some(InjectionMode::Eager);
        self
    }

    /// 允许依赖保持未设置
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// 属性标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMarker {
    /// 属性键，或完整的 `${...}` 表达式
    pub key: String,
    /// 默认值，可以继续包含占位符
    pub default_value: Option<String>,
    /// 最终值必须完整匹配的正则表达式
    pub matcher: Option<String>,
    /// 无法解析时是否直接失败
    pub forced: bool,
}

impl PropertyMarker {
    /// 创建新的属性标记
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default_value: None,
            matcher: None,
            forced: false,
        }
    }

    /// 设置默认值
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// 设置匹配器
    pub fn matcher(mut self, pattern: impl Into<String>) -> Self {
        self.matcher = Some(pattern.into());
        self
    }

    /// 设置为强制解析
    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    /// 转换为占位符表达式
    ///
    /// 已经是表达式的键原样返回；普通键按 `${key}` 或 `${key:default}` 包装。
    pub fn expression(&self) -> String {
        if self.key.contains("${") {
            return self.key.clone();
        }
        match &self.default_value {
            Some(default) => format!("${{{}:{}}}", self.key, default),
            None => format!("${{{}}}", self.key),
        }
    }
}

/// 插件版本范围（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub min: u32,
    pub max: u32,
}

impl VersionRange {
    /// 创建版本范围
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// 至少为指定版本
    pub fn at_least(min: u32) -> Self {
        Self { min, max: u32::MAX }
    }

    /// 是否包含指定版本
    pub fn contains(&self, version: u32) -> bool {
        self.min <= version && version <= self.max
    }
}

/// 插件标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMarker {
    /// 插件目录
    pub directory: PathBuf,
    /// 插件基础名称，不含版本后缀与扩展名
    pub name: String,
    /// 可接受的版本范围
    pub versions: Option<VersionRange>,
}

impl PluginMarker {
    /// 创建新的插件标记
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            versions: None,
        }
    }

    /// 限制版本范围
    pub fn versions(mut self, range: VersionRange) -> Self {
        self.versions = Some(range);
        self
    }
}

/// 聚合模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateMode {
    /// 返回所有匹配项
    #[default]
    All,
    /// 恰好一个匹配项
    Single {
        /// 多个限定符指向同一实例时视为一个
        distinct: bool,
        /// 允许没有匹配项
        optional: bool,
    },
}

/// 聚合标记
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateMarker {
    /// 限定符正则表达式
    pub qualifier_matcher: Option<String>,
    /// 是否包含全局单例
    pub include_global: bool,
    /// 聚合模式
    pub mode: AggregateMode,
}

impl AggregateMarker {
    /// 创建新的聚合标记
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置限定符匹配器
    pub fn qualifier_matcher(mut self, pattern: impl Into<String>) -> Self {
        self.qualifier_matcher = Some(pattern.into());
        self
    }

    /// 包含全局单例
    pub fn include_global(mut self) -> Self {
        self.include_global = true;
        self
    }

    /// 恰好一个匹配项
    pub fn single(mut self) -> Self {
        self.mode = AggregateMode::Single {
            distinct: false,
            optional: false,
        };
        self
    }

    /// 允许多个限定符指向同一实例
    pub fn distinct(mut self) -> Self {
        if let AggregateMode::Single { optional, .. } = self.mode {
            self.mode = AggregateMode::Single {
                distinct: true,
                optional,
            };
        }
        self
    }

    /// 允许没有匹配项
    pub fn optional(mut self) -> Self {
        if let AggregateMode::Single { distinct, .. } = self.mode {
            self.mode = AggregateMode::Single {
                distinct,
                optional: true,
            };
        }
        self
    }
}

/// 类型级声明式标记
///
/// 标记类型在注入器中绑定到处理器列表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// 标记类型
    pub kind: String,
    /// 标记属性
    pub attributes: BTreeMap<String, String>,
}

impl Marker {
    /// 创建新的标记
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// 添加属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// 获取属性
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_marker_expression() {
        assert_eq!(PropertyMarker::new("a").expression(), "${a}");
        assert_eq!(
            PropertyMarker::new("a").default_value("${b:c}").expression(),
            "${a:${b:c}}"
        );
        assert_eq!(PropertyMarker::new("${x}-${y}").expression(), "${x}-${y}");
    }

    #[test]
    fn test_aggregate_marker_single_flags() {
        let marker = AggregateMarker::new().single().distinct().optional();
        assert_eq!(
            marker.mode,
            AggregateMode::Single {
                distinct: true,
                optional: true
            }
        );

        // 非 single 模式下 distinct 无效
        assert_eq!(AggregateMarker::new().distinct().mode, AggregateMode::All);
    }

    #[test]
    fn test_version_range() {
        let range = VersionRange::new(2, 3);
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(3));
        assert!(VersionRange::at_least(1).contains(u32::MAX));
    }
}
