//! 错误类型定义

use crate::lifecycle::Phase;
use std::path::PathBuf;
use thiserror::Error;

/// 用户代码（构造器、处理器、提供者）返回的装箱错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 蓝图定义错误类型
#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("蓝图定义无效: {name}, 原因: {message}")]
    InvalidDefinition { name: String, message: String },

    #[error("蓝图定义重复: {name}")]
    DuplicateDefinition { name: String },

    #[error("分配重复定义: {kind} '{key}'")]
    DuplicateAllocation { kind: &'static str, key: String },

    #[error("类型绑定不可赋值: {target} 无法作为 {requested} 使用")]
    NotAssignable { requested: String, target: String },
}

/// 声明式标记验证错误类型
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("标记无效: {element}, 原因: {message}")]
    InvalidMarker { element: String, message: String },

    #[error("非法的标记组合: {element}, 原因: {message}")]
    IllegalMarkerCombination { element: String, message: String },

    #[error("类型缺少构造器: {type_name}")]
    MissingConstructor { type_name: String },

    #[error("依赖槽重复: {type_name}.{slot}")]
    DuplicateSlot { type_name: String, slot: String },

    #[error("正则表达式无效: {pattern}, 原因: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl ValidationError {
    /// 创建标记无效错误
    pub fn invalid_marker(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMarker {
            element: element.into(),
            message: message.into(),
        }
    }

    /// 创建非法标记组合错误
    pub fn illegal_combination(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IllegalMarkerCombination {
            element: element.into(),
            message: message.into(),
        }
    }
}

/// 依赖注入解析错误类型
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("缺少类型绑定: {type_name}")]
    MissingBinding { type_name: String },

    #[error("组件创建失败: {type_name}, 原因: {source}")]
    ConstructionFailed { type_name: String, source: BoxError },

    #[error("检测到循环依赖: {dependency_chain}")]
    CircularDependency { dependency_chain: String },

    #[error("单例类型不匹配: '{qualifier}' 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        qualifier: String,
        expected: String,
        actual: String,
    },

    #[error("上下文敏感组件使用错误: {type_name}, 原因: {message}")]
    ContextSensitive { type_name: String, message: String },

    #[error("非法重入: 序列 {sequence} 正处于 POST_INJECT 阶段")]
    IllegalReentrancy { sequence: String },

    #[error("依赖无法满足: {type_name}.{slot}")]
    UnsatisfiedDependency { type_name: String, slot: String },

    #[error("依赖槽不存在: {slot}")]
    UnknownSlot { slot: String },

    #[error("依赖槽类型不匹配: {slot}, 期望 {expected}")]
    SlotTypeMismatch { slot: String, expected: String },

    #[error("阶段 {phase} 不提供服务: {service}")]
    ServiceUnavailable { service: &'static str, phase: Phase },

    #[error("聚合结果不唯一: {type_name}, 匹配数量 {count}")]
    AmbiguousAggregation { type_name: String, count: usize },

    #[error("聚合结果为空: {type_name}")]
    EmptyAggregation { type_name: String },

    #[error("非法的阶段转换: {type_name} 从 {from:?} 到 {to}")]
    IllegalPhaseTransition {
        type_name: String,
        from: Option<Phase>,
        to: Phase,
    },
}

impl InjectionError {
    /// 创建组件创建失败错误
    pub fn construction_failed(type_name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConstructionFailed {
            type_name: type_name.into(),
            source: source.into(),
        }
    }
}

/// 属性解析错误类型
#[derive(Error, Debug, Clone)]
pub enum ResolvingError {
    #[error("属性无法解析: {key}")]
    Unresolvable { key: String },

    #[error("属性值与匹配器不符: {key} = '{value}', 匹配器 {pattern}")]
    MatcherMismatch {
        key: String,
        value: String,
        pattern: String,
    },

    #[error("匹配器无效: {pattern}, 原因: {message}")]
    InvalidMatcher { pattern: String, message: String },

    #[error("占位符表达式格式错误: {expression}, 原因: {message}")]
    Malformed { expression: String, message: String },

    #[error("属性递归引用自身: {key}")]
    RecursiveReference { key: String },
}

/// 属性类型转换错误
#[derive(Error, Debug, Clone)]
#[error("属性值无法转换: '{value}' -> {target}, 原因: {message}")]
pub struct ConversionError {
    pub value: String,
    pub target: String,
    pub message: String,
}

/// 插件错误类型
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("插件不存在: {directory:?} 中的 {name}")]
    NotFound { directory: PathBuf, name: String },

    #[error("插件请求非法: {name}, 原因: {message}")]
    IllegalRequest { name: String, message: String },

    #[error("插件文件读取失败: {path:?}, 原因: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("插件归档格式错误: {path:?}, 原因: {message}")]
    MalformedArchive { path: PathBuf, message: String },

    #[error("服务声明无效: {declaration}, 原因: {message}")]
    InvalidServiceDeclaration { declaration: String, message: String },

    #[error("类型无法加载: {name}")]
    UnresolvableType { name: String },

    #[error("实现类型 {implementation} 不可赋值给服务接口 {service}")]
    NotAssignable {
        implementation: String,
        service: String,
    },

    #[error("插件 {plugin} 没有声明服务接口 {service} 的实现")]
    NoImplementation { plugin: String, service: String },

    #[error("插件 {plugin} 为服务接口 {service} 声明了 {count} 个实现")]
    AmbiguousImplementation {
        plugin: String,
        service: String,
        count: usize,
    },

    #[error("不允许嵌套插件: {type_name}")]
    NestedPlugin { type_name: String },

    #[error("加载单元关闭失败: {unit}, 原因: {message}")]
    CloseFailed { unit: String, message: String },
}

/// 限定符映射错误类型
#[derive(Error, Debug, Clone)]
pub enum MappingError {
    #[error("检测到循环映射: {chain}")]
    Cycle { chain: String },
}

/// 生命周期处理器错误
#[derive(Error, Debug)]
#[error("处理器执行失败: {type_name} 在阶段 {phase}, 原因: {source}")]
pub struct ProcessorError {
    pub type_name: String,
    pub phase: Phase,
    pub source: BoxError,
}

/// 关闭后继续使用的错误
#[derive(Error, Debug, Clone)]
#[error("{target} 已关闭")]
pub struct ShutdownError {
    pub target: String,
}

/// 注入引擎错误类型
#[derive(Error, Debug)]
pub enum InjectorError {
    #[error("蓝图错误: {source}")]
    Blueprint {
        #[from]
        source: BlueprintError,
    },

    #[error("验证错误: {source}")]
    Validation {
        #[from]
        source: ValidationError,
    },

    #[error("注入错误: {source}")]
    Injection {
        #[from]
        source: InjectionError,
    },

    #[error("属性解析错误: {source}")]
    Resolving {
        #[from]
        source: ResolvingError,
    },

    #[error("类型转换错误: {source}")]
    Conversion {
        #[from]
        source: ConversionError,
    },

    #[error("插件错误: {source}")]
    Plugin {
        #[from]
        source: PluginError,
    },

    #[error("映射错误: {source}")]
    Mapping {
        #[from]
        source: MappingError,
    },

    #[error("{source}")]
    Processor {
        #[from]
        source: ProcessorError,
    },

    #[error("{source}")]
    Shutdown {
        #[from]
        source: ShutdownError,
    },

    #[error("非法参数: {message}")]
    IllegalArgument { message: String },
}

impl InjectorError {
    /// 创建非法参数错误
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }
}

/// 结果类型别名
pub type InjectorResult<T> = Result<T, InjectorError>;
pub type InjectionResult<T> = Result<T, InjectionError>;
pub type ResolvingResult<T> = Result<T, ResolvingError>;
pub type PluginResult<T> = Result<T, PluginError>;
