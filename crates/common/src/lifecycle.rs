//! Bean 生命周期管理

use crate::errors::InjectionError;
use std::fmt;

/// Bean 生命周期阶段
///
/// 阶段严格按声明顺序推进，不允许跳过或回退。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// 构造前，仅做类型级检查，实例尚不存在
    PreConstruct,
    /// 实例已创建，直接依赖均已注入
    PostInject,
    /// 整个注入序列完成注入之后
    PostConstruct,
    /// 销毁前
    PreDestroy,
    /// 销毁后，此后实例对所属注入器不再可见
    PostDestroy,
}

impl Phase {
    /// 全部阶段，按执行顺序排列
    pub const ALL: [Phase; 5] = [
        Phase::PreConstruct,
        Phase::PostInject,
        Phase::PostConstruct,
        Phase::PreDestroy,
        Phase::PostDestroy,
    ];

    /// 该阶段是否提供属性解析服务
    pub fn offers_resolving(&self) -> bool {
        matches!(
            self,
            Phase::PreConstruct | Phase::PostInject | Phase::PostConstruct
        )
    }

    /// 该阶段是否提供注入服务
    pub fn offers_injection(&self) -> bool {
        matches!(self, Phase::PostInject)
    }

    /// 该阶段是否已有实例
    pub fn has_instance(&self) -> bool {
        !matches!(self, Phase::PreConstruct)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PreConstruct => "PRE_CONSTRUCT",
            Phase::PostInject => "POST_INJECT",
            Phase::PostConstruct => "POST_CONSTRUCT",
            Phase::PreDestroy => "PRE_DESTROY",
            Phase::PostDestroy => "POST_DESTROY",
        };
        f.write_str(name)
    }
}

/// 单个 Bean 的阶段状态机
#[derive(Debug, Clone, Default)]
pub struct PhaseState {
    current: Option<Phase>,
}

impl PhaseState {
    /// 创建尚未进入任何阶段的状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前阶段
    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    /// 推进到下一阶段
    ///
    /// `PRE_CONSTRUCT` 可以省略（没有声明阶段 0 处理器的类型），其余阶段必须依次经过。
    pub fn advance(&mut self, type_name: &str, next: Phase) -> Result<(), InjectionError> {
        let allowed = match (self.current, next) {
            (None, Phase::PreConstruct) | (None, Phase::PostInject) => true,
            (Some(current), next) => {
                let current_index = Phase::ALL.iter().position(|p| *p == current);
                let next_index = Phase::ALL.iter().position(|p| *p == next);
                matches!((current_index, next_index), (Some(c), Some(n)) if n == c + 1)
            }
            _ => false,
        };

        if !allowed {
            return Err(InjectionError::IllegalPhaseTransition {
                type_name: type_name.to_string(),
                from: self.current,
                to: next,
            });
        }

        self.current = Some(next);
        Ok(())
    }

    /// 是否已经完成销毁
    pub fn is_destroyed(&self) -> bool {
        self.current == Some(Phase::PostDestroy)
    }
}

/// 注入序列作用域
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: uuid::Uuid,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Scope {
    /// 创建新作用域
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            created_at: chrono::Utc::now(),
        }
    }

    /// 创建根作用域
    pub fn root() -> Self {
        Self::new("root")
    }

    /// 创建子作用域
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::new(format!("{}.{}", self.name, name.into()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}
