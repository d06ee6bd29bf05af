//! 生命周期处理器与阶段上下文

use crate::descriptor::{Bean, BeanDescriptor};
use crate::instance::BeanInstance;
use config_abstractions::PropertyResolver;
use injection_common::{
    BoxError, InjectionError, InjectorError, InjectorResult, Marker, Phase, SingletonScope,
    TypeInfo, ValidationError,
};
use std::fmt;
use std::sync::Arc;

/// 类型级处理器，只在 `PRE_CONSTRUCT` 阶段运行
pub type TypeProcessorFn =
    Arc<dyn Fn(&PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync>;

/// 实例级处理器
pub type InstanceProcessorFn =
    Arc<dyn Fn(&BeanInstance, &PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync>;

/// 生命周期处理器
#[derive(Clone)]
pub enum Processor {
    /// 构造前的类型级检查
    Type(TypeProcessorFn),
    /// 实例存在之后的阶段
    Instance {
        phase: Phase,
        action: InstanceProcessorFn,
    },
}

impl Processor {
    /// 创建 `PRE_CONSTRUCT` 处理器
    pub fn pre_construct<F>(action: F) -> Self
    where
        F: Fn(&PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Processor::Type(Arc::new(action))
    }

    /// 创建作用于任意实例的处理器
    pub fn on_instance<F>(phase: Phase, action: F) -> Self
    where
        F: Fn(&BeanInstance, &PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Processor::Instance {
            phase,
            action: Arc::new(action),
        }
    }

    /// 创建作用于具体类型的处理器
    pub fn on<T, F>(phase: Phase, action: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::on_instance(phase, move |instance, context| {
            let bean = instance.cast::<T>().ok_or_else(|| {
                BoxError::from(format!(
                    "实例 {} 不是 {}",
                    instance.type_info(),
                    std::any::type_name::<T>()
                ))
            })?;
            action(&bean, context)
        })
    }

    /// 处理器所属阶段
    pub fn phase(&self) -> Phase {
        match self {
            Processor::Type(_) => Phase::PreConstruct,
            Processor::Instance { phase, .. } => *phase,
        }
    }

    /// 检查处理器与阶段是否匹配
    pub fn validate(&self, type_info: TypeInfo) -> Result<(), ValidationError> {
        match self {
            Processor::Instance {
                phase: Phase::PreConstruct,
                ..
            } => Err(ValidationError::illegal_combination(
                type_info.full_name,
                "PRE_CONSTRUCT 阶段尚无实例，不能注册实例级处理器",
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Processor").field(&self.phase()).finish()
    }
}

/// 标记处理器
///
/// 在描述符编译时按标记类型绑定，返回该类型在各阶段需要执行的处理器。
/// 返回错误表示标记的结构性校验失败。
pub trait MarkerProcessor: Send + Sync {
    fn bind(
        &self,
        marker: &Marker,
        descriptor: &BeanDescriptor,
    ) -> Result<Vec<Processor>, ValidationError>;
}

impl<F> MarkerProcessor for F
where
    F: Fn(&Marker, &BeanDescriptor) -> Result<Vec<Processor>, ValidationError> + Send + Sync,
{
    fn bind(
        &self,
        marker: &Marker,
        descriptor: &BeanDescriptor,
    ) -> Result<Vec<Processor>, ValidationError> {
        self(marker, descriptor)
    }
}

/// 单个依赖槽的注入决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionKind {
    /// 新建独立实例
    Independent { target: TypeInfo },
    /// 引用单例，限定符已经过映射
    Singleton {
        qualifier: String,
        scope: SingletonScope,
        target: TypeInfo,
    },
    /// 属性表达式
    Property { expression: String },
    /// 插件实现
    Plugin { name: String, interface: TypeInfo },
    /// 聚合查询
    Aggregate { element: TypeInfo },
    /// 注入器句柄
    Injector,
}

/// 注入决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionDecision {
    pub slot: String,
    pub kind: DecisionKind,
}

/// `POST_INJECT` 阶段的即时注入回调
///
/// 新建的实例加入当前注入过程，与其余 Bean 一起接收 `POST_CONSTRUCT`。
pub trait InjectionCallback {
    /// 注入一个独立实例
    fn inject_descriptor(&self, descriptor: BeanDescriptor) -> InjectorResult<BeanInstance>;

    /// 查找已存在或显式分配的单例
    fn inject_singleton(
        &self,
        qualifier: &str,
        target: TypeInfo,
        scope: SingletonScope,
    ) -> InjectorResult<Option<BeanInstance>>;
}

impl dyn InjectionCallback + '_ {
    /// 注入指定类型的独立实例
    pub fn inject<T: Bean>(&self) -> InjectorResult<Arc<T>> {
        let instance = self.inject_descriptor(BeanDescriptor::of::<T>())?;
        instance.cast::<T>().ok_or_else(|| mismatch::<T>("", &instance))
    }

    /// 查找单例并视为指定类型
    pub fn singleton<U: ?Sized + 'static>(
        &self,
        qualifier: &str,
        scope: SingletonScope,
    ) -> InjectorResult<Option<Arc<U>>> {
        match self.inject_singleton(qualifier, TypeInfo::of::<U>(), scope)? {
            Some(instance) => instance
                .cast::<U>()
                .map(Some)
                .ok_or_else(|| mismatch::<U>(qualifier, &instance)),
            None => Ok(None),
        }
    }
}

fn mismatch<U: ?Sized>(qualifier: &str, instance: &BeanInstance) -> InjectorError {
    InjectionError::TypeMismatch {
        qualifier: qualifier.to_string(),
        expected: std::any::type_name::<U>().to_string(),
        actual: instance.type_info().full_name.to_string(),
    }
    .into()
}

/// 阶段上下文
///
/// 只暴露当前阶段允许的服务；请求不可用的服务返回 [`InjectionError::ServiceUnavailable`]。
pub struct PhaseContext<'a> {
    phase: Phase,
    type_info: TypeInfo,
    resolver: Option<&'a dyn PropertyResolver>,
    injection: Option<&'a dyn InjectionCallback>,
    decisions: Option<&'a [InjectionDecision]>,
}

impl<'a> PhaseContext<'a> {
    /// 创建不提供任何服务的上下文
    pub fn new(phase: Phase, type_info: TypeInfo) -> Self {
        Self {
            phase,
            type_info,
            resolver: None,
            injection: None,
            decisions: None,
        }
    }

    /// 提供属性解析服务，仅在前三个阶段生效
    pub fn with_resolver(mut self, resolver: &'a dyn PropertyResolver) -> Self {
        if self.phase.offers_resolving() {
            self.resolver = Some(resolver);
        }
        self
    }

    /// 提供即时注入服务，仅在 `POST_INJECT` 生效
    pub fn with_injection(mut self, injection: &'a dyn InjectionCallback) -> Self {
        if self.phase.offers_injection() {
            self.injection = Some(injection);
        }
        self
    }

    /// 提供注入决策，仅在 `PRE_CONSTRUCT` 生效
    pub fn with_decisions(mut self, decisions: &'a [InjectionDecision]) -> Self {
        if self.phase == Phase::PreConstruct {
            self.decisions = Some(decisions);
        }
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// 属性解析服务
    pub fn resolver(&self) -> Result<&'a dyn PropertyResolver, InjectionError> {
        self.resolver.ok_or(InjectionError::ServiceUnavailable {
            service: "resolving",
            phase: self.phase,
        })
    }

    /// 即时注入服务
    pub fn injection(&self) -> Result<&'a dyn InjectionCallback, InjectionError> {
        self.injection.ok_or(InjectionError::ServiceUnavailable {
            service: "injection",
            phase: self.phase,
        })
    }

    /// 注入决策
    pub fn decisions(&self) -> Result<&'a [InjectionDecision], InjectionError> {
        self.decisions.ok_or(InjectionError::ServiceUnavailable {
            service: "decisions",
            phase: self.phase,
        })
    }
}
