//! 分配定义
//!
//! 分配描述如何为某个限定符或类型获得实例，构建后不可变。

use crate::descriptor::{Bean, BeanDescriptor};
use crate::instance::{BeanInstance, CastTable};
use crate::mapping::validate_mappings;
use crate::processor::Processor;
use injection_common::{
    BlueprintError, BoxError, InjectionError, InjectorError, InjectorResult, PluginMarker,
    SingletonScope, TypeInfo,
};
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

type ProviderFn = Arc<dyn Fn() -> Result<BeanInstance, BoxError> + Send + Sync>;

/// 工厂回调
#[derive(Clone)]
pub struct Provider {
    target: TypeInfo,
    casts: Arc<CastTable>,
    create: ProviderFn,
}

impl Provider {
    pub fn target(&self) -> TypeInfo {
        self.target
    }

    /// 调用工厂
    pub fn provide(&self) -> InjectorResult<BeanInstance> {
        (self.create)().map_err(|source| {
            InjectionError::construction_failed(self.target.full_name, source).into()
        })
    }
}

/// Bean 分配
#[derive(Clone)]
pub enum BeanAllocation {
    /// 已有实例，不参与生命周期
    ToInstance(BeanInstance),
    /// 由注入引擎构造，附加的处理器排在类型自身处理器之后
    ToType {
        descriptor: BeanDescriptor,
        processors: Vec<Processor>,
    },
    /// 由工厂回调提供，不参与生命周期
    ToProvider(Provider),
    /// 由插件提供实现类型，再由注入引擎构造
    ToPlugin {
        marker: PluginMarker,
        interface: TypeInfo,
    },
}

impl BeanAllocation {
    /// 分配到已有实例
    pub fn instance<T: Bean>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// 分配到共享实例
    pub fn shared<T: Bean>(value: Arc<T>) -> Self {
        BeanAllocation::ToInstance(BeanInstance::new(value, T::descriptor().casts().clone()))
    }

    /// 分配到类型
    pub fn to_type<T: Bean>() -> Self {
        Self::descriptor(BeanDescriptor::of::<T>())
    }

    /// 分配到描述符
    pub fn descriptor(descriptor: BeanDescriptor) -> Self {
        BeanAllocation::ToType {
            descriptor,
            processors: Vec::new(),
        }
    }

    /// 分配到工厂回调
    pub fn provider<T, F>(create: F) -> Self
    where
        T: Bean,
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let casts = T::descriptor().casts().clone();
        let view = casts.clone();
        BeanAllocation::ToProvider(Provider {
            target: TypeInfo::of::<T>(),
            casts,
            create: Arc::new(move || {
                create().map(|value| BeanInstance::new(Arc::new(value), view.clone()))
            }),
        })
    }

    /// 分配到插件提供的 `U` 实现
    pub fn plugin<U: ?Sized + 'static>(marker: PluginMarker) -> Self {
        BeanAllocation::ToPlugin {
            marker,
            interface: TypeInfo::of::<U>(),
        }
    }

    /// 为类型分配追加处理器，其余分配忽略
    pub fn with_processors(self, extra: Vec<Processor>) -> Self {
        match self {
            BeanAllocation::ToType {
                descriptor,
                mut processors,
            } => {
                processors.extend(extra);
                BeanAllocation::ToType {
                    descriptor,
                    processors,
                }
            }
            other => other,
        }
    }

    /// 分配产生的类型
    pub fn target(&self) -> TypeInfo {
        match self {
            BeanAllocation::ToInstance(instance) => instance.type_info(),
            BeanAllocation::ToType { descriptor, .. } => descriptor.type_info(),
            BeanAllocation::ToProvider(provider) => provider.target,
            BeanAllocation::ToPlugin { interface, .. } => *interface,
        }
    }

    /// 产生的实例是否可赋值给指定类型
    pub fn is_assignable_to(&self, target: TypeId) -> bool {
        match self {
            BeanAllocation::ToInstance(instance) => instance.is_assignable_to(target),
            BeanAllocation::ToType { descriptor, .. } => descriptor.is_assignable_to(target),
            BeanAllocation::ToProvider(provider) => provider.casts.supports(target),
            BeanAllocation::ToPlugin { interface, .. } => interface.id == target,
        }
    }

    fn is_context_sensitive(&self) -> bool {
        matches!(self, BeanAllocation::ToType { descriptor, .. } if descriptor.is_context_sensitive())
    }
}

impl fmt::Debug for BeanAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeanAllocation::ToInstance(instance) => {
                f.debug_tuple("ToInstance").field(instance).finish()
            }
            BeanAllocation::ToType {
                descriptor,
                processors,
            } => f
                .debug_struct("ToType")
                .field("type", &descriptor.type_info().full_name)
                .field("processors", &processors.len())
                .finish(),
            BeanAllocation::ToProvider(provider) => f
                .debug_tuple("ToProvider")
                .field(&provider.target.full_name)
                .finish(),
            BeanAllocation::ToPlugin { marker, interface } => f
                .debug_struct("ToPlugin")
                .field("marker", marker)
                .field("interface", &interface.full_name)
                .finish(),
        }
    }
}

/// 单例分配
#[derive(Debug, Clone)]
pub struct SingletonAllocation {
    pub qualifier: String,
    pub scope: SingletonScope,
    pub allocation: BeanAllocation,
}

impl SingletonAllocation {
    /// 序列作用域的单例
    pub fn sequence(qualifier: impl Into<String>, allocation: BeanAllocation) -> Self {
        Self {
            qualifier: qualifier.into(),
            scope: SingletonScope::Sequence,
            allocation,
        }
    }

    /// 全局作用域的单例
    pub fn global(qualifier: impl Into<String>, allocation: BeanAllocation) -> Self {
        Self {
            qualifier: qualifier.into(),
            scope: SingletonScope::Global,
            allocation,
        }
    }
}

/// 限定符映射 `base → target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingAllocation {
    pub base: String,
    pub target: String,
}

impl MappingAllocation {
    pub fn new(base: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            target: target.into(),
        }
    }
}

/// 属性分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAllocation {
    pub key: String,
    pub value: String,
}

impl PropertyAllocation {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 类型分配，为独立依赖和即时构造的单例指定实现
#[derive(Debug, Clone)]
pub struct TypeAllocation {
    pub requested: TypeInfo,
    pub allocation: BeanAllocation,
}

impl TypeAllocation {
    /// 将 `U` 绑定到实现类型 `T`
    pub fn bind<U: ?Sized + 'static, T: Bean>() -> Self {
        Self::new::<U>(BeanAllocation::to_type::<T>())
    }

    /// 将 `U` 绑定到任意分配
    pub fn new<U: ?Sized + 'static>(allocation: BeanAllocation) -> Self {
        Self {
            requested: TypeInfo::of::<U>(),
            allocation,
        }
    }
}

/// 分配
#[derive(Debug, Clone)]
pub enum Allocation {
    Singleton(SingletonAllocation),
    Mapping(MappingAllocation),
    Property(PropertyAllocation),
    Type(TypeAllocation),
}

/// 可以转换为一组分配的值
pub trait IntoAllocations {
    fn into_allocations(self) -> Vec<Allocation>;
}

impl IntoAllocations for Allocation {
    fn into_allocations(self) -> Vec<Allocation> {
        vec![self]
    }
}

impl IntoAllocations for Vec<Allocation> {
    fn into_allocations(self) -> Vec<Allocation> {
        self
    }
}

impl IntoAllocations for () {
    fn into_allocations(self) -> Vec<Allocation> {
        Vec::new()
    }
}

macro_rules! allocation_kind {
    ($($kind:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$kind> for Allocation {
                fn from(allocation: $kind) -> Self {
                    Allocation::$variant(allocation)
                }
            }

            impl IntoAllocations for $kind {
                fn into_allocations(self) -> Vec<Allocation> {
                    vec![Allocation::$variant(self)]
                }
            }

            impl IntoAllocations for Vec<$kind> {
                fn into_allocations(self) -> Vec<Allocation> {
                    self.into_iter().map(Allocation::$variant).collect()
                }
            }
        )*
    };
}

allocation_kind! {
    SingletonAllocation => Singleton,
    MappingAllocation => Mapping,
    PropertyAllocation => Property,
    TypeAllocation => Type,
}

/// 经过校验的分配集合
#[derive(Debug, Clone, Default)]
pub struct AllocationSet {
    singletons: HashMap<String, SingletonAllocation>,
    mappings: Vec<MappingAllocation>,
    properties: BTreeMap<String, String>,
    types: HashMap<TypeId, TypeAllocation>,
}

impl AllocationSet {
    /// 空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 组装并校验
    ///
    /// 单例限定符、属性键、类型各自只能分配一次；映射不能重复定义 base，也不能成环；
    /// 类型分配必须可赋值；上下文敏感类型不能分配到全局作用域。
    pub fn assemble(allocations: impl IntoAllocations) -> InjectorResult<Self> {
        let mut set = Self::default();

        for allocation in allocations.into_allocations() {
            match allocation {
                Allocation::Singleton(singleton) => {
                    if singleton.qualifier.is_empty() {
                        return Err(InjectorError::illegal_argument("单例限定符不能为空"));
                    }
                    if singleton.scope == SingletonScope::Global
                        && singleton.allocation.is_context_sensitive()
                    {
                        return Err(InjectionError::ContextSensitive {
                            type_name: singleton.allocation.target().full_name.to_string(),
                            message: format!(
                                "不能作为全局单例 '{}' 分配",
                                singleton.qualifier
                            ),
                        }
                        .into());
                    }
                    if set.singletons.contains_key(&singleton.qualifier) {
                        return Err(BlueprintError::DuplicateAllocation {
                            kind: "singleton",
                            key: singleton.qualifier,
                        }
                        .into());
                    }
                    set.singletons.insert(singleton.qualifier.clone(), singleton);
                }
                Allocation::Mapping(mapping) => set.mappings.push(mapping),
                Allocation::Property(property) => {
                    if set.properties.contains_key(&property.key) {
                        return Err(BlueprintError::DuplicateAllocation {
                            kind: "property",
                            key: property.key,
                        }
                        .into());
                    }
                    set.properties.insert(property.key, property.value);
                }
                Allocation::Type(binding) => {
                    if !binding.allocation.is_assignable_to(binding.requested.id) {
                        return Err(BlueprintError::NotAssignable {
                            requested: binding.requested.full_name.to_string(),
                            target: binding.allocation.target().full_name.to_string(),
                        }
                        .into());
                    }
                    if set.types.contains_key(&binding.requested.id) {
                        return Err(BlueprintError::DuplicateAllocation {
                            kind: "type",
                            key: binding.requested.full_name.to_string(),
                        }
                        .into());
                    }
                    set.types.insert(binding.requested.id, binding);
                }
            }
        }

        validate_mappings(&set.mappings)?;
        Ok(set)
    }

    /// 合并多个已校验集合，重复定义按组装规则报错
    pub fn merge(sets: &[AllocationSet]) -> InjectorResult<Self> {
        let allocations: Vec<Allocation> = sets.iter().flat_map(|set| set.to_allocations()).collect();
        Self::assemble(allocations)
    }

    fn to_allocations(&self) -> Vec<Allocation> {
        let mut allocations: Vec<Allocation> = Vec::new();
        allocations.extend(self.singletons.values().cloned().map(Allocation::Singleton));
        allocations.extend(self.mappings.iter().cloned().map(Allocation::Mapping));
        allocations.extend(
            self.properties
                .iter()
                .map(|(k, v)| Allocation::Property(PropertyAllocation::new(k.clone(), v.clone()))),
        );
        allocations.extend(self.types.values().cloned().map(Allocation::Type));
        allocations
    }

    pub fn singleton(&self, qualifier: &str) -> Option<&SingletonAllocation> {
        self.singletons.get(qualifier)
    }

    pub fn singletons(&self) -> impl Iterator<Item = &SingletonAllocation> {
        self.singletons.values()
    }

    pub fn mappings(&self) -> &[MappingAllocation] {
        &self.mappings
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn type_allocation(&self, requested: TypeId) -> Option<&TypeAllocation> {
        self.types.get(&requested)
    }

    pub fn is_empty(&self) -> bool {
        self.singletons.is_empty()
            && self.mappings.is_empty()
            && self.properties.is_empty()
            && self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use injection_common::MappingError;

    trait Shape: Send + Sync {}

    #[derive(Default)]
    struct Square;

    impl Shape for Square {}

    impl Bean for Square {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Square>()
                .provides::<dyn Shape>(|s| s)
                .construct_default()
                .build()
        }
    }

    #[derive(Default)]
    struct Session;

    impl Bean for Session {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Session>()
                .context_sensitive()
                .construct_default()
                .build()
        }
    }

    #[test]
    fn test_duplicate_singleton_across_scopes() {
        let error = AllocationSet::assemble(vec![
            Allocation::from(SingletonAllocation::sequence("a", BeanAllocation::to_type::<Square>())),
            Allocation::from(SingletonAllocation::global("a", BeanAllocation::to_type::<Square>())),
        ])
        .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Blueprint {
                source: BlueprintError::DuplicateAllocation { kind: "singleton", .. }
            }
        ));
    }

    #[test]
    fn test_mapping_cycle_rejected_at_assembly() {
        let error = AllocationSet::assemble(vec![
            MappingAllocation::new("1", "2"),
            MappingAllocation::new("2", "3"),
            MappingAllocation::new("3", "1"),
        ])
        .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Mapping {
                source: MappingError::Cycle { .. }
            }
        ));
    }

    #[test]
    fn test_type_binding_must_be_assignable() {
        assert!(AllocationSet::assemble(TypeAllocation::bind::<dyn Shape, Square>()).is_ok());

        let error = AllocationSet::assemble(TypeAllocation::bind::<dyn Shape, Session>()).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Blueprint {
                source: BlueprintError::NotAssignable { .. }
            }
        ));
    }

    #[test]
    fn test_context_sensitive_global_singleton_rejected() {
        let error = AllocationSet::assemble(SingletonAllocation::global(
            "session",
            BeanAllocation::to_type::<Session>(),
        ))
        .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Injection {
                source: InjectionError::ContextSensitive { .. }
            }
        ));
    }

    #[test]
    fn test_merge_detects_duplicates_between_sets() {
        let first = AllocationSet::assemble(PropertyAllocation::new("k", "1")).unwrap();
        let second = AllocationSet::assemble(PropertyAllocation::new("k", "2")).unwrap();
        assert!(AllocationSet::merge(&[first.clone()]).is_ok());
        assert!(AllocationSet::merge(&[first, second]).is_err());
    }

    #[test]
    fn test_provider_allocation() {
        let allocation = BeanAllocation::provider(|| Ok(Square));
        assert!(allocation.is_assignable_to(TypeId::of::<dyn Shape>()));
        match allocation {
            BeanAllocation::ToProvider(provider) => {
                assert!(provider.provide().unwrap().cast::<dyn Shape>().is_some());
            }
            other => panic!("unexpected allocation: {:?}", other),
        }
    }
}
