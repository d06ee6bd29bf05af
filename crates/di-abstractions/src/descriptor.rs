//! 静态类型化的 Bean 描述符
//!
//! 每个可注入类型通过 [`Bean::descriptor`] 声明自己的依赖槽、可视为的类型、
//! 类型级标记、生命周期处理器以及构造器。注入器按 `TypeId` 编译并缓存描述符。

use crate::dependencies::{AggregateQuery, Dependencies};
use crate::instance::{AnyArc, BeanInstance, CastTable};
use crate::processor::{PhaseContext, Processor};
use injection_common::{
    AggregateMarker, BoxError, InjectMarker, InjectorResult, Marker, Phase, PluginMarker,
    PropertyMarker, TypeInfo, ValidationError,
};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 可由注入引擎构造的类型
pub trait Bean: Send + Sync + 'static {
    /// 类型的依赖描述符
    fn descriptor() -> BeanDescriptor;
}

/// 描述符工厂
pub type DescriptorFactory = fn() -> BeanDescriptor;

type ConstructFn = Arc<dyn Fn(&Dependencies) -> InjectorResult<AnyArc> + Send + Sync>;

/// 依赖槽的种类
#[derive(Clone)]
pub enum DependencyKind {
    /// 独立 Bean 或单例引用
    Bean {
        target: TypeInfo,
        /// 按声明类型即时构造时使用的描述符，trait 对象没有
        default: Option<DescriptorFactory>,
        marker: InjectMarker,
    },
    /// 属性
    Property(PropertyMarker),
    /// 插件提供的服务实现
    Plugin {
        interface: TypeInfo,
        marker: PluginMarker,
    },
    /// 单例聚合
    Aggregate(AggregateQuery),
    /// 绑定到当前注入序列的注入器句柄
    Injector,
}

impl fmt::Debug for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Bean { target, marker, .. } => f
                .debug_struct("Bean")
                .field("target", &target.full_name)
                .field("marker", marker)
                .finish(),
            DependencyKind::Property(marker) => f.debug_tuple("Property").field(marker).finish(),
            DependencyKind::Plugin { interface, marker } => f
                .debug_struct("Plugin")
                .field("interface", &interface.full_name)
                .field("marker", marker)
                .finish(),
            DependencyKind::Aggregate(query) => f.debug_tuple("Aggregate").field(query).finish(),
            DependencyKind::Injector => f.write_str("Injector"),
        }
    }
}

/// 命名的依赖槽
#[derive(Debug, Clone)]
pub struct Dependency {
    pub slot: String,
    pub kind: DependencyKind,
}

/// Bean 描述符
#[derive(Clone)]
pub struct BeanDescriptor {
    type_info: TypeInfo,
    dependencies: Vec<Dependency>,
    casts: Arc<CastTable>,
    markers: Vec<Marker>,
    context_sensitive: bool,
    processors: Vec<Processor>,
    constructor: Option<ConstructFn>,
    issues: Vec<ValidationError>,
    origin: Option<String>,
    canonical: bool,
}

impl BeanDescriptor {
    /// 开始构建类型 `T` 的描述符
    pub fn builder<T: Send + Sync + 'static>() -> DescriptorBuilder<T> {
        DescriptorBuilder::new()
    }

    /// 获取 Bean 类型自身声明的描述符
    ///
    /// 只有这样得到的描述符会按类型缓存编译结果；直接用构建器得到的描述符每次使用时单独编译。
    pub fn of<T: Bean>() -> Self {
        let mut descriptor = T::descriptor();
        descriptor.canonical = descriptor.type_info.id == TypeId::of::<T>();
        descriptor
    }

    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn casts(&self) -> &Arc<CastTable> {
        &self.casts
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    /// 构建期间记录的问题，编译描述符时报告
    pub fn issues(&self) -> &[ValidationError] {
        &self.issues
    }

    /// 是否为上下文敏感类型
    pub fn is_context_sensitive(&self) -> bool {
        self.context_sensitive
    }

    /// 是否声明了构造器
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    /// 是否可视为指定类型
    pub fn is_assignable_to(&self, target: TypeId) -> bool {
        self.casts.supports(target)
    }

    /// 是否为类型自身声明的描述符
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// 插件来源的类型包名称
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// 标记为来自插件类型包
    pub fn with_origin(mut self, bundle: impl Into<String>) -> Self {
        self.origin = Some(bundle.into());
        self
    }

    /// 是否声明了插件依赖
    pub fn has_plugin_dependencies(&self) -> bool {
        self.dependencies
            .iter()
            .any(|d| matches!(d.kind, DependencyKind::Plugin { .. }))
    }

    /// 调用构造器
    pub fn construct(&self, dependencies: &Dependencies) -> InjectorResult<BeanInstance> {
        let constructor = self
            .constructor
            .as_ref()
            .ok_or_else(|| ValidationError::MissingConstructor {
                type_name: self.type_info.full_name.to_string(),
            })?;

        let value = constructor(dependencies)?;
        Ok(BeanInstance::from_erased(
            value,
            self.type_info,
            self.casts.clone(),
        ))
    }
}

impl fmt::Debug for BeanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDescriptor")
            .field("type", &self.type_info.full_name)
            .field("dependencies", &self.dependencies)
            .field("markers", &self.markers)
            .field("context_sensitive", &self.context_sensitive)
            .field("origin", &self.origin)
            .finish()
    }
}

/// 描述符构建器
pub struct DescriptorBuilder<T> {
    descriptor: BeanDescriptor,
    casts: CastTable,
    _type: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> DescriptorBuilder<T> {
    fn new() -> Self {
        Self {
            descriptor: BeanDescriptor {
                type_info: TypeInfo::of::<T>(),
                dependencies: Vec::new(),
                casts: Arc::new(CastTable::default()),
                markers: Vec::new(),
                context_sensitive: false,
                processors: Vec::new(),
                constructor: None,
                issues: Vec::new(),
                origin: None,
                canonical: false,
            },
            casts: CastTable::of::<T>(),
            _type: PhantomData,
        }
    }

    fn slot(mut self, slot: &str, kind: DependencyKind) -> Self {
        if self.descriptor.dependencies.iter().any(|d| d.slot == slot) {
            self.descriptor.issues.push(ValidationError::DuplicateSlot {
                type_name: self.descriptor.type_info.full_name.to_string(),
                slot: slot.to_string(),
            });
            return self;
        }
        self.descriptor.dependencies.push(Dependency {
            slot: slot.to_string(),
            kind,
        });
        self
    }

    /// 注入 Bean 类型，没有分配时可按该类型即时构造
    pub fn inject<U: Bean>(self, slot: &str, marker: InjectMarker) -> Self {
        self.slot(
            slot,
            DependencyKind::Bean {
                target: TypeInfo::of::<U>(),
                default: Some(BeanDescriptor::of::<U> as DescriptorFactory),
                marker,
            },
        )
    }

    /// 注入 trait 对象，必须由类型分配或单例分配提供
    pub fn inject_dyn<U: ?Sized + 'static>(self, slot: &str, marker: InjectMarker) -> Self {
        self.slot(
            slot,
            DependencyKind::Bean {
                target: TypeInfo::of::<U>(),
                default: None,
                marker,
            },
        )
    }

    /// 注入属性
    pub fn property(self, slot: &str, marker: PropertyMarker) -> Self {
        self.slot(slot, DependencyKind::Property(marker))
    }

    /// 注入插件提供的服务实现
    pub fn plugin<U: ?Sized + 'static>(self, slot: &str, marker: PluginMarker) -> Self {
        self.slot(
            slot,
            DependencyKind::Plugin {
                interface: TypeInfo::of::<U>(),
                marker,
            },
        )
    }

    /// 注入单例聚合
    pub fn aggregate<U: ?Sized + 'static>(self, slot: &str, marker: AggregateMarker) -> Self {
        self.slot(
            slot,
            DependencyKind::Aggregate(AggregateQuery::of::<U>(marker)),
        )
    }

    /// 注入带谓词的单例聚合
    pub fn aggregate_query(self, slot: &str, query: AggregateQuery) -> Self {
        self.slot(slot, DependencyKind::Aggregate(query))
    }

    /// 注入绑定到当前序列的注入器句柄
    pub fn injector(self, slot: &str) -> Self {
        self.slot(slot, DependencyKind::Injector)
    }

    /// 声明可以视为的类型
    pub fn provides<U: ?Sized + 'static>(mut self, view: fn(Arc<T>) -> Arc<U>) -> Self {
        self.casts.insert_view::<T, U>(view);
        self
    }

    /// 添加类型级标记
    pub fn marker(mut self, marker: Marker) -> Self {
        self.descriptor.markers.push(marker);
        self
    }

    /// 标记为上下文敏感，只能通过显式分配获得
    pub fn context_sensitive(mut self) -> Self {
        self.descriptor.context_sensitive = true;
        self
    }

    /// 添加 `PRE_CONSTRUCT` 处理器
    pub fn on_pre_construct<F>(mut self, action: F) -> Self
    where
        F: Fn(&PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.descriptor
            .processors
            .push(Processor::pre_construct(action));
        self
    }

    /// 添加实例级处理器
    pub fn on<F>(mut self, phase: Phase, action: F) -> Self
    where
        F: Fn(&T, &PhaseContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let processor = Processor::on::<T, F>(phase, action);
        if let Err(issue) = processor.validate(self.descriptor.type_info) {
            self.descriptor.issues.push(issue);
            return self;
        }
        self.descriptor.processors.push(processor);
        self
    }

    /// 设置构造器
    pub fn construct<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&Dependencies) -> InjectorResult<T> + Send + Sync + 'static,
    {
        self.descriptor.constructor = Some(Arc::new(move |dependencies: &Dependencies| {
            constructor(dependencies).map(|value| Arc::new(value) as AnyArc)
        }));
        self
    }

    /// 完成构建
    pub fn build(mut self) -> BeanDescriptor {
        self.descriptor.casts = Arc::new(self.casts);
        self.descriptor
    }
}

impl<T: Default + Send + Sync + 'static> DescriptorBuilder<T> {
    /// 使用 `Default` 构造
    pub fn construct_default(self) -> Self {
        self.construct(|_| Ok(T::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::ResolvedValue;

    trait Engine: Send + Sync {
        fn power(&self) -> u32;
    }

    #[derive(Default)]
    struct Diesel;

    impl Engine for Diesel {
        fn power(&self) -> u32 {
            90
        }
    }

    impl Bean for Diesel {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Diesel>()
                .provides::<dyn Engine>(|d| d)
                .construct_default()
                .build()
        }
    }

    struct Car {
        engine: Arc<dyn Engine>,
        name: String,
    }

    impl Bean for Car {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Car>()
                .inject_dyn::<dyn Engine>("engine", InjectMarker::independent())
                .property("name", PropertyMarker::new("car.name"))
                .construct(|deps| {
                    Ok(Car {
                        engine: deps.bean::<dyn Engine>("engine")?,
                        name: deps.raw_property("name")?,
                    })
                })
                .build()
        }
    }

    #[test]
    fn test_descriptor_construct() {
        let descriptor = Car::descriptor();
        assert_eq!(descriptor.dependencies().len(), 2);
        assert!(descriptor.issues().is_empty());

        let engine = Diesel::descriptor()
            .construct(&Dependencies::new(TypeInfo::of::<Diesel>()))
            .unwrap();
        assert!(engine.is_assignable_to(TypeId::of::<dyn Engine>()));

        let mut dependencies = Dependencies::new(descriptor.type_info());
        dependencies.insert("engine", ResolvedValue::Bean(engine));
        dependencies.insert("name", ResolvedValue::Property("roadster".to_string()));

        let car = descriptor.construct(&dependencies).unwrap();
        let car = car.cast::<Car>().unwrap();
        assert_eq!(car.engine.power(), 90);
        assert_eq!(car.name, "roadster");
    }

    #[test]
    fn test_builder_records_issues() {
        let descriptor = BeanDescriptor::builder::<Diesel>()
            .property("a", PropertyMarker::new("a"))
            .property("a", PropertyMarker::new("b"))
            .on(Phase::PreConstruct, |_, _| Ok(()))
            .build();

        assert_eq!(descriptor.issues().len(), 2);
        assert!(!descriptor.has_constructor());
        assert!(descriptor
            .construct(&Dependencies::new(TypeInfo::of::<Diesel>()))
            .is_err());
    }
}
