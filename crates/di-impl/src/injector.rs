//! 根注入器

use crate::aggregation;
use crate::descriptor_cache::{DescriptorCache, MarkerRegistry};
use crate::mapping::MappingContext;
use crate::settings::InjectorSettings;
use crate::state::RootState;
use config_abstractions::{PropertyResolver, PropertySource};
use config_impl::{EnvironmentPropertySource, FilePropertySource, PropertyStore};
use di_abstractions::{
    AggregateQuery, Allocation, AllocationSet, Bean, BeanDescriptor, BeanInstance, Blueprint,
    Injector, IntoAllocations, MarkerProcessor, TypeCatalog,
};
use injection_common::{AggregateMarker, InjectorError, InjectorResult, Scope};
use plugin_cache::PluginCache;
use std::sync::Arc;
use tracing::info;

/// 根注入器构建器
#[derive(Default)]
pub struct RootInjectorBuilder {
    settings: InjectorSettings,
    blueprints: Vec<Blueprint>,
    allocations: Vec<Allocation>,
    sources: Vec<Arc<dyn PropertySource>>,
    markers: MarkerRegistry,
    catalog: Option<Arc<TypeCatalog>>,
    plugins: Option<Arc<PluginCache>>,
}

impl RootInjectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入器配置
    pub fn settings(mut self, settings: InjectorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 加入蓝图，所有蓝图与直接分配合并后不能有重复定义
    pub fn blueprint(mut self, blueprint: Blueprint) -> Self {
        self.blueprints.push(blueprint);
        self
    }

    /// 加入根级分配
    pub fn allocate<A: IntoAllocations>(mut self, allocations: A) -> Self {
        self.allocations.extend(allocations.into_allocations());
        self
    }

    /// 加入属性来源
    pub fn property_source(mut self, source: Arc<dyn PropertySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 为标记类型注册处理器
    pub fn marker_processor(mut self, kind: impl Into<String>, processor: Arc<dyn MarkerProcessor>) -> Self {
        self.markers.register(kind, processor);
        self
    }

    /// 插件类型解析使用的类型目录
    pub fn catalog(mut self, catalog: Arc<TypeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// 共享已有的插件缓存，设置后忽略 [`catalog`](Self::catalog)
    pub fn plugin_cache(mut self, plugins: Arc<PluginCache>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// 构建根注入器
    pub fn build(self) -> InjectorResult<RootInjector> {
        let mut sets: Vec<AllocationSet> = self
            .blueprints
            .iter()
            .map(|blueprint| blueprint.allocations().clone())
            .collect();
        sets.push(AllocationSet::assemble(self.allocations)?);
        let allocations = AllocationSet::merge(&sets)?;
        let mapping = MappingContext::new().merge(allocations.mappings())?;

        let properties = Arc::new(PropertyStore::new());
        for path in &self.settings.property_files {
            properties.add_source(Arc::new(FilePropertySource::load(path)?));
        }
        if let Some(prefix) = &self.settings.environment_prefix {
            properties.add_source(Arc::new(EnvironmentPropertySource::new(prefix.clone())));
        }
        for source in self.sources {
            properties.add_source(source);
        }

        let plugins = match self.plugins {
            Some(plugins) => plugins,
            None => Arc::new(PluginCache::new(self.catalog.unwrap_or_default())),
        };

        let scope = Scope::new(self.settings.name.clone());
        info!(
            "构建根注入器 {}: {} 个蓝图, {} 个映射, {} 个属性来源",
            scope,
            self.blueprints.len(),
            mapping.len(),
            properties.source_names().len()
        );

        let state = RootState::new(
            scope,
            self.settings,
            properties,
            allocations,
            mapping,
            DescriptorCache::new(self.markers),
            plugins,
        );
        Ok(RootInjector {
            state: Arc::new(state),
        })
    }
}

/// 根注入器
///
/// 每次实例化开启一个注入序列；全局单例在所有序列间共享，只在 [`shutdown`](Self::shutdown)
/// 时销毁。克隆得到的注入器共享同一状态。
#[derive(Clone)]
pub struct RootInjector {
    state: Arc<RootState>,
}

impl RootInjector {
    pub fn builder() -> RootInjectorBuilder {
        RootInjectorBuilder::new()
    }

    /// 使用默认配置创建
    pub fn new() -> InjectorResult<Self> {
        Self::builder().build()
    }

    fn injector(&self) -> &dyn Injector {
        self
    }

    /// 实例化类型 `T`
    pub fn instantiate<T: Bean>(&self) -> InjectorResult<Arc<T>> {
        self.injector().instantiate::<T>()
    }

    /// 使用附加分配实例化类型 `T`
    pub fn instantiate_with<T: Bean, A: IntoAllocations>(&self, allocations: A) -> InjectorResult<Arc<T>> {
        self.injector().instantiate_with::<T, A>(allocations)
    }

    /// 使用蓝图实例化类型 `T`
    pub fn instantiate_from<T: Bean>(&self, blueprints: &[&Blueprint]) -> InjectorResult<Arc<T>> {
        self.injector().instantiate_from::<T>(blueprints)
    }

    /// 销毁根 Bean 所在的注入序列
    pub fn destroy<T: ?Sized>(&self, bean: &Arc<T>) -> InjectorResult<()> {
        self.injector().destroy(bean)
    }

    /// 聚合全局单例
    pub fn aggregate<U: ?Sized + 'static>(&self, marker: AggregateMarker) -> InjectorResult<Vec<Arc<U>>> {
        self.injector().aggregate::<U>(marker)
    }

    /// 关闭注入器，之后的所有操作返回关闭错误
    pub fn shutdown(&self) -> InjectorResult<()> {
        self.state.shutdown()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.is_shut_down()
    }

    /// 根属性解析器，关闭后不可用
    pub fn resolver(&self) -> InjectorResult<&dyn PropertyResolver> {
        self.state.ensure_running()?;
        Ok(&self.state.overlay)
    }

    /// 根属性存储
    ///
    /// 只用于检查与追加属性来源，关闭后仍可访问；解析属性请使用 [`resolver`](Self::resolver)。
    pub fn properties(&self) -> &Arc<PropertyStore> {
        &self.state.properties
    }

    /// 共享的插件缓存，只用于检查与淘汰，关闭后仍可访问
    pub fn plugin_cache(&self) -> &Arc<PluginCache> {
        &self.state.plugins
    }

    pub fn settings(&self) -> &InjectorSettings {
        &self.state.settings
    }

    /// 未销毁的注入序列数量
    pub fn sequence_count(&self) -> usize {
        self.state.sequence_count()
    }

    /// 已创建的全局单例数量
    pub fn global_singleton_count(&self) -> usize {
        self.state.global_pool.len()
    }

    /// 由根注入器管理、等待关闭时销毁的全局 Bean 数量
    pub fn global_managed_count(&self) -> usize {
        self.state.global_managed_count()
    }
}

impl Injector for RootInjector {
    fn instantiate_descriptor(
        &self,
        descriptor: BeanDescriptor,
        allocations: AllocationSet,
    ) -> InjectorResult<BeanInstance> {
        let (sequence, instance) = self.state.spawn(None, descriptor, allocations)?;
        self.state.register(sequence)?;
        Ok(instance)
    }

    fn destroy_address(&self, address: usize) -> InjectorResult<()> {
        self.state.ensure_running()?;
        let sequence = self.state.take_sequence(address).ok_or_else(|| {
            InjectorError::illegal_argument("实例不是根注入器开启的注入序列的根 Bean")
        })?;
        sequence.destroy()
    }

    fn aggregate_instances(&self, query: &AggregateQuery) -> InjectorResult<Vec<BeanInstance>> {
        self.state.ensure_running()?;
        let candidates = aggregation::candidates(None, &self.state.global_pool, true);
        aggregation::select(candidates, query)
    }

    fn name(&self) -> String {
        self.state.scope.to_string()
    }
}

impl std::fmt::Debug for RootInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootInjector")
            .field("scope", &self.state.scope.name)
            .field("sequences", &self.state.sequence_count())
            .field("shut_down", &self.state.is_shut_down())
            .finish()
    }
}
