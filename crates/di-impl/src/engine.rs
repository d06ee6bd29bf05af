//! 注入引擎
//!
//! 一次遍历创建根 Bean 及其全部依赖。每个 Bean 依次经过：
//!
//! 1. `PRE_CONSTRUCT`：只在类型声明了该阶段处理器时进入，提供属性解析与注入决策
//! 2. 解析依赖槽并调用构造器
//! 3. `POST_INJECT`：提供属性解析与即时注入，本序列的注入器句柄在此期间不可重入
//!
//! 根 Bean 完成后，本次遍历创建的所有 Bean 按创建顺序进入 `POST_CONSTRUCT`。
//! 任何一步失败都会回滚：本次遍历新建的单例从池中移除，已创建的实例被丢弃，
//! 不执行销毁阶段。新建的全局单例在遍历提交前只对当前线程可见，其他线程等待提交或回滚。

use crate::aggregation;
use crate::descriptor_cache::{declares, CompiledDescriptor};
use crate::sequence::{InjectionSequence, ManagedBean, SequenceHandle};
use crate::state::RootState;
use config_abstractions::PropertyResolver;
use di_abstractions::{
    BeanAllocation, BeanDescriptor, BeanInstance, Dependencies, Dependency, DependencyKind,
    DecisionKind, DescriptorFactory, InjectionCallback, InjectionDecision, PhaseContext,
    Processor, ResolvedValue,
};
use injection_common::{
    AggregateMode, InjectionError, InjectionMode, InjectorError, InjectorResult, Phase,
    PhaseState, PluginError, ProcessorError, SingletonScope, TypeInfo,
};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 本次遍历中创建的 Bean
struct Created {
    bean: ManagedBean,
    owner: SingletonScope,
}

#[derive(Default)]
struct Walk {
    /// 正在构造的类型，单例带限定符
    stack: Vec<(TypeInfo, Option<String>)>,
    /// 正在创建的单例
    in_flight: Vec<(SingletonScope, String)>,
    /// 新建 Bean 的归属：序列或全局
    owners: Vec<SingletonScope>,
    created: Vec<Created>,
    /// 本次遍历新建的单例，回滚时移除
    singletons: Vec<(SingletonScope, String)>,
}

/// 注入引擎，每次遍历一个实例
pub(crate) struct Engine<'a> {
    root: &'a Arc<RootState>,
    sequence: &'a Arc<InjectionSequence>,
    walk: RefCell<Walk>,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(root: &'a Arc<RootState>, sequence: &'a Arc<InjectionSequence>) -> Self {
        Self {
            root,
            sequence,
            walk: RefCell::new(Walk::default()),
        }
    }

    /// 创建根 Bean，成功时把新建的 Bean 交给序列和根注入器管理
    pub(crate) fn run(&self, descriptor: BeanDescriptor) -> InjectorResult<BeanInstance> {
        let result = self
            .create(descriptor, &[], None)
            .and_then(|instance| self.post_construct().map(|_| instance));

        match result {
            Ok(instance) => {
                self.commit();
                Ok(instance)
            }
            Err(error) => {
                self.rollback(&error);
                Err(error)
            }
        }
    }

    fn create(
        &self,
        descriptor: BeanDescriptor,
        extra: &[Processor],
        qualifier: Option<&str>,
    ) -> InjectorResult<BeanInstance> {
        let info = descriptor.type_info();
        if descriptor.origin().is_some() && descriptor.has_plugin_dependencies() {
            return Err(PluginError::NestedPlugin {
                type_name: info.full_name.to_string(),
            }
            .into());
        }
        let compiled = self.root.descriptors.compile(descriptor)?;

        {
            let mut walk = self.walk.borrow_mut();
            if let Some(start) = walk
                .stack
                .iter()
                .position(|(t, q)| t.id == info.id && q.as_deref() == qualifier)
            {
                let chain: Vec<&str> = walk.stack[start..]
                    .iter()
                    .map(|(t, _)| t.short_name())
                    .chain(std::iter::once(info.short_name()))
                    .collect();
                return Err(InjectionError::CircularDependency {
                    dependency_chain: chain.join(" -> "),
                }
                .into());
            }
            walk.stack.push((info, qualifier.map(str::to_string)));
        }

        let result = self.build(&compiled, extra);
        self.walk.borrow_mut().stack.pop();
        result
    }

    fn build(&self, compiled: &CompiledDescriptor, extra: &[Processor]) -> InjectorResult<BeanInstance> {
        let descriptor = compiled.descriptor();
        let info = compiled.type_info();
        let processors = compiled.processors_with(extra);
        let resolver: &dyn PropertyResolver = self.sequence.properties();
        let mut state = PhaseState::new();

        if declares(&processors, Phase::PreConstruct) {
            state.advance(info.full_name, Phase::PreConstruct)?;
            let decisions = self.decisions(descriptor);
            let context = PhaseContext::new(Phase::PreConstruct, info)
                .with_resolver(resolver)
                .with_decisions(&decisions);
            run_type_phase(&processors, &context)?;
        }

        let mut dependencies = Dependencies::new(info);
        for dependency in descriptor.dependencies() {
            let value = self.resolve(descriptor, dependency)?;
            trace!("{}.{} = {:?}", info.short_name(), dependency.slot, value);
            dependencies.insert(dependency.slot.clone(), value);
        }

        let instance = descriptor.construct(&dependencies)?;
        state.advance(info.full_name, Phase::PostInject)?;

        {
            let mut walk = self.walk.borrow_mut();
            let owner = walk.owners.last().copied().unwrap_or(SingletonScope::Sequence);
            walk.created.push(Created {
                bean: ManagedBean {
                    instance: instance.clone(),
                    processors: processors.clone(),
                    state,
                },
                owner,
            });
        }

        if declares(&processors, Phase::PostInject) {
            let _guard = self.sequence.enter_post_inject();
            let callback = Callback { engine: self };
            let context = PhaseContext::new(Phase::PostInject, info)
                .with_resolver(resolver)
                .with_injection(&callback);
            run_instance_phase(&processors, Phase::PostInject, &instance, &context)?;
        }

        debug!("创建 {} ({})", info.short_name(), self.sequence.scope().name);
        Ok(instance)
    }

    fn resolve(&self, owner: &BeanDescriptor, dependency: &Dependency) -> InjectorResult<ResolvedValue> {
        match &dependency.kind {
            DependencyKind::Bean {
                target,
                default,
                marker,
            } => {
                if !marker.singleton {
                    return self.independent(*target, *default).map(ResolvedValue::Bean);
                }

                let mode = marker.mode.unwrap_or(self.root.settings.default_mode);
                let qualifier = self.qualifier_for(&marker.qualifier, *target);
                match self.singleton(&qualifier, *target, marker.scope, mode, *default)? {
                    Some(instance) => Ok(ResolvedValue::Bean(instance)),
                    None if marker.optional || mode == InjectionMode::Explicit => {
                        Ok(ResolvedValue::Unset)
                    }
                    None => Err(InjectionError::MissingBinding {
                        type_name: format!("{} ('{}')", target.full_name, qualifier),
                    }
                    .into()),
                }
            }
            DependencyKind::Property(marker) => {
                let value = self.sequence.properties().resolve_marker(marker)?;
                Ok(ResolvedValue::Property(value))
            }
            DependencyKind::Plugin { interface, marker } => {
                if owner.origin().is_some() {
                    return Err(PluginError::NestedPlugin {
                        type_name: owner.type_info().full_name.to_string(),
                    }
                    .into());
                }
                let descriptor = self.root.retrieve_plugin(marker, *interface)?;
                self.create(descriptor, &[], None).map(ResolvedValue::Bean)
            }
            DependencyKind::Aggregate(query) => {
                let candidates = aggregation::candidates(
                    Some(&**self.sequence),
                    &self.root.global_pool,
                    query.marker().include_global,
                );
                let mut found = aggregation::select(candidates, query)?;
                Ok(match query.marker().mode {
                    AggregateMode::All => ResolvedValue::Beans(found),
                    AggregateMode::Single { .. } => {
                        found.pop().map_or(ResolvedValue::Unset, ResolvedValue::Bean)
                    }
                })
            }
            DependencyKind::Injector => Ok(ResolvedValue::Injector(Arc::new(SequenceHandle::new(
                self.root,
                self.sequence,
            )))),
        }
    }

    /// 限定符为空时使用请求类型的名称，再经过映射
    fn qualifier_for(&self, declared: &str, target: TypeInfo) -> String {
        let requested = if declared.is_empty() {
            target.full_name
        } else {
            declared
        };
        self.sequence.mapping().resolve(requested)
    }

    fn independent(
        &self,
        target: TypeInfo,
        default: Option<DescriptorFactory>,
    ) -> InjectorResult<BeanInstance> {
        if let Some(binding) = self.sequence.type_allocation(self.root, target.id) {
            if is_context_sensitive(&binding.allocation) {
                return Err(context_sensitive(target, "不能作为独立依赖注入"));
            }
            return self.materialize(&binding.allocation, None);
        }

        match default {
            Some(factory) => self.create(factory(), &[], None),
            None => Err(InjectionError::MissingBinding {
                type_name: target.full_name.to_string(),
            }
            .into()),
        }
    }

    /// 查找或创建单例
    ///
    /// 查找顺序：本序列及祖先序列的池，声明为全局时再查全局池；然后是显式分配；
    /// 即时模式下最后按类型分配或声明类型构造。返回 `None` 表示没有任何来源。
    fn singleton(
        &self,
        qualifier: &str,
        target: TypeInfo,
        scope: SingletonScope,
        mode: InjectionMode,
        default: Option<DescriptorFactory>,
    ) -> InjectorResult<Option<BeanInstance>> {
        let existing = self.sequence.find_singleton(qualifier).or_else(|| {
            (scope == SingletonScope::Global)
                .then(|| self.root.global(qualifier))
                .flatten()
        });
        if let Some(instance) = existing {
            return checked(qualifier, target, instance).map(Some);
        }

        let (tier, allocation) = match self.sequence.singleton_allocation(self.root, qualifier) {
            Some(allocation) => (allocation.scope, allocation.allocation),
            None => {
                if mode == InjectionMode::Explicit {
                    return Ok(None);
                }
                let allocation = match self.sequence.type_allocation(self.root, target.id) {
                    Some(binding) => binding.allocation,
                    None => match default {
                        Some(factory) => BeanAllocation::descriptor(factory()),
                        None => return Ok(None),
                    },
                };
                if is_context_sensitive(&allocation) {
                    return Err(context_sensitive(
                        target,
                        &format!("单例 '{}' 没有显式分配，不能即时构造", qualifier),
                    ));
                }
                (scope, allocation)
            }
        };

        let instance = self.store(tier, qualifier, || self.materialize(&allocation, Some(qualifier)))?;
        checked(qualifier, target, instance).map(Some)
    }

    fn store<F>(&self, tier: SingletonScope, qualifier: &str, create: F) -> InjectorResult<BeanInstance>
    where
        F: FnOnce() -> InjectorResult<BeanInstance>,
    {
        {
            let mut walk = self.walk.borrow_mut();
            if let Some(start) = walk
                .in_flight
                .iter()
                .position(|(t, q)| *t == tier && q == qualifier)
            {
                let chain: Vec<&str> = walk.in_flight[start..]
                    .iter()
                    .map(|(_, q)| q.as_str())
                    .chain(std::iter::once(qualifier))
                    .collect();
                return Err(InjectionError::CircularDependency {
                    dependency_chain: chain.join(" -> "),
                }
                .into());
            }
            walk.in_flight.push((tier, qualifier.to_string()));
            walk.owners.push(tier);
        }

        let result = match tier {
            SingletonScope::Sequence => self.sequence.pool().get_or_try_init(qualifier, create),
            SingletonScope::Global => self.root.create_global(qualifier, create),
        };

        let mut walk = self.walk.borrow_mut();
        walk.in_flight.pop();
        walk.owners.pop();

        let (instance, created) = result?;
        if created {
            walk.singletons.push((tier, qualifier.to_string()));
            debug!("创建单例 '{}' ({:?})", qualifier, tier);
        }
        Ok(instance)
    }

    fn materialize(&self, allocation: &BeanAllocation, qualifier: Option<&str>) -> InjectorResult<BeanInstance> {
        match allocation {
            BeanAllocation::ToInstance(instance) => Ok(instance.clone()),
            BeanAllocation::ToType {
                descriptor,
                processors,
            } => self.create(descriptor.clone(), processors, qualifier),
            BeanAllocation::ToProvider(provider) => provider.provide(),
            BeanAllocation::ToPlugin { marker, interface } => {
                let descriptor = self.root.retrieve_plugin(marker, *interface)?;
                self.create(descriptor, &[], qualifier)
            }
        }
    }

    fn decisions(&self, descriptor: &BeanDescriptor) -> Vec<InjectionDecision> {
        descriptor
            .dependencies()
            .iter()
            .map(|dependency| {
                let kind = match &dependency.kind {
                    DependencyKind::Bean { target, marker, .. } if marker.singleton => {
                        DecisionKind::Singleton {
                            qualifier: self.qualifier_for(&marker.qualifier, *target),
                            scope: marker.scope,
                            target: *target,
                        }
                    }
                    DependencyKind::Bean { target, .. } => {
                        DecisionKind::Independent { target: *target }
                    }
                    DependencyKind::Property(marker) => DecisionKind::Property {
                        expression: marker.expression(),
                    },
                    DependencyKind::Plugin { interface, marker } => DecisionKind::Plugin {
                        name: marker.name.clone(),
                        interface: *interface,
                    },
                    DependencyKind::Aggregate(query) => DecisionKind::Aggregate {
                        element: query.element(),
                    },
                    DependencyKind::Injector => DecisionKind::Injector,
                };
                InjectionDecision {
                    slot: dependency.slot.clone(),
                    kind,
                }
            })
            .collect()
    }

    fn post_construct(&self) -> InjectorResult<()> {
        let pending: Vec<(BeanInstance, Arc<Vec<Processor>>)> = self
            .walk
            .borrow()
            .created
            .iter()
            .map(|c| (c.bean.instance.clone(), c.bean.processors.clone()))
            .collect();
        let resolver: &dyn PropertyResolver = self.sequence.properties();

        for (index, (instance, processors)) in pending.iter().enumerate() {
            let info = instance.type_info();
            self.walk.borrow_mut().created[index]
                .bean
                .state
                .advance(info.full_name, Phase::PostConstruct)?;

            if declares(processors, Phase::PostConstruct) {
                let context = PhaseContext::new(Phase::PostConstruct, info).with_resolver(resolver);
                run_instance_phase(processors, Phase::PostConstruct, instance, &context)?;
            }
        }
        Ok(())
    }

    fn commit(&self) {
        let walk = self.walk.take();
        let globals = global_qualifiers(&walk.singletons);
        let mut local = Vec::new();
        let mut global = Vec::new();
        for created in walk.created {
            match created.owner {
                SingletonScope::Sequence => local.push(created.bean),
                SingletonScope::Global => global.push(created.bean),
            }
        }
        self.sequence.adopt(local);
        self.root.adopt_global(global);
        self.root.publish_globals(&globals);
    }

    fn rollback(&self, error: &InjectorError) {
        let walk = self.walk.take();
        for (tier, qualifier) in walk.singletons.iter().rev() {
            if *tier == SingletonScope::Sequence {
                self.sequence.pool().remove(qualifier);
            }
        }
        self.root.discard_globals(&global_qualifiers(&walk.singletons));

        // 遍历期间通过句柄开启的嵌套序列已经完成，随本序列一起销毁
        if let Err(destroy_error) = self.sequence.destroy() {
            warn!("回滚时销毁嵌套序列失败: {}", destroy_error);
        }

        warn!(
            "注入序列 {} 回滚: 丢弃 {} 个实例, {} 个单例, 原因: {}",
            self.sequence.scope(),
            walk.created.len(),
            walk.singletons.len(),
            error
        );
    }
}

/// `POST_INJECT` 阶段的即时注入
struct Callback<'e, 'a> {
    engine: &'e Engine<'a>,
}

impl InjectionCallback for Callback<'_, '_> {
    fn inject_descriptor(&self, descriptor: BeanDescriptor) -> InjectorResult<BeanInstance> {
        if descriptor.is_context_sensitive() {
            return Err(context_sensitive(
                descriptor.type_info(),
                "不能即时注入为独立实例",
            ));
        }
        self.engine.create(descriptor, &[], None)
    }

    fn inject_singleton(
        &self,
        qualifier: &str,
        target: TypeInfo,
        scope: SingletonScope,
    ) -> InjectorResult<Option<BeanInstance>> {
        let qualifier = self.engine.qualifier_for(qualifier, target);
        self.engine
            .singleton(&qualifier, target, scope, InjectionMode::Explicit, None)
    }
}

/// 执行 `PRE_CONSTRUCT` 处理器
pub(crate) fn run_type_phase(processors: &[Processor], context: &PhaseContext<'_>) -> InjectorResult<()> {
    for processor in processors {
        if let Processor::Type(action) = processor {
            action(context).map_err(|source| ProcessorError {
                type_name: context.type_info().full_name.to_string(),
                phase: Phase::PreConstruct,
                source,
            })?;
        }
    }
    Ok(())
}

/// 执行实例级处理器
pub(crate) fn run_instance_phase(
    processors: &[Processor],
    phase: Phase,
    instance: &BeanInstance,
    context: &PhaseContext<'_>,
) -> InjectorResult<()> {
    for processor in processors {
        if let Processor::Instance { phase: p, action } = processor {
            if *p == phase {
                action(instance, context).map_err(|source| ProcessorError {
                    type_name: instance.type_info().full_name.to_string(),
                    phase,
                    source,
                })?;
            }
        }
    }
    Ok(())
}

fn global_qualifiers(singletons: &[(SingletonScope, String)]) -> Vec<String> {
    singletons
        .iter()
        .filter(|(tier, _)| *tier == SingletonScope::Global)
        .map(|(_, qualifier)| qualifier.clone())
        .collect()
}

fn is_context_sensitive(allocation: &BeanAllocation) -> bool {
    matches!(allocation, BeanAllocation::ToType { descriptor, .. } if descriptor.is_context_sensitive())
}

fn context_sensitive(target: TypeInfo, message: &str) -> InjectorError {
    InjectionError::ContextSensitive {
        type_name: target.full_name.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn checked(qualifier: &str, target: TypeInfo, instance: BeanInstance) -> InjectorResult<BeanInstance> {
    if instance.is_assignable_to(target.id) {
        return Ok(instance);
    }
    Err(InjectionError::TypeMismatch {
        qualifier: qualifier.to_string(),
        expected: target.full_name.to_string(),
        actual: instance.type_info().full_name.to_string(),
    }
    .into())
}
