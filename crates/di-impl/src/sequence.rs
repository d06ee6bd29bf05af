//! 注入序列
//!
//! 每次实例化根 Bean 都开启一个注入序列。序列持有自己的单例池、映射上下文、
//! 属性覆盖层以及需要销毁的 Bean；通过注入器句柄开启的嵌套序列继承父序列的
//! 映射、属性与分配，查找单例时沿父序列链向上，新建的单例只进入自己的池。

use crate::aggregation;
use crate::engine::run_instance_phase;
use crate::mapping::MappingContext;
use crate::pool::SingletonPool;
use crate::state::RootState;
use config_impl::PropertyOverlay;
use di_abstractions::{
    AggregateQuery, AllocationSet, BeanDescriptor, BeanInstance, Injector, PhaseContext,
    Processor, SingletonAllocation, TypeAllocation,
};
use injection_common::{
    InjectionError, InjectorError, InjectorResult, Phase, PhaseState, Scope, ShutdownError,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// 由注入器管理生命周期的 Bean
pub(crate) struct ManagedBean {
    pub(crate) instance: BeanInstance,
    pub(crate) processors: Arc<Vec<Processor>>,
    pub(crate) state: PhaseState,
}

impl ManagedBean {
    /// 依次进入 `PRE_DESTROY` 与 `POST_DESTROY`
    fn destroy(&mut self) -> InjectorResult<()> {
        let info = self.instance.type_info();
        for phase in [Phase::PreDestroy, Phase::PostDestroy] {
            self.state.advance(info.full_name, phase)?;
            let context = PhaseContext::new(phase, info);
            run_instance_phase(&self.processors, phase, &self.instance, &context)?;
        }
        Ok(())
    }
}

/// 按创建的逆序销毁，单个 Bean 失败不影响其余 Bean，返回第一个错误
pub(crate) fn destroy_all(beans: &mut [ManagedBean]) -> InjectorResult<()> {
    let mut first_error = None;
    for bean in beans.iter_mut().rev() {
        if let Err(error) = bean.destroy() {
            warn!("销毁 {} 失败: {}", bean.instance.type_info().short_name(), error);
            if first_error.is_none() {
                first_error = Some(error);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// 注入序列
pub(crate) struct InjectionSequence {
    scope: Scope,
    parent: Option<Weak<InjectionSequence>>,
    allocations: AllocationSet,
    mapping: MappingContext,
    properties: PropertyOverlay,
    pool: SingletonPool,
    managed: Mutex<Vec<ManagedBean>>,
    children: Mutex<Vec<Arc<InjectionSequence>>>,
    root_bean: OnceCell<usize>,
    post_inject: Mutex<HashMap<ThreadId, usize>>,
    destroyed: AtomicBool,
}

impl InjectionSequence {
    pub(crate) fn new(
        root: &RootState,
        parent: Option<&Arc<InjectionSequence>>,
        allocations: AllocationSet,
    ) -> InjectorResult<Arc<Self>> {
        let local_properties = allocations
            .properties()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()));

        let (scope, mapping, properties) = match parent {
            Some(parent) => (
                parent.scope.child("nested"),
                parent.mapping.merge(allocations.mappings())?,
                parent.properties.with_values(local_properties),
            ),
            None => (
                root.scope.child("sequence"),
                root.mapping.merge(allocations.mappings())?,
                root.overlay.with_values(local_properties),
            ),
        };

        debug!("开启注入序列 {}", scope);
        Ok(Arc::new(Self {
            pool: SingletonPool::new(scope.name.clone()),
            scope,
            parent: parent.map(Arc::downgrade),
            allocations,
            mapping,
            properties,
            managed: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            root_bean: OnceCell::new(),
            post_inject: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn mapping(&self) -> &MappingContext {
        &self.mapping
    }

    pub(crate) fn properties(&self) -> &PropertyOverlay {
        &self.properties
    }

    pub(crate) fn pool(&self) -> &SingletonPool {
        &self.pool
    }

    fn parent(&self) -> Option<Arc<InjectionSequence>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// 从本序列开始沿父序列链查找
    fn find_in_lineage<T>(&self, find: impl Fn(&InjectionSequence) -> Option<T>) -> Option<T> {
        if let Some(found) = find(self) {
            return Some(found);
        }
        let mut parent = self.parent();
        while let Some(sequence) = parent {
            if let Some(found) = find(&sequence) {
                return Some(found);
            }
            parent = sequence.parent();
        }
        None
    }

    /// 单例分配，子序列的分配优先，最后查根注入器
    pub(crate) fn singleton_allocation(
        &self,
        root: &RootState,
        qualifier: &str,
    ) -> Option<SingletonAllocation> {
        self.find_in_lineage(|s| s.allocations.singleton(qualifier).cloned())
            .or_else(|| root.allocations.singleton(qualifier).cloned())
    }

    /// 类型分配，查找顺序同单例分配
    pub(crate) fn type_allocation(&self, root: &RootState, requested: TypeId) -> Option<TypeAllocation> {
        self.find_in_lineage(|s| s.allocations.type_allocation(requested).cloned())
            .or_else(|| root.allocations.type_allocation(requested).cloned())
    }

    /// 本序列及祖先序列中已创建的单例
    pub(crate) fn find_singleton(&self, qualifier: &str) -> Option<BeanInstance> {
        self.find_in_lineage(|s| s.pool.get(qualifier))
    }

    /// 可见的序列单例，近处的限定符遮蔽祖先的同名单例
    pub(crate) fn visible_singletons(&self) -> Vec<(String, BeanInstance)> {
        let mut seen = HashSet::new();
        let mut visible = Vec::new();
        let mut collect = |pool: &SingletonPool| {
            for (qualifier, instance) in pool.snapshot() {
                if seen.insert(qualifier.clone()) {
                    visible.push((qualifier, instance));
                }
            }
        };

        collect(&self.pool);
        let mut parent = self.parent();
        while let Some(sequence) = parent {
            collect(&sequence.pool);
            parent = sequence.parent();
        }
        visible
    }

    /// 进入 `POST_INJECT`，守卫释放时退出
    pub(crate) fn enter_post_inject(&self) -> PostInjectGuard<'_> {
        let thread = thread::current().id();
        *self.post_inject.lock().entry(thread).or_insert(0) += 1;
        PostInjectGuard {
            sequence: self,
            thread,
        }
    }

    /// 当前线程是否正处于本序列的 `POST_INJECT`
    pub(crate) fn in_post_inject(&self) -> bool {
        self.post_inject
            .lock()
            .get(&thread::current().id())
            .is_some_and(|depth| *depth > 0)
    }

    /// 接管注入成功的 Bean
    pub(crate) fn adopt(&self, beans: Vec<ManagedBean>) {
        self.managed.lock().extend(beans);
    }

    pub(crate) fn set_root(&self, address: usize) {
        let _ = self.root_bean.set(address);
    }

    pub(crate) fn root_address(&self) -> Option<usize> {
        self.root_bean.get().copied()
    }

    pub(crate) fn add_child(&self, child: Arc<InjectionSequence>) {
        self.children.lock().push(child);
    }

    fn take_child(&self, address: usize) -> Option<Arc<InjectionSequence>> {
        let mut children = self.children.lock();
        let index = children
            .iter()
            .position(|child| child.root_address() == Some(address))?;
        Some(children.remove(index))
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn managed_count(&self) -> usize {
        self.managed.lock().len()
    }

    /// 销毁序列：先销毁嵌套序列，再按创建逆序销毁本序列的 Bean
    ///
    /// 全局单例不属于任何序列，只在根注入器关闭时销毁。重复调用无效果。
    pub(crate) fn destroy(&self) -> InjectorResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().rev() {
            if let Err(error) = child.destroy() {
                first_error.get_or_insert(error);
            }
        }

        let mut managed = std::mem::take(&mut *self.managed.lock());
        if let Err(error) = destroy_all(&mut managed) {
            first_error.get_or_insert(error);
        }
        self.pool.clear();

        info!("销毁注入序列 {}: {} 个 Bean", self.scope, managed.len());
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for InjectionSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionSequence")
            .field("scope", &self.scope.name)
            .field("singletons", &self.pool.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// `POST_INJECT` 守卫
pub(crate) struct PostInjectGuard<'a> {
    sequence: &'a InjectionSequence,
    thread: ThreadId,
}

impl Drop for PostInjectGuard<'_> {
    fn drop(&mut self) {
        let mut depths = self.sequence.post_inject.lock();
        if let Some(depth) = depths.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                depths.remove(&self.thread);
            }
        }
    }
}

/// 绑定到注入序列的注入器句柄
///
/// 通过句柄实例化会开启嵌套序列，嵌套序列随父序列一起销毁。
/// 序列销毁或根注入器关闭后，句柄上的所有操作都返回 [`ShutdownError`]。
pub(crate) struct SequenceHandle {
    root: Weak<RootState>,
    sequence: Weak<InjectionSequence>,
    name: String,
}

impl SequenceHandle {
    pub(crate) fn new(root: &Arc<RootState>, sequence: &Arc<InjectionSequence>) -> Self {
        Self {
            root: Arc::downgrade(root),
            sequence: Arc::downgrade(sequence),
            name: sequence.scope.to_string(),
        }
    }

    fn upgrade(&self) -> InjectorResult<(Arc<RootState>, Arc<InjectionSequence>)> {
        let closed = || ShutdownError {
            target: self.name.clone(),
        };
        let root = self.root.upgrade().ok_or_else(closed)?;
        let sequence = self.sequence.upgrade().ok_or_else(closed)?;
        if sequence.is_destroyed() || root.is_shut_down() {
            return Err(closed().into());
        }
        Ok((root, sequence))
    }
}

impl Injector for SequenceHandle {
    fn instantiate_descriptor(
        &self,
        descriptor: BeanDescriptor,
        allocations: AllocationSet,
    ) -> InjectorResult<BeanInstance> {
        let (root, sequence) = self.upgrade()?;
        if sequence.in_post_inject() {
            return Err(InjectionError::IllegalReentrancy {
                sequence: sequence.scope.to_string(),
            }
            .into());
        }

        let (child, instance) = root.spawn(Some(&sequence), descriptor, allocations)?;
        sequence.add_child(child);
        Ok(instance)
    }

    fn destroy_address(&self, address: usize) -> InjectorResult<()> {
        let (_, sequence) = self.upgrade()?;
        let child = sequence.take_child(address).ok_or_else(|| {
            InjectorError::illegal_argument(format!("实例不是 {} 开启的注入序列的根 Bean", self.name))
        })?;
        child.destroy()
    }

    fn aggregate_instances(&self, query: &AggregateQuery) -> InjectorResult<Vec<BeanInstance>> {
        let (root, sequence) = self.upgrade()?;
        let candidates = aggregation::candidates(
            Some(&*sequence),
            &root.global_pool,
            query.marker().include_global,
        );
        aggregation::select(candidates, query)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
