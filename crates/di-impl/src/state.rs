//! 根注入器共享状态

use crate::descriptor_cache::DescriptorCache;
use crate::engine::Engine;
use crate::mapping::MappingContext;
use crate::pool::SingletonPool;
use crate::sequence::{destroy_all, InjectionSequence, ManagedBean};
use crate::settings::InjectorSettings;
use config_impl::{PropertyOverlay, PropertyStore};
use di_abstractions::{AllocationSet, BeanDescriptor, BeanInstance};
use injection_common::{
    InjectionError, InjectorResult, PluginMarker, Scope, ShutdownError, TypeInfo,
};
use parking_lot::{Condvar, Mutex};
use plugin_cache::PluginCache;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::info;

/// 由某个线程上的注入遍历创建、等待提交的全局单例
struct PendingGlobal {
    thread: ThreadId,
    /// 构造完成前为空
    instance: Option<BeanInstance>,
}

pub(crate) struct RootState {
    pub(crate) scope: Scope,
    pub(crate) settings: InjectorSettings,
    pub(crate) properties: Arc<PropertyStore>,
    /// 属性存储之上叠加根分配中的属性
    pub(crate) overlay: PropertyOverlay,
    pub(crate) allocations: AllocationSet,
    pub(crate) mapping: MappingContext,
    pub(crate) global_pool: SingletonPool,
    pub(crate) descriptors: DescriptorCache,
    pub(crate) plugins: Arc<PluginCache>,
    global_managed: Mutex<Vec<ManagedBean>>,
    /// 尚未提交的全局单例，只对创建它的线程可见
    pending_globals: Mutex<HashMap<String, PendingGlobal>>,
    /// 未提交的全局单例被提交或丢弃
    globals_settled: Condvar,
    sequences: Mutex<Vec<Arc<InjectionSequence>>>,
    shut_down: AtomicBool,
}

impl RootState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scope: Scope,
        settings: InjectorSettings,
        properties: Arc<PropertyStore>,
        allocations: AllocationSet,
        mapping: MappingContext,
        descriptors: DescriptorCache,
        plugins: Arc<PluginCache>,
    ) -> Self {
        let overlay = PropertyOverlay::new(properties.clone()).with_values(
            allocations
                .properties()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Self {
            global_pool: SingletonPool::new(scope.name.clone()),
            scope,
            settings,
            properties,
            overlay,
            allocations,
            mapping,
            descriptors,
            plugins,
            global_managed: Mutex::new(Vec::new()),
            pending_globals: Mutex::new(HashMap::new()),
            globals_settled: Condvar::new(),
            sequences: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> Result<(), ShutdownError> {
        if self.is_shut_down() {
            return Err(ShutdownError {
                target: self.scope.to_string(),
            });
        }
        Ok(())
    }

    /// 开启注入序列并创建根 Bean
    pub(crate) fn spawn(
        self: &Arc<Self>,
        parent: Option<&Arc<InjectionSequence>>,
        descriptor: BeanDescriptor,
        allocations: AllocationSet,
    ) -> InjectorResult<(Arc<InjectionSequence>, BeanInstance)> {
        self.ensure_running()?;
        let type_name = descriptor.type_info().short_name();
        let sequence = InjectionSequence::new(self, parent, allocations)?;
        let instance = Engine::new(self, &sequence).run(descriptor)?;
        sequence.set_root(instance.address());

        info!(
            "注入序列 {} 完成: {} ({} 个受管 Bean)",
            sequence.scope(),
            type_name,
            sequence.managed_count()
        );
        Ok((sequence, instance))
    }

    /// 登记根注入器直接开启的序列
    pub(crate) fn register(&self, sequence: Arc<InjectionSequence>) -> InjectorResult<()> {
        self.sequences.lock().push(sequence.clone());

        // 与关闭并发时，关闭可能已经错过了这个序列
        if self.is_shut_down() {
            self.sequences.lock().retain(|s| !Arc::ptr_eq(s, &sequence));
            sequence.destroy()?;
            self.ensure_running()?;
        }
        Ok(())
    }

    /// 取出根 Bean 地址对应的序列
    pub(crate) fn take_sequence(&self, address: usize) -> Option<Arc<InjectionSequence>> {
        let mut sequences = self.sequences.lock();
        let index = sequences
            .iter()
            .position(|s| s.root_address() == Some(address))?;
        Some(sequences.remove(index))
    }

    pub(crate) fn sequence_count(&self) -> usize {
        self.sequences.lock().len()
    }

    /// 查找全局单例
    ///
    /// 其他线程创建中的单例要等到其注入遍历提交或回滚；当前线程创建的单例在提交前即可见。
    pub(crate) fn global(&self, qualifier: &str) -> Option<BeanInstance> {
        let thread = thread::current().id();
        let mut pending = self.pending_globals.lock();
        loop {
            if let Some(instance) = self.global_pool.get(qualifier) {
                return Some(instance);
            }
            let state = pending
                .get(qualifier)
                .map(|entry| (entry.thread == thread, entry.instance.clone()));
            match state {
                None => return None,
                Some((true, instance)) => return instance,
                Some((false, _)) => self.globals_settled.wait(&mut pending),
            }
        }
    }

    /// 创建全局单例
    ///
    /// 新建的单例进入待提交状态，由 [`publish_globals`](Self::publish_globals) 放入全局池。
    /// 同一线程上嵌套的注入序列可能再次请求正在创建的全局单例，直接报告循环依赖。
    pub(crate) fn create_global<F>(&self, qualifier: &str, create: F) -> InjectorResult<(BeanInstance, bool)>
    where
        F: FnOnce() -> InjectorResult<BeanInstance>,
    {
        let thread = thread::current().id();
        {
            let mut pending = self.pending_globals.lock();
            loop {
                if let Some(instance) = self.global_pool.get(qualifier) {
                    return Ok((instance, false));
                }
                let state = pending
                    .get(qualifier)
                    .map(|entry| (entry.thread == thread, entry.instance.clone()));
                match state {
                    None => break,
                    Some((true, Some(instance))) => return Ok((instance, false)),
                    Some((true, None)) => {
                        return Err(InjectionError::CircularDependency {
                            dependency_chain: format!("{} -> {}", qualifier, qualifier),
                        }
                        .into())
                    }
                    Some((false, _)) => self.globals_settled.wait(&mut pending),
                }
            }
            pending.insert(
                qualifier.to_string(),
                PendingGlobal {
                    thread,
                    instance: None,
                },
            );
        }

        let result = create();

        let mut pending = self.pending_globals.lock();
        match result {
            Ok(instance) => {
                if let Some(entry) = pending.get_mut(qualifier) {
                    entry.instance = Some(instance.clone());
                }
                Ok((instance, true))
            }
            Err(error) => {
                pending.remove(qualifier);
                self.globals_settled.notify_all();
                Err(error)
            }
        }
    }

    /// 提交注入遍历新建的全局单例
    pub(crate) fn publish_globals(&self, qualifiers: &[String]) {
        if qualifiers.is_empty() {
            return;
        }
        let mut pending = self.pending_globals.lock();
        for qualifier in qualifiers {
            if let Some(PendingGlobal {
                instance: Some(instance),
                ..
            }) = pending.remove(qualifier)
            {
                self.global_pool.insert(qualifier, instance);
            }
        }
        self.globals_settled.notify_all();
    }

    /// 丢弃回滚的注入遍历新建的全局单例
    pub(crate) fn discard_globals(&self, qualifiers: &[String]) {
        if qualifiers.is_empty() {
            return;
        }
        let mut pending = self.pending_globals.lock();
        for qualifier in qualifiers {
            pending.remove(qualifier);
        }
        self.globals_settled.notify_all();
    }

    pub(crate) fn adopt_global(&self, beans: Vec<ManagedBean>) {
        if !beans.is_empty() {
            self.global_managed.lock().extend(beans);
        }
    }

    pub(crate) fn global_managed_count(&self) -> usize {
        self.global_managed.lock().len()
    }

    /// 解析插件实现，相对目录基于配置的插件根目录
    pub(crate) fn retrieve_plugin(
        &self,
        marker: &PluginMarker,
        interface: TypeInfo,
    ) -> InjectorResult<BeanDescriptor> {
        let mut marker = marker.clone();
        marker.directory = self.settings.plugin_directory(&marker.directory);
        Ok(self.plugins.retrieve(&marker, interface)?)
    }

    /// 关闭：按开启的逆序销毁所有序列，然后销毁全局单例
    pub(crate) fn shutdown(&self) -> InjectorResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        let sequences = std::mem::take(&mut *self.sequences.lock());
        for sequence in sequences.iter().rev() {
            if let Err(error) = sequence.destroy() {
                first_error.get_or_insert(error);
            }
        }

        let mut globals = std::mem::take(&mut *self.global_managed.lock());
        if let Err(error) = destroy_all(&mut globals) {
            first_error.get_or_insert(error);
        }
        self.global_pool.clear();

        info!(
            "根注入器 {} 已关闭: {} 个序列, {} 个全局 Bean",
            self.scope,
            sequences.len(),
            globals.len()
        );
        first_error.map_or(Ok(()), Err)
    }
}
