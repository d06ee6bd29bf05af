//! 注入器接口

use crate::allocation::{AllocationSet, IntoAllocations};
use crate::blueprint::Blueprint;
use crate::dependencies::AggregateQuery;
use crate::descriptor::{Bean, BeanDescriptor};
use crate::instance::{address_of, BeanInstance};
use injection_common::{AggregateMarker, InjectionError, InjectorError, InjectorResult};
use std::sync::Arc;

/// 注入器
///
/// 根注入器与注入序列句柄都实现此接口。每次实例化都开启一个新的注入序列，
/// 销毁根 Bean 时整个序列随之销毁。
pub trait Injector: Send + Sync {
    /// 以描述符为根开启注入序列
    fn instantiate_descriptor(
        &self,
        descriptor: BeanDescriptor,
        allocations: AllocationSet,
    ) -> InjectorResult<BeanInstance>;

    /// 按实例地址销毁由本注入器开启的注入序列
    fn destroy_address(&self, address: usize) -> InjectorResult<()>;

    /// 聚合当前可见的单例
    fn aggregate_instances(&self, query: &AggregateQuery) -> InjectorResult<Vec<BeanInstance>>;

    /// 注入器名称，用于日志与错误信息
    fn name(&self) -> String;
}

impl dyn Injector + '_ {
    /// 实例化类型 `T`
    pub fn instantiate<T: Bean>(&self) -> InjectorResult<Arc<T>> {
        self.instantiate_with::<T, ()>(())
    }

    /// 使用附加分配实例化类型 `T`
    pub fn instantiate_with<T: Bean, A: IntoAllocations>(&self, allocations: A) -> InjectorResult<Arc<T>> {
        let allocations = AllocationSet::assemble(allocations)?;
        let instance = self.instantiate_descriptor(BeanDescriptor::of::<T>(), allocations)?;
        downcast::<T>(instance)
    }

    /// 使用蓝图实例化类型 `T`
    pub fn instantiate_from<T: Bean>(&self, blueprints: &[&Blueprint]) -> InjectorResult<Arc<T>> {
        let allocations = Blueprint::merge(blueprints)?;
        let instance = self.instantiate_descriptor(BeanDescriptor::of::<T>(), allocations)?;
        downcast::<T>(instance)
    }

    /// 销毁根 Bean 及其注入序列
    pub fn destroy<T: ?Sized>(&self, bean: &Arc<T>) -> InjectorResult<()> {
        self.destroy_address(address_of(bean))
    }

    /// 聚合可视为 `U` 的单例
    pub fn aggregate<U: ?Sized + 'static>(&self, marker: AggregateMarker) -> InjectorResult<Vec<Arc<U>>> {
        self.aggregate_instances(&AggregateQuery::of::<U>(marker))?
            .into_iter()
            .map(downcast::<U>)
            .collect()
    }
}

/// 将实例视为 `U`
pub fn downcast<U: ?Sized + 'static>(instance: BeanInstance) -> InjectorResult<Arc<U>> {
    instance.cast::<U>().ok_or_else(|| {
        InjectorError::from(InjectionError::TypeMismatch {
            qualifier: String::new(),
            expected: std::any::type_name::<U>().to_string(),
            actual: instance.type_info().full_name.to_string(),
        })
    })
}
