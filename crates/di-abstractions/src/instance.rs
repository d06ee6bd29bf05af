//! Bean 实例与类型视图

use injection_common::TypeInfo;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 类型擦除后的实例
pub type AnyArc = Arc<dyn Any + Send + Sync>;

type CastFn = Arc<dyn Fn(AnyArc) -> Option<Box<dyn Any>> + Send + Sync>;

/// 类型视图表
///
/// 记录一个具体类型可以被视为哪些类型（自身及其实现的 trait 对象），
/// 每个视图产生 `Box<Arc<U>>`。可赋值性即视图是否存在。
#[derive(Clone, Default)]
pub struct CastTable {
    casts: HashMap<TypeId, (TypeInfo, CastFn)>,
}

impl CastTable {
    /// 只包含自身视图的表
    pub fn of<T: Send + Sync + 'static>() -> Self {
        let mut table = Self::default();
        table.insert_view::<T, T>(|value| value);
        table
    }

    /// 添加一个视图
    pub fn insert_view<T, U>(&mut self, view: fn(Arc<T>) -> Arc<U>)
    where
        T: Send + Sync + 'static,
        U: ?Sized + 'static,
    {
        let cast: CastFn = Arc::new(move |value: AnyArc| {
            value
                .downcast::<T>()
                .ok()
                .map(|typed| Box::new(view(typed)) as Box<dyn Any>)
        });
        self.casts.insert(TypeId::of::<U>(), (TypeInfo::of::<U>(), cast));
    }

    /// 是否可以视为指定类型
    pub fn supports(&self, type_id: TypeId) -> bool {
        self.casts.contains_key(&type_id)
    }

    /// 所有可用视图
    pub fn views(&self) -> impl Iterator<Item = &TypeInfo> {
        self.casts.values().map(|(info, _)| info)
    }

    fn cast<U: ?Sized + 'static>(&self, value: AnyArc) -> Option<Arc<U>> {
        let (_, cast) = self.casts.get(&TypeId::of::<U>())?;
        cast(value)?.downcast::<Arc<U>>().ok().map(|boxed| *boxed)
    }
}

impl fmt::Debug for CastTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.views().map(|info| info.full_name))
            .finish()
    }
}

/// 由注入器管理的实例
///
/// 克隆只复制引用；两个克隆指向同一对象。
#[derive(Clone)]
pub struct BeanInstance {
    value: AnyArc,
    type_info: TypeInfo,
    casts: Arc<CastTable>,
}

impl BeanInstance {
    /// 包装实例
    pub fn new<T: Send + Sync + 'static>(value: Arc<T>, casts: Arc<CastTable>) -> Self {
        Self {
            value,
            type_info: TypeInfo::of::<T>(),
            casts,
        }
    }

    /// 包装只有自身视图的实例
    pub fn plain<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(Arc::new(value), Arc::new(CastTable::of::<T>()))
    }

    pub(crate) fn from_erased(value: AnyArc, type_info: TypeInfo, casts: Arc<CastTable>) -> Self {
        Self {
            value,
            type_info,
            casts,
        }
    }

    /// 运行时类型
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// 视为指定类型，不可赋值时返回 `None`
    pub fn cast<U: ?Sized + 'static>(&self) -> Option<Arc<U>> {
        self.casts.cast::<U>(self.value.clone())
    }

    /// 是否可赋值给指定类型
    pub fn is_assignable_to(&self, target: TypeId) -> bool {
        self.casts.supports(target)
    }

    /// 实例地址，用于按引用查找
    pub fn address(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }

    /// 是否与另一实例为同一对象
    pub fn same_instance(&self, other: &BeanInstance) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for BeanInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanInstance")
            .field("type", &self.type_info.full_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

/// 任意引用的实例地址
pub fn address_of<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixture(String);

    impl Named for Fixture {
        fn name(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn test_cast_to_self_and_trait() {
        let mut table = CastTable::of::<Fixture>();
        table.insert_view::<Fixture, dyn Named>(|value| value);
        let instance = BeanInstance::new(Arc::new(Fixture("a".into())), Arc::new(table));

        assert_eq!(instance.cast::<Fixture>().unwrap().0, "a");
        assert_eq!(instance.cast::<dyn Named>().unwrap().name(), "a");
        assert!(instance.cast::<String>().is_none());
    }

    #[test]
    fn test_same_instance_across_views() {
        let mut table = CastTable::of::<Fixture>();
        table.insert_view::<Fixture, dyn Named>(|value| value);
        let instance = BeanInstance::new(Arc::new(Fixture("a".into())), Arc::new(table));

        let named = instance.cast::<dyn Named>().unwrap();
        assert_eq!(address_of(&named), instance.address());
        assert!(instance.same_instance(&instance.clone()));
        assert!(!instance.same_instance(&BeanInstance::plain(Fixture("a".into()))));
    }
}
