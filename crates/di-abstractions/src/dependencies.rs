//! 构造器收到的已解析依赖

use crate::injector::Injector;
use crate::instance::BeanInstance;
use config_abstractions::convert;
use injection_common::{AggregateMarker, InjectionError, InjectorError, InjectorResult, TypeInfo};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 单个依赖槽的解析结果
#[derive(Clone)]
pub enum ResolvedValue {
    Bean(BeanInstance),
    Beans(Vec<BeanInstance>),
    Property(String),
    Injector(Arc<dyn Injector>),
    /// 显式模式下没有分配，或可选依赖缺失
    Unset,
}

impl fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedValue::Bean(instance) => f.debug_tuple("Bean").field(instance).finish(),
            ResolvedValue::Beans(instances) => f.debug_tuple("Beans").field(instances).finish(),
            ResolvedValue::Property(value) => f.debug_tuple("Property").field(value).finish(),
            ResolvedValue::Injector(injector) => {
                f.debug_tuple("Injector").field(&injector.name()).finish()
            }
            ResolvedValue::Unset => f.write_str("Unset"),
        }
    }
}

/// 已解析依赖集合
#[derive(Debug)]
pub struct Dependencies {
    type_info: TypeInfo,
    values: HashMap<String, ResolvedValue>,
}

impl Dependencies {
    pub fn new(type_info: TypeInfo) -> Self {
        Self {
            type_info,
            values: HashMap::new(),
        }
    }

    pub fn insert(&mut self, slot: impl Into<String>, value: ResolvedValue) {
        self.values.insert(slot.into(), value);
    }

    pub fn get(&self, slot: &str) -> Option<&ResolvedValue> {
        self.values.get(slot)
    }

    fn value(&self, slot: &str) -> InjectorResult<&ResolvedValue> {
        self.values.get(slot).ok_or_else(|| {
            InjectorError::from(InjectionError::UnknownSlot {
                slot: format!("{}.{}", self.type_info.short_name(), slot),
            })
        })
    }

    fn slot_mismatch<U: ?Sized>(&self, slot: &str) -> InjectorError {
        InjectionError::SlotTypeMismatch {
            slot: format!("{}.{}", self.type_info.short_name(), slot),
            expected: std::any::type_name::<U>().to_string(),
        }
        .into()
    }

    /// 必需的 Bean 依赖
    pub fn bean<U: ?Sized + 'static>(&self, slot: &str) -> InjectorResult<Arc<U>> {
        self.optional_bean::<U>(slot)?.ok_or_else(|| {
            InjectorError::from(InjectionError::UnsatisfiedDependency {
                type_name: self.type_info.full_name.to_string(),
                slot: slot.to_string(),
            })
        })
    }

    /// 可以保持未设置的 Bean 依赖
    pub fn optional_bean<U: ?Sized + 'static>(&self, slot: &str) -> InjectorResult<Option<Arc<U>>> {
        match self.value(slot)? {
            ResolvedValue::Bean(instance) => instance
                .cast::<U>()
                .map(Some)
                .ok_or_else(|| self.slot_mismatch::<U>(slot)),
            ResolvedValue::Unset => Ok(None),
            _ => Err(self.slot_mismatch::<U>(slot)),
        }
    }

    /// 原始属性字符串
    pub fn raw_property(&self, slot: &str) -> InjectorResult<String> {
        match self.value(slot)? {
            ResolvedValue::Property(value) => Ok(value.clone()),
            _ => Err(self.slot_mismatch::<String>(slot)),
        }
    }

    /// 转换为标量类型的属性
    pub fn property<T>(&self, slot: &str) -> InjectorResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.raw_property(slot)?;
        Ok(convert(&value)?)
    }

    /// 聚合结果，按限定符排序
    pub fn aggregate<U: ?Sized + 'static>(&self, slot: &str) -> InjectorResult<Vec<Arc<U>>> {
        match self.value(slot)? {
            ResolvedValue::Beans(instances) => instances
                .iter()
                .map(|instance| {
                    instance
                        .cast::<U>()
                        .ok_or_else(|| self.slot_mismatch::<U>(slot))
                })
                .collect(),
            ResolvedValue::Bean(instance) => instance
                .cast::<U>()
                .map(|bean| vec![bean])
                .ok_or_else(|| self.slot_mismatch::<U>(slot)),
            ResolvedValue::Unset => Ok(Vec::new()),
            _ => Err(self.slot_mismatch::<U>(slot)),
        }
    }

    /// 注入器句柄
    pub fn injector(&self, slot: &str) -> InjectorResult<Arc<dyn Injector>> {
        match self.value(slot)? {
            ResolvedValue::Injector(injector) => Ok(injector.clone()),
            _ => Err(self.slot_mismatch::<dyn Injector>(slot)),
        }
    }
}

/// 聚合谓词，参数为限定符与实例
pub type AggregatePredicate = Arc<dyn Fn(&str, &BeanInstance) -> bool + Send + Sync>;

/// 单例聚合查询
///
/// 在当前可见的单例池中筛选可赋值给元素类型、限定符匹配且满足所有谓词的实例。
#[derive(Clone)]
pub struct AggregateQuery {
    element: TypeInfo,
    marker: AggregateMarker,
    predicates: Vec<AggregatePredicate>,
}

impl AggregateQuery {
    /// 创建元素类型为 `U` 的查询
    pub fn of<U: ?Sized + 'static>(marker: AggregateMarker) -> Self {
        Self {
            element: TypeInfo::of::<U>(),
            marker,
            predicates: Vec::new(),
        }
    }

    /// 追加谓词
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &BeanInstance) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn element(&self) -> TypeInfo {
        self.element
    }

    pub fn marker(&self) -> &AggregateMarker {
        &self.marker
    }

    /// 是否满足所有谓词
    pub fn accepts(&self, qualifier: &str, instance: &BeanInstance) -> bool {
        instance.is_assignable_to(self.element.id)
            && self.predicates.iter().all(|p| p(qualifier, instance))
    }
}

impl fmt::Debug for AggregateQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateQuery")
            .field("element", &self.element.full_name)
            .field("marker", &self.marker)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bean_getters() {
        let mut dependencies = Dependencies::new(TypeInfo::of::<u8>());
        dependencies.insert("present", ResolvedValue::Bean(BeanInstance::plain(7u32)));
        dependencies.insert("missing", ResolvedValue::Unset);

        assert_eq!(*dependencies.bean::<u32>("present").unwrap(), 7);
        assert!(dependencies.optional_bean::<u32>("missing").unwrap().is_none());
        assert!(matches!(
            dependencies.bean::<u32>("missing"),
            Err(InjectorError::Injection {
                source: InjectionError::UnsatisfiedDependency { .. }
            })
        ));
        assert!(matches!(
            dependencies.bean::<String>("present"),
            Err(InjectorError::Injection {
                source: InjectionError::SlotTypeMismatch { .. }
            })
        ));
        assert!(matches!(
            dependencies.bean::<u32>("nothing"),
            Err(InjectorError::Injection {
                source: InjectionError::UnknownSlot { .. }
            })
        ));
    }

    #[test]
    fn test_property_conversion() {
        let mut dependencies = Dependencies::new(TypeInfo::of::<u8>());
        dependencies.insert("port", ResolvedValue::Property("8080".to_string()));
        dependencies.insert("flag", ResolvedValue::Property("maybe".to_string()));

        assert_eq!(dependencies.property::<u16>("port").unwrap(), 8080);
        assert!(matches!(
            dependencies.property::<bool>("flag"),
            Err(InjectorError::Conversion { .. })
        ));
    }

    #[test]
    fn test_query_predicates_use_and_semantics() {
        let query = AggregateQuery::of::<u32>(AggregateMarker::new())
            .filter(|qualifier, _| qualifier.starts_with('a'))
            .filter(|_, instance| instance.cast::<u32>().map_or(false, |v| *v > 1));

        assert!(query.accepts("alpha", &BeanInstance::plain(2u32)));
        assert!(!query.accepts("alpha", &BeanInstance::plain(1u32)));
        assert!(!query.accepts("beta", &BeanInstance::plain(2u32)));
        assert!(!query.accepts("alpha", &BeanInstance::plain("x")));
    }
}
