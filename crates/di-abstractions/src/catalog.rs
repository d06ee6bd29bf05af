//! 类型目录
//!
//! 插件中出现的类型名称通过目录解析。宿主区域对所有加载单元可见；
//! 类型包中的类型只能通过声明了该类型包的加载单元解析，宿主查找看不到它们。

use crate::descriptor::{Bean, BeanDescriptor, DescriptorFactory};
use injection_common::{PluginError, PluginResult, TypeInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// 目录条目
#[derive(Clone, Copy)]
pub enum CatalogEntry {
    /// 服务接口
    Interface(TypeInfo),
    /// 可构造的实现类型
    Bean(DescriptorFactory),
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogEntry::Interface(info) => f.debug_tuple("Interface").field(&info.full_name).finish(),
            CatalogEntry::Bean(_) => f.write_str("Bean"),
        }
    }
}

#[derive(Debug, Default)]
struct BundleState {
    types: HashMap<String, CatalogEntry>,
    leases: usize,
}

/// 类型目录
#[derive(Debug, Default)]
pub struct TypeCatalog {
    host: RwLock<HashMap<String, CatalogEntry>>,
    bundles: RwLock<HashMap<String, BundleState>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在宿主区域注册服务接口
    pub fn register_interface<U: ?Sized + 'static>(&self, name: impl Into<String>) -> &Self {
        self.host
            .write()
            .insert(name.into(), CatalogEntry::Interface(TypeInfo::of::<U>()));
        self
    }

    /// 在宿主区域注册实现类型
    pub fn register<T: Bean>(&self, name: impl Into<String>) -> &Self {
        self.host
            .write()
            .insert(name.into(), CatalogEntry::Bean(BeanDescriptor::of::<T> as DescriptorFactory));
        self
    }

    /// 在类型包中注册实现类型
    pub fn register_in_bundle<T: Bean>(&self, bundle: &str, name: impl Into<String>) -> &Self {
        let name = name.into();
        debug!("类型包 {} 注册类型 {}", bundle, name);
        self.bundles
            .write()
            .entry(bundle.to_string())
            .or_default()
            .types
            .insert(name, CatalogEntry::Bean(BeanDescriptor::of::<T> as DescriptorFactory));
        self
    }

    /// 在类型包中注册服务接口
    pub fn register_interface_in_bundle<U: ?Sized + 'static>(
        &self,
        bundle: &str,
        name: impl Into<String>,
    ) -> &Self {
        self.bundles
            .write()
            .entry(bundle.to_string())
            .or_default()
            .types
            .insert(name.into(), CatalogEntry::Interface(TypeInfo::of::<U>()));
        self
    }

    /// 宿主查找，不包含类型包
    pub fn resolve_host(&self, name: &str) -> Option<CatalogEntry> {
        self.host.read().get(name).copied()
    }

    /// 加载单元查找：先宿主，再类型包
    pub fn resolve(&self, name: &str, bundle: &str) -> Option<(CatalogEntry, bool)> {
        if let Some(entry) = self.resolve_host(name) {
            return Some((entry, false));
        }
        self.bundles
            .read()
            .get(bundle)
            .and_then(|state| state.types.get(name).copied())
            .map(|entry| (entry, true))
    }

    /// 类型包是否存在
    pub fn has_bundle(&self, bundle: &str) -> bool {
        self.bundles.read().contains_key(bundle)
    }

    /// 打开类型包，增加租约计数
    pub fn acquire(&self, bundle: &str) -> PluginResult<()> {
        let mut bundles = self.bundles.write();
        let state = bundles.get_mut(bundle).ok_or_else(|| PluginError::UnresolvableType {
            name: format!("bundle:{}", bundle),
        })?;
        state.leases += 1;
        Ok(())
    }

    /// 释放类型包租约
    pub fn release(&self, bundle: &str) -> PluginResult<()> {
        let mut bundles = self.bundles.write();
        match bundles.get_mut(bundle) {
            Some(state) if state.leases > 0 => {
                state.leases -= 1;
                Ok(())
            }
            _ => Err(PluginError::CloseFailed {
                unit: bundle.to_string(),
                message: "类型包没有未释放的租约".to_string(),
            }),
        }
    }

    /// 当前租约数
    pub fn leases(&self, bundle: &str) -> usize {
        self.bundles
            .read()
            .get(bundle)
            .map(|state| state.leases)
            .unwrap_or(0)
    }
}

/// 将目录条目实例化为描述符
pub fn entry_descriptor(entry: CatalogEntry) -> Option<BeanDescriptor> {
    match entry {
        CatalogEntry::Bean(factory) => Some(factory()),
        CatalogEntry::Interface(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Codec: Send + Sync {}

    #[derive(Default)]
    struct Gzip;

    impl Codec for Gzip {}

    impl Bean for Gzip {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Gzip>()
                .provides::<dyn Codec>(|g| g)
                .construct_default()
                .build()
        }
    }

    #[test]
    fn test_bundle_types_are_invisible_to_host() {
        let catalog = TypeCatalog::new();
        catalog
            .register_interface::<dyn Codec>("codec.Codec")
            .register_in_bundle::<Gzip>("gzip", "codec.Gzip");

        assert!(catalog.resolve_host("codec.Gzip").is_none());
        assert!(matches!(
            catalog.resolve("codec.Gzip", "gzip"),
            Some((CatalogEntry::Bean(_), true))
        ));
        assert!(matches!(
            catalog.resolve("codec.Codec", "gzip"),
            Some((CatalogEntry::Interface(_), false))
        ));
        assert!(catalog.resolve("codec.Gzip", "other").is_none());
    }

    #[test]
    fn test_leases() {
        let catalog = TypeCatalog::new();
        catalog.register_in_bundle::<Gzip>("gzip", "codec.Gzip");

        catalog.acquire("gzip").unwrap();
        assert_eq!(catalog.leases("gzip"), 1);
        catalog.release("gzip").unwrap();
        assert!(catalog.release("gzip").is_err());
        assert!(catalog.acquire("missing").is_err());
    }
}
