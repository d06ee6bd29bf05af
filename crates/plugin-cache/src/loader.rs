//! 隔离的加载单元

use di_abstractions::{CatalogEntry, TypeCatalog};
use injection_common::PluginResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// 加载单元
///
/// 持有类型包租约；名称解析先查宿主再查类型包。关闭后租约释放。
#[derive(Debug)]
pub struct LoadingUnit {
    name: String,
    bundle: String,
    leased: bool,
    catalog: Arc<TypeCatalog>,
    open: AtomicBool,
}

impl LoadingUnit {
    /// 打开加载单元
    ///
    /// `required` 为真时类型包必须存在；否则类型包缺失时只能解析宿主类型。
    pub fn open(
        catalog: Arc<TypeCatalog>,
        name: impl Into<String>,
        bundle: impl Into<String>,
        required: bool,
    ) -> PluginResult<Self> {
        let name = name.into();
        let bundle = bundle.into();

        let leased = if required || catalog.has_bundle(&bundle) {
            catalog.acquire(&bundle)?;
            true
        } else {
            false
        };

        debug!("打开加载单元 {} (类型包 {}, 租约 {})", name, bundle, leased);
        Ok(Self {
            name,
            bundle,
            leased,
            catalog,
            open: AtomicBool::new(true),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// 解析类型名称，第二个值表示是否来自类型包
    pub fn resolve(&self, type_name: &str) -> Option<(CatalogEntry, bool)> {
        if !self.is_open() {
            return None;
        }
        if self.leased {
            self.catalog.resolve(type_name, &self.bundle)
        } else {
            self.catalog.resolve_host(type_name).map(|entry| (entry, false))
        }
    }

    /// 关闭加载单元，重复关闭没有效果
    pub fn close(&self) -> PluginResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("关闭加载单元 {}", self.name);
        if self.leased {
            self.catalog.release(&self.bundle)?;
        }
        Ok(())
    }
}

impl Drop for LoadingUnit {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!("加载单元 {} 关闭失败: {}", self.name, error);
        }
    }
}
