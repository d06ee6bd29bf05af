//! 插件缓存
//!
//! 以归档内容的 SHA-256 作为缓存键：同一内容只加载一次，并发请求共享加载结果；
//! 文件内容变化后以新键重新加载。

use crate::archive::checksum;
use crate::id::{resolve_plugin, PluginId};
use crate::plugin::Plugin;
use dashmap::DashMap;
use di_abstractions::{BeanDescriptor, TypeCatalog};
use injection_common::{PluginError, PluginMarker, PluginResult, TypeInfo};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type Slot = Arc<OnceCell<Arc<Plugin>>>;

/// 插件缓存
pub struct PluginCache {
    catalog: Arc<TypeCatalog>,
    entries: DashMap<String, Slot>,
}

impl PluginCache {
    /// 使用类型目录创建缓存
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        Self {
            catalog,
            entries: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    /// 获取插件为服务接口声明的唯一实现类型
    ///
    /// 缓存只记忆类型解析，返回的描述符由注入引擎重新构造实例。
    pub fn retrieve(&self, marker: &PluginMarker, interface: TypeInfo) -> PluginResult<BeanDescriptor> {
        let plugin = self.load(marker)?;
        let provider = plugin.implementation(interface)?;
        debug!(
            "插件 {} 为 {} 提供 {}",
            plugin.id(),
            interface.short_name(),
            provider.name
        );
        Ok(provider.descriptor.clone())
    }

    /// 加载插件，命中缓存时直接返回
    pub fn load(&self, marker: &PluginMarker) -> PluginResult<Arc<Plugin>> {
        let id = resolve_plugin(&marker.directory, &marker.name, marker.versions)?;
        let bytes = std::fs::read(&id.path).map_err(|source| PluginError::Io {
            path: id.path.clone(),
            source,
        })?;
        let key = checksum(&bytes);

        // 先取出槽位再加载，避免持有分片锁时执行加载
        let slot: Slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut loaded = false;
        let result = slot.get_or_try_init(|| {
            loaded = true;
            Plugin::load(id.clone(), key.clone(), &bytes, self.catalog.clone()).map(Arc::new)
        });

        let plugin = match result {
            Ok(plugin) => plugin.clone(),
            Err(error) => {
                self.entries
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot) && current.get().is_none());
                return Err(error);
            }
        };

        if loaded {
            self.supersede(&id, &key);
        }
        Ok(plugin)
    }

    /// 淘汰同一目录、同一基础名称下版本不高于 `id` 的其他缓存项
    fn supersede(&self, id: &PluginId, key: &str) {
        let before = self.entries.len();
        self.entries.retain(|entry_key, slot| match slot.get() {
            Some(plugin) => {
                entry_key == key
                    || !plugin.id().same_lineage(&id.directory, &id.name)
                    || plugin.id().version > id.version
            }
            None => true,
        });

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            info!("插件 {} 加载后淘汰了 {} 个旧缓存项", id, evicted);
        }
    }

    /// 显式淘汰目录下指定基础名称的全部缓存项
    pub fn invalidate(&self, directory: &Path, name: &str) -> usize {
        let directory = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.to_path_buf());
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot.get() {
            Some(plugin) => !plugin.id().same_lineage(&directory, name),
            None => true,
        });

        let evicted = before.saturating_sub(self.entries.len());
        debug!("显式淘汰插件 {}: {} 个缓存项", name, evicted);
        evicted
    }

    /// 已加载的缓存项数量
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCache")
            .field("entries", &self.len())
            .finish()
    }
}
