//! 分层属性存储
//!
//! 根注入器持有按优先级排序的 [`PropertyStore`]；每个注入序列在其之上叠加一层
//! 不可变的 [`PropertyOverlay`]，子序列的覆盖不会影响祖先。

use crate::placeholder::resolve_expression;
use config_abstractions::{PropertyResolver, PropertySource};
use injection_common::ResolvingError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 属性来源集合，按优先级从高到低查找
#[derive(Default)]
pub struct PropertyStore {
    sources: RwLock<Vec<Arc<dyn PropertySource>>>,
}

impl PropertyStore {
    /// 创建空的属性存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加属性来源
    pub fn add_source(&self, source: Arc<dyn PropertySource>) {
        debug!("添加属性来源: {} (优先级 {})", source.name(), source.priority());
        let mut sources = self.sources.write();
        sources.push(source);
        // 稳定排序，同优先级保持添加顺序
        sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// 获取属性原始值
    pub fn get(&self, key: &str) -> Option<String> {
        self.sources.read().iter().find_map(|source| source.get(key))
    }

    /// 来源名称列表，按查找顺序排列
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("sources", &self.source_names())
            .finish()
    }
}

impl PropertyResolver for PropertyStore {
    fn resolve(
        &self,
        expression: &str,
        matcher: Option<&str>,
        forced: bool,
    ) -> Result<String, ResolvingError> {
        let lookup = |key: &str| self.get(key);
        resolve_expression(&lookup, expression, matcher, forced)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// 注入序列级别的属性覆盖层
///
/// 克隆开销很小，`with_values` 返回新实例而不修改原实例。
#[derive(Debug, Clone)]
pub struct PropertyOverlay {
    values: Arc<HashMap<String, String>>,
    base: Arc<PropertyStore>,
}

impl PropertyOverlay {
    /// 在属性存储之上创建空覆盖层
    pub fn new(base: Arc<PropertyStore>) -> Self {
        Self {
            values: Arc::new(HashMap::new()),
            base,
        }
    }

    /// 叠加新的属性值，返回新的覆盖层
    pub fn with_values<I>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut pairs = pairs.into_iter().peekable();
        if pairs.peek().is_none() {
            return self.clone();
        }

        let mut values = (*self.values).clone();
        values.extend(pairs);
        Self {
            values: Arc::new(values),
            base: self.base.clone(),
        }
    }

    /// 获取属性原始值
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| self.base.get(key))
    }

    /// 底层属性存储
    pub fn base(&self) -> &Arc<PropertyStore> {
        &self.base
    }
}

impl PropertyResolver for PropertyOverlay {
    fn resolve(
        &self,
        expression: &str,
        matcher: Option<&str>,
        forced: bool,
    ) -> Result<String, ResolvingError> {
        let lookup = |key: &str| self.get(key);
        resolve_expression(&lookup, expression, matcher, forced)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
