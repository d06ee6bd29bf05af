//! 限定符映射上下文
//!
//! 持久化结构：`merge` 返回新的上下文，父上下文保持不变。

use di_abstractions::{detect_cycles, validate_mappings, MappingAllocation};
use injection_common::InjectorResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 映射上下文
#[derive(Debug, Clone, Default)]
pub struct MappingContext {
    pairs: Arc<BTreeMap<String, String>>,
    resolved: Arc<HashMap<String, String>>,
}

impl MappingContext {
    /// 空上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 在当前上下文之上叠加映射
    ///
    /// 本组映射中 base 重复或成环、以及叠加后的映射图成环都会失败。
    pub fn merge(&self, pairs: &[MappingAllocation]) -> InjectorResult<Self> {
        if pairs.is_empty() {
            return Ok(self.clone());
        }

        let local = validate_mappings(pairs)?;
        let mut merged = (*self.pairs).clone();
        merged.extend(local);
        detect_cycles(&merged)?;

        let resolved = flatten(&merged);
        Ok(Self {
            pairs: Arc::new(merged),
            resolved: Arc::new(resolved),
        })
    }

    /// 沿映射链解析到最终限定符
    pub fn resolve(&self, qualifier: &str) -> String {
        self.resolved
            .get(qualifier)
            .cloned()
            .unwrap_or_else(|| qualifier.to_string())
    }

    /// 直接映射
    pub fn target_of(&self, qualifier: &str) -> Option<&str> {
        self.pairs.get(qualifier).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// 预先计算每个 base 的终点，映射图已保证无环
fn flatten(graph: &BTreeMap<String, String>) -> HashMap<String, String> {
    graph
        .keys()
        .map(|base| {
            let mut current = base;
            for _ in 0..=graph.len() {
                match graph.get(current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            (base.clone(), current.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use injection_common::{InjectorError, MappingError};

    fn pairs(list: &[(&str, &str)]) -> Vec<MappingAllocation> {
        list.iter()
            .map(|(base, target)| MappingAllocation::new(*base, *target))
            .collect()
    }

    #[test]
    fn test_resolve_follows_chain() {
        let context = MappingContext::new()
            .merge(&pairs(&[("a", "b"), ("b", "c")]))
            .unwrap();
        assert_eq!(context.resolve("a"), "c");
        assert_eq!(context.resolve("b"), "c");
        assert_eq!(context.resolve("z"), "z");
    }

    #[test]
    fn test_resolve_is_fixed_point() {
        let context = MappingContext::new()
            .merge(&pairs(&[("a", "b"), ("b", "c"), ("c", "d"), ("x", "a")]))
            .unwrap();
        for q in ["a", "b", "c", "d", "x", "unknown"] {
            let once = context.resolve(q);
            assert_eq!(context.resolve(&once), once);
        }
    }

    #[test]
    fn test_merge_does_not_touch_parent() {
        let parent = MappingContext::new().merge(&pairs(&[("a", "b")])).unwrap();
        let child = parent.merge(&pairs(&[("b", "c")])).unwrap();

        assert_eq!(parent.resolve("a"), "b");
        assert_eq!(child.resolve("a"), "c");
        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn test_child_may_override_parent_base() {
        let parent = MappingContext::new().merge(&pairs(&[("a", "b")])).unwrap();
        let child = parent.merge(&pairs(&[("a", "c")])).unwrap();
        assert_eq!(child.resolve("a"), "c");
    }

    #[test]
    fn test_merge_rejects_cycle_across_layers() {
        let parent = MappingContext::new().merge(&pairs(&[("a", "b")])).unwrap();
        let error = parent.merge(&pairs(&[("b", "a")])).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Mapping {
                source: MappingError::Cycle { .. }
            }
        ));
    }
}
