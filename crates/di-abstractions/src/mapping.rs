//! 限定符映射校验

use crate::allocation::MappingAllocation;
use injection_common::{InjectorError, InjectorResult, MappingError};
use std::collections::{BTreeMap, HashSet};

/// 校验一组映射并返回 `base → target` 表
///
/// 同一 base 定义两次属于非法参数；映射图中存在环属于映射错误。
pub fn validate_mappings(pairs: &[MappingAllocation]) -> InjectorResult<BTreeMap<String, String>> {
    let mut graph = BTreeMap::new();
    for pair in pairs {
        if graph
            .insert(pair.base.clone(), pair.target.clone())
            .is_some()
        {
            return Err(InjectorError::illegal_argument(format!(
                "限定符映射重复定义: {}",
                pair.base
            )));
        }
    }

    detect_cycles(&graph)?;
    Ok(graph)
}

/// 使用深度优先搜索检测映射环
pub fn detect_cycles(graph: &BTreeMap<String, String>) -> Result<(), MappingError> {
    let mut visited = HashSet::new();
    let mut visiting = Vec::new();

    for base in graph.keys() {
        if !visited.contains(base.as_str()) {
            dfs_check(base, graph, &mut visited, &mut visiting)?;
        }
    }

    Ok(())
}

fn dfs_check<'g>(
    current: &'g str,
    graph: &'g BTreeMap<String, String>,
    visited: &mut HashSet<&'g str>,
    visiting: &mut Vec<&'g str>,
) -> Result<(), MappingError> {
    if let Some(start) = visiting.iter().position(|q| *q == current) {
        let chain = visiting[start..]
            .iter()
            .chain(std::iter::once(&current))
            .copied()
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(MappingError::Cycle { chain });
    }

    if visited.contains(current) {
        return Ok(());
    }

    visiting.push(current);
    if let Some(target) = graph.get(current) {
        dfs_check(target, graph, visited, visiting)?;
    }
    visiting.pop();
    visited.insert(current);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<MappingAllocation> {
        list.iter()
            .map(|(base, target)| MappingAllocation::new(*base, *target))
            .collect()
    }

    #[test]
    fn test_cycle_detected_regardless_of_order() {
        let orders = [
            [("1", "2"), ("2", "3"), ("3", "1")],
            [("3", "1"), ("1", "2"), ("2", "3")],
            [("2", "3"), ("3", "1"), ("1", "2")],
        ];
        for order in orders {
            let error = validate_mappings(&pairs(&order)).unwrap_err();
            assert!(matches!(
                error,
                InjectorError::Mapping {
                    source: MappingError::Cycle { .. }
                }
            ));
        }
    }

    #[test]
    fn test_self_mapping_is_cycle() {
        let error = validate_mappings(&pairs(&[("a", "a")])).unwrap_err();
        assert!(error.to_string().contains("a -> a"));
    }

    #[test]
    fn test_duplicate_base() {
        let error = validate_mappings(&pairs(&[("a", "b"), ("a", "c")])).unwrap_err();
        assert!(matches!(error, InjectorError::IllegalArgument { .. }));
    }

    #[test]
    fn test_chain_without_cycle() {
        let graph = validate_mappings(&pairs(&[("a", "b"), ("b", "c"), ("x", "c")])).unwrap();
        assert_eq!(graph.len(), 3);
    }
}
