//! 蓝图
//!
//! 蓝图是一组命名定义，每个定义是一个无参工厂，返回一个或多个分配。
//! 构建时立即调用全部定义并校验，之后可以在任意次注入中复用。

use crate::allocation::{Allocation, AllocationSet, IntoAllocations};
use injection_common::{BlueprintError, InjectorResult};
use tracing::debug;

/// 蓝图
#[derive(Debug, Clone)]
pub struct Blueprint {
    name: String,
    definitions: Vec<String>,
    allocations: AllocationSet,
}

impl Blueprint {
    /// 开始构建蓝图
    pub fn builder(name: impl Into<String>) -> BlueprintBuilder {
        BlueprintBuilder {
            name: name.into(),
            definitions: Vec::new(),
            allocations: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 定义名称，按声明顺序
    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    pub fn allocations(&self) -> &AllocationSet {
        &self.allocations
    }

    /// 合并多个蓝图的分配
    pub fn merge(blueprints: &[&Blueprint]) -> InjectorResult<AllocationSet> {
        let sets: Vec<AllocationSet> = blueprints
            .iter()
            .map(|blueprint| blueprint.allocations.clone())
            .collect();
        AllocationSet::merge(&sets)
    }
}

/// 蓝图构建器
pub struct BlueprintBuilder {
    name: String,
    definitions: Vec<String>,
    allocations: Vec<Allocation>,
    error: Option<BlueprintError>,
}

impl BlueprintBuilder {
    /// 添加定义，工厂立即执行
    pub fn define<F, A>(mut self, name: &str, factory: F) -> Self
    where
        F: FnOnce() -> A,
        A: IntoAllocations,
    {
        if self.error.is_some() {
            return self;
        }

        if let Err(error) = validate_definition_name(name) {
            self.error = Some(error);
            return self;
        }

        if self.definitions.iter().any(|d| d == name) {
            self.error = Some(BlueprintError::DuplicateDefinition {
                name: name.to_string(),
            });
            return self;
        }

        let allocations = factory().into_allocations();
        if allocations.is_empty() {
            self.error = Some(BlueprintError::InvalidDefinition {
                name: name.to_string(),
                message: "定义没有返回任何分配".to_string(),
            });
            return self;
        }

        debug!("蓝图 {} 定义 {}: {} 个分配", self.name, name, allocations.len());
        self.definitions.push(name.to_string());
        self.allocations.extend(allocations);
        self
    }

    /// 完成构建并校验全部分配
    pub fn build(self) -> InjectorResult<Blueprint> {
        if let Some(error) = self.error {
            return Err(error.into());
        }

        let allocations = AllocationSet::assemble(self.allocations)?;
        Ok(Blueprint {
            name: self.name,
            definitions: self.definitions,
            allocations,
        })
    }
}

fn validate_definition_name(name: &str) -> Result<(), BlueprintError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(BlueprintError::InvalidDefinition {
            name: name.to_string(),
            message: "定义名称必须是合法的标识符".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{MappingAllocation, PropertyAllocation};
    use injection_common::InjectorError;

    #[test]
    fn test_blueprint_collects_definitions() {
        let blueprint = Blueprint::builder("settings")
            .define("port", || PropertyAllocation::new("server.port", "8080"))
            .define("aliases", || {
                vec![
                    MappingAllocation::new("primary", "db"),
                    MappingAllocation::new("backup", "db"),
                ]
            })
            .build()
            .unwrap();

        assert_eq!(blueprint.definitions(), ["port", "aliases"]);
        assert_eq!(blueprint.allocations().mappings().len(), 2);
    }

    #[test]
    fn test_invalid_definitions() {
        let error = Blueprint::builder("b")
            .define("not valid", || PropertyAllocation::new("a", "b"))
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Blueprint {
                source: BlueprintError::InvalidDefinition { .. }
            }
        ));

        let error = Blueprint::builder("b")
            .define("empty", || ())
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Blueprint {
                source: BlueprintError::InvalidDefinition { .. }
            }
        ));

        let error = Blueprint::builder("b")
            .define("a", || PropertyAllocation::new("a", "1"))
            .define("a", || PropertyAllocation::new("b", "2"))
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Blueprint {
                source: BlueprintError::DuplicateDefinition { .. }
            }
        ));
    }

    #[test]
    fn test_merge_rejects_duplicate_property() {
        let first = Blueprint::builder("a")
            .define("k", || PropertyAllocation::new("k", "1"))
            .build()
            .unwrap();
        let second = Blueprint::builder("b")
            .define("k", || PropertyAllocation::new("k", "2"))
            .build()
            .unwrap();

        assert!(Blueprint::merge(&[&first]).is_ok());
        assert!(Blueprint::merge(&[&first, &second]).is_err());
    }
}
