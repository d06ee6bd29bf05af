//! 已加载的插件

use crate::archive::PluginArchive;
use crate::id::PluginId;
use crate::loader::LoadingUnit;
use di_abstractions::{BeanDescriptor, CatalogEntry, TypeCatalog};
use injection_common::{PluginError, PluginResult, TypeInfo};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// 服务实现
#[derive(Debug, Clone)]
pub struct ServiceProvider {
    /// 归档中声明的名称
    pub name: String,
    /// 实现类型的描述符，来源已标记为插件
    pub descriptor: BeanDescriptor,
}

#[derive(Debug)]
struct Service {
    interface: TypeInfo,
    declared_name: String,
    providers: Vec<ServiceProvider>,
}

/// 已加载的插件
#[derive(Debug)]
pub struct Plugin {
    id: PluginId,
    checksum: String,
    unit: LoadingUnit,
    services: HashMap<TypeId, Service>,
}

impl Plugin {
    /// 在新的加载单元中加载插件
    ///
    /// 任何校验失败都会关闭加载单元；关闭失败只记录日志，不掩盖原始错误。
    pub fn load(
        id: PluginId,
        checksum: String,
        bytes: &[u8],
        catalog: Arc<TypeCatalog>,
    ) -> PluginResult<Self> {
        let archive = PluginArchive::parse(&id.path, bytes)?;
        let (bundle, required) = match archive.bundle() {
            Some(bundle) => (bundle.to_string(), true),
            None => (id.name.clone(), false),
        };
        let unit = LoadingUnit::open(catalog, id.to_string(), bundle, required)?;

        match Self::declare_services(&unit, &archive) {
            Ok(services) => {
                info!(
                    "插件 {} 已加载: {} 个服务接口, 校验和 {}",
                    id,
                    services.len(),
                    &checksum[..checksum.len().min(12)]
                );
                Ok(Self {
                    id,
                    checksum,
                    unit,
                    services,
                })
            }
            Err(error) => {
                if let Err(close_error) = unit.close() {
                    warn!("插件 {} 加载失败后关闭加载单元失败: {}", id, close_error);
                }
                Err(error)
            }
        }
    }

    fn declare_services(
        unit: &LoadingUnit,
        archive: &PluginArchive,
    ) -> PluginResult<HashMap<TypeId, Service>> {
        let mut services = HashMap::new();

        for (interface_name, implementations) in &archive.services {
            let interface = match unit.resolve(interface_name) {
                Some((CatalogEntry::Interface(info), _)) => info,
                Some((CatalogEntry::Bean(_), _)) => {
                    return Err(PluginError::InvalidServiceDeclaration {
                        declaration: interface_name.clone(),
                        message: "服务声明必须指向接口".to_string(),
                    })
                }
                None => {
                    return Err(PluginError::UnresolvableType {
                        name: interface_name.clone(),
                    })
                }
            };

            let mut providers = Vec::with_capacity(implementations.len());
            for implementation in implementations {
                let descriptor = match unit.resolve(implementation) {
                    Some((CatalogEntry::Bean(factory), _)) => factory().with_origin(unit.bundle()),
                    Some((CatalogEntry::Interface(_), _)) => {
                        return Err(PluginError::NotAssignable {
                            implementation: implementation.clone(),
                            service: interface_name.clone(),
                        })
                    }
                    None => {
                        return Err(PluginError::UnresolvableType {
                            name: implementation.clone(),
                        })
                    }
                };

                if !descriptor.is_assignable_to(interface.id) {
                    return Err(PluginError::NotAssignable {
                        implementation: implementation.clone(),
                        service: interface_name.clone(),
                    });
                }
                if descriptor.has_plugin_dependencies() {
                    return Err(PluginError::NestedPlugin {
                        type_name: implementation.clone(),
                    });
                }

                providers.push(ServiceProvider {
                    name: implementation.clone(),
                    descriptor,
                });
            }

            services.insert(
                interface.id,
                Service {
                    interface,
                    declared_name: interface_name.clone(),
                    providers,
                },
            );
        }

        Ok(services)
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn unit(&self) -> &LoadingUnit {
        &self.unit
    }

    /// 声明的服务接口
    pub fn interfaces(&self) -> Vec<TypeInfo> {
        self.services.values().map(|s| s.interface).collect()
    }

    /// 服务接口的唯一实现
    pub fn implementation(&self, interface: TypeInfo) -> PluginResult<&ServiceProvider> {
        let no_implementation = || PluginError::NoImplementation {
            plugin: self.id.to_string(),
            service: interface.full_name.to_string(),
        };

        let service = self.services.get(&interface.id).ok_or_else(no_implementation)?;
        match service.providers.as_slice() {
            [provider] => Ok(provider),
            [] => Err(no_implementation()),
            providers => Err(PluginError::AmbiguousImplementation {
                plugin: self.id.to_string(),
                service: service.declared_name.clone(),
                count: providers.len(),
            }),
        }
    }
}
