//! 描述符编译与缓存
//!
//! 类型自身声明的描述符在第一次使用时编译一次，按类型与来源缓存：校验依赖槽与标记组合，
//! 通过标记处理器注册表把类型级标记绑定为生命周期处理器。分配或调用方直接给出的描述符
//! 可能与类型自身的声明不同，每次使用时单独编译。

use config_impl::compile_matcher;
use dashmap::DashMap;
use di_abstractions::{BeanDescriptor, DependencyKind, MarkerProcessor, Processor};
use injection_common::{
    InjectionError, InjectorError, InjectorResult, Phase, PluginError, SingletonScope, TypeInfo,
    ValidationError,
};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 标记处理器注册表
#[derive(Default, Clone)]
pub struct MarkerRegistry {
    processors: HashMap<String, Vec<Arc<dyn MarkerProcessor>>>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为标记类型注册处理器，同一类型的处理器按注册顺序执行
    pub fn register(&mut self, kind: impl Into<String>, processor: Arc<dyn MarkerProcessor>) {
        self.processors.entry(kind.into()).or_default().push(processor);
    }

    /// 已注册处理器的标记类型
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }

    fn bind(&self, descriptor: &BeanDescriptor) -> Result<Vec<Processor>, ValidationError> {
        let mut bound = Vec::new();
        for marker in descriptor.markers() {
            // 没有注册处理器的标记只作为元数据
            let Some(processors) = self.processors.get(&marker.kind) else {
                continue;
            };
            for processor in processors {
                bound.extend(processor.bind(marker, descriptor)?);
            }
        }
        Ok(bound)
    }
}

impl std::fmt::Debug for MarkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerRegistry")
            .field("kinds", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 编译后的描述符
#[derive(Debug)]
pub(crate) struct CompiledDescriptor {
    descriptor: BeanDescriptor,
    processors: Arc<Vec<Processor>>,
}

impl CompiledDescriptor {
    pub(crate) fn descriptor(&self) -> &BeanDescriptor {
        &self.descriptor
    }

    pub(crate) fn type_info(&self) -> TypeInfo {
        self.descriptor.type_info()
    }

    /// 标记处理器在前，类型自身处理器在后，分配追加的处理器最后
    pub(crate) fn processors_with(&self, extra: &[Processor]) -> Arc<Vec<Processor>> {
        if extra.is_empty() {
            return self.processors.clone();
        }
        let mut processors = (*self.processors).clone();
        processors.extend(extra.iter().cloned());
        Arc::new(processors)
    }
}

/// 描述符缓存
#[derive(Debug, Default)]
pub(crate) struct DescriptorCache {
    registry: MarkerRegistry,
    compiled: DashMap<(TypeId, Option<String>), Arc<CompiledDescriptor>>,
}

impl DescriptorCache {
    pub(crate) fn new(registry: MarkerRegistry) -> Self {
        Self {
            registry,
            compiled: DashMap::new(),
        }
    }

    /// 编译描述符，类型自身声明的描述符编译后复用
    pub(crate) fn compile(&self, descriptor: BeanDescriptor) -> InjectorResult<Arc<CompiledDescriptor>> {
        if !descriptor.is_canonical() {
            return Ok(Arc::new(self.build(descriptor)?));
        }

        let key = (descriptor.type_info().id, descriptor.origin().map(str::to_string));
        if let Some(compiled) = self.compiled.get(&key) {
            return Ok(compiled.clone());
        }

        let compiled = Arc::new(self.build(descriptor)?);
        Ok(self.compiled.entry(key).or_insert(compiled).clone())
    }

    fn build(&self, descriptor: BeanDescriptor) -> InjectorResult<CompiledDescriptor> {
        let info = descriptor.type_info();
        validate(&descriptor)?;

        let mut processors = self.registry.bind(&descriptor)?;
        processors.extend(descriptor.processors().iter().cloned());
        for processor in &processors {
            processor.validate(info)?;
        }

        debug!(
            "编译描述符: {} ({} 个依赖槽, {} 个处理器)",
            info.short_name(),
            descriptor.dependencies().len(),
            processors.len()
        );

        Ok(CompiledDescriptor {
            descriptor,
            processors: Arc::new(processors),
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.compiled.len()
    }
}

/// 是否声明了指定阶段的处理器
pub(crate) fn declares(processors: &[Processor], phase: Phase) -> bool {
    processors.iter().any(|p| p.phase() == phase)
}

fn validate(descriptor: &BeanDescriptor) -> InjectorResult<()> {
    let info = descriptor.type_info();
    if let Some(issue) = descriptor.issues().first() {
        return Err(issue.clone().into());
    }
    if !descriptor.has_constructor() {
        return Err(ValidationError::MissingConstructor {
            type_name: info.full_name.to_string(),
        }
        .into());
    }

    for dependency in descriptor.dependencies() {
        let element = format!("{}.{}", info.full_name, dependency.slot);
        match &dependency.kind {
            DependencyKind::Bean {
                default, marker, ..
            } => {
                if !marker.singleton
                    && (marker.optional
                        || marker.mode.is_some()
                        || !marker.qualifier.is_empty()
                        || marker.scope == SingletonScope::Global)
                {
                    return Err(ValidationError::illegal_combination(
                        element,
                        "独立依赖不能设置限定符、作用域、注入模式或可选",
                    )
                    .into());
                }

                let sensitive = default.map(|factory| factory().is_context_sensitive());
                if sensitive == Some(true) {
                    let message = if !marker.singleton {
                        Some("不能作为独立依赖注入")
                    } else if marker.qualifier.is_empty() {
                        Some("单例引用必须指定限定符")
                    } else if marker.scope == SingletonScope::Global {
                        Some("不能引用为全局单例")
                    } else {
                        None
                    };
                    if let Some(message) = message {
                        return Err(InjectionError::ContextSensitive {
                            type_name: element,
                            message: message.to_string(),
                        }
                        .into());
                    }
                }
            }
            DependencyKind::Property(marker) => {
                if marker.key.trim().is_empty() {
                    return Err(ValidationError::invalid_marker(element, "属性键为空").into());
                }
                if let Some(pattern) = &marker.matcher {
                    check_pattern(pattern)?;
                }
            }
            DependencyKind::Plugin { marker, .. } => {
                if descriptor.origin().is_some() {
                    return Err(PluginError::NestedPlugin {
                        type_name: info.full_name.to_string(),
                    }
                    .into());
                }
                plugin_cache::validate_request(&marker.name).map_err(|e| {
                    InjectorError::from(ValidationError::invalid_marker(element, e.to_string()))
                })?;
            }
            DependencyKind::Aggregate(query) => {
                if let Some(pattern) = &query.marker().qualifier_matcher {
                    check_pattern(pattern)?;
                }
            }
            DependencyKind::Injector => {}
        }
    }

    Ok(())
}

fn check_pattern(pattern: &str) -> Result<(), ValidationError> {
    compile_matcher(pattern)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use di_abstractions::{Bean, Dependencies};
    use injection_common::{
        AggregateMarker, InjectMarker, Marker, PluginMarker, PropertyMarker,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Session;

    impl Bean for Session {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Session>()
                .context_sensitive()
                .construct_default()
                .build()
        }
    }

    #[derive(Default)]
    struct Plain;

    impl Bean for Plain {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Plain>().construct_default().build()
        }
    }

    fn holder(marker: InjectMarker) -> BeanDescriptor {
        BeanDescriptor::builder::<u32>()
            .inject::<Session>("session", marker)
            .construct(|_: &Dependencies| Ok(0u32))
            .build()
    }

    #[test]
    fn test_context_sensitive_slot_rules() {
        let cache = DescriptorCache::default();

        for marker in [
            InjectMarker::independent(),
            InjectMarker::singleton_by_type(),
            InjectMarker::singleton("session").global(),
        ] {
            let error = DescriptorCache::default().compile(holder(marker)).unwrap_err();
            assert!(matches!(
                error,
                InjectorError::Injection {
                    source: InjectionError::ContextSensitive { .. }
                }
            ));
        }

        assert!(cache.compile(holder(InjectMarker::singleton("session"))).is_ok());
    }

    #[test]
    fn test_optional_independent_is_illegal() {
        let descriptor = BeanDescriptor::builder::<u16>()
            .inject::<Plain>("plain", InjectMarker::independent().optional())
            .construct(|_: &Dependencies| Ok(0u16))
            .build();
        let error = DescriptorCache::default().compile(descriptor).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Validation {
                source: ValidationError::IllegalMarkerCombination { .. }
            }
        ));
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        let property = BeanDescriptor::builder::<u8>()
            .property("port", PropertyMarker::new("port").matcher("(\\d+"))
            .construct(|_: &Dependencies| Ok(0u8))
            .build();
        assert!(DescriptorCache::default().compile(property).is_err());

        let aggregate = BeanDescriptor::builder::<i8>()
            .aggregate::<Plain>("all", AggregateMarker::new().qualifier_matcher("["))
            .construct(|_: &Dependencies| Ok(0i8))
            .build();
        assert!(DescriptorCache::default().compile(aggregate).is_err());
    }

    #[test]
    fn test_plugin_slot_rules() {
        let bad_name = BeanDescriptor::builder::<u64>()
            .plugin::<Plain>("codec", PluginMarker::new("/plugins", "codec_v2"))
            .construct(|_: &Dependencies| Ok(0u64))
            .build();
        assert!(DescriptorCache::default().compile(bad_name).is_err());

        let nested = BeanDescriptor::builder::<i64>()
            .plugin::<Plain>("codec", PluginMarker::new("/plugins", "codec"))
            .construct(|_: &Dependencies| Ok(0i64))
            .build()
            .with_origin("bundle");
        let error = DescriptorCache::default().compile(nested).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Plugin {
                source: PluginError::NestedPlugin { .. }
            }
        ));
    }

    #[test]
    fn test_missing_constructor() {
        let descriptor = BeanDescriptor::builder::<i32>().build();
        let error = DescriptorCache::default().compile(descriptor).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Validation {
                source: ValidationError::MissingConstructor { .. }
            }
        ));
    }

    #[derive(Default)]
    struct Audited;

    impl Bean for Audited {
        fn descriptor() -> BeanDescriptor {
            BeanDescriptor::builder::<Audited>()
                .marker(Marker::new("audited").with_attribute("level", "high"))
                .marker(Marker::new("unbound"))
                .construct_default()
                .build()
        }
    }

    #[test]
    fn test_markers_bound_once_per_type() {
        static BINDS: AtomicUsize = AtomicUsize::new(0);

        let mut registry = MarkerRegistry::new();
        registry.register(
            "audited",
            Arc::new(|marker: &Marker, _: &BeanDescriptor| {
                BINDS.fetch_add(1, Ordering::SeqCst);
                assert_eq!(marker.attribute("level"), Some("high"));
                Ok::<_, ValidationError>(vec![Processor::on_instance(
                    Phase::PostConstruct,
                    |_, _| Ok(()),
                )])
            }),
        );
        let cache = DescriptorCache::new(registry);

        let first = cache.compile(BeanDescriptor::of::<Audited>()).unwrap();
        let second = cache.compile(BeanDescriptor::of::<Audited>()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(BINDS.load(Ordering::SeqCst), 1);
        assert!(declares(&first.processors_with(&[]), Phase::PostConstruct));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_builder_descriptors_compiled_per_use() {
        let cache = DescriptorCache::default();
        let canonical = cache.compile(BeanDescriptor::of::<Plain>()).unwrap();

        let custom = BeanDescriptor::builder::<Plain>()
            .on(Phase::PostConstruct, |_, _| Ok(()))
            .construct_default()
            .build();
        assert!(!custom.is_canonical());
        let first = cache.compile(custom.clone()).unwrap();
        let second = cache.compile(custom).unwrap();

        assert!(!Arc::ptr_eq(&first, &canonical));
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(declares(&first.processors_with(&[]), Phase::PostConstruct));
        assert!(!declares(&canonical.processors_with(&[]), Phase::PostConstruct));
        assert_eq!(cache.len(), 1);

        // 同一类型来自类型包时单独缓存
        let bundled = cache
            .compile(BeanDescriptor::of::<Plain>().with_origin("bundle"))
            .unwrap();
        assert!(!Arc::ptr_eq(&bundled, &canonical));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_marker_processor_rejects_structure() {
        let mut registry = MarkerRegistry::new();
        registry.register(
            "timeout",
            Arc::new(|marker: &Marker, descriptor: &BeanDescriptor| {
                marker
                    .attribute("millis")
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|_| Vec::<Processor>::new())
                    .ok_or_else(|| {
                        ValidationError::invalid_marker(
                            descriptor.type_info().full_name,
                            "millis 必须为整数",
                        )
                    })
            }),
        );

        let descriptor = BeanDescriptor::builder::<Plain>()
            .marker(Marker::new("timeout").with_attribute("millis", "soon"))
            .construct_default()
            .build();
        assert!(DescriptorCache::new(registry).compile(descriptor).is_err());
    }
}
