//! 注入引擎端到端集成测试
//!
//! 用蓝图组装一个小型应用：全局连接池、按限定符聚合的处理器、属性配置，
//! 以及在 `POST_CONSTRUCT` 中通过注入器句柄开启的嵌套序列。

use config_abstractions::PropertyResolver;
use config_impl::MapPropertySource;
use di_abstractions::{
    Bean, BeanAllocation, BeanDescriptor, Blueprint, Injector, MappingAllocation,
    PropertyAllocation, SingletonAllocation,
};
use di_impl::{InjectorSettings, RootInjector};
use injection_common::{
    AggregateMarker, BlueprintError, InjectMarker, InjectorError, Phase, PropertyMarker,
};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

thread_local! {
    static EVENTS: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn record(event: impl Into<String>) {
    EVENTS.with(|events| events.borrow_mut().push(event.into()));
}

fn take_events() -> Vec<String> {
    EVENTS.with(|events| events.borrow_mut().drain(..).collect())
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// 连接池，全局单例
struct ConnectionPool {
    size: u32,
}

impl Bean for ConnectionPool {
    fn descriptor() -> BeanDescriptor {
        BeanDescriptor::builder::<ConnectionPool>()
            .property("size", PropertyMarker::new("pool.size").default_value("2"))
            .on(Phase::PostConstruct, |pool: &ConnectionPool, _| {
                record(format!("pool:open:{}", pool.size));
                Ok(())
            })
            .on(Phase::PreDestroy, |_, _| {
                record("pool:close");
                Ok(())
            })
            .construct(|dependencies| {
                Ok(ConnectionPool {
                    size: dependencies.property("size")?,
                })
            })
            .build()
    }
}

trait Handler: Send + Sync {
    fn path(&self) -> &'static str;
}

#[derive(Default)]
struct UsersHandler;

impl Handler for UsersHandler {
    fn path(&self) -> &'static str {
        "/users"
    }
}

impl Bean for UsersHandler {
    fn descriptor() -> BeanDescriptor {
        BeanDescriptor::builder::<UsersHandler>()
            .provides::<dyn Handler>(|h| h)
            .construct_default()
            .build()
    }
}

#[derive(Default)]
struct OrdersHandler;

impl Handler for OrdersHandler {
    fn path(&self) -> &'static str {
        "/orders"
    }
}

impl Bean for OrdersHandler {
    fn descriptor() -> BeanDescriptor {
        BeanDescriptor::builder::<OrdersHandler>()
            .provides::<dyn Handler>(|h| h)
            .construct_default()
            .build()
    }
}

/// 由应用在启动后开启的后台任务
#[derive(Default)]
struct Worker;

impl Bean for Worker {
    fn descriptor() -> BeanDescriptor {
        BeanDescriptor::builder::<Worker>()
            .on(Phase::PostConstruct, |_, _| {
                record("worker:start");
                Ok(())
            })
            .on(Phase::PreDestroy, |_, _| {
                record("worker:stop");
                Ok(())
            })
            .construct_default()
            .build()
    }
}

struct Application {
    pool: Arc<ConnectionPool>,
    handlers: Vec<Arc<dyn Handler>>,
    name: String,
    injector: Arc<dyn Injector>,
    worker: Mutex<Option<Arc<Worker>>>,
}

impl Bean for Application {
    fn descriptor() -> BeanDescriptor {
        BeanDescriptor::builder::<Application>()
            .inject::<ConnectionPool>("pool", InjectMarker::singleton("db").global())
            .inject::<UsersHandler>("users", InjectMarker::singleton("handler.users"))
            .inject::<OrdersHandler>("orders", InjectMarker::singleton("handler.orders"))
            .aggregate::<dyn Handler>("handlers", AggregateMarker::new().qualifier_matcher("handler\\..+"))
            .property("name", PropertyMarker::new("app.name").default_value("app-${app.env:dev}"))
            .injector("injector")
            .on(Phase::PostConstruct, |app: &Application, _| {
                let worker = app.injector.instantiate::<Worker>()?;
                *app.worker.lock().map_err(|e| e.to_string())? = Some(worker);
                record("app:ready");
                Ok(())
            })
            .on(Phase::PreDestroy, |_, _| {
                record("app:stop");
                Ok(())
            })
            .construct(|dependencies| {
                Ok(Application {
                    pool: dependencies.bean::<ConnectionPool>("pool")?,
                    handlers: dependencies.aggregate::<dyn Handler>("handlers")?,
                    name: dependencies.raw_property("name")?,
                    injector: dependencies.injector("injector")?,
                    worker: Mutex::new(None),
                })
            })
            .build()
    }
}

fn storage_blueprint() -> Blueprint {
    Blueprint::builder("storage")
        .define("pool", || {
            SingletonAllocation::global("db.primary", BeanAllocation::to_type::<ConnectionPool>())
        })
        .define("aliases", || MappingAllocation::new("db", "db.primary"))
        .build()
        .unwrap()
}

fn web_blueprint() -> Blueprint {
    Blueprint::builder("web")
        .define("handlers", || {
            vec![
                SingletonAllocation::sequence("handler.users", BeanAllocation::to_type::<UsersHandler>()),
                SingletonAllocation::sequence("handler.orders", BeanAllocation::to_type::<OrdersHandler>()),
            ]
        })
        .define("environment", || PropertyAllocation::new("app.env", "test"))
        .build()
        .unwrap()
}

#[test]
fn test_application_lifecycle() {
    init_logging();
    take_events();

    let injector = RootInjector::builder()
        .blueprint(storage_blueprint())
        .property_source(Arc::new(MapPropertySource::new("defaults").with("pool.size", "8")))
        .build()
        .unwrap();

    let web = web_blueprint();
    let app = injector.instantiate_from::<Application>(&[&web]).unwrap();

    assert_eq!(app.pool.size, 8);
    assert_eq!(app.name, "app-test");
    let paths: Vec<&str> = app.handlers.iter().map(|h| h.path()).collect();
    assert_eq!(paths, ["/orders", "/users"]);
    assert!(app.worker.lock().unwrap().is_some());
    assert_eq!(take_events(), ["pool:open:8", "worker:start", "app:ready"]);

    // 第二个应用共享连接池
    let second = injector.instantiate_from::<Application>(&[&web]).unwrap();
    assert!(Arc::ptr_eq(&app.pool, &second.pool));
    assert_eq!(take_events(), ["worker:start", "app:ready"]);

    injector.destroy(&app).unwrap();
    assert_eq!(take_events(), ["worker:stop", "app:stop"]);

    injector.shutdown().unwrap();
    assert_eq!(take_events(), ["worker:stop", "app:stop", "pool:close"]);
    assert!(injector.is_shut_down());
}

#[test]
fn test_blueprint_conflicts_with_root_allocations() {
    init_logging();

    let error = RootInjector::builder()
        .blueprint(storage_blueprint())
        .allocate(MappingAllocation::new("db", "db.replica"))
        .build()
        .unwrap_err();
    assert!(matches!(error, InjectorError::IllegalArgument { .. }));

    let error = RootInjector::builder()
        .blueprint(storage_blueprint())
        .allocate(SingletonAllocation::global(
            "db.primary",
            BeanAllocation::to_type::<ConnectionPool>(),
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        error,
        InjectorError::Blueprint {
            source: BlueprintError::DuplicateAllocation { .. }
        }
    ));
}

#[test]
fn test_sequence_allocations_do_not_leak() {
    init_logging();
    take_events();

    let injector = RootInjector::builder()
        .blueprint(storage_blueprint())
        .build()
        .unwrap();

    // 没有 web 蓝图时处理器按类型即时构造，聚合仍能找到它们
    let app = injector
        .instantiate_with::<Application, _>(PropertyAllocation::new("app.name", "custom"))
        .unwrap();
    assert_eq!(app.name, "custom");
    assert_eq!(app.pool.size, 2);
    assert_eq!(app.handlers.len(), 2);

    let other = injector.instantiate::<Application>().unwrap();
    assert_eq!(other.name, "app-dev");
    assert!(!Arc::ptr_eq(&app.handlers[0], &other.handlers[0]));

    injector.shutdown().unwrap();
    let events = take_events();
    assert_eq!(events.iter().filter(|e| *e == "pool:close").count(), 1);
}

#[test]
fn test_settings_file_drives_properties() {
    init_logging();
    take_events();

    let directory = tempfile::tempdir().unwrap();
    let properties = directory.path().join("app.json");
    std::fs::write(&properties, r#"{"app": {"env": "staging"}, "pool": {"size": 16}}"#).unwrap();
    let settings_path = directory.path().join("injector.toml");
    std::fs::write(
        &settings_path,
        format!("name = \"shop\"\nproperty_files = [{:?}]\n", properties.display().to_string()),
    )
    .unwrap();

    let injector = RootInjector::builder()
        .settings(InjectorSettings::from_file(&settings_path).unwrap())
        .blueprint(storage_blueprint())
        .build()
        .unwrap();

    let resolver = injector.resolver().unwrap();
    assert_eq!(resolver.resolve("${app.env}", None, true).unwrap(), "staging");
    assert!(resolver.resolve("${app.region}", None, true).is_err());

    let app = injector.instantiate::<Application>().unwrap();
    assert_eq!(app.name, "app-staging");
    assert_eq!(app.pool.size, 16);

    injector.shutdown().unwrap();
    assert_eq!(take_events().last().map(String::as_str), Some("pool:close"));
    assert!(matches!(
        injector.resolver(),
        Err(InjectorError::Shutdown { .. })
    ));
}
