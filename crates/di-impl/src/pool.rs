//! 单例池
//!
//! 以最终（映射后）限定符为键。每个键对应一个 `OnceCell`，同一限定符的并发首次创建
//! 只会执行一次，其余调用方阻塞并共享结果。

use dashmap::DashMap;
use di_abstractions::BeanInstance;
use injection_common::InjectorResult;
use once_cell::sync::OnceCell;
use std::sync::Arc;

type Cell = Arc<OnceCell<BeanInstance>>;

/// 单例池
#[derive(Debug)]
pub struct SingletonPool {
    name: String,
    entries: DashMap<String, Cell>,
}

impl SingletonPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 已创建的单例
    pub fn get(&self, qualifier: &str) -> Option<BeanInstance> {
        self.entries
            .get(qualifier)
            .and_then(|cell| cell.get().cloned())
    }

    /// 获取单例，不存在时调用 `create` 创建
    ///
    /// 返回值的第二项表示本次调用是否执行了创建。创建失败时不留下任何条目。
    pub fn get_or_try_init<F>(&self, qualifier: &str, create: F) -> InjectorResult<(BeanInstance, bool)>
    where
        F: FnOnce() -> InjectorResult<BeanInstance>,
    {
        // 先取出槽位，创建期间不持有分片锁
        let cell: Cell = self
            .entries
            .entry(qualifier.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut created = false;
        let result = cell.get_or_try_init(|| {
            created = true;
            create()
        });

        match result {
            Ok(instance) => Ok((instance.clone(), created)),
            Err(error) => {
                self.entries.remove_if(qualifier, |_, current| {
                    Arc::ptr_eq(current, &cell) && current.get().is_none()
                });
                Err(error)
            }
        }
    }

    /// 放入已完成的单例，替换同名条目
    pub fn insert(&self, qualifier: &str, instance: BeanInstance) {
        self.entries
            .insert(qualifier.to_string(), Arc::new(OnceCell::with_value(instance)));
    }

    /// 移除单例
    pub fn remove(&self, qualifier: &str) -> Option<BeanInstance> {
        self.entries
            .remove(qualifier)
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// 已创建单例的快照，按限定符排序
    pub fn snapshot(&self) -> Vec<(String, BeanInstance)> {
        let mut entries: Vec<(String, BeanInstance)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|instance| (entry.key().clone(), instance.clone()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use injection_common::{InjectionError, InjectorError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_concurrent_first_resolution_creates_once() {
        let pool = SingletonPool::new("test");
        let creations = AtomicUsize::new(0);

        let instances: Vec<BeanInstance> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let pool = &pool;
                    let creations = &creations;
                    scope.spawn(move || {
                        pool.get_or_try_init("shared", || {
                            creations.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(BeanInstance::plain(i))
                        })
                        .unwrap()
                        .0
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| w[0].same_instance(&w[1])));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_failed_creation_leaves_no_entry() {
        let pool = SingletonPool::new("test");
        let result = pool.get_or_try_init("broken", || {
            Err(InjectorError::from(InjectionError::MissingBinding {
                type_name: "Broken".to_string(),
            }))
        });

        assert!(result.is_err());
        assert!(pool.get("broken").is_none());
        assert!(pool.snapshot().is_empty());

        let (_, created) = pool
            .get_or_try_init("broken", || Ok(BeanInstance::plain(1u8)))
            .unwrap();
        assert!(created);
    }

    #[test]
    fn test_snapshot_sorted_and_remove() {
        let pool = SingletonPool::new("test");
        for q in ["b", "a", "c"] {
            pool.get_or_try_init(q, || Ok(BeanInstance::plain(q.len()))).unwrap();
        }
        let qualifiers: Vec<_> = pool.snapshot().into_iter().map(|(q, _)| q).collect();
        assert_eq!(qualifiers, ["a", "b", "c"]);

        assert!(pool.remove("b").is_some());
        assert_eq!(pool.len(), 2);

        pool.insert("b", BeanInstance::plain(9u8));
        let (_, created) = pool
            .get_or_try_init("b", || Ok(BeanInstance::plain(0u8)))
            .unwrap();
        assert!(!created);
        assert_eq!(pool.len(), 3);
    }
}
