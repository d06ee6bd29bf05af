//! 单例聚合

use crate::pool::SingletonPool;
use crate::sequence::InjectionSequence;
use config_impl::compile_matcher;
use di_abstractions::{AggregateQuery, BeanInstance};
use injection_common::{AggregateMode, InjectionError, InjectorResult, ValidationError};
use std::collections::HashSet;

/// 收集候选单例
///
/// 没有序列时只有全局池可见；序列单例遮蔽同名的全局单例。
pub(crate) fn candidates(
    sequence: Option<&InjectionSequence>,
    global: &SingletonPool,
    include_global: bool,
) -> Vec<(String, BeanInstance)> {
    let mut candidates = sequence
        .map(InjectionSequence::visible_singletons)
        .unwrap_or_default();

    if include_global || sequence.is_none() {
        let seen: HashSet<String> = candidates.iter().map(|(q, _)| q.clone()).collect();
        candidates.extend(
            global
                .snapshot()
                .into_iter()
                .filter(|(qualifier, _)| !seen.contains(qualifier)),
        );
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates
}

/// 按查询筛选候选单例，结果按限定符排序
pub(crate) fn select(
    candidates: Vec<(String, BeanInstance)>,
    query: &AggregateQuery,
) -> InjectorResult<Vec<BeanInstance>> {
    let marker = query.marker();
    let matcher = marker
        .qualifier_matcher
        .as_deref()
        .map(|pattern| {
            compile_matcher(pattern).map_err(|e| ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()?;

    let mut selected: Vec<BeanInstance> = candidates
        .into_iter()
        .filter(|(qualifier, _)| matcher.as_ref().map_or(true, |m| m.is_match(qualifier)))
        .filter(|(qualifier, instance)| query.accepts(qualifier, instance))
        .map(|(_, instance)| instance)
        .collect();

    let AggregateMode::Single { distinct, optional } = marker.mode else {
        return Ok(selected);
    };

    if distinct {
        let mut seen = HashSet::new();
        selected.retain(|instance| seen.insert(instance.address()));
    }

    let type_name = query.element().full_name.to_string();
    match selected.len() {
        1 => Ok(selected),
        0 if optional => Ok(selected),
        0 => Err(InjectionError::EmptyAggregation { type_name }.into()),
        count => Err(InjectionError::AmbiguousAggregation { type_name, count }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use injection_common::{AggregateMarker, InjectorError};
    use std::sync::Arc;

    trait Handler: Send + Sync {
        fn id(&self) -> u8;
    }

    struct Fixture(u8);

    impl Handler for Fixture {
        fn id(&self) -> u8 {
            self.0
        }
    }

    fn handler(id: u8) -> BeanInstance {
        let mut casts = di_abstractions::CastTable::of::<Fixture>();
        casts.insert_view::<Fixture, dyn Handler>(|f| f as Arc<dyn Handler>);
        BeanInstance::new(Arc::new(Fixture(id)), Arc::new(casts))
    }

    fn ids(instances: &[BeanInstance]) -> Vec<u8> {
        instances
            .iter()
            .map(|i| i.cast::<dyn Handler>().map(|h| h.id()).unwrap())
            .collect()
    }

    #[test]
    fn test_all_mode_filters_by_matcher_and_type() {
        let candidates = vec![
            ("handler.a".to_string(), handler(1)),
            ("handler.b".to_string(), handler(2)),
            ("other".to_string(), handler(3)),
            ("handler.c".to_string(), BeanInstance::plain(7u32)),
        ];
        let query = AggregateQuery::of::<dyn Handler>(
            AggregateMarker::new().qualifier_matcher("handler\\..*"),
        );
        assert_eq!(ids(&select(candidates, &query).unwrap()), [1, 2]);
    }

    #[test]
    fn test_matcher_requires_full_match() {
        let candidates = vec![("xhandler".to_string(), handler(1))];
        let query =
            AggregateQuery::of::<dyn Handler>(AggregateMarker::new().qualifier_matcher("handler"));
        assert!(select(candidates, &query).unwrap().is_empty());
    }

    #[test]
    fn test_single_mode() {
        let shared = handler(5);
        let candidates = vec![
            ("first".to_string(), shared.clone()),
            ("second".to_string(), shared),
        ];

        let query = AggregateQuery::of::<dyn Handler>(AggregateMarker::new().single());
        let error = select(candidates.clone(), &query).unwrap_err();
        assert!(matches!(
            error,
            InjectorError::Injection {
                source: InjectionError::AmbiguousAggregation { count: 2, .. }
            }
        ));

        let query = AggregateQuery::of::<dyn Handler>(AggregateMarker::new().single().distinct());
        assert_eq!(ids(&select(candidates, &query).unwrap()), [5]);

        let query = AggregateQuery::of::<dyn Handler>(AggregateMarker::new().single());
        assert!(matches!(
            select(Vec::new(), &query).unwrap_err(),
            InjectorError::Injection {
                source: InjectionError::EmptyAggregation { .. }
            }
        ));

        let query = AggregateQuery::of::<dyn Handler>(AggregateMarker::new().single().optional());
        assert!(select(Vec::new(), &query).unwrap().is_empty());
    }

    #[test]
    fn test_predicates_apply() {
        let candidates = vec![
            ("a".to_string(), handler(1)),
            ("b".to_string(), handler(2)),
        ];
        let query = AggregateQuery::of::<dyn Handler>(AggregateMarker::new())
            .filter(|_, instance| instance.cast::<dyn Handler>().is_some_and(|h| h.id() > 1));
        assert_eq!(ids(&select(candidates, &query).unwrap()), [2]);
    }

    #[test]
    fn test_root_candidates_sorted() {
        let global = SingletonPool::new("global");
        global
            .get_or_try_init("b", || Ok(handler(2)))
            .unwrap();
        global
            .get_or_try_init("a", || Ok(handler(1)))
            .unwrap();

        let found = candidates(None, &global, false);
        let qualifiers: Vec<_> = found.iter().map(|(q, _)| q.as_str()).collect();
        assert_eq!(qualifiers, ["a", "b"]);
    }
}
