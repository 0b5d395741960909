//! Property-based tests for derived collections using proptest.

use std::collections::HashSet;

use prism_core::{
    attrs, Collection, CollectionOptions, Comparator, DerivedCollection, DerivedOptions, Record,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add { id: u8, kind: u8, rank: u8 },
    Remove { id: u8 },
    SetKind { id: u8, kind: u8 },
    SetRank { id: u8, rank: u8 },
    Reset { rows: Vec<(u8, u8, u8)> },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..24, 0u8..3, 0u8..50).prop_map(|(id, kind, rank)| Op::Add { id, kind, rank }),
        2 => (0u8..24).prop_map(|id| Op::Remove { id }),
        2 => (0u8..24, 0u8..3).prop_map(|(id, kind)| Op::SetKind { id, kind }),
        1 => (0u8..24, 0u8..50).prop_map(|(id, rank)| Op::SetRank { id, rank }),
        1 => prop::collection::vec((0u8..24, 0u8..3, 0u8..50), 0..12)
            .prop_map(|rows| Op::Reset { rows }),
    ]
}

fn kind_name(kind: u8) -> &'static str {
    ["A", "B", "C"][kind as usize % 3]
}

fn apply(base: &Collection, op: &Op) {
    match op {
        Op::Add { id, kind, rank } => {
            base.add(attrs! { "id" => *id as i32, "type" => kind_name(*kind), "rank" => *rank as i32 })
                .unwrap();
        }
        Op::Remove { id } => {
            base.remove(id.to_string().as_str()).unwrap();
        }
        Op::SetKind { id, kind } => {
            if let Some(record) = base.get(*id as i32) {
                record.set("type", kind_name(*kind)).unwrap();
            }
        }
        Op::SetRank { id, rank } => {
            if let Some(record) = base.get(*id as i32) {
                record.set("rank", *rank as i32).unwrap();
            }
        }
        Op::Reset { rows } => {
            let rows: Vec<_> = rows
                .iter()
                .map(|(id, kind, rank)| {
                    attrs! { "id" => *id as i32, "type" => kind_name(*kind), "rank" => *rank as i32 }
                })
                .collect();
            base.reset(rows).unwrap();
        }
    }
}

fn is_a(record: &Record) -> bool {
    record.text("type").as_deref() == Some("A")
}

fn expected(base: &Collection) -> Vec<String> {
    base.records()
        .iter()
        .filter(|r| is_a(r))
        .map(|r| r.id().to_string())
        .collect()
}

fn ids(view: &DerivedCollection) -> Vec<String> {
    view.ids().iter().map(|id| id.to_string()).collect()
}

proptest! {
    /// A tracking view always equals the filtered base, in base order.
    #[test]
    fn tracking_view_matches_filtered_base(ops in prop::collection::vec(op(), 1..60)) {
        let base = Collection::named("base");
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(is_a).track_order());

        for op in &ops {
            apply(&base, op);
            prop_assert_eq!(ids(&view), expected(&base), "after {:?}", op);
        }
    }

    /// Order tracking holds when the base re-sorts itself.
    #[test]
    fn tracking_view_follows_sorted_base(ops in prop::collection::vec(op(), 1..60)) {
        let base = Collection::new(
            CollectionOptions::named("ranked").comparator(Comparator::attribute("rank")),
        );
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(is_a).track_order());

        for op in &ops {
            apply(&base, op);
            prop_assert_eq!(ids(&view), expected(&base), "after {:?}", op);
        }
    }

    /// Without tracking, membership is still exactly the filtered base.
    #[test]
    fn untracked_view_has_filtered_membership(ops in prop::collection::vec(op(), 1..60)) {
        let base = Collection::named("base");
        let view = DerivedCollection::new(&base, DerivedOptions::named("a").filter(is_a));

        for op in &ops {
            apply(&base, op);
            let actual: HashSet<String> = ids(&view).into_iter().collect();
            let wanted: HashSet<String> = expected(&base).into_iter().collect();
            prop_assert_eq!(actual, wanted, "after {:?}", op);
            prop_assert!(view.records().iter().all(is_a));
        }
    }

    /// Stacked views equal the base filtered by both predicates.
    #[test]
    fn stacked_views_compose_predicates(ops in prop::collection::vec(op(), 1..60)) {
        let base = Collection::named("base");
        let a = DerivedCollection::new(&base, DerivedOptions::named("a").filter(is_a).track_order());
        let low = DerivedCollection::new(
            a.collection(),
            DerivedOptions::named("low")
                .filter(|r| r.get("rank").and_then(|v| v.as_number()).is_some_and(|n| n < 25.0))
                .track_order(),
        );

        for op in &ops {
            apply(&base, op);
            let wanted: Vec<String> = base
                .records()
                .iter()
                .filter(|r| is_a(r))
                .filter(|r| r.get("rank").and_then(|v| v.as_number()).is_some_and(|n| n < 25.0))
                .map(|r| r.id().to_string())
                .collect();
            prop_assert_eq!(ids(&low), wanted, "after {:?}", op);
        }
    }
}
