use proptest::prelude::*;
use weir_balancer::PeakHolder;

#[derive(Debug, Clone)]
enum HolderOp {
    Add(u64),
    Shrink(f64),
}

proptest! {
    #[test]
    fn holder_stays_sorted_and_capped(ops in proptest::collection::vec(
        prop_oneof![
            (0u64..10_000_000u64).prop_map(HolderOp::Add),
            (0.5f64..1.0f64).prop_map(HolderOp::Shrink),
        ],
        1..200,
    )) {
        let holder = PeakHolder::new(20);
        for op in ops {
            match op {
                HolderOp::Add(v) => holder.add(v),
                HolderOp::Shrink(f) => holder.shrink(f),
            }
        }
        let snapshot = holder.snapshot();
        prop_assert!(snapshot.len() <= 20);
        prop_assert!(snapshot.windows(2).all(|w| w[0] >= w[1]), "not sorted: {snapshot:?}");
        if snapshot.is_empty() {
            prop_assert_eq!(holder.median(), 0);
        } else {
            prop_assert_eq!(holder.median(), snapshot[snapshot.len() / 2]);
        }
    }

    #[test]
    fn full_holder_keeps_the_largest(values in proptest::collection::vec(0u64..1_000_000u64, 30..60)) {
        let holder = PeakHolder::new(20);
        for &v in &values {
            holder.add(v);
        }
        let mut expected = values;
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(20);
        prop_assert_eq!(holder.snapshot(), expected);
    }
}
