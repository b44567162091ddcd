use proptest::prelude::*;
use weir_balancer::SlopeScorer;

proptest! {
    #[test]
    fn score_is_bounded(values in proptest::collection::vec(-1e12f64..1e12f64, 1..100)) {
        let mut scorer = SlopeScorer::new();
        for v in values {
            let s = scorer.score(v);
            prop_assert!(s.abs() <= 1.0 + 1e-9, "score {s} for input {v}");
        }
    }

    #[test]
    fn sign_follows_input(v in 1e-6f64..1e12f64) {
        let mut scorer = SlopeScorer::new();
        prop_assert!(scorer.score(v) > 0.0);
        let mut scorer = SlopeScorer::new();
        prop_assert!(scorer.score(-v) < 0.0);
    }
}

#[test]
fn nan_does_not_disturb_the_maximum() {
    let mut scorer = SlopeScorer::new();
    assert_eq!(scorer.score(f64::NAN), 0.0);
    // A fresh finite value still normalizes against itself.
    let s = scorer.score(123.0);
    assert!((s - 1.0).abs() < 1e-12, "{s}");
}
