//! Range filter deriving the visible subset of samples.

use super::sample::Sample;
use super::window::TimeWindow;

/// Return every sample whose timestamp lies in `window`, in input order.
///
/// The input is never modified.
pub fn apply(samples: &[Sample], window: &TimeWindow) -> Vec<Sample> {
    if window.is_all_time() {
        return samples.to_vec();
    }

    samples
        .iter()
        .filter(|s| window.contains(s.timestamp))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(100, 20),
            Sample::new(150, 21),
            Sample::new(200, 22),
            Sample::new(250, 22),
        ]
    }

    #[test]
    fn test_all_time_returns_everything() {
        assert_eq!(apply(&samples(), &TimeWindow::ALL_TIME), samples());
    }

    #[test]
    fn test_inclusive_start_exclusive_end() {
        let window = TimeWindow::between(150, 250).unwrap();
        assert_eq!(
            apply(&samples(), &window),
            vec![Sample::new(150, 21), Sample::new(200, 22)]
        );
    }

    #[test]
    fn test_open_ended_windows() {
        assert_eq!(apply(&samples(), &TimeWindow::since(200)).len(), 2);
        assert_eq!(apply(&samples(), &TimeWindow::until(200)).len(), 2);
    }

    #[test]
    fn test_does_not_reorder() {
        let input = vec![Sample::new(300, 1), Sample::new(100, 2), Sample::new(200, 3)];
        let out = apply(&input, &TimeWindow::between(100, 301).unwrap());
        assert_eq!(out, input);
    }

    fn arb_samples() -> impl Strategy<Value = Vec<Sample>> {
        prop::collection::vec((0i64..1_000, any::<u8>()), 0..64)
            .prop_map(|v| v.into_iter().map(|(t, c)| Sample::new(t, c)).collect())
    }

    fn arb_window() -> impl Strategy<Value = TimeWindow> {
        (0i64..1_000, 0i64..1_000).prop_map(|(a, b)| {
            TimeWindow::between(a.min(b), a.max(b)).unwrap()
        })
    }

    fn is_subsequence(needle: &[Sample], haystack: &[Sample]) -> bool {
        let mut it = haystack.iter();
        needle.iter().all(|n| it.any(|h| h == n))
    }

    proptest! {
        #[test]
        fn prop_idempotent(samples in arb_samples(), window in arb_window()) {
            let once = apply(&samples, &window);
            let twice = apply(&once, &window);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_narrower_window_is_subsequence(
            samples in arb_samples(),
            outer in arb_window(),
            a in 0i64..1_000,
            b in 0i64..1_000,
        ) {
            let (lo, hi) = (a.min(b), a.max(b));
            let s = outer.start().unwrap();
            let e = outer.end().unwrap();
            let inner = TimeWindow::between(lo.clamp(s, e), hi.clamp(s, e)).unwrap();
            prop_assert!(inner.is_within(&outer));

            let narrow = apply(&samples, &inner);
            let wide = apply(&samples, &outer);
            prop_assert!(is_subsequence(&narrow, &wide));
        }

        #[test]
        fn prop_every_result_is_inside(samples in arb_samples(), window in arb_window()) {
            for s in apply(&samples, &window) {
                prop_assert!(window.contains(s.timestamp));
            }
        }
    }
}
