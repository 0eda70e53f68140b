//! Property-based tests for schedules and interpolation.

use super::*;
use proptest::prelude::*;

fn any_fn() -> impl Strategy<Value = InterpolationFn> {
    prop_oneof![
        Just(InterpolationFn::Linear),
        Just(InterpolationFn::Cubic),
        Just(InterpolationFn::InverseCubic),
    ]
}

proptest! {
    /// Interpolated values never leave the [init, final] band
    #[test]
    fn interpolation_bounded(
        start in 0.0f64..50.0,
        span in 0.1f64..50.0,
        init in 0.0f64..0.5,
        fin in 0.5f64..1.0,
        x in -10.0f64..120.0,
        func in any_fn(),
    ) {
        let y = interpolate(x, start, start + span, init, fin, func);
        prop_assert!(y >= init - 1e-12);
        prop_assert!(y <= fin + 1e-12);
    }

    /// Interpolation is monotonic in x for increasing targets
    #[test]
    fn interpolation_monotonic(
        span in 1.0f64..20.0,
        func in any_fn(),
        a in 0.0f64..1.0,
        b in 0.0f64..1.0,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let y_lo = interpolate(lo * span, 0.0, span, 0.0, 0.9, func);
        let y_hi = interpolate(hi * span, 0.0, span, 0.0, 0.9, func);
        prop_assert!(y_lo <= y_hi + 1e-12);
    }

    /// Cubic is never below linear, inverse cubic never above
    #[test]
    fn curve_ordering(t in 0.0f64..1.0) {
        let linear = InterpolationFn::Linear.curve(t);
        prop_assert!(InterpolationFn::Cubic.curve(t) >= linear - 1e-12);
        prop_assert!(InterpolationFn::InverseCubic.curve(t) <= linear + 1e-12);
    }

    /// An update fires at most once per frequency window
    #[test]
    fn updates_spaced_by_frequency(spe in 1usize..20, freq_tenths in 1u32..30) {
        let freq = f64::from(freq_tenths) / 10.0;
        let schedule = Schedule::new(0.0, 5.0, freq);
        let freq_steps = schedule.frequency_steps(spe).unwrap() as i64;
        let mut state = ScheduleState::default();
        let mut last: Option<i64> = None;
        for step in 0..(5 * spe as i64) {
            let epoch = step as f64 / spe as f64;
            if state.update_ready(&schedule, epoch, spe) {
                if let Some(prev) = last {
                    prop_assert!(step - prev >= freq_steps);
                }
                state.mark_updated(&schedule, epoch, spe);
                last = Some(step);
            }
        }
    }
}
