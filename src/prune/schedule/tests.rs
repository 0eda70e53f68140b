//! Tests for schedule validation and update timing.

use super::*;

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_end_comparator_codes() {
    // TEST_ID: SCH-001
    for code in [Some(-1), Some(0), Some(1), None] {
        let comparator = EndComparator::from_code(code).unwrap();
        assert_eq!(comparator.code(), code, "SCH-001 FALSIFIED: code {code:?} did not round trip");
    }
    assert!(EndComparator::from_code(Some(2)).is_err());
}

#[test]
fn test_validate_start_below_min() {
    // TEST_ID: SCH-002
    let mut schedule = Schedule::new(-2.0, 5.0, 1.0);
    let err = schedule.validate().unwrap_err();
    assert!(err.to_string().contains("start_epoch"), "SCH-002 FALSIFIED: {err}");
    schedule.start_epoch = 0.0;
    assert!(schedule.validate().is_ok());
}

#[test]
fn test_validate_comparators() {
    // TEST_ID: SCH-003
    let equal = Schedule::new(3.0, 3.0, 1.0);
    assert!(equal.clone().with_end_comparator(EndComparator::Unconstrained).validate().is_ok());
    assert!(equal.clone().with_end_comparator(EndComparator::GreaterOrEqual).validate().is_ok());
    assert!(equal.clone().with_end_comparator(EndComparator::Greater).validate().is_err());

    let backwards = Schedule::new(5.0, 3.0, 1.0);
    assert!(backwards.clone().with_end_comparator(EndComparator::Unconstrained).validate().is_ok());
    assert!(backwards.with_end_comparator(EndComparator::GreaterOrEqual).validate().is_err());
}

#[test]
fn test_validate_open_end_skips_comparator() {
    // TEST_ID: SCH-004
    let schedule = Schedule::new(5.0, -1.0, 1.0).with_end_comparator(EndComparator::Greater);
    assert!(schedule.validate().is_ok());
    let schedule = schedule.with_min_end(0.0);
    assert!(schedule.validate().is_err());
}

#[test]
fn test_validate_fixed_end() {
    // TEST_ID: SCH-005
    let fixed = Schedule::new(0.0, -1.0, -1.0).with_end_comparator(EndComparator::Fixed);
    assert!(fixed.validate().is_ok());
    let mut moved = fixed.clone();
    moved.end_epoch = 4.0;
    assert!(moved.validate().is_err());
}

#[test]
fn test_validate_frequency_floor() {
    // TEST_ID: SCH-006
    let schedule = Schedule::new(0.0, 10.0, 0.5).with_min_frequency(1.0);
    assert!(schedule.validate().is_err());
    assert!(Schedule::new(0.0, 10.0, f64::NAN).validate().is_err());
}

// =============================================================================
// Timing Tests
// =============================================================================

#[test]
fn test_start_and_end_pending() {
    // TEST_ID: SCH-010
    let schedule = Schedule::new(2.0, 4.0, 1.0);
    let mut state = ScheduleState::default();
    assert!(!state.start_pending(&schedule, 1.9, 10));
    assert!(state.start_pending(&schedule, 2.0, 10));
    assert!(!state.end_pending(&schedule, 3.0, 10));

    state.mark_updated(&schedule, 2.0, 10);
    assert!(state.started);
    assert!(!state.start_pending(&schedule, 2.5, 10));
    assert!(state.end_pending(&schedule, 4.0, 10));

    state.mark_updated(&schedule, 4.0, 10);
    assert!(state.ended);
    assert!(!state.update_ready(&schedule, 5.0, 10));
}

#[test]
fn test_one_shot_window_starts_and_ends_together() {
    // TEST_ID: SCH-011
    let schedule = Schedule::new(3.0, 3.0, -1.0);
    let mut state = ScheduleState::default();
    assert!(state.start_pending(&schedule, 3.0, 1));
    assert!(state.end_pending(&schedule, 3.0, 1));
    state.mark_updated(&schedule, 3.0, 1);
    assert!(state.started && state.ended);
}

#[test]
fn test_reached_compares_raw_epochs() {
    // TEST_ID: SCH-015
    let schedule = Schedule::new(1.0, 3.0, 1.0);
    assert!(!schedule.start_reached(0.6), "SCH-015 FALSIFIED: 0.6 must not round up to the start");
    assert!(schedule.start_reached(1.0));
    assert!(!schedule.end_reached(2.9));
    assert!(schedule.end_reached(3.0));

    let open = Schedule::new(-1.0, -1.0, 1.0);
    assert!(open.start_reached(0.0));
    assert!(!open.end_reached(1e9));
}

#[test]
fn test_update_ready_honors_frequency_in_steps() {
    // TEST_ID: SCH-012
    let spe = 10;
    let schedule = Schedule::new(0.0, 10.0, 0.5);
    let mut state = ScheduleState::default();

    let mut fired = Vec::new();
    for step in 0..=30u32 {
        let epoch = f64::from(step) / spe as f64;
        if state.update_ready(&schedule, epoch, spe) {
            state.mark_updated(&schedule, epoch, spe);
            fired.push(step);
        }
    }
    assert_eq!(fired, vec![0, 5, 10, 15, 20, 25, 30], "SCH-012 FALSIFIED: {fired:?}");
}

#[test]
fn test_update_every_step_when_frequency_negative() {
    // TEST_ID: SCH-013
    let schedule = Schedule::new(0.0, -1.0, -1.0);
    let mut state = ScheduleState::default();
    for step in 0..5u32 {
        let epoch = f64::from(step) / 4.0;
        assert!(state.update_ready(&schedule, epoch, 4));
        state.mark_updated(&schedule, epoch, 4);
    }
}

#[test]
fn test_immediate_start() {
    // TEST_ID: SCH-014
    let schedule = Schedule::default();
    let state = ScheduleState::default();
    assert!(state.start_pending(&schedule, 0.0, 1));
    assert!(!state.end_pending(&schedule, 1000.0, 1));
}

#[test]
fn test_frequency_steps_never_zero() {
    assert_eq!(Schedule::new(0.0, 1.0, 0.01).frequency_steps(10), Some(1));
    assert_eq!(Schedule::new(0.0, 1.0, 2.0).frequency_steps(10), Some(20));
    assert_eq!(Schedule::new(0.0, 1.0, -1.0).frequency_steps(10), None);
}

// =============================================================================
// Window Tests
// =============================================================================

#[test]
fn test_overlaps() {
    // TEST_ID: SCH-020
    let a = Schedule::new(0.0, 5.0, 1.0);
    assert!(a.overlaps(&Schedule::new(4.0, 8.0, 1.0)));
    assert!(!a.overlaps(&Schedule::new(5.0, 8.0, 1.0)));
    assert!(a.overlaps(&Schedule::new(2.0, -1.0, 1.0)));
    assert!(a.overlaps(&Schedule::new(3.0, 3.0, 1.0)));
    assert!(!Schedule::new(6.0, 6.0, 1.0).overlaps(&a));
}

#[test]
fn test_shift() {
    // TEST_ID: SCH-021
    let mut schedule = Schedule::new(1.0, 4.0, 1.0);
    schedule.shift(10.0);
    assert_eq!((schedule.start_epoch, schedule.end_epoch), (11.0, 14.0));

    let mut open = Schedule::default();
    open.shift(10.0);
    assert_eq!((open.start_epoch, open.end_epoch), (10.0, -1.0));
}

#[test]
fn test_is_active_window() {
    // TEST_ID: SCH-022
    let window = Schedule::new(2.0, 4.0, -1.0);
    assert!(!window.is_active(1.9));
    assert!(window.is_active(2.0));
    assert!(window.is_active(3.99));
    assert!(!window.is_active(4.0), "SCH-022 FALSIFIED: end is exclusive");
    assert!(Schedule::default().is_active(0.0));
    assert!(Schedule::default().is_active(1e6));
}
