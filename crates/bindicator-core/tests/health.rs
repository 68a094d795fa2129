use bindicator_core::{
    AccessWindow, HealthPolicy, HealthState,
    access::DEFAULT_WINDOW,
};
use embassy_time::{Duration, Instant};
use proptest::prelude::*;

const BOOT: Instant = Instant::from_secs(0);

proptest! {
    #[test]
    fn unhealthy_exactly_after_a_run_of_three_failures(
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let mut state = HealthState::new(HealthPolicy::default(), BOOT);
        let mut run = 0u32;
        let mut tripped = false;
        for (minute, ok) in outcomes.iter().enumerate() {
            let now = BOOT + Duration::from_secs(60 * (minute as u64 + 1));
            if *ok {
                state.report_success_at(now);
                run = 0;
            } else {
                state.report_failure_at(now);
                run += 1;
                tripped |= run >= 3;
            }
            prop_assert_eq!(state.is_healthy(), !tripped);
        }
    }

    #[test]
    fn window_reads_enabled_only_inside_its_timeout(
        timeout_secs in 0u64..3_600,
        probe_secs in 0u64..7_200,
    ) {
        let mut window = AccessWindow::default();
        let start = Instant::from_secs(500);
        let effective = window.enable_at(Duration::from_secs(timeout_secs), start);
        if timeout_secs == 0 {
            prop_assert_eq!(effective, DEFAULT_WINDOW);
        }
        let probe = start + Duration::from_secs(probe_secs);
        prop_assert_eq!(window.is_enabled_at(probe), Duration::from_secs(probe_secs) < effective);
        window.disable();
        prop_assert!(!window.is_enabled_at(start));
    }
}

#[test]
fn two_failures_and_a_success_stay_healthy() {
    let mut state = HealthState::new(HealthPolicy::default(), BOOT);
    state.report_failure_at(Instant::from_secs(10));
    state.report_failure_at(Instant::from_secs(20));
    state.report_success_at(Instant::from_secs(30));
    assert!(state.is_healthy());
    assert_eq!(state.consecutive_failures(), 0);
    assert!(state.report_failure_at(Instant::from_secs(40)));
}
