#![forbid(unsafe_code)]

//! Property-based invariant tests for deferred coalescing.
//!
//! Verifies, for any observer count and any number of notifications:
//!
//! 1. Enabled: k notifies deliver exactly k refreshes per observer.
//! 2. Deferred: k notifies (k >= 1) coalesce to exactly one refresh per
//!    observer at re-enable time, in both configurations.
//! 3. Interleaved defer/enable windows never deliver more than one refresh
//!    per observer per window, regardless of the notify count per window.

use std::rc::Rc;
use std::sync::Arc;

use proptest::prelude::*;
use pulse_core::{local, sync};

proptest! {
    #[test]
    fn enabled_delivery_is_linear(observers in 0usize..8, notifies in 0usize..16) {
        let control = Rc::new(local::UpdateControl::new());
        let subject = local::Observable::new(Rc::clone(&control));
        let fixtures: Vec<_> = (0..observers)
            .map(|_| pulse_harness::local::CountingObserver::new())
            .collect();
        for fixture in &fixtures {
            subject.attach(fixture);
        }

        for _ in 0..notifies {
            subject.notify_all().unwrap();
        }
        for fixture in &fixtures {
            prop_assert_eq!(fixture.refreshed(), notifies);
        }
    }

    #[test]
    fn deferred_notifies_coalesce_local(observers in 1usize..8, notifies in 1usize..32) {
        let control = Rc::new(local::UpdateControl::new());
        let subject = local::Observable::new(Rc::clone(&control));
        let fixtures: Vec<_> = (0..observers)
            .map(|_| pulse_harness::local::CountingObserver::new())
            .collect();
        for fixture in &fixtures {
            subject.attach(fixture);
        }

        control.disable_updates(true);
        for _ in 0..notifies {
            subject.notify_all().unwrap();
        }
        for fixture in &fixtures {
            prop_assert_eq!(fixture.refreshed(), 0);
        }

        control.enable_updates().unwrap();
        for fixture in &fixtures {
            prop_assert_eq!(fixture.refreshed(), 1);
        }
    }

    #[test]
    fn deferred_notifies_coalesce_sync(observers in 1usize..8, notifies in 1usize..32) {
        let control = Arc::new(sync::UpdateControl::new());
        let subject = sync::Observable::new(Arc::clone(&control));
        let fixtures: Vec<_> = (0..observers)
            .map(|_| pulse_harness::sync::CountingObserver::new())
            .collect();
        for fixture in &fixtures {
            subject.attach(fixture);
        }

        control.disable_updates(true);
        for _ in 0..notifies {
            subject.notify_all().unwrap();
        }

        control.enable_updates().unwrap();
        for fixture in &fixtures {
            prop_assert_eq!(fixture.refreshed(), 1);
        }
    }

    #[test]
    fn each_deferral_window_replays_at_most_once(windows in prop::collection::vec(0usize..6, 1..5)) {
        let control = Rc::new(local::UpdateControl::new());
        let subject = local::Observable::new(Rc::clone(&control));
        let fixture = pulse_harness::local::CountingObserver::new();
        subject.attach(&fixture);

        let mut expected = 0;
        for notifies in windows {
            control.disable_updates(true);
            for _ in 0..notifies {
                subject.notify_all().unwrap();
            }
            control.enable_updates().unwrap();
            // A window with no notifications replays nothing.
            if notifies > 0 {
                expected += 1;
            }
            prop_assert_eq!(fixture.refreshed(), expected);
        }
    }
}
