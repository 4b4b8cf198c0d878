//! View selector - maps a printer snapshot to the view to show.
//!
//! Busy conditions are an ordered rule table; the first match wins. Below
//! them sits the print job tracking: a job ("session") opens when printing
//! is first seen and closes either on cancel (progress below the completion
//! threshold) or after the print-complete view has been held for the dwell.

use super::{Transition, ViewState};
use crate::config::{COMPLETION_THRESHOLD_PERCENT, PRINT_START_FALLBACK_PERCENT};
use crate::moonraker::PrinterSnapshot;

type Rule = (fn(&PrinterSnapshot) -> bool, ViewState);

/// Busy views, highest priority first.
const BUSY_RULES: [Rule; 5] = [
    (|s| s.homing, ViewState::Homing),
    (|s| s.probing, ViewState::Probing),
    (|s| s.leveling, ViewState::Leveling),
    (PrinterSnapshot::nozzle_heating, ViewState::HeatingNozzle),
    (PrinterSnapshot::bed_heating, ViewState::HeatingBed),
];

/// First busy view whose condition holds.
pub fn busy_view(s: &PrinterSnapshot) -> Option<ViewState> {
    BUSY_RULES
        .iter()
        .find(|(applies, _)| applies(s))
        .map(|&(_, view)| view)
}

/// Print-complete one-shot latch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CompletionLatch {
    shown: bool,
    dwell_start_ms: Option<u64>,
}

pub struct ViewSelector {
    current: ViewState,
    session: bool,
    latch: CompletionLatch,
    /// Progress was seen at zero since the last job ended, so a small
    /// positive value means a new job just started.
    fallback_armed: bool,
    dwell_ms: u64,
}

impl ViewSelector {
    pub fn new(dwell_ms: u64) -> Self {
        Self {
            current: ViewState::Idle,
            session: false,
            latch: CompletionLatch::default(),
            fallback_armed: false,
            dwell_ms,
        }
    }

    pub fn current(&self) -> ViewState {
        self.current
    }

    /// A print job is being tracked.
    pub fn in_session(&self) -> bool {
        self.session
    }

    /// Completion view already shown for the current or last job.
    pub fn completion_shown(&self) -> bool {
        self.latch.shown
    }

    /// Run the cascade. Returns the transition when the view changes;
    /// re-evaluating an unchanged snapshot returns `None`.
    pub fn evaluate(&mut self, s: &PrinterSnapshot, now_ms: u64) -> Option<Transition> {
        let target = self.target(s, now_ms);
        if target == self.current {
            return None;
        }
        let t = Transition {
            from: self.current,
            to: target,
        };
        info!("View: {:?} -> {:?}", t.from, t.to);
        self.current = target;
        Some(t)
    }

    fn target(&mut self, s: &PrinterSnapshot, now_ms: u64) -> ViewState {
        let pct = s.progress_percent;
        if pct <= 0.0 {
            self.fallback_armed = true;
        }

        // Inside a job the printing flag alone decides; the progress
        // fallback can only open a job.
        let just_started = !self.session
            && self.fallback_armed
            && pct > 0.0
            && pct < PRINT_START_FALLBACK_PERCENT;
        let printing = s.printing || s.paused || just_started;

        if printing && !self.session {
            info!("View: print started");
            self.session = true;
            self.latch = CompletionLatch::default();
        }

        // Busy views preempt everything, including a running dwell.
        if let Some(view) = busy_view(s) {
            return view;
        }
        if printing {
            return ViewState::Printing;
        }
        if !self.session {
            return ViewState::Idle;
        }

        if pct < COMPLETION_THRESHOLD_PERCENT {
            info!("View: print cancelled at {}%", pct);
            self.end_session();
            self.latch = CompletionLatch::default();
            return ViewState::Idle;
        }

        if self.latch.shown {
            self.end_session();
            return ViewState::Idle;
        }
        let start = *self.latch.dwell_start_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(start) < self.dwell_ms {
            return ViewState::PrintComplete;
        }
        debug!("View: completion dwell over");
        self.latch.shown = true;
        self.end_session();
        ViewState::Idle
    }

    fn end_session(&mut self) {
        self.session = false;
        self.fallback_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COMPLETE_DWELL_MS;
    use proptest::prelude::*;

    fn printing(pct: f32) -> PrinterSnapshot {
        let mut s = PrinterSnapshot::new();
        s.connected = true;
        s.printer_ready = true;
        s.printing = true;
        s.progress_percent = pct;
        s
    }

    fn stopped(pct: f32) -> PrinterSnapshot {
        let mut s = printing(pct);
        s.printing = false;
        s
    }

    #[test]
    fn idle_by_default() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        assert_eq!(sel.evaluate(&PrinterSnapshot::new(), 0), None);
        assert_eq!(sel.current(), ViewState::Idle);
    }

    #[test]
    fn unchanged_snapshot_is_a_no_op() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        let s = printing(30.0);
        assert_eq!(
            sel.evaluate(&s, 0),
            Some(Transition {
                from: ViewState::Idle,
                to: ViewState::Printing
            })
        );
        for t in 1..50 {
            assert_eq!(sel.evaluate(&s, t * 200), None);
        }
    }

    #[test]
    fn completion_held_for_dwell_then_idle_once() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        sel.evaluate(&printing(96.0), 0);
        let done = stopped(97.0);

        assert_eq!(sel.evaluate(&done, 1_000).map(|t| t.to), Some(ViewState::PrintComplete));
        let mut now = 1_000;
        while now < 1_000 + COMPLETE_DWELL_MS - 200 {
            now += 200;
            assert_eq!(sel.evaluate(&done, now), None);
        }
        assert_eq!(
            sel.evaluate(&done, 1_000 + COMPLETE_DWELL_MS).map(|t| t.to),
            Some(ViewState::Idle)
        );
        assert!(sel.completion_shown());

        // Still 97% and not printing: stays idle, no second completion.
        for i in 1..100 {
            assert_eq!(sel.evaluate(&done, 20_000 + i * 200), None);
        }
    }

    #[test]
    fn cancel_skips_completion() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        sel.evaluate(&printing(40.0), 0);
        assert_eq!(
            sel.evaluate(&stopped(40.0), 200),
            Some(Transition {
                from: ViewState::Printing,
                to: ViewState::Idle
            })
        );
        assert!(!sel.in_session());
        assert!(!sel.completion_shown());
    }

    #[test]
    fn new_print_resets_latch() {
        let mut sel = ViewSelector::new(1_000);
        sel.evaluate(&printing(99.0), 0);
        sel.evaluate(&stopped(100.0), 100);
        sel.evaluate(&stopped(100.0), 1_100);
        assert!(sel.completion_shown());

        sel.evaluate(&printing(0.0), 5_000);
        assert!(!sel.completion_shown());
        sel.evaluate(&printing(98.0), 6_000);
        assert_eq!(
            sel.evaluate(&stopped(98.0), 7_000).map(|t| t.to),
            Some(ViewState::PrintComplete)
        );
    }

    #[test]
    fn busy_view_preempts_dwell_without_restarting_it() {
        let mut sel = ViewSelector::new(10_000);
        sel.evaluate(&printing(99.0), 0);
        sel.evaluate(&stopped(100.0), 1_000);
        let mut homing = stopped(100.0);
        homing.homing = true;
        assert_eq!(sel.evaluate(&homing, 2_000).map(|t| t.to), Some(ViewState::Homing));
        // Dwell started at 1 s, so at 11 s it is over.
        assert_eq!(
            sel.evaluate(&stopped(100.0), 11_000).map(|t| t.to),
            Some(ViewState::Idle)
        );
    }

    #[test]
    fn heating_mid_print_then_back_to_printing() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        sel.evaluate(&printing(50.0), 0);
        let mut s = printing(50.0);
        s.nozzle_actual = 180;
        s.nozzle_target = 240;
        assert_eq!(sel.evaluate(&s, 200).map(|t| t.to), Some(ViewState::HeatingNozzle));
        s.nozzle_actual = 239;
        assert_eq!(sel.evaluate(&s, 400).map(|t| t.to), Some(ViewState::Printing));
    }

    #[test]
    fn small_progress_opens_a_job_before_the_flag() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        sel.evaluate(&stopped(0.0), 0);
        assert_eq!(
            sel.evaluate(&stopped(0.4), 200).map(|t| t.to),
            Some(ViewState::Printing)
        );
        assert!(sel.in_session());
        // Flag propagated, then the job is cancelled while still under 1%.
        sel.evaluate(&printing(0.6), 400);
        assert_eq!(
            sel.evaluate(&stopped(0.6), 600).map(|t| t.to),
            Some(ViewState::Idle)
        );
        // Stale progress does not reopen the job.
        assert_eq!(sel.evaluate(&stopped(0.6), 800), None);
    }

    #[test]
    fn fallback_needs_a_zero_reading_first() {
        let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
        // Boot with a stale sub-1% reading.
        assert_eq!(sel.evaluate(&stopped(0.5), 0), None);
    }

    fn snapshot() -> impl Strategy<Value = PrinterSnapshot> {
        (
            proptest::collection::vec(any::<bool>(), 7),
            0i16..300,
            0i16..300,
            0i16..120,
            0i16..120,
            0.0f32..100.0,
        )
            .prop_map(|(f, na, nt, ba, bt, pct)| {
                let mut s = PrinterSnapshot::new();
                s.connected = true;
                s.printer_ready = true;
                s.printing = f[0];
                s.paused = f[1];
                s.homing = f[2];
                s.probing = f[3];
                s.leveling = f[4];
                s.heating_nozzle = f[5];
                s.heating_bed = f[6];
                s.nozzle_actual = na;
                s.nozzle_target = nt;
                s.bed_actual = ba;
                s.bed_target = bt;
                s.progress_percent = pct;
                s
            })
    }

    proptest! {
        #[test]
        fn busy_priority_holds(history in proptest::collection::vec(snapshot(), 0..8), s in snapshot()) {
            let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
            let mut now = 0;
            for h in &history {
                now += 200;
                sel.evaluate(h, now);
            }
            sel.evaluate(&s, now + 200);
            let expected = if s.homing {
                Some(ViewState::Homing)
            } else if s.probing {
                Some(ViewState::Probing)
            } else if s.leveling {
                Some(ViewState::Leveling)
            } else if s.nozzle_heating() {
                Some(ViewState::HeatingNozzle)
            } else if s.bed_heating() {
                Some(ViewState::HeatingBed)
            } else {
                None
            };
            match expected {
                Some(view) => prop_assert_eq!(sel.current(), view),
                None => prop_assert!(!sel.current().is_busy()),
            }
        }

        #[test]
        fn reevaluation_is_idempotent(s in snapshot(), t in 0u64..1_000_000) {
            let mut sel = ViewSelector::new(COMPLETE_DWELL_MS);
            sel.evaluate(&s, t);
            prop_assert_eq!(sel.evaluate(&s, t), None);
        }
    }
}
