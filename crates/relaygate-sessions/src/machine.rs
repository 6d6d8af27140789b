//! Session lifecycle transitions.
//!
//! ```text
//! INIT ──qr──▶ AWAITING_SCAN ──ready──▶ READY ──disconnect──▶ DISCONNECTED
//!   └──────────────ready──────────────────▲                      │   │
//!                                         └───reconnect ok───────┘   │
//!                      budget exhausted / fatal / close ──▶ CLOSED ◀─┘
//! ```
//!
//! The machine is pure: it decides the next state and the follow-up action,
//! the session actor performs the side effects.

use relaygate_core::SessionState;

/// Inputs that can move a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    ScanNeeded,
    Ready,
    Disconnected(String),
    /// An `initialize` call failed or timed out.
    InitFailed(String),
    Fatal(String),
    CloseRequested,
}

/// Side effect owed after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    /// Ask the adapter to initialize again (consumes one reconnect).
    Reinitialize,
    /// Tear the adapter down and retire the session.
    Teardown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: Option<String>,
    pub action: Action,
}

#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    reconnect_budget: u32,
    reconnects_left: u32,
}

impl StateMachine {
    pub fn new(reconnect_budget: u32) -> Self {
        Self {
            state: SessionState::Init,
            reconnect_budget,
            reconnects_left: reconnect_budget,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reconnects_left(&self) -> u32 {
        self.reconnects_left
    }

    /// Apply a signal. `None` means the signal is irrelevant in the current
    /// state and nothing changes.
    pub fn apply(&mut self, signal: Signal) -> Option<Transition> {
        use SessionState::{AwaitingScan, Closed, Disconnected, Init, Ready};

        let from = self.state;
        let (to, reason, action) = match (from, signal) {
            (Closed, _) => return None,

            (_, Signal::CloseRequested) => (Closed, Some("close requested".into()), Action::Teardown),
            (_, Signal::Fatal(reason)) => (Closed, Some(reason), Action::Teardown),

            (Init | AwaitingScan | Disconnected, Signal::ScanNeeded) => (AwaitingScan, None, Action::None),
            (Ready, Signal::ScanNeeded) => return None,

            (Init | AwaitingScan | Disconnected, Signal::Ready) => {
                self.reconnects_left = self.reconnect_budget;
                (Ready, None, Action::None)
            }
            (Ready, Signal::Ready) => return None,

            (Init | AwaitingScan | Ready | Disconnected, Signal::Disconnected(reason)) => {
                self.after_failure(reason)
            }

            (Init | AwaitingScan, Signal::InitFailed(reason)) => {
                (Closed, Some(format!("initialization failed: {reason}")), Action::Teardown)
            }
            (Disconnected, Signal::InitFailed(reason)) => {
                self.after_failure(format!("reconnect failed: {reason}"))
            }
            (Ready, Signal::InitFailed(_)) => return None,
        };

        self.state = to;
        Some(Transition {
            from,
            to,
            reason,
            action,
        })
    }

    /// Spend a reconnect if any is left, otherwise close.
    fn after_failure(&mut self, reason: String) -> (SessionState, Option<String>, Action) {
        if self.reconnects_left > 0 {
            self.reconnects_left -= 1;
            (SessionState::Disconnected, Some(reason), Action::Reinitialize)
        } else {
            (
                SessionState::Closed,
                Some(format!("{reason}; reconnect attempts exhausted")),
                Action::Teardown,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    fn ready_machine(budget: u32) -> StateMachine {
        let mut m = StateMachine::new(budget);
        m.apply(Signal::Ready).unwrap();
        m
    }

    #[test]
    fn scan_then_ready() {
        let mut m = StateMachine::new(1);
        let t = m.apply(Signal::ScanNeeded).unwrap();
        assert_eq!((t.from, t.to, t.action), (Init, AwaitingScan, Action::None));
        let t = m.apply(Signal::Ready).unwrap();
        assert_eq!((t.from, t.to), (AwaitingScan, Ready));
    }

    #[test]
    fn restored_credentials_skip_scan() {
        let mut m = StateMachine::new(1);
        assert_eq!(m.apply(Signal::Ready).unwrap().to, Ready);
    }

    #[test]
    fn refreshed_qr_re_enters_awaiting_scan() {
        let mut m = StateMachine::new(1);
        m.apply(Signal::ScanNeeded).unwrap();
        let t = m.apply(Signal::ScanNeeded).unwrap();
        assert_eq!((t.from, t.to), (AwaitingScan, AwaitingScan));
    }

    #[test]
    fn qr_and_ready_ignored_while_ready() {
        let mut m = ready_machine(1);
        assert!(m.apply(Signal::ScanNeeded).is_none());
        assert!(m.apply(Signal::Ready).is_none());
        assert!(m.apply(Signal::InitFailed("late".into())).is_none());
        assert_eq!(m.state(), Ready);
    }

    #[test]
    fn disconnect_triggers_exactly_one_reinitialize() {
        let mut m = ready_machine(1);
        let t = m.apply(Signal::Disconnected("NAVIGATION".into())).unwrap();
        assert_eq!((t.to, t.action), (Disconnected, Action::Reinitialize));
        assert_eq!(t.reason.as_deref(), Some("NAVIGATION"));
        assert_eq!(m.reconnects_left(), 0);

        let t = m.apply(Signal::InitFailed("browser crashed".into())).unwrap();
        assert_eq!((t.to, t.action), (Closed, Action::Teardown));
        assert!(t.reason.unwrap().contains("exhausted"));
    }

    #[test]
    fn repeated_disconnect_without_ready_closes() {
        let mut m = ready_machine(1);
        m.apply(Signal::Disconnected("a".into())).unwrap();
        let t = m.apply(Signal::Disconnected("b".into())).unwrap();
        assert_eq!((t.from, t.to), (Disconnected, Closed));
    }

    #[test]
    fn successful_reconnect_restores_budget() {
        let mut m = ready_machine(1);
        m.apply(Signal::Disconnected("a".into())).unwrap();
        assert_eq!(m.apply(Signal::Ready).unwrap().to, Ready);
        assert_eq!(m.reconnects_left(), 1);

        let t = m.apply(Signal::Disconnected("b".into())).unwrap();
        assert_eq!(t.action, Action::Reinitialize);
    }

    #[test]
    fn reconnect_may_require_a_new_scan() {
        let mut m = ready_machine(1);
        m.apply(Signal::Disconnected("LOGOUT".into())).unwrap();
        assert_eq!(m.apply(Signal::ScanNeeded).unwrap().to, AwaitingScan);
    }

    #[test]
    fn zero_budget_closes_on_first_disconnect() {
        let mut m = ready_machine(0);
        let t = m.apply(Signal::Disconnected("gone".into())).unwrap();
        assert_eq!((t.to, t.action), (Closed, Action::Teardown));
    }

    #[test]
    fn larger_budget_allows_more_reinitializations() {
        let mut m = ready_machine(2);
        m.apply(Signal::Disconnected("a".into())).unwrap();
        let t = m.apply(Signal::InitFailed("x".into())).unwrap();
        assert_eq!((t.to, t.action), (Disconnected, Action::Reinitialize));
        let t = m.apply(Signal::InitFailed("y".into())).unwrap();
        assert_eq!(t.to, Closed);
    }

    #[test]
    fn initial_init_failure_closes() {
        let mut m = StateMachine::new(1);
        let t = m.apply(Signal::InitFailed("no browser".into())).unwrap();
        assert_eq!((t.to, t.action), (Closed, Action::Teardown));
        assert_eq!(t.reason.as_deref(), Some("initialization failed: no browser"));
    }

    #[test]
    fn fatal_and_close_from_any_state() {
        for setup in [Signal::ScanNeeded, Signal::Ready] {
            let mut m = StateMachine::new(1);
            m.apply(setup.clone()).unwrap();
            assert_eq!(m.apply(Signal::Fatal("banned".into())).unwrap().to, Closed);

            let mut m = StateMachine::new(1);
            m.apply(setup).unwrap();
            let t = m.apply(Signal::CloseRequested).unwrap();
            assert_eq!((t.to, t.action), (Closed, Action::Teardown));
        }
    }

    #[test]
    fn closed_is_terminal() {
        let mut m = StateMachine::new(1);
        m.apply(Signal::CloseRequested).unwrap();
        for signal in [
            Signal::ScanNeeded,
            Signal::Ready,
            Signal::Disconnected("x".into()),
            Signal::InitFailed("x".into()),
            Signal::Fatal("x".into()),
            Signal::CloseRequested,
        ] {
            assert!(m.apply(signal).is_none());
        }
        assert_eq!(m.state(), Closed);
    }
}
