use std::fmt;

/// Per-worker lifecycle. `Serving -> Draining` happens on room-empty or
/// explicit terminate; `* -> Terminated` is always legal (a crash can
/// happen from any state) but `Terminated` itself is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Registering,
    Ready,
    Serving,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("illegal worker transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: WorkerState,
    pub to: WorkerState,
}

impl WorkerState {
    /// Validates and returns `to` if the edge is legal, per the state
    /// machine in §4.4.
    pub fn transition(self, to: WorkerState) -> Result<WorkerState, IllegalTransition> {
        use WorkerState::*;
        if self == Terminated {
            return Err(IllegalTransition { from: self, to });
        }
        let legal = matches!(
            (self, to),
            (Spawning, Registering)
                | (Registering, Ready)
                | (Ready, Serving)
                | (Serving, Draining)
                | (_, Terminated)
        );
        if legal {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Spawning => "spawning",
            WorkerState::Registering => "registering",
            WorkerState::Ready => "ready",
            WorkerState::Serving => "serving",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_forward_path_succeeds() {
        let mut s = WorkerState::Spawning;
        for next in [
            WorkerState::Registering,
            WorkerState::Ready,
            WorkerState::Serving,
            WorkerState::Draining,
            WorkerState::Terminated,
        ] {
            s = s.transition(next).unwrap();
        }
        assert_eq!(s, WorkerState::Terminated);
    }

    #[test]
    fn skipping_a_state_is_illegal() {
        assert!(WorkerState::Spawning.transition(WorkerState::Serving).is_err());
    }

    #[test]
    fn any_state_can_terminate() {
        assert!(WorkerState::Spawning.transition(WorkerState::Terminated).is_ok());
        assert!(WorkerState::Ready.transition(WorkerState::Terminated).is_ok());
    }

    #[test]
    fn terminated_is_a_sink() {
        assert!(WorkerState::Terminated
            .transition(WorkerState::Spawning)
            .is_err());
    }
}
