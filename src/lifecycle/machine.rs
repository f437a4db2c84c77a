use std::collections::VecDeque;

use crate::state_machine::StateMachine;

use super::drain::DrainOutcome;
use super::signals::ProcessSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    Signal(ProcessSignal),
    DrainFinished(DrainOutcome),
}

/// Work the runner must carry out on behalf of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutput {
    /// Hand the listening socket to a freshly spawned successor; keep serving meanwhile.
    SpawnSuccessor,
    /// Stop accepting and run the bounded drain hook.
    BeginDrain,
    /// Stop the RPC server and exit.
    Stop,
}

/// Running → Draining → Stopped, driven by process signals.
#[derive(Debug)]
pub struct LifecycleMachine {
    state: LifecycleState,
    pending: VecDeque<LifecycleOutput>,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Running,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn process_signal(&mut self, signal: ProcessSignal) {
        if self.state != LifecycleState::Running {
            return;
        }

        match signal {
            ProcessSignal::Reload => self.pending.push_back(LifecycleOutput::SpawnSuccessor),
            ProcessSignal::Interrupt | ProcessSignal::Terminate => {
                self.state = LifecycleState::Draining;
                self.pending.push_back(LifecycleOutput::BeginDrain);
            }
        }
    }

    fn process_drain_finished(&mut self) {
        if self.state == LifecycleState::Draining {
            self.state = LifecycleState::Stopped;
            self.pending.push_back(LifecycleOutput::Stop);
        }
    }
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for LifecycleMachine {
    type Input = LifecycleInput;
    type Output = LifecycleOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            LifecycleInput::Signal(signal) => self.process_signal(signal),
            // timed out or not, draining ends here
            LifecycleInput::DrainFinished(_) => self.process_drain_finished(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_outputs(machine: &mut LifecycleMachine) -> Vec<LifecycleOutput> {
        std::iter::from_fn(|| machine.poll_output()).collect()
    }

    #[test]
    fn test_starts_running() {
        let mut machine = LifecycleMachine::new();
        assert_eq!(machine.state(), LifecycleState::Running);
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_terminate_drains_then_stops() {
        let mut machine = LifecycleMachine::new();

        machine.process_input(LifecycleInput::Signal(ProcessSignal::Terminate));
        assert_eq!(machine.state(), LifecycleState::Draining);
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::BeginDrain]);

        machine.process_input(LifecycleInput::DrainFinished(DrainOutcome::Completed));
        assert_eq!(machine.state(), LifecycleState::Stopped);
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::Stop]);
    }

    #[test]
    fn test_interrupt_behaves_like_terminate() {
        let mut machine = LifecycleMachine::new();
        machine.process_input(LifecycleInput::Signal(ProcessSignal::Interrupt));
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::BeginDrain]);
    }

    #[test]
    fn test_drain_timeout_still_stops() {
        let mut machine = LifecycleMachine::new();
        machine.process_input(LifecycleInput::Signal(ProcessSignal::Terminate));
        let _ = drain_outputs(&mut machine);

        machine.process_input(LifecycleInput::DrainFinished(DrainOutcome::TimedOut));
        assert_eq!(machine.state(), LifecycleState::Stopped);
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::Stop]);
    }

    #[test]
    fn test_reload_keeps_running() {
        let mut machine = LifecycleMachine::new();

        machine.process_input(LifecycleInput::Signal(ProcessSignal::Reload));
        assert_eq!(machine.state(), LifecycleState::Running);
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::SpawnSuccessor]);

        // the successor's readiness signal
        machine.process_input(LifecycleInput::Signal(ProcessSignal::Terminate));
        assert_eq!(drain_outputs(&mut machine), vec![LifecycleOutput::BeginDrain]);
    }

    #[test]
    fn test_signals_ignored_while_draining() {
        let mut machine = LifecycleMachine::new();
        machine.process_input(LifecycleInput::Signal(ProcessSignal::Terminate));
        let _ = drain_outputs(&mut machine);

        machine.process_input(LifecycleInput::Signal(ProcessSignal::Reload));
        machine.process_input(LifecycleInput::Signal(ProcessSignal::Interrupt));
        assert!(machine.poll_output().is_none());
        assert_eq!(machine.state(), LifecycleState::Draining);
    }

    #[test]
    fn test_drain_finished_ignored_while_running() {
        let mut machine = LifecycleMachine::new();
        machine.process_input(LifecycleInput::DrainFinished(DrainOutcome::Completed));
        assert_eq!(machine.state(), LifecycleState::Running);
        assert!(machine.poll_output().is_none());
    }
}
