/// The [`StateMachine`] trait provides calling semantics for pure, deterministic state machines.
///
/// # Functionality
/// A state machine consumes defined inputs and produces defined outputs. When there are several
/// kinds of each, they are grouped into enums through the associated types
/// [`Input`](StateMachine::Input) and [`Output`](StateMachine::Output), and the implementor maps
/// each variant onto its own inherent method in [`process_input`](StateMachine::process_input)
/// and [`poll_output`](StateMachine::poll_output).
///
/// Keeping the dispatch in this trait lets the machine itself stay focused on its transitions,
/// while an outer runner owns everything impure: reading signals, touching sockets, spawning
/// processes and waiting on timers.
///
/// # Invariants
/// Implementors *must* uphold all of the following.
///
/// ## No Interior Mutability
/// State is mutated only through `&mut self`. No [`std::cell`] containers, no [`std::sync`]
/// locks, no shared ownership through [`Rc`](std::rc::Rc) or [`Arc`](std::sync::Arc).
///
/// ## No IO
/// No [`std::io`], [`std::net`], process or signal calls. Anything observed from the outside
/// world arrives as input; anything the machine wants done leaves as output.
///
/// ### No System Time
/// Timeouts are measured by the runner and reported back as input (for example "drain
/// finished" or "drain timed out"), never read from the clock inside the machine.
///
/// ## No Concurrency or Async
/// The machine never spawns tasks or awaits. Given the same sequence of inputs it produces the
/// same sequence of outputs, which is what makes it testable without a runtime.
///
/// ## No Blocking
/// [`process_input`](StateMachine::process_input) and [`poll_output`](StateMachine::poll_output)
/// return promptly so the machine can be driven from async code.
///
/// # Side Effects
/// Logging and metrics are allowed, provided the machine's logic never depends on their outcome.
///
/// # Example
/// ```ignore
/// pub struct Door {
///     open: bool,
///     pending: Option<DoorOutput>,
/// }
///
/// pub enum DoorInput {
///     Push,
///     Pull,
/// }
///
/// pub enum DoorOutput {
///     Opened,
///     Closed,
/// }
///
/// impl StateMachine for Door {
///     type Input = DoorInput;
///     type Output = DoorOutput;
///
///     fn process_input(&mut self, input: Self::Input) {
///         match input {
///             DoorInput::Push if !self.open => {
///                 self.open = true;
///                 self.pending = Some(DoorOutput::Opened);
///             }
///             DoorInput::Pull if self.open => {
///                 self.open = false;
///                 self.pending = Some(DoorOutput::Closed);
///             }
///             _ => {}
///         }
///     }
///
///     fn poll_output(&mut self) -> Option<Self::Output> {
///         self.pending.take()
///     }
/// }
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    ///
    /// This is often an enum containing all the possible variants of input, but can also be a
    /// struct when there is only one input variant.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) by the state machine.
    ///
    /// This is often an enum containing all the possible variants of output, but can also be a
    /// struct when there is only one output variant.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
