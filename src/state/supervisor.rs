//! Interaction supervisor: the input poll loop
//!
//! Runs on its own thread. Each tick waits on the cancellation token, takes
//! an [`InputSnapshot`], derives the [`Mode`] and runs the matching handler
//! to completion before the next tick. Handlers never run concurrently and
//! an in-flight handler is never pre-empted; cancellation is observed at
//! the next tick boundary.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::mode::{InputSnapshot, Mode};
use crate::events::DeviceEvent;
use crate::input::InputMonitor;
use crate::lifecycle::CancelToken;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Source of per-tick input snapshots
pub trait InputSource: Send + 'static {
    fn snapshot(&self) -> InputSnapshot;
}

/// The three physical input monitors
#[derive(Clone)]
pub struct Inputs {
    pub wake: Arc<InputMonitor>,
    pub television: Arc<InputMonitor>,
    pub person: Arc<InputMonitor>,
}

impl InputSource for Inputs {
    fn snapshot(&self) -> InputSnapshot {
        InputSnapshot {
            awake: self.wake.sample(),
            television: self.television.sample(),
            person: self.person.sample(),
        }
    }
}

/// The conversation actions the supervisor dispatches to
///
/// Each call blocks until the interaction is over. Implementations own any
/// indicator jobs they start and must stop them before returning.
pub trait InteractionHandlers: Send + 'static {
    fn comment_on_television(&mut self) -> anyhow::Result<()>;

    fn talk_with_person(&mut self) -> anyhow::Result<()>;

    /// Move the conversation log aside; returns the archived path, if any
    fn archive_conversation(&mut self) -> anyhow::Result<Option<PathBuf>>;

    /// Fallback action after an archive
    fn boom(&mut self) -> anyhow::Result<()>;
}

/// Polls inputs and dispatches at most one handler per tick
pub struct InteractionSupervisor<S, H> {
    inputs: S,
    handlers: H,
    tick: Duration,
    last_mode: Mode,
    events: broadcast::Sender<DeviceEvent>,
}

impl<S: InputSource, H: InteractionHandlers> InteractionSupervisor<S, H> {
    pub fn new(
        inputs: S,
        handlers: H,
        tick: Duration,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            inputs,
            handlers,
            tick,
            last_mode: Mode::Asleep,
            events,
        }
    }

    /// Run the poll loop on a dedicated thread
    pub fn spawn(mut self, cancel: CancelToken) -> std::io::Result<InteractionTask> {
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("interaction-supervisor".to_string())
            .spawn(move || self.run(&thread_cancel))?;
        Ok(InteractionTask { cancel, handle })
    }

    /// Poll until `cancel` fires
    pub fn run(&mut self, cancel: &CancelToken) {
        info!(tick_ms = self.tick.as_millis() as u64, "interaction supervisor started");

        while !cancel.wait_timeout(self.tick) {
            self.poll_once();
        }

        info!("interaction supervisor stopped");
        let _ = self.events.send(DeviceEvent::InteractionStopped);
    }

    /// Take one snapshot and dispatch for the resulting mode
    pub fn poll_once(&mut self) -> Mode {
        let snapshot = self.inputs.snapshot();
        let mode = Mode::from_snapshot(snapshot);

        if mode != self.last_mode {
            info!(from = %self.last_mode, to = %mode, "mode changed");
            self.last_mode = mode;
        }

        if mode.dispatches() {
            self.dispatch(mode);
        }
        mode
    }

    fn dispatch(&mut self, mode: Mode) {
        debug!(%mode, "dispatching handler");
        let _ = self.events.send(DeviceEvent::ModeDispatched { mode });

        match mode {
            Mode::AwakeTelevision => {
                self.invoke(mode, |h| h.comment_on_television());
            }
            Mode::AwakePerson => {
                self.invoke(mode, |h| h.talk_with_person());
            }
            Mode::ComboArchive => {
                if let Some(Some(path)) = self.invoke(mode, |h| h.archive_conversation()) {
                    info!(?path, "conversation archived");
                    let _ = self.events.send(DeviceEvent::ConversationArchived { path });
                }
                self.invoke(mode, |h| h.boom());
            }
            Mode::Asleep | Mode::AwakeIdle => {}
        }
    }

    /// Run one handler call, containing errors and panics to this tick
    fn invoke<T>(
        &mut self,
        mode: Mode,
        call: impl FnOnce(&mut H) -> anyhow::Result<T>,
    ) -> Option<T> {
        let handlers = &mut self.handlers;
        let error = match panic::catch_unwind(AssertUnwindSafe(|| call(handlers))) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "handler panicked".to_string(),
        };

        error!(%mode, %error, "interaction handler failed; retrying on a later tick");
        let _ = self.events.send(DeviceEvent::HandlerFailed { mode, error });
        None
    }
}

/// Handle to the running interaction thread
pub struct InteractionTask {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl InteractionTask {
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the loop to stop at its next tick
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait up to `timeout` for the thread to return
    ///
    /// Returns `true` once the loop has acknowledged cancellation. On
    /// timeout the thread is left detached so it cannot hold up exit.
    pub async fn join(self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.handle.is_finished() {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "interaction task did not stop in time; detaching"
                );
                return false;
            }
            tokio::time::sleep(JOIN_POLL).await;
        }

        if self.handle.join().is_err() {
            error!("interaction thread panicked");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct ScriptedInputs {
        current: Arc<Mutex<InputSnapshot>>,
    }

    impl ScriptedInputs {
        fn set(&self, awake: bool, television: bool, person: bool) {
            *self.current.lock().unwrap() = InputSnapshot {
                awake,
                television,
                person,
            };
        }
    }

    impl InputSource for ScriptedInputs {
        fn snapshot(&self) -> InputSnapshot {
            *self.current.lock().unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandlers {
        calls: Arc<Mutex<Vec<&'static str>>>,
        in_flight: Arc<AtomicBool>,
        fail_television: Arc<AtomicBool>,
        panic_person: bool,
        handler_delay: Duration,
    }

    impl RecordingHandlers {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, name: &'static str) {
            assert!(
                !self.in_flight.swap(true, Ordering::SeqCst),
                "two handlers ran at once"
            );
            thread::sleep(self.handler_delay);
            self.calls.lock().unwrap().push(name);
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    impl InteractionHandlers for RecordingHandlers {
        fn comment_on_television(&mut self) -> anyhow::Result<()> {
            self.record("television");
            if self.fail_television.load(Ordering::SeqCst) {
                anyhow::bail!("remote call timed out");
            }
            Ok(())
        }

        fn talk_with_person(&mut self) -> anyhow::Result<()> {
            if self.panic_person {
                panic!("capture device vanished");
            }
            self.record("person");
            Ok(())
        }

        fn archive_conversation(&mut self) -> anyhow::Result<Option<PathBuf>> {
            self.record("archive");
            Ok(Some(PathBuf::from("conversation_20240101_000000.json")))
        }

        fn boom(&mut self) -> anyhow::Result<()> {
            self.record("boom");
            Ok(())
        }
    }

    fn supervisor(
        inputs: ScriptedInputs,
        handlers: RecordingHandlers,
    ) -> (
        InteractionSupervisor<ScriptedInputs, RecordingHandlers>,
        broadcast::Receiver<DeviceEvent>,
    ) {
        let (tx, rx) = broadcast::channel(64);
        (
            InteractionSupervisor::new(inputs, handlers, Duration::from_millis(5), tx),
            rx,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_asleep_is_a_noop() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers::default();
        let (mut sv, mut rx) = supervisor(inputs.clone(), handlers.clone());

        assert_eq!(sv.poll_once(), Mode::Asleep);
        inputs.set(false, true, false);
        assert_eq!(sv.poll_once(), Mode::Asleep);

        assert!(handlers.calls().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_combo_archives_then_booms_only() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers::default();
        let (mut sv, mut rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(false, true, true);
        assert_eq!(sv.poll_once(), Mode::ComboArchive);

        assert_eq!(handlers.calls(), vec!["archive", "boom"]);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                DeviceEvent::ModeDispatched {
                    mode: Mode::ComboArchive
                },
                DeviceEvent::ConversationArchived {
                    path: PathBuf::from("conversation_20240101_000000.json")
                },
            ]
        );
    }

    #[test]
    fn test_awake_buttons_dispatch_their_handler() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers::default();
        let (mut sv, _rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(true, false, false);
        assert_eq!(sv.poll_once(), Mode::AwakeIdle);
        inputs.set(true, true, false);
        assert_eq!(sv.poll_once(), Mode::AwakeTelevision);
        inputs.set(true, false, true);
        assert_eq!(sv.poll_once(), Mode::AwakePerson);

        assert_eq!(handlers.calls(), vec!["television", "person"]);
    }

    #[test]
    fn test_handler_error_only_aborts_its_tick() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers::default();
        handlers.fail_television.store(true, Ordering::SeqCst);
        let (mut sv, mut rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(true, true, false);
        sv.poll_once();
        handlers.fail_television.store(false, Ordering::SeqCst);
        sv.poll_once();

        assert_eq!(handlers.calls(), vec!["television", "television"]);
        let failures: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, DeviceEvent::HandlerFailed { .. }))
            .collect();
        assert_eq!(
            failures,
            vec![DeviceEvent::HandlerFailed {
                mode: Mode::AwakeTelevision,
                error: "remote call timed out".to_string(),
            }]
        );
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers {
            panic_person: true,
            ..RecordingHandlers::default()
        };
        let (mut sv, mut rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(true, false, true);
        assert_eq!(sv.poll_once(), Mode::AwakePerson);
        inputs.set(true, true, false);
        assert_eq!(sv.poll_once(), Mode::AwakeTelevision);

        assert_eq!(handlers.calls(), vec!["television"]);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DeviceEvent::HandlerFailed { mode: Mode::AwakePerson, .. })));
    }

    #[test]
    fn test_task_stops_on_cancel() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers::default();
        let (sv, mut rx) = supervisor(inputs, handlers);

        let task = sv.spawn(CancelToken::new()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(task.is_alive());

        task.cancel();
        assert!(tokio_test::block_on(task.join(Duration::from_secs(2))));
        assert!(drain(&mut rx).contains(&DeviceEvent::InteractionStopped));
    }

    #[test]
    fn test_running_handler_finishes_before_stop() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers {
            handler_delay: Duration::from_millis(60),
            ..RecordingHandlers::default()
        };
        let (sv, _rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(true, true, false);
        let task = sv.spawn(CancelToken::new()).unwrap();
        while !handlers.in_flight.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        inputs.set(false, false, false);
        task.cancel();

        assert!(tokio_test::block_on(task.join(Duration::from_secs(2))));
        assert_eq!(handlers.calls(), vec!["television"]);
    }

    #[test]
    fn test_join_times_out_on_stuck_handler() {
        let inputs = ScriptedInputs::default();
        let handlers = RecordingHandlers {
            handler_delay: Duration::from_millis(300),
            ..RecordingHandlers::default()
        };
        let (sv, _rx) = supervisor(inputs.clone(), handlers.clone());

        inputs.set(true, true, false);
        let task = sv.spawn(CancelToken::new()).unwrap();
        while !handlers.in_flight.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        task.cancel();

        assert!(!tokio_test::block_on(task.join(Duration::from_millis(30))));
    }
}
