//! State machine executor
//!
//! One task owns the whole run: the current scene, the active state, and
//! every armed timer. All stimuli arrive on a single event channel, so
//! "exactly one transition fires per state activation" holds without any
//! locking on the state itself.
//!
//! Race freedom rests on two mechanisms applied in order on every state
//! change: armed timer tasks are aborted *before* exit actions run
//! (cancel-then-arm), and every timer event carries the activation epoch it
//! was armed under, so a fire that slipped into the queue before the abort
//! is discarded as stale instead of acting on the wrong state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use curator_scene::{Scene, Trigger, END_STATE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{ActionSource, Dispatcher};
use crate::event::{EngineCommand, EngineEvent, EngineHandle, TimerFired, TimerKind};
use crate::status::{EngineStatus, Heartbeat, Phase};

/// Upper bound on chained `always` transitions processed in one step,
/// breaking accidental zero-delay cycles in authored scenes.
const MAX_TRANSITION_CHAIN: usize = 32;

/// Runtime record of the active state: its timers, entry instant, and the
/// activation epoch its timers were armed under. Rebuilt wholesale on every
/// transition and owned exclusively by the executor loop.
struct ExecutionContext {
    state: Arc<str>,
    activation: u64,
    entered_at: Instant,
    timers: Vec<JoinHandle<()>>,
}

impl ExecutionContext {
    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

/// One loaded scene being executed
struct SceneRun {
    scene: Arc<Scene>,
    scene_id: Arc<str>,
    run_id: u64,
    started_at: Instant,
    global_timers: Vec<JoinHandle<()>>,
    ctx: Option<ExecutionContext>,
}

impl Drop for SceneRun {
    fn drop(&mut self) {
        for timer in self.global_timers.drain(..) {
            timer.abort();
        }
    }
}

/// The scene state-machine executor
pub struct Executor {
    events: mpsc::Receiver<EngineEvent>,
    handle: EngineHandle,
    dispatcher: Dispatcher,
    heartbeat: Heartbeat,
    status: EngineStatus,
    status_tx: watch::Sender<EngineStatus>,
    shutdown: CancellationToken,
    run: Option<SceneRun>,
    next_activation: u64,
    next_run_id: u64,
}

impl Executor {
    /// Create an executor consuming `events`
    ///
    /// `handle` must be the producer side of the same channel; the executor
    /// clones it into the timer tasks it arms.
    pub fn new(
        events: mpsc::Receiver<EngineEvent>,
        handle: EngineHandle,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Self {
        let status = EngineStatus::idle();
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            events,
            handle,
            dispatcher,
            heartbeat: Heartbeat::new(),
            status,
            status_tx,
            shutdown,
            run: None,
            next_activation: 0,
            next_run_id: 0,
        }
    }

    /// Read-only status surface for the dashboard
    pub fn status_watch(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Liveness heartbeat for the watchdog
    pub fn heartbeat_watch(&self) -> watch::Receiver<Instant> {
        self.heartbeat.watch()
    }

    /// Run the executor loop until shutdown
    ///
    /// Shutdown is cooperative: the event in flight is finished, the active
    /// state's exit actions are dispatched, and only then does the loop end.
    pub async fn run(mut self) {
        info!("Executor started");

        loop {
            tokio::select! {
                maybe_event = self.events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        if self.run.is_some() {
            self.teardown_run(false);
        }
        self.update_status(|s| s.phase = Phase::Stopped);
        info!("Executor stopped");
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Command(command) => self.handle_command(command),
            EngineEvent::Timer(fired) => self.handle_timer(fired),
            EngineEvent::DispatchFailed { detail } => {
                self.update_status(|s| s.last_error = Some(detail));
            }
            stimulus => self.handle_stimulus(stimulus),
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Run(scene) => {
                if self.run.is_some() {
                    info!(scene_id = %scene.scene_id, "Replacing running scene");
                    self.teardown_run(false);
                }
                self.start_run(*scene);
            }
            EngineCommand::Stop => {
                if self.run.is_some() {
                    info!("Stop requested");
                    self.teardown_run(false);
                } else {
                    debug!("Stop requested with no scene running");
                }
            }
        }
    }

    fn start_run(&mut self, scene: Scene) {
        let scene = Arc::new(scene);
        let scene_id: Arc<str> = scene.scene_id.as_str().into();
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let started_at = Instant::now();

        // Global timeout events run on the scene clock and stay armed for
        // the whole run, across state changes.
        let mut global_timers = Vec::new();
        for (index, event) in scene.global_events.iter().enumerate() {
            if let Trigger::Timeout { delay } = event.trigger {
                let handle = self.handle.clone();
                let deadline = started_at + Duration::from_secs_f64(delay);
                global_timers.push(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    handle.timer(TimerFired {
                        epoch: run_id,
                        kind: TimerKind::GlobalTimeout { index },
                    });
                }));
            }
        }

        info!(scene_id = %scene_id, initial_state = %scene.initial_state, "Scene starting");

        let initial = scene.initial_state.clone();
        self.run = Some(SceneRun {
            scene,
            scene_id: scene_id.clone(),
            run_id,
            started_at,
            global_timers,
            ctx: None,
        });
        self.update_status(|s| {
            s.scene_id = Some(scene_id.to_string());
            s.last_error = None;
        });

        self.advance_to(initial);
    }

    /// Perform a state change: exit the current state, enter the target,
    /// and follow any chain of `always` transitions.
    fn advance_to(&mut self, mut target: String) {
        let mut hops = 0usize;
        loop {
            self.exit_current();

            if Scene::is_terminal(&target) {
                self.teardown_run(true);
                return;
            }

            match self.enter_state(&target) {
                None => return,
                Some(next) => {
                    hops += 1;
                    if hops >= MAX_TRANSITION_CHAIN {
                        warn!(
                            state = %target,
                            "Transition chain exceeded {MAX_TRANSITION_CHAIN} hops, holding state"
                        );
                        return;
                    }
                    target = next;
                }
            }
        }
    }

    /// Cancel the active state's timers, then dispatch its exit actions.
    ///
    /// The cancel must come first so nothing armed for this state can fire
    /// into the exit or into the next state.
    fn exit_current(&mut self) {
        let (scene, scene_id, mut ctx) = {
            let Some(run) = self.run.as_mut() else { return };
            let Some(ctx) = run.ctx.take() else { return };
            (run.scene.clone(), run.scene_id.clone(), ctx)
        };

        ctx.cancel_timers();
        self.update_status(|s| s.phase = Phase::Exiting);

        if let Some(def) = scene.state(&ctx.state) {
            for (index, action) in def.on_exit.iter().enumerate() {
                self.dispatcher
                    .enqueue(&scene_id, &ctx.state, ActionSource::OnExit, index, action);
            }
        }
        debug!(state = %ctx.state, "State exited");
    }

    /// Enter a state: dispatch entry actions, arm timeline and timeout
    /// timers, and report readiness. Returns the target of an `always`
    /// transition if the state declares one.
    fn enter_state(&mut self, name: &str) -> Option<String> {
        let (scene, scene_id) = {
            let Some(run) = self.run.as_ref() else {
                return None;
            };
            (run.scene.clone(), run.scene_id.clone())
        };

        let Some(def) = scene.state(name) else {
            // Unreachable for validated scenes; fail safe instead of looping.
            error!(state = %name, "State not found in scene, stopping run");
            self.teardown_run(false);
            return None;
        };

        let activation = self.next_activation;
        self.next_activation += 1;
        let entered_at = Instant::now();
        let state: Arc<str> = name.into();

        self.update_status(|s| {
            s.phase = Phase::Entering;
            s.state = Some(name.to_string());
            s.entered_at = Some(Utc::now());
        });
        info!(scene_id = %scene_id, state = %name, "Entering state");

        // Entry actions go through the ordered dispatch queue; timers below
        // are armed without waiting on any actuator, so timeline offsets are
        // measured from the entry instant, not from onEnter completion.
        for (index, action) in def.on_enter.iter().enumerate() {
            self.dispatcher
                .enqueue(&scene_id, &state, ActionSource::OnEnter, index, action);
        }

        let mut timers = Vec::new();
        for (index, entry) in def.timeline.iter().enumerate() {
            if entry.at == 0.0 {
                for action in &entry.actions {
                    self.dispatcher
                        .enqueue(&scene_id, &state, ActionSource::Timeline, index, action);
                }
            } else {
                let handle = self.handle.clone();
                let deadline = entered_at + Duration::from_secs_f64(entry.at);
                timers.push(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    handle.timer(TimerFired {
                        epoch: activation,
                        kind: TimerKind::Timeline { index },
                    });
                }));
            }
        }

        for (index, transition) in def.transitions.iter().enumerate() {
            if let Trigger::Timeout { delay } = transition.trigger {
                let handle = self.handle.clone();
                let deadline = entered_at + Duration::from_secs_f64(delay);
                timers.push(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    handle.timer(TimerFired {
                        epoch: activation,
                        kind: TimerKind::Timeout { index },
                    });
                }));
            }
        }

        if let Some(run) = self.run.as_mut() {
            run.ctx = Some(ExecutionContext {
                state,
                activation,
                entered_at,
                timers,
            });
        }

        self.update_status(|s| s.phase = Phase::Active);
        self.heartbeat.beat();

        def.transitions
            .iter()
            .find(|t| matches!(t.trigger, Trigger::Always))
            .map(|t| t.to.clone())
    }

    /// Drop the current run. With `fire_end_state` set, the declared `END`
    /// state's entry actions are dispatched first (closing cue, idle image).
    fn teardown_run(&mut self, fire_end_state: bool) {
        self.exit_current();

        let Some(run) = self.run.take() else { return };

        let elapsed_secs = run.started_at.elapsed().as_secs_f64();
        if fire_end_state {
            if let Some(end_def) = run.scene.state(END_STATE) {
                let state: Arc<str> = END_STATE.into();
                for (index, action) in end_def.on_enter.iter().enumerate() {
                    self.dispatcher.enqueue(
                        &run.scene_id,
                        &state,
                        ActionSource::OnEnter,
                        index,
                        action,
                    );
                }
            }
            info!(scene_id = %run.scene_id, elapsed_secs, "Scene finished");
        } else {
            info!(scene_id = %run.scene_id, elapsed_secs, "Scene stopped");
        }

        drop(run);
        self.heartbeat.beat();
        self.update_status(|s| {
            s.phase = Phase::Idle;
            s.scene_id = None;
            s.state = None;
            s.entered_at = None;
        });
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        enum Decision {
            Ignore,
            FireTimeline(usize),
            Transition { kind: &'static str, to: String },
        }

        let decision = {
            let Some(run) = self.run.as_ref() else {
                return;
            };
            match fired.kind {
                TimerKind::GlobalTimeout { index } => {
                    if fired.epoch != run.run_id {
                        Decision::Ignore
                    } else {
                        match run.scene.global_events.get(index) {
                            Some(event) => Decision::Transition {
                                kind: "global timeout",
                                to: event.to.clone(),
                            },
                            None => Decision::Ignore,
                        }
                    }
                }
                TimerKind::Timeline { index } => match run.ctx.as_ref() {
                    Some(ctx) if fired.epoch == ctx.activation => Decision::FireTimeline(index),
                    _ => Decision::Ignore,
                },
                TimerKind::Timeout { index } => match run.ctx.as_ref() {
                    Some(ctx) if fired.epoch == ctx.activation => {
                        match run
                            .scene
                            .state(&ctx.state)
                            .and_then(|def| def.transitions.get(index))
                        {
                            Some(transition) => Decision::Transition {
                                kind: "timeout",
                                to: transition.to.clone(),
                            },
                            None => Decision::Ignore,
                        }
                    }
                    _ => Decision::Ignore,
                },
            }
        };

        match decision {
            Decision::Ignore => debug!(?fired, "Stale timer fire discarded"),
            Decision::FireTimeline(index) => self.fire_timeline_entry(index),
            Decision::Transition { kind, to } => {
                info!(trigger = kind, goto = %to, "Transition fired");
                self.advance_to(to);
            }
        }
    }

    fn fire_timeline_entry(&mut self, index: usize) {
        let (scene, scene_id, state, elapsed) = {
            let Some(run) = self.run.as_ref() else { return };
            let Some(ctx) = run.ctx.as_ref() else { return };
            (
                run.scene.clone(),
                run.scene_id.clone(),
                ctx.state.clone(),
                ctx.entered_at.elapsed(),
            )
        };

        let Some(entry) = scene.state(&state).and_then(|def| def.timeline.get(index)) else {
            return;
        };

        debug!(
            state = %state,
            at = entry.at,
            elapsed_secs = elapsed.as_secs_f64(),
            "Timeline entry due"
        );
        for action in &entry.actions {
            self.dispatcher
                .enqueue(&scene_id, &state, ActionSource::Timeline, index, action);
        }
    }

    /// Match an external stimulus against global events first, then the
    /// active state's transitions in declaration order; first match wins.
    fn handle_stimulus(&mut self, event: EngineEvent) {
        let decision = {
            let Some(run) = self.run.as_ref() else {
                debug!("Stimulus ignored, no scene running");
                return;
            };

            let mut found = None;
            for (index, global) in run.scene.global_events.iter().enumerate() {
                if trigger_matches(&global.trigger, &event) {
                    found = Some(("global event", index, global.to.clone()));
                    break;
                }
            }

            if found.is_none() {
                if let Some(ctx) = run.ctx.as_ref() {
                    if let Some(def) = run.scene.state(&ctx.state) {
                        for (index, transition) in def.transitions.iter().enumerate() {
                            if trigger_matches(&transition.trigger, &event) {
                                found = Some((transition.trigger.kind(), index, transition.to.clone()));
                                break;
                            }
                        }
                    }
                }
            }
            found
        };

        if let Some((kind, index, to)) = decision {
            info!(trigger = kind, index = index, goto = %to, "Transition fired");
            self.advance_to(to);
        }
    }

    fn update_status(&mut self, apply: impl FnOnce(&mut EngineStatus)) {
        apply(&mut self.status);
        self.status_tx.send_replace(self.status.clone());
    }
}

/// Whether a stimulus satisfies a transition trigger
fn trigger_matches(trigger: &Trigger, event: &EngineEvent) -> bool {
    match (trigger, event) {
        (Trigger::Mqtt { topic, message }, EngineEvent::Message { topic: t, payload }) => {
            topic == t && message == payload
        }
        (Trigger::Button { button }, EngineEvent::Button { id }) => button == id,
        (Trigger::AudioEnd { target }, EngineEvent::AudioFinished { file }) => target == file,
        (Trigger::VideoEnd { target }, EngineEvent::VideoFinished { file }) => target == file,
        _ => false,
    }
}
