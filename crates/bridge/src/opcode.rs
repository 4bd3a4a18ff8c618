use serde::Deserialize;
use tracing::{debug, warn};

use crate::effects::HostEffects;
use crate::engine::EngineBoundary;
use crate::render_loop::RenderLoopController;

/// Integer returned by the engine after every input or draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct Opcode(pub i32);

impl Opcode {
    pub const NOT_HANDLED: Opcode = Opcode(-1);
    pub const HANDLED: Opcode = Opcode(0);
    pub const SHOW_KEYBOARD: Opcode = Opcode(6);
    pub const HIDE_KEYBOARD: Opcode = Opcode(7);
    pub const EXIT: Opcode = Opcode(8);
    pub const ANIMATION_RUN: Opcode = Opcode(9);
    pub const ANIMATION_STOP: Opcode = Opcode(10);
    pub const LIST_ACTIONS: Opcode = Opcode(11);

    pub fn kind(self) -> OpcodeKind {
        match self {
            Opcode::SHOW_KEYBOARD => OpcodeKind::ShowKeyboard,
            Opcode::HIDE_KEYBOARD => OpcodeKind::HideKeyboard,
            Opcode::EXIT => OpcodeKind::Exit,
            Opcode::ANIMATION_RUN => OpcodeKind::AnimationRun,
            Opcode::ANIMATION_STOP => OpcodeKind::AnimationStop,
            Opcode::LIST_ACTIONS => OpcodeKind::ListActions,
            Opcode(code) if code >= 0 => OpcodeKind::Handled(code),
            Opcode(code) => OpcodeKind::NotHandled(code),
        }
    }

    /// Non-negative values mean the engine consumed the event.
    pub fn is_handled(self) -> bool {
        self.0 >= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeKind {
    ShowKeyboard,
    HideKeyboard,
    Exit,
    AnimationRun,
    AnimationStop,
    ListActions,
    Handled(i32),
    NotHandled(i32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Host effects or loop transitions actually performed.
    pub effects: u32,
    /// Opcodes pulled from the engine's deferred queue.
    pub drained: u32,
    pub drain_capped: bool,
}

/// Turns engine opcodes into host side effects and loop transitions.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeDispatcher {
    max_drained_actions: u32,
}

impl OpcodeDispatcher {
    pub fn new(max_drained_actions: u32) -> Self {
        Self {
            max_drained_actions: max_drained_actions.max(1),
        }
    }

    pub fn max_drained_actions(&self) -> u32 {
        self.max_drained_actions
    }

    pub fn dispatch<E, H>(
        &self,
        opcode: Opcode,
        engine: &mut E,
        host: &mut H,
        render_loop: &mut RenderLoopController,
    ) -> DispatchReport
    where
        E: EngineBoundary + ?Sized,
        H: HostEffects + ?Sized,
    {
        let mut report = DispatchReport::default();
        if opcode == Opcode::LIST_ACTIONS {
            self.drain_queued_actions(engine, host, render_loop, &mut report);
        } else if apply_opcode(opcode, host, render_loop) {
            report.effects += 1;
        }
        report
    }

    fn drain_queued_actions<E, H>(
        &self,
        engine: &mut E,
        host: &mut H,
        render_loop: &mut RenderLoopController,
        report: &mut DispatchReport,
    ) where
        E: EngineBoundary + ?Sized,
        H: HostEffects + ?Sized,
    {
        loop {
            if report.drained >= self.max_drained_actions {
                report.drain_capped = true;
                warn!(
                    max_drained_actions = self.max_drained_actions,
                    "queued_action_drain_capped"
                );
                break;
            }

            let next = engine.next_queued_action();
            if next.0 <= 0 {
                break;
            }
            report.drained += 1;
            if apply_opcode(next, host, render_loop) {
                report.effects += 1;
            }
        }
        debug!(
            drained = report.drained,
            effects = report.effects,
            "queued_actions_drained"
        );
    }
}

fn apply_opcode<H>(opcode: Opcode, host: &mut H, render_loop: &mut RenderLoopController) -> bool
where
    H: HostEffects + ?Sized,
{
    match opcode.kind() {
        OpcodeKind::ShowKeyboard => {
            debug!("keyboard_show_requested");
            host.show_keyboard();
            true
        }
        OpcodeKind::HideKeyboard => {
            debug!("keyboard_hide_requested");
            host.hide_keyboard();
            true
        }
        OpcodeKind::AnimationRun => {
            if render_loop.is_surface_driven() || render_loop.is_running() {
                return false;
            }
            render_loop.start()
        }
        OpcodeKind::AnimationStop => {
            if !(render_loop.is_timer_driven() && render_loop.is_running()) {
                return false;
            }
            render_loop.stop()
        }
        OpcodeKind::ListActions => {
            debug!("nested_list_actions_ignored");
            false
        }
        OpcodeKind::Exit | OpcodeKind::Handled(_) | OpcodeKind::NotHandled(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::effects::{RedrawSink, TimerTick};
    use crate::engine::ViewGeometry;
    use crate::input::{KeyStroke, TouchPhase};
    use crate::render_loop::RenderLoopState;

    struct NullSink;

    impl RedrawSink for NullSink {
        fn request_timer_redraw(&self, _tick: TimerTick) {}
    }

    #[derive(Default)]
    struct QueueEngine {
        queue: VecDeque<Opcode>,
        endless: Option<Opcode>,
        pulls: u32,
    }

    impl EngineBoundary for QueueEngine {
        type Surface = ();

        fn init(&mut self, _bundle_path: &Path, _data_path: &Path) -> i32 {
            0
        }
        fn on_surface_ready(&mut self, _surface: &(), _geometry: ViewGeometry) {}
        fn on_surface_resized(&mut self, _width: u32, _height: u32) {}
        fn on_draw_frame(&mut self) -> Opcode {
            Opcode::HANDLED
        }
        fn on_focus_changed(&mut self, _surface: &(), _focused: bool) {}
        fn on_touch(&mut self, _: TouchPhase, _: i32, _: f32, _: f32, _: f32) -> Opcode {
            Opcode::HANDLED
        }
        fn on_key_down(&mut self, _stroke: KeyStroke) -> Opcode {
            Opcode::HANDLED
        }
        fn on_key_up(&mut self, _stroke: KeyStroke) {}
        fn next_queued_action(&mut self) -> Opcode {
            self.pulls += 1;
            if let Some(opcode) = self.endless {
                return opcode;
            }
            self.queue.pop_front().unwrap_or(Opcode::NOT_HANDLED)
        }
        fn on_surface_destroyed(&mut self) {}
    }

    #[derive(Default)]
    struct CountingHost {
        shown: u32,
        hidden: u32,
        redraws: u32,
    }

    impl HostEffects for CountingHost {
        fn show_keyboard(&mut self) {
            self.shown += 1;
        }
        fn hide_keyboard(&mut self) {
            self.hidden += 1;
        }
        fn request_redraw(&mut self) {
            self.redraws += 1;
        }
    }

    fn controller() -> RenderLoopController {
        RenderLoopController::new(Duration::from_millis(5), Arc::new(NullSink))
    }

    #[test]
    fn kinds_cover_reserved_and_generic_codes() {
        assert_eq!(Opcode(6).kind(), OpcodeKind::ShowKeyboard);
        assert_eq!(Opcode(7).kind(), OpcodeKind::HideKeyboard);
        assert_eq!(Opcode(8).kind(), OpcodeKind::Exit);
        assert_eq!(Opcode(9).kind(), OpcodeKind::AnimationRun);
        assert_eq!(Opcode(10).kind(), OpcodeKind::AnimationStop);
        assert_eq!(Opcode(11).kind(), OpcodeKind::ListActions);
        assert_eq!(Opcode(0).kind(), OpcodeKind::Handled(0));
        assert_eq!(Opcode(42).kind(), OpcodeKind::Handled(42));
        assert_eq!(Opcode(-3).kind(), OpcodeKind::NotHandled(-3));
        assert!(Opcode(0).is_handled());
        assert!(!Opcode(-1).is_handled());
    }

    #[test]
    fn keyboard_opcodes_reach_host() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine::default();
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        dispatcher.dispatch(Opcode::SHOW_KEYBOARD, &mut engine, &mut host, &mut render_loop);
        dispatcher.dispatch(Opcode::HIDE_KEYBOARD, &mut engine, &mut host, &mut render_loop);

        assert_eq!((host.shown, host.hidden), (1, 1));
        assert_eq!(engine.pulls, 0);
    }

    #[test]
    fn list_actions_drains_until_terminator() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine {
            queue: VecDeque::from([
                Opcode::ANIMATION_RUN,
                Opcode::SHOW_KEYBOARD,
                Opcode(-1),
                Opcode::HIDE_KEYBOARD,
            ]),
            ..QueueEngine::default()
        };
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        let report =
            dispatcher.dispatch(Opcode::LIST_ACTIONS, &mut engine, &mut host, &mut render_loop);

        assert_eq!(render_loop.state(), RenderLoopState::RunningTimerDriven);
        assert_eq!(host.shown, 1);
        assert_eq!(host.hidden, 0);
        assert_eq!(engine.pulls, 3);
        assert_eq!(
            report,
            DispatchReport {
                effects: 2,
                drained: 2,
                drain_capped: false,
            }
        );
        render_loop.stop();
    }

    #[test]
    fn zero_also_terminates_drain() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine {
            queue: VecDeque::from([Opcode::HANDLED, Opcode::SHOW_KEYBOARD]),
            ..QueueEngine::default()
        };
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        dispatcher.dispatch(Opcode::LIST_ACTIONS, &mut engine, &mut host, &mut render_loop);
        assert_eq!(host.shown, 0);
        assert_eq!(engine.pulls, 1);
    }

    #[test]
    fn misbehaving_queue_is_capped() {
        let dispatcher = OpcodeDispatcher::new(8);
        let mut engine = QueueEngine {
            endless: Some(Opcode::SHOW_KEYBOARD),
            ..QueueEngine::default()
        };
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        let report =
            dispatcher.dispatch(Opcode::LIST_ACTIONS, &mut engine, &mut host, &mut render_loop);

        assert!(report.drain_capped);
        assert_eq!(report.drained, 8);
        assert_eq!(engine.pulls, 8);
        assert_eq!(host.shown, 8);
    }

    #[test]
    fn nested_list_actions_does_not_recurse() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine {
            queue: VecDeque::from([Opcode::LIST_ACTIONS, Opcode::HIDE_KEYBOARD]),
            ..QueueEngine::default()
        };
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        let report =
            dispatcher.dispatch(Opcode::LIST_ACTIONS, &mut engine, &mut host, &mut render_loop);
        assert_eq!(report.drained, 2);
        assert_eq!(report.effects, 1);
        assert_eq!(host.hidden, 1);
    }

    #[test]
    fn animation_run_then_stop_toggles_timer_loop() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine::default();
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        let started =
            dispatcher.dispatch(Opcode::ANIMATION_RUN, &mut engine, &mut host, &mut render_loop);
        assert_eq!(started.effects, 1);
        assert_eq!(render_loop.state(), RenderLoopState::RunningTimerDriven);
        assert!(render_loop.has_active_timer());

        let again =
            dispatcher.dispatch(Opcode::ANIMATION_RUN, &mut engine, &mut host, &mut render_loop);
        assert_eq!(again.effects, 0);
        assert_eq!(render_loop.timers_started(), 1);

        let stopped =
            dispatcher.dispatch(Opcode::ANIMATION_STOP, &mut engine, &mut host, &mut render_loop);
        assert_eq!(stopped.effects, 1);
        assert_eq!(render_loop.state(), RenderLoopState::Stopped);
        assert!(!render_loop.has_active_timer());
    }

    #[test]
    fn animation_opcodes_ignored_when_surface_driven() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine::default();
        let mut host = CountingHost::default();
        let mut render_loop = controller();
        render_loop.enter_surface_driven();

        dispatcher.dispatch(Opcode::ANIMATION_RUN, &mut engine, &mut host, &mut render_loop);
        assert_eq!(render_loop.state(), RenderLoopState::RunningSurfaceDriven);
        assert_eq!(render_loop.timers_started(), 0);

        dispatcher.dispatch(Opcode::ANIMATION_STOP, &mut engine, &mut host, &mut render_loop);
        assert_eq!(render_loop.state(), RenderLoopState::RunningSurfaceDriven);
    }

    #[test]
    fn exit_and_unknown_codes_have_no_effect() {
        let dispatcher = OpcodeDispatcher::new(16);
        let mut engine = QueueEngine::default();
        let mut host = CountingHost::default();
        let mut render_loop = controller();

        for code in [Opcode::EXIT, Opcode(0), Opcode(99), Opcode(-7)] {
            let report = dispatcher.dispatch(code, &mut engine, &mut host, &mut render_loop);
            assert_eq!(report, DispatchReport::default());
        }
        assert_eq!((host.shown, host.hidden, host.redraws), (0, 0, 0));
        assert_eq!(render_loop.state(), RenderLoopState::Stopped);
    }
}
