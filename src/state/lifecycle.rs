use statig::prelude::*;

use crate::types::DeviceState;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleEvent {
    Init,
    MountOk,
    MountFailed,
    Unmount,
    CardRemoved,
    Fault,
    Recover,
    Deinit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleStatus {
    Applied,
    Unchanged,
    InvalidTransition,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct LifecycleMachine {
    pub(super) state: DeviceState,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) status: LifecycleStatus,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            status: LifecycleStatus::Unchanged,
        }
    }
}

impl LifecycleMachine {
    pub(super) fn new() -> Self {
        Self {
            state: DeviceState::Uninitialized,
        }
    }

    fn enter(&mut self, context: &mut DispatchContext, state: DeviceState) {
        context.status = if self.state == state {
            LifecycleStatus::Unchanged
        } else {
            LifecycleStatus::Applied
        };
        self.state = state;
    }

    fn reject(context: &mut DispatchContext) -> Outcome<State> {
        context.status = LifecycleStatus::InvalidTransition;
        Handled
    }
}

#[state_machine(initial = "State::uninitialized()")]
impl LifecycleMachine {
    #[state]
    fn uninitialized(
        &mut self,
        context: &mut DispatchContext,
        event: &LifecycleEvent,
    ) -> Outcome<State> {
        match event {
            LifecycleEvent::Init => {
                self.enter(context, DeviceState::Initialized);
                Transition(State::initialized())
            }
            _ => Self::reject(context),
        }
    }

    #[state]
    fn initialized(
        &mut self,
        context: &mut DispatchContext,
        event: &LifecycleEvent,
    ) -> Outcome<State> {
        match event {
            LifecycleEvent::MountOk => {
                self.enter(context, DeviceState::Mounted);
                Transition(State::mounted())
            }
            LifecycleEvent::MountFailed => {
                self.enter(context, DeviceState::Unmounted);
                Transition(State::unmounted())
            }
            LifecycleEvent::Fault => {
                self.enter(context, DeviceState::Error);
                Transition(State::error())
            }
            LifecycleEvent::Deinit => {
                self.enter(context, DeviceState::Uninitialized);
                Transition(State::uninitialized())
            }
            _ => Self::reject(context),
        }
    }

    #[state]
    fn mounted(
        &mut self,
        context: &mut DispatchContext,
        event: &LifecycleEvent,
    ) -> Outcome<State> {
        match event {
            LifecycleEvent::Unmount | LifecycleEvent::CardRemoved => {
                self.enter(context, DeviceState::Unmounted);
                Transition(State::unmounted())
            }
            LifecycleEvent::Fault => {
                self.enter(context, DeviceState::Error);
                Transition(State::error())
            }
            _ => Self::reject(context),
        }
    }

    #[state]
    fn unmounted(
        &mut self,
        context: &mut DispatchContext,
        event: &LifecycleEvent,
    ) -> Outcome<State> {
        match event {
            LifecycleEvent::MountOk => {
                self.enter(context, DeviceState::Mounted);
                Transition(State::mounted())
            }
            LifecycleEvent::MountFailed => {
                self.enter(context, DeviceState::Unmounted);
                Handled
            }
            LifecycleEvent::Fault => {
                self.enter(context, DeviceState::Error);
                Transition(State::error())
            }
            LifecycleEvent::Deinit => {
                self.enter(context, DeviceState::Uninitialized);
                Transition(State::uninitialized())
            }
            _ => Self::reject(context),
        }
    }

    #[state]
    fn error(&mut self, context: &mut DispatchContext, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Fault => {
                self.enter(context, DeviceState::Error);
                Handled
            }
            LifecycleEvent::Recover => {
                self.enter(context, DeviceState::Unmounted);
                Transition(State::unmounted())
            }
            LifecycleEvent::Deinit => {
                self.enter(context, DeviceState::Uninitialized);
                Transition(State::uninitialized())
            }
            _ => Self::reject(context),
        }
    }
}
