//! Lifecycle hooks.
//!
//! A hook runs when its event fires and may hand back a [`PostHook`] that
//! runs once the event's phase is over, receiving the outcome. Returning
//! `None` makes a plain "before" hook.

use std::fmt;
use std::sync::Arc;

use crate::log::Action;
use crate::session::Session;

/// Events hooks can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// A task was added to the session.
    TaskInit,
    /// A task run is about to be dispatched; the post hook gets its
    /// terminal action.
    TaskExecute,
    SchedulerStartup,
    SchedulerCycle,
    /// The post hook gets the error that ended the scheduler, if any.
    SchedulerShutdown,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskInit => "task_init",
            Self::TaskExecute => "task_execute",
            Self::SchedulerStartup => "scheduler_startup",
            Self::SchedulerCycle => "scheduler_cycle",
            Self::SchedulerShutdown => "scheduler_shutdown",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook is told about the event.
pub struct HookEvent<'a> {
    pub kind: HookKind,
    pub session: &'a Session,
    pub task: Option<&'a str>,
    pub run_id: Option<&'a str>,
}

/// What the post half of a hook is told.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutcome {
    /// Terminal action of a run, for `TaskExecute`.
    pub action: Option<Action>,
    pub error: Option<String>,
}

pub type PostHook = Box<dyn FnOnce(&HookOutcome) + Send>;

pub type Hook = Arc<dyn Fn(&HookEvent<'_>) -> Option<PostHook> + Send + Sync>;

/// Registered hooks by event kind, called in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    task_init: Vec<Hook>,
    task_execute: Vec<Hook>,
    scheduler_startup: Vec<Hook>,
    scheduler_cycle: Vec<Hook>,
    scheduler_shutdown: Vec<Hook>,
}

impl Hooks {
    pub fn add(&mut self, kind: HookKind, hook: Hook) {
        self.slot(kind).push(hook);
    }

    pub fn get(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::TaskInit => &self.task_init,
            HookKind::TaskExecute => &self.task_execute,
            HookKind::SchedulerStartup => &self.scheduler_startup,
            HookKind::SchedulerCycle => &self.scheduler_cycle,
            HookKind::SchedulerShutdown => &self.scheduler_shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.task_init.len()
            + self.task_execute.len()
            + self.scheduler_startup.len()
            + self.scheduler_cycle.len()
            + self.scheduler_shutdown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call the pre halves, returning the post halves in call order.
    pub fn call(&self, event: &HookEvent<'_>) -> Vec<PostHook> {
        self.get(event.kind)
            .iter()
            .filter_map(|hook| hook(event))
            .collect()
    }

    fn slot(&mut self, kind: HookKind) -> &mut Vec<Hook> {
        match kind {
            HookKind::TaskInit => &mut self.task_init,
            HookKind::TaskExecute => &mut self.task_execute,
            HookKind::SchedulerStartup => &mut self.scheduler_startup,
            HookKind::SchedulerCycle => &mut self.scheduler_cycle,
            HookKind::SchedulerShutdown => &mut self.scheduler_shutdown,
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("task_init", &self.task_init.len())
            .field("task_execute", &self.task_execute.len())
            .field("scheduler_startup", &self.scheduler_startup.len())
            .field("scheduler_cycle", &self.scheduler_cycle.len())
            .field("scheduler_shutdown", &self.scheduler_shutdown.len())
            .finish()
    }
}

/// Run post hooks with the same outcome.
pub(crate) fn finish_hooks(post: Vec<PostHook>, outcome: &HookOutcome) {
    for hook in post {
        hook(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn pre_and_post_halves_run_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::default();

        let log = calls.clone();
        hooks.add(
            HookKind::SchedulerCycle,
            Arc::new(move |_| {
                log.lock().unwrap().push("pre".to_string());
                let log = log.clone();
                Some(Box::new(move |outcome: &HookOutcome| {
                    log.lock()
                        .unwrap()
                        .push(format!("post {:?}", outcome.error));
                }) as PostHook)
            }),
        );
        let log = calls.clone();
        hooks.add(
            HookKind::SchedulerCycle,
            Arc::new(move |_| {
                log.lock().unwrap().push("plain".to_string());
                None
            }),
        );
        assert_eq!(hooks.len(), 2);
        assert!(hooks.get(HookKind::TaskInit).is_empty());

        let session = Session::default();
        let event = HookEvent {
            kind: HookKind::SchedulerCycle,
            session: &session,
            task: None,
            run_id: None,
        };
        let post = hooks.call(&event);
        assert_eq!(post.len(), 1);
        finish_hooks(
            post,
            &HookOutcome {
                action: None,
                error: Some("boom".to_string()),
            },
        );
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["pre", "plain", "post Some(\"boom\")"]
        );
    }
}
