//! Session scope: the lock that serializes all access to a session's UIs.
//!
//! Every mutation of a UI and every UIDL flush happens while holding the
//! guard returned by [`Session::lock`]. Tree and writer code never lock on
//! their own.

use crate::config::{DeploymentConfiguration, SystemMessages};
use crate::ui::{Ui, UiId};
use std::collections::{BTreeMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type AccessTask = Box<dyn FnOnce(&mut SessionState) + Send>;

pub struct Session {
    state: Mutex<SessionState>,
    pending_access: Mutex<VecDeque<AccessTask>>,
}

pub struct SessionState {
    uis: BTreeMap<UiId, Ui>,
    next_ui_id: u32,
    cumulative_request_duration: Duration,
    last_request_duration: Option<Duration>,
    system_messages: SystemMessages,
    max_inactive_interval: Option<Duration>,
}

impl Session {
    pub fn new(config: &DeploymentConfiguration) -> Self {
        Self {
            state: Mutex::new(SessionState {
                uis: BTreeMap::new(),
                next_ui_id: 0,
                cumulative_request_duration: Duration::ZERO,
                last_request_duration: None,
                system_messages: config.system_messages.clone(),
                max_inactive_interval: config.session_max_inactive_interval,
            }),
            pending_access: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquires the session lock for one request/response cycle. A panic
    /// while holding the lock does not make the session unusable.
    pub fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Queues `task` to run under the session lock before the next response
    /// is written. Safe to call from any thread without holding the lock.
    pub fn access(&self, task: impl FnOnce(&mut SessionState) + Send + 'static) {
        self.pending_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Box::new(task));
    }

    /// Like [`access`](Self::access) for a single UI. The task is skipped if
    /// the UI is gone by the time it runs.
    pub fn access_ui(&self, ui: UiId, task: impl FnOnce(&mut Ui) + Send + 'static) {
        self.access(move |state| match state.ui_mut(ui) {
            Some(ui) => task(ui),
            None => log::debug!("dropping access task for closed UI {}", ui.0),
        });
    }

    pub fn has_pending_access(&self) -> bool {
        !self
            .pending_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn next_access_task(&self) -> Option<AccessTask> {
        self.pending_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

pub struct SessionGuard<'a> {
    session: &'a Session,
    state: MutexGuard<'a, SessionState>,
}

impl SessionGuard<'_> {
    /// Runs queued access tasks, including tasks queued by those tasks,
    /// until the queue is empty.
    pub fn run_pending_access_tasks(&mut self) {
        while let Some(task) = self.session.next_access_task() {
            task(&mut self.state);
        }
    }
}

impl Deref for SessionGuard<'_> {
    type Target = SessionState;

    fn deref(&self) -> &SessionState {
        &self.state
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

impl SessionState {
    pub fn create_ui(&mut self) -> UiId {
        let id = UiId(self.next_ui_id);
        self.next_ui_id += 1;
        self.uis.insert(id, Ui::new(id));
        id
    }

    pub fn ui(&self, id: UiId) -> Option<&Ui> {
        self.uis.get(&id)
    }

    pub fn ui_mut(&mut self, id: UiId) -> Option<&mut Ui> {
        self.uis.get_mut(&id)
    }

    pub fn close_ui(&mut self, id: UiId) -> Option<Ui> {
        self.uis.remove(&id)
    }

    pub fn ui_ids(&self) -> Vec<UiId> {
        self.uis.keys().copied().collect()
    }

    pub fn record_request_duration(&mut self, duration: Duration) {
        self.cumulative_request_duration += duration;
        self.last_request_duration = Some(duration);
    }

    pub fn cumulative_request_duration(&self) -> Duration {
        self.cumulative_request_duration
    }

    pub fn last_request_duration(&self) -> Option<Duration> {
        self.last_request_duration
    }

    pub fn system_messages(&self) -> &SystemMessages {
        &self.system_messages
    }

    pub fn max_inactive_interval(&self) -> Option<Duration> {
        self.max_inactive_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn access_tasks_run_in_order_under_the_lock() {
        let session = Session::new(&DeploymentConfiguration::default());
        let ui = session.lock().create_ui();

        session.access_ui(ui, |ui| ui.report_app_error("first", ""));
        session.access_ui(ui, |ui| ui.report_app_error("second", ""));
        assert!(session.has_pending_access());

        let mut guard = session.lock();
        guard.run_pending_access_tasks();
        let captions: Vec<_> = guard
            .ui(ui)
            .expect("ui")
            .pending_app_errors
            .iter()
            .map(|error| error.caption.clone())
            .collect();
        assert_eq!(captions, vec!["first", "second"]);
        drop(guard);
        assert!(!session.has_pending_access());
    }

    #[test]
    fn tasks_for_closed_uis_are_dropped() {
        let session = Session::new(&DeploymentConfiguration::default());
        let ui = session.lock().create_ui();
        session.lock().close_ui(ui);

        session.access_ui(ui, |_| panic!("must not run"));
        session.lock().run_pending_access_tasks();
    }

    #[test]
    fn background_threads_queue_without_the_lock() {
        let session = Arc::new(Session::new(&DeploymentConfiguration::default()));
        let ui = session.lock().create_ui();

        let guard = session.lock();
        let worker = {
            let session = session.clone();
            thread::spawn(move || session.access_ui(ui, |ui| ui.report_app_error("bg", "")))
        };
        worker.join().expect("worker");
        drop(guard);

        session.lock().run_pending_access_tasks();
        assert_eq!(session.lock().ui(ui).expect("ui").pending_app_errors.len(), 1);
    }

    #[test]
    fn request_durations_accumulate() {
        let session = Session::new(&DeploymentConfiguration::default());
        let mut guard = session.lock();
        guard.record_request_duration(Duration::from_millis(5));
        guard.record_request_duration(Duration::from_millis(7));

        assert_eq!(guard.cumulative_request_duration(), Duration::from_millis(12));
        assert_eq!(guard.last_request_duration(), Some(Duration::from_millis(7)));
    }
}
