//! Central error reporting with a recovery-mode circuit.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::AppError;
use crate::events::{topics, EventBus};
use crate::store::reducers::{add_error_action, set_recovery_mode_action, simple_action, RESET_STATE};
use crate::store::{AppState, ErrorRecord, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryConfig {
    /// More errors than this inside `window` enter recovery mode.
    pub max_errors: usize,
    pub window: Duration,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            max_errors: 5,
            window: Duration::from_secs(60),
        }
    }
}

pub struct ErrorBoundary {
    store: Store<AppState>,
    bus: EventBus,
    config: BoundaryConfig,
    recent: Mutex<VecDeque<Instant>>,
}

impl ErrorBoundary {
    pub fn new(store: Store<AppState>, bus: EventBus, config: BoundaryConfig) -> Self {
        Self {
            store,
            bus,
            config,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an error raised by `source`. Returns true when this report
    /// tripped recovery mode.
    pub fn report(&self, error: &AppError, source: &str) -> bool {
        match error.context() {
            Some(ctx) => tracing::error!(
                "[{}] {} ({}) {}",
                source,
                error.inner(),
                error.error_code(),
                ctx.to_log_string()
            ),
            None => tracing::error!("[{}] {} ({})", source, error, error.error_code()),
        }

        let record = ErrorRecord::new(error.user_message(), error.error_code(), source);
        self.store.dispatch_plain(add_error_action(&record));
        self.bus.emit(
            topics::ERROR_REPORTED,
            json!({
                "source": source,
                "code": error.error_code(),
                "category": error.category().label(),
                "message": error.to_string(),
                "userMessage": error.user_message(),
            }),
        );

        let count = self.note_occurrence();
        if count <= self.config.max_errors || self.store.get_state().recovery_mode {
            return false;
        }

        tracing::warn!(
            "{} errors within {:?}, entering recovery mode",
            count,
            self.config.window
        );
        self.store.dispatch_plain(set_recovery_mode_action(true));
        self.bus.emit(
            topics::ERROR_RECOVERY,
            json!({
                "errorCount": count,
                "windowMs": self.config.window.as_millis() as u64,
            }),
        );
        true
    }

    /// Await `operation`, reporting its error instead of returning it.
    pub async fn guard<T, F>(&self, source: &str, operation: F) -> Option<T>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match operation.await {
            Ok(value) => Some(value),
            Err(err) => {
                self.report(&err, source);
                None
            }
        }
    }

    /// Reset the snapshot (preferences and chats survive) and leave
    /// recovery mode.
    pub fn reset_state(&self) {
        tracing::info!("Resetting application state");
        self.lock_recent().clear();
        self.store.dispatch_plain(simple_action(RESET_STATE));
    }

    /// Errors reported within the current window.
    pub fn recent_error_count(&self) -> usize {
        let mut recent = self.lock_recent();
        Self::expire(&mut recent, self.config.window);
        recent.len()
    }

    fn note_occurrence(&self) -> usize {
        let mut recent = self.lock_recent();
        recent.push_back(Instant::now());
        Self::expire(&mut recent, self.config.window);
        recent.len()
    }

    fn expire(recent: &mut VecDeque<Instant>, window: Duration) {
        while recent
            .front()
            .is_some_and(|at| at.elapsed() > window)
        {
            recent.pop_front();
        }
    }

    fn lock_recent(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ChatError};
    use crate::models::Preferences;
    use crate::store::create_app_store;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn boundary(config: BoundaryConfig) -> (ErrorBoundary, Store<AppState>, EventBus) {
        let bus = EventBus::new();
        let store = create_app_store(AppState::default(), None);
        (ErrorBoundary::new(store.clone(), bus.clone(), config), store, bus)
    }

    fn overloaded() -> AppError {
        ApiError::Status {
            status: 529,
            body: String::new(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_report_records_and_emits() {
        let (boundary, store, bus) = boundary(BoundaryConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        bus.subscribe(topics::ERROR_REPORTED, move |event| {
            assert_eq!(event.payload["source"], "chat");
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(!boundary.report(&overloaded(), "chat"));
        let state = store.get_state();
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.last_error.as_ref().unwrap().code, "E_API_HTTP");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sixth_error_in_window_enters_recovery() {
        let (boundary, store, bus) = boundary(BoundaryConfig::default());
        let recoveries = Arc::new(AtomicUsize::new(0));
        let r = recoveries.clone();
        bus.subscribe(topics::ERROR_RECOVERY, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..5 {
            assert!(!boundary.report(&overloaded(), "api"));
        }
        assert!(!store.get_state().recovery_mode);
        assert!(boundary.report(&overloaded(), "api"));
        assert!(store.get_state().recovery_mode);
        assert!(!boundary.report(&overloaded(), "api"));
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let (boundary, store, _bus) = boundary(BoundaryConfig {
            max_errors: 2,
            window: Duration::from_millis(40),
        });
        boundary.report(&overloaded(), "api");
        boundary.report(&overloaded(), "api");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(boundary.recent_error_count(), 0);
        assert!(!boundary.report(&overloaded(), "api"));
        assert!(!store.get_state().recovery_mode);
    }

    #[tokio::test]
    async fn test_reset_state_keeps_preferences() {
        let bus = EventBus::new();
        let prefs = Preferences {
            theme: "dark".to_string(),
            ..Preferences::default()
        };
        let store = create_app_store(AppState::with_preferences(prefs), None);
        let boundary = ErrorBoundary::new(
            store.clone(),
            bus,
            BoundaryConfig {
                max_errors: 0,
                window: Duration::from_secs(60),
            },
        );
        assert!(boundary.report(&overloaded(), "api"));

        boundary.reset_state();
        let state = store.get_state();
        assert!(!state.recovery_mode);
        assert!(state.errors.is_empty());
        assert_eq!(state.preferences.theme, "dark");
        assert_eq!(boundary.recent_error_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_reports_errors() {
        let (boundary, store, _bus) = boundary(BoundaryConfig::default());
        let ok = boundary.guard("op", async { Ok::<_, AppError>(7) }).await;
        assert_eq!(ok, Some(7));

        let err = boundary
            .guard("op", async { Err::<i32, _>(AppError::from(ChatError::Busy)) })
            .await;
        assert_eq!(err, None);
        assert_eq!(store.get_state().errors[0].code, "E_CHAT_BUSY");
    }
}
