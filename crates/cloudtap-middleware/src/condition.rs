//! Waitable conditions.
//!
//! A [`ConditionSet`] blocks until at least one attached condition triggers
//! and reports which ones did.  Two kinds exist:
//!
//! * **Status conditions** are bound to an entity (the reader) and trigger
//!   whenever one of its status bits changes.
//! * **Guard conditions** are raised from another thread.  The subscriber
//!   uses one as its terminate signal.
//!
//! Conditions are owned by the session; the dispatch loop only ever sees the
//! lightweight [`Condition`] handles returned from [`ConditionSet::wait`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use cloudtap_types::CloudError;
use tracing::debug;

/// Process-unique condition identifier.
pub type ConditionId = u64;

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh [`ConditionId`].
pub fn next_condition_id() -> ConditionId {
    NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a triggered condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Status { id: ConditionId },
    Guard { id: ConditionId },
}

impl Condition {
    pub fn id(&self) -> ConditionId {
        match self {
            Condition::Status { id } | Condition::Guard { id } => *id,
        }
    }
}

/// Something a blocked waiter can be woken through.
pub trait WaitSignal: Send + Sync {
    fn notify(&self);
}

/// A set of conditions the dispatch loop blocks on.
pub trait ConditionSet: Send {
    /// Block until at least one condition triggers.
    ///
    /// `None` waits forever.  An elapsed timeout returns `Ok` with an empty
    /// list.
    ///
    /// # Errors
    ///
    /// * [`CloudError::WaitFailure`] when the wait itself failed.  The caller
    ///   may wait again.
    /// * [`CloudError::SessionLost`] when the session can no longer be
    ///   reached.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Condition>, CloudError>;
}

struct GuardInner {
    id: ConditionId,
    triggered: AtomicBool,
    signals: Mutex<Vec<Weak<dyn WaitSignal>>>,
}

/// Externally triggered condition.  Clones share the same trigger value.
#[derive(Clone)]
pub struct GuardCondition {
    inner: Arc<GuardInner>,
}

impl GuardCondition {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GuardInner {
                id: next_condition_id(),
                triggered: AtomicBool::new(false),
                signals: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ConditionId {
        self.inner.id
    }

    /// The handle reported by a wait when this guard has fired.
    pub fn condition(&self) -> Condition {
        Condition::Guard { id: self.inner.id }
    }

    pub fn trigger_value(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Set the trigger value.  Raising it wakes every attached waiter.
    pub fn set_trigger_value(&self, value: bool) {
        self.inner.triggered.store(value, Ordering::SeqCst);
        if value {
            self.notify_waiters();
        }
    }

    /// Register `signal` to be notified when the guard is raised.
    ///
    /// Only a weak reference is kept.  If the guard is already raised the
    /// signal is notified immediately.
    pub fn attach_signal(&self, signal: &Arc<dyn WaitSignal>) {
        let mut signals = self
            .inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        signals.retain(|s| s.strong_count() > 0);
        signals.push(Arc::downgrade(signal));
        drop(signals);

        if self.trigger_value() {
            signal.notify();
        }
    }

    fn notify_waiters(&self) {
        let signals: Vec<Arc<dyn WaitSignal>> = self
            .inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        debug!(guard = self.inner.id, waiters = signals.len(), "guard condition raised");
        for signal in signals {
            signal.notify();
        }
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardCondition")
            .field("id", &self.inner.id)
            .field("triggered", &self.trigger_value())
            .finish()
    }
}
