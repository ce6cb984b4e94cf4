//! Token registry and waiter resolution.

use crate::condition::Condition;
use crate::error::{ConsistencyError, ConsistencyResult};
use deltasync_protocol::{IndexedTokens, ReadYourWriteToken, Slot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// How a waiter left the pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    /// The condition became true.
    Satisfied,
    /// [`ConsistencyManager::resolve_conditions_with_id`] released it.
    ForceResolved,
    /// The wait ended without a resolution.
    Cancelled,
}

/// Terminal outcome of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// How the wait ended.
    pub state: WaiterState,
    /// The condition's newest token at resolution time.
    pub token: Option<ReadYourWriteToken>,
}

impl Resolution {
    fn satisfied(token: Option<ReadYourWriteToken>) -> Self {
        Self {
            state: WaiterState::Satisfied,
            token,
        }
    }

    fn force_resolved(token: Option<ReadYourWriteToken>) -> Self {
        Self {
            state: WaiterState::ForceResolved,
            token,
        }
    }

    fn cancelled() -> Self {
        Self {
            state: WaiterState::Cancelled,
            token: None,
        }
    }
}

struct Waiter {
    waiter_id: u64,
    condition: Arc<dyn Condition>,
    sender: oneshot::Sender<Resolution>,
}

#[derive(Default)]
struct State {
    tokens: IndexedTokens,
    waiters: HashMap<String, Vec<Waiter>>,
    next_slots: HashMap<String, Slot>,
}

impl State {
    /// Releases every waiter for `identifier` whose condition now holds.
    fn release_satisfied(&mut self, identifier: &str) -> usize {
        let State { tokens, waiters, .. } = self;
        let Some(list) = waiters.get_mut(identifier) else {
            return 0;
        };

        let mut released = 0;
        let mut i = 0;
        while i < list.len() {
            if list[i].sender.is_closed() {
                list.swap_remove(i);
            } else if list[i].condition.is_met(tokens) {
                let waiter = list.remove(i);
                let token = waiter.condition.newest_token(tokens);
                // The receiver may have been dropped since the check above.
                let _ = waiter.sender.send(Resolution::satisfied(token));
                released += 1;
            } else {
                i += 1;
            }
        }

        if list.is_empty() {
            waiters.remove(identifier);
        }
        released
    }
}

/// Tracks read-your-write tokens and releases callers waiting on them.
///
/// One instance serves a running SDK; construct it at startup and share it
/// through an `Arc`. A single lock covers the token index and the waiter
/// registry, so recording a token and evaluating the waiters of its
/// identifier happen as one step.
pub struct ConsistencyManager {
    state: Mutex<State>,
    next_waiter_id: AtomicU64,
}

impl ConsistencyManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_waiter_id: AtomicU64::new(1),
        }
    }

    /// Stores a token in a slot and releases every waiter it satisfies.
    ///
    /// Returns the number of waiters released.
    pub fn record_token(&self, identifier: &str, slot: Slot, token: ReadYourWriteToken) -> usize {
        let mut state = self.state.lock();
        state.tokens.insert(identifier, slot, token);

        let next = state.next_slots.entry(identifier.to_string()).or_insert(0);
        *next = (*next).max(slot.saturating_add(1));

        let released = state.release_satisfied(identifier);
        debug!(identifier, slot, released, "recorded read-your-write token");
        released
    }

    /// Records a token in the next unused slot of the identifier.
    ///
    /// Slots handed out this way increase monotonically per identifier and
    /// never reuse a slot written through [`ConsistencyManager::record_token`].
    pub fn record_token_next_slot(&self, identifier: &str, token: ReadYourWriteToken) -> Slot {
        let mut state = self.state.lock();
        let slot = state.next_slots.get(identifier).copied().unwrap_or(0);
        state.tokens.insert(identifier, slot, token);
        state
            .next_slots
            .insert(identifier.to_string(), slot.saturating_add(1));

        let released = state.release_satisfied(identifier);
        debug!(identifier, slot, released, "recorded read-your-write token");
        slot
    }

    /// Waits until `condition` holds for `identifier`.
    ///
    /// Returns the condition's newest token. Resolves immediately when the
    /// condition already holds. Dropping the returned future deregisters the
    /// waiter; callers impose their own timeout.
    pub async fn await_condition(
        &self,
        condition: Arc<dyn Condition>,
        identifier: &str,
    ) -> Option<ReadYourWriteToken> {
        self.wait_for_condition(condition, identifier).await.token
    }

    /// Like [`ConsistencyManager::await_condition`], bounded by `bound`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsistencyError::Timeout`] if the bound elapses first, and
    /// [`ConsistencyError::Cancelled`] if the waiter was dropped unresolved.
    pub async fn await_condition_timeout(
        &self,
        condition: Arc<dyn Condition>,
        identifier: &str,
        bound: Duration,
    ) -> ConsistencyResult<Option<ReadYourWriteToken>> {
        let condition_id = condition.condition_id().to_string();
        match tokio::time::timeout(bound, self.wait_for_condition(condition, identifier)).await {
            Ok(Resolution {
                state: WaiterState::Cancelled,
                ..
            }) => Err(ConsistencyError::Cancelled {
                identifier: identifier.to_string(),
            }),
            Ok(resolution) => Ok(resolution.token),
            Err(_) => {
                debug!(identifier, %condition_id, ?bound, "condition wait timed out");
                Err(ConsistencyError::Timeout {
                    condition_id,
                    identifier: identifier.to_string(),
                    bound,
                })
            }
        }
    }

    /// Waits for `condition`, reporting how the wait ended.
    pub async fn wait_for_condition(
        &self,
        condition: Arc<dyn Condition>,
        identifier: &str,
    ) -> Resolution {
        let (receiver, waiter_id) = {
            let mut state = self.state.lock();
            if condition.is_met(&state.tokens) {
                return Resolution::satisfied(condition.newest_token(&state.tokens));
            }

            let (sender, receiver) = oneshot::channel();
            let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            debug!(
                identifier,
                condition_id = condition.condition_id(),
                waiter_id,
                "registering waiter"
            );
            state
                .waiters
                .entry(identifier.to_string())
                .or_default()
                .push(Waiter {
                    waiter_id,
                    condition,
                    sender,
                });
            (receiver, waiter_id)
        };

        let registration = Registration {
            manager: self,
            identifier,
            waiter_id,
            armed: true,
        };
        let outcome = receiver.await;
        registration.disarm();

        outcome.unwrap_or_else(|_| Resolution::cancelled())
    }

    /// Releases every waiter registered for `identifier`, met or not.
    ///
    /// Used when further waiting is pointless, e.g. the write will never
    /// complete. Returns the number of waiters released.
    pub fn resolve_conditions_with_id(&self, identifier: &str) -> usize {
        let mut state = self.state.lock();
        let Some(waiters) = state.waiters.remove(identifier) else {
            return 0;
        };

        let mut released = 0;
        for waiter in waiters {
            let token = waiter.condition.newest_token(&state.tokens);
            if waiter.sender.send(Resolution::force_resolved(token)).is_ok() {
                released += 1;
            }
        }
        info!(identifier, released, "force-resolved waiting conditions");
        released
    }

    /// Copy of the slots recorded for an identifier.
    pub fn tokens_for(&self, identifier: &str) -> Option<BTreeMap<Slot, ReadYourWriteToken>> {
        self.state.lock().tokens.slots(identifier).cloned()
    }

    /// Copy of the whole token index.
    pub fn snapshot(&self) -> IndexedTokens {
        self.state.lock().tokens.clone()
    }

    /// Number of pending waiters for an identifier.
    pub fn pending_waiters(&self, identifier: &str) -> usize {
        self.state
            .lock()
            .waiters
            .get(identifier)
            .map_or(0, Vec::len)
    }

    /// Drops the tokens of an identifier.
    ///
    /// Refused (returns false) while waiters for it are pending.
    pub fn forget_identifier(&self, identifier: &str) -> bool {
        let mut state = self.state.lock();
        if state.waiters.get(identifier).is_some_and(|w| !w.is_empty()) {
            return false;
        }
        state.tokens.remove_identifier(identifier);
        state.next_slots.remove(identifier);
        true
    }

    fn deregister(&self, identifier: &str, waiter_id: u64) {
        let mut state = self.state.lock();
        if let Some(list) = state.waiters.get_mut(identifier) {
            list.retain(|w| w.waiter_id != waiter_id);
            if list.is_empty() {
                state.waiters.remove(identifier);
            }
            debug!(identifier, waiter_id, "waiter cancelled");
        }
    }
}

impl Default for ConsistencyManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a waiter whose future is dropped before resolution.
struct Registration<'a> {
    manager: &'a ConsistencyManager,
    identifier: &'a str,
    waiter_id: u64,
    armed: bool,
}

impl Registration<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.deregister(self.identifier, self.waiter_id);
        }
    }
}
