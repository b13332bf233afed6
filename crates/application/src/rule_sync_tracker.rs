use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use domain::fqdn::entity::{RuleId, RuleRealizationUpdate};
use domain::fqdn::error::FqdnError;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One-shot completion channel for a packet waiting on rule realization.
///
/// The sender is consumed by the first (and only) signal, so every
/// waiter receives exactly one verdict.
pub type RealizationWaiter = oneshot::Sender<Result<(), FqdnError>>;

/// A packet-handling task waiting for a set of dirty rules to be
/// realized. Shared between every rule it subscribed to; the count of
/// outstanding rules gates the success signal.
struct Subscriber {
    waiter: Option<RealizationWaiter>,
    rules_to_sync: usize,
}

struct TrackerState {
    /// Rules awaiting a successful realization. A rule only leaves this
    /// set through a success notification; failures keep it here so a
    /// later DNS response for the same name still blocks.
    dirty_rules: HashSet<RuleId>,
    /// Subscribers to notify when each rule's realization completes.
    rule_to_subscribers: HashMap<RuleId, Vec<Arc<Mutex<Subscriber>>>>,
}

/// Tracks the realization status of FQDN rules applied on this node.
///
/// Realization results are reported by the rule reconciler on an
/// unbounded channel and applied by a single dispatch task, which
/// serializes them against concurrent `subscribe` calls (the state lock
/// is the synchronization point; the channel provides ordering).
pub struct RuleSyncTracker {
    state: RwLock<TrackerState>,
    update_tx: mpsc::UnboundedSender<RuleRealizationUpdate>,
    metrics: Arc<dyn MetricsPort>,
}

impl RuleSyncTracker {
    pub fn new(
        metrics: Arc<dyn MetricsPort>,
    ) -> (Self, mpsc::UnboundedReceiver<RuleRealizationUpdate>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            state: RwLock::new(TrackerState {
                dirty_rules: HashSet::new(),
                rule_to_subscribers: HashMap::new(),
            }),
            update_tx,
            metrics,
        };
        (tracker, update_rx)
    }

    /// Queue a realization result for the dispatch task.
    pub fn notify(&self, update: RuleRealizationUpdate) {
        if self.update_tx.send(update).is_err() {
            tracing::debug!("rule sync tracker stopped, dropping realization update");
        }
    }

    /// Register a waiter for the given dirty rules.
    ///
    /// Atomically marks all rules dirty and appends the subscriber to
    /// each rule's list, so an update racing with this call observes
    /// either none or all of the subscription.
    pub fn subscribe(&self, waiter: RealizationWaiter, rule_ids: &HashSet<RuleId>) {
        let subscriber = Arc::new(Mutex::new(Subscriber {
            waiter: Some(waiter),
            rules_to_sync: rule_ids.len(),
        }));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for rule_id in rule_ids {
            state.dirty_rules.insert(rule_id.clone());
            state
                .rule_to_subscribers
                .entry(rule_id.clone())
                .or_default()
                .push(Arc::clone(&subscriber));
        }
        self.metrics.set_dirty_rule_count(state.dirty_rules.len() as u64);
    }

    /// A copy of the rules currently awaiting successful realization.
    pub fn snapshot_dirty(&self) -> HashSet<RuleId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.dirty_rules.clone()
    }

    /// Dispatch loop: applies realization updates until cancelled or the
    /// reconciler side of the channel is gone.
    pub async fn run(
        self: Arc<Self>,
        mut update_rx: mpsc::UnboundedReceiver<RuleRealizationUpdate>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                maybe = update_rx.recv() => match maybe {
                    Some(update) => self.apply_update(&update),
                    None => break,
                },
            }
        }
        tracing::debug!("rule sync tracker stopped");
    }

    fn apply_update(&self, update: &RuleRealizationUpdate) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = state.rule_to_subscribers.remove(&update.rule_id) {
            for subscriber in subscribers {
                let mut sub = subscriber.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(error) = &update.error {
                    tracing::debug!(
                        rule_id = %update.rule_id,
                        error,
                        "rule realization failed, failing subscriber"
                    );
                    if let Some(waiter) = sub.waiter.take() {
                        let _ = waiter.send(Err(FqdnError::RuleRealization {
                            rule_id: update.rule_id.clone(),
                        }));
                    }
                    // No further signals for this subscriber; other rules
                    // it waits on will find the count already drained.
                    sub.rules_to_sync = 0;
                    continue;
                }
                if sub.rules_to_sync == 0 {
                    // Another rule of this subscriber already failed and
                    // delivered the error.
                    continue;
                }
                sub.rules_to_sync -= 1;
                if sub.rules_to_sync == 0
                    && let Some(waiter) = sub.waiter.take()
                {
                    let _ = waiter.send(Ok(()));
                }
            }
        }
        // The rule stays dirty unless realization succeeded.
        if update.error.is_none() {
            state.dirty_rules.remove(&update.rule_id);
        }
        self.metrics.set_dirty_rule_count(state.dirty_rules.len() as u64);
    }
}

// ── Tests ───────────────────────────────────────────────────────────
