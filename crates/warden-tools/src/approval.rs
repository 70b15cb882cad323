//! Ready-made [`ApprovalPrompt`] implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::permissions::{ApprovalPrompt, ApprovalRequest};

/// Answers every prompt the same way. Used for non-interactive runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt {
    approve: bool,
}

impl FixedPrompt {
    #[must_use]
    pub fn approve() -> Self {
        Self { approve: true }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self { approve: false }
    }
}

impl ApprovalPrompt for FixedPrompt {
    async fn prompt(&self, _request: &ApprovalRequest) -> bool {
        self.approve
    }
}

/// An approval request waiting for a UI to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    pub id: u64,
    pub request: ApprovalRequest,
}

#[derive(Debug)]
struct Waiter {
    request: ApprovalRequest,
    responder: oneshot::Sender<bool>,
}

/// Parks each prompt on a oneshot channel until a UI resolves it by id.
///
/// Every prompt gets its own channel, so a slow answer never holds up other tool calls.
/// A request whose waiter is dropped (the UI went away) counts as declined.
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    pending: Arc<Mutex<HashMap<u64, Waiter>>>,
    next_id: Arc<AtomicU64>,
    notify: Option<tokio::sync::mpsc::UnboundedSender<PendingApproval>>,
}

impl ApprovalGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push every new request to `tx` as well as keeping it pending.
    #[must_use]
    pub fn with_notifier(mut self, tx: tokio::sync::mpsc::UnboundedSender<PendingApproval>) -> Self {
        self.notify = Some(tx);
        self
    }

    /// Pending requests, oldest first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingApproval> {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<PendingApproval> = guard
            .iter()
            .map(|(id, waiter)| PendingApproval {
                id: *id,
                request: waiter.request.clone(),
            })
            .collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Answer a pending request. Returns `false` when `id` is unknown or already answered.
    pub fn resolve(&self, id: u64, approve: bool) -> bool {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.responder.send(approve);
                true
            }
            None => false,
        }
    }

    /// Decline every pending request for a conversation.
    pub fn reject_conversation(&self, conversation_id: &str) {
        let ids: Vec<u64> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, w)| w.request.conversation_id == conversation_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.resolve(id, false);
        }
    }

    fn register(&self, request: &ApprovalRequest) -> oneshot::Receiver<bool> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Waiter {
                    request: request.clone(),
                    responder: tx,
                },
            );
        if let Some(ref notify) = self.notify {
            let _ = notify.send(PendingApproval {
                id,
                request: request.clone(),
            });
        }
        rx
    }
}

impl ApprovalPrompt for ApprovalGate {
    async fn prompt(&self, request: &ApprovalRequest) -> bool {
        let rx = self.register(request);
        rx.await.unwrap_or(false)
    }
}
