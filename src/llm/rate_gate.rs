//! Request and token rate gate.
//!
//! The single arbiter of LLM admission: enforces a requests-per-minute
//! and a tokens-per-minute budget over a rolling one-minute window,
//! shared by every concurrent call. Callers reserve an estimated token
//! count on acquire and settle with actuals on release; surplus returns
//! to the budget immediately. Waiters are served FIFO, and cancelling a
//! waiter releases its place before the next waiter is considered.
//!
//! No other component sleeps for rate purposes; pacing lives here and
//! retry backoff lives in [`LlmClient`](crate::llm::LlmClient).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;

/// Width of the rolling admission window.
const WINDOW: Duration = Duration::from_secs(60);

/// One admitted request still inside the rolling window.
#[derive(Debug)]
struct Admission {
    id: u64,
    at: Instant,
    tokens: u64,
}

#[derive(Debug, Default)]
struct GateInner {
    /// Admissions in window order (monotone `at`).
    admitted: VecDeque<Admission>,
    /// FIFO queue of waiter tickets.
    queue: VecDeque<u64>,
    next_ticket: u64,
    next_admission: u64,
}

/// Dual-budget admission gate over a rolling one-minute window.
#[derive(Debug)]
pub struct RateGate {
    rpm_max: u32,
    tpm_max: u64,
    inner: Mutex<GateInner>,
    notify: Notify,
}

impl RateGate {
    /// Creates a gate with the given per-minute budgets.
    #[must_use]
    pub fn new(rpm_max: u32, tpm_max: u64) -> Arc<Self> {
        Arc::new(Self {
            rpm_max,
            tpm_max,
            inner: Mutex::new(GateInner::default()),
            notify: Notify::new(),
        })
    }

    fn prune(inner: &mut GateInner, now: Instant) {
        while inner
            .admitted
            .front()
            .is_some_and(|a| now.duration_since(a.at) >= WINDOW)
        {
            inner.admitted.pop_front();
        }
    }

    /// Blocks until both budgets admit a request reserving `est_tokens`.
    ///
    /// FIFO among waiters. A request whose estimate alone exceeds the
    /// token budget is admitted only into an empty window, so oversized
    /// requests pass one at a time instead of deadlocking.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Cancelled`] when `cancel` fires while waiting;
    /// the waiter's queue slot is released before the next waiter is
    /// considered.
    pub async fn acquire(
        self: &Arc<Self>,
        est_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let ticket = {
            #[allow(clippy::unwrap_used)]
            let mut inner = self.inner.lock().unwrap();
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.queue.push_back(ticket);
            ticket
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let wait_until = {
                #[allow(clippy::unwrap_used)]
                let mut inner = self.inner.lock().unwrap();
                let now = Instant::now();
                Self::prune(&mut inner, now);

                if inner.queue.front() == Some(&ticket) {
                    let window_tokens: u64 = inner.admitted.iter().map(|a| a.tokens).sum();
                    let requests_ok = inner.admitted.len() < self.rpm_max as usize;
                    let tokens_ok =
                        window_tokens + est_tokens <= self.tpm_max || window_tokens == 0;
                    if requests_ok && tokens_ok {
                        inner.queue.pop_front();
                        let id = inner.next_admission;
                        inner.next_admission += 1;
                        inner.admitted.push_back(Admission {
                            id,
                            at: now,
                            tokens: est_tokens,
                        });
                        drop(inner);
                        self.notify.notify_waiters();
                        return Ok(RatePermit {
                            gate: Arc::clone(self),
                            id,
                            settled: false,
                        });
                    }
                }

                // Register for wakeups while still holding the lock so a
                // release between unlock and await cannot be missed.
                notified.as_mut().enable();
                inner.admitted.front().map(|a| a.at + WINDOW)
            };

            tokio::select! {
                () = &mut notified => {}
                () = async {
                    match wait_until {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {}
                () = cancel.cancelled() => {
                    #[allow(clippy::unwrap_used)]
                    let mut inner = self.inner.lock().unwrap();
                    inner.queue.retain(|&t| t != ticket);
                    drop(inner);
                    self.notify.notify_waiters();
                    return Err(LlmError::Cancelled);
                }
            }
        }
    }

    /// Settles an admission with the tokens actually consumed. The
    /// request slot stays in the window; only the token reservation is
    /// adjusted.
    fn settle(&self, id: u64, actual_tokens: u64) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        if let Some(admission) = inner.admitted.iter_mut().find(|a| a.id == id) {
            admission.tokens = actual_tokens;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Requests admitted within the current window (test/diagnostic view).
    #[must_use]
    pub fn window_requests(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        Self::prune(&mut inner, Instant::now());
        inner.admitted.len()
    }

    /// Token sum reserved or settled within the current window.
    #[must_use]
    pub fn window_tokens(&self) -> u64 {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        Self::prune(&mut inner, Instant::now());
        inner.admitted.iter().map(|a| a.tokens).sum()
    }
}

/// Handle for one admitted request.
///
/// Call [`RatePermit::release`] with the actual token consumption; a
/// permit dropped without release (failed or cancelled call) returns its
/// whole token reservation to the budget.
#[derive(Debug)]
pub struct RatePermit {
    gate: Arc<RateGate>,
    id: u64,
    settled: bool,
}

impl RatePermit {
    /// Settles the admission with actual token usage. Surplus relative
    /// to the estimate is returned to the budget immediately.
    pub fn release(mut self, actual_tokens: u64) {
        self.settled = true;
        self.gate.settle(self.id, actual_tokens);
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.settle(self.id, 0);
        }
    }
}
