//! Synchronous phase/acknowledgment protocol between the orchestrator and
//! the hook-execution handler.
//!
//! Two bounded queues: phases travel forward on the event queue, boolean
//! acknowledgments travel back on the response queue. The orchestrator
//! blocks on every send until the matching ack arrives, so phases are
//! strictly paired and never pipelined. The handler receives phases in a
//! loop, performs the phase's work, and sends exactly one ack per phase —
//! also on failure, before it may stop.
//!
//! Closing the event queue is what lets the handler's receive loop
//! terminate; the driver closes it exactly once on every exit path,
//! including failure.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::errors::{DenliteError, DenliteResult};
use crate::lifecycle::LifecyclePhase;

/// Construct the two ends of a coordinator session.
pub fn channel() -> (PhaseDriver, PhaseHandler) {
    // Capacity 1 on both queues: the protocol never has more than one
    // message in flight per direction.
    let (phase_tx, phase_rx) = mpsc::channel(1);
    let (ack_tx, ack_rx) = mpsc::channel(1);

    let driver = PhaseDriver {
        inner: Arc::new(Mutex::new(DriverInner {
            phase_tx: Some(phase_tx),
            ack_rx,
        })),
    };
    let handler = PhaseHandler { phase_rx, ack_tx };
    (driver, handler)
}

struct DriverInner {
    /// Taken on close; dropping the sender closes the event queue.
    phase_tx: Option<mpsc::Sender<LifecyclePhase>>,
    ack_rx: mpsc::Receiver<bool>,
}

/// Orchestrator side of the protocol.
///
/// Cloneable: the terminal-attach background task holds a clone so it can
/// drive `PostAttach` itself. The send/await-ack pair runs under a mutex,
/// which is what keeps re-entrant use strictly paired.
#[derive(Clone)]
pub struct PhaseDriver {
    inner: Arc<Mutex<DriverInner>>,
}

impl PhaseDriver {
    /// Send one phase and block until the handler acknowledges it.
    ///
    /// A `false` ack means the phase's work failed on the handler side
    /// (cause logged there) and surfaces as `LifecycleHandlerFailed`.
    pub async fn drive(&self, phase: LifecyclePhase) -> DenliteResult<()> {
        let mut inner = self.inner.lock().await;

        let phase_tx = inner.phase_tx.as_ref().ok_or_else(|| {
            DenliteError::Internal(format!("phase '{phase}' driven after queue close"))
        })?;
        phase_tx.send(phase).await.map_err(|_| {
            DenliteError::Internal("lifecycle handler stopped receiving".to_string())
        })?;
        tracing::debug!(%phase, "phase sent, awaiting ack");

        match inner.ack_rx.recv().await {
            Some(true) => Ok(()),
            Some(false) => Err(DenliteError::LifecycleHandlerFailed(
                phase.as_str().to_string(),
            )),
            None => Err(DenliteError::Internal(
                "lifecycle ack queue closed mid-phase".to_string(),
            )),
        }
    }

    /// Close the event queue. Idempotent; after this the handler's receive
    /// loop drains and terminates.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.phase_tx.take().is_some() {
            tracing::debug!("lifecycle event queue closed");
        }
    }
}

/// Handler side of the protocol.
pub struct PhaseHandler {
    phase_rx: mpsc::Receiver<LifecyclePhase>,
    ack_tx: mpsc::Sender<bool>,
}

impl PhaseHandler {
    /// Receive phases until the event queue closes, performing `work` for
    /// each and acknowledging its outcome.
    ///
    /// A failed phase is acked `false` and logged here; the loop keeps
    /// receiving so the driver is never left blocked, and terminates once
    /// the driver closes the queue.
    pub async fn run<F, Fut>(mut self, mut work: F)
    where
        F: FnMut(LifecyclePhase) -> Fut,
        Fut: Future<Output = DenliteResult<()>>,
    {
        while let Some(phase) = self.phase_rx.recv().await {
            let ack = match work(phase).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(%phase, error = %e, "lifecycle phase work failed");
                    false
                }
            };
            if self.ack_tx.send(ack).await.is_err() {
                // Driver dropped its receiver; nothing left to coordinate.
                break;
            }
        }
        tracing::debug!("lifecycle handler loop terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_phases_processed_in_send_order() {
        let (driver, handler) = channel();
        let seen: Arc<StdMutex<Vec<LifecyclePhase>>> = Arc::new(StdMutex::new(Vec::new()));

        let recorder = seen.clone();
        let handler_task = tokio::spawn(handler.run(move |phase| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(phase);
                Ok(())
            }
        }));

        let phases = [
            LifecyclePhase::Initialize,
            LifecyclePhase::OnCreate,
            LifecyclePhase::PostStart,
        ];
        for phase in phases {
            driver.drive(phase).await.unwrap();
        }
        driver.close().await;
        handler_task.await.unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &phases);
    }

    #[tokio::test]
    async fn test_false_ack_surfaces_and_queue_still_closes() {
        let (driver, handler) = channel();

        let handler_task = tokio::spawn(handler.run(|phase| async move {
            if phase == LifecyclePhase::OnCreate {
                Err(DenliteError::Runtime("hook exited nonzero".into()))
            } else {
                Ok(())
            }
        }));

        driver.drive(LifecyclePhase::Initialize).await.unwrap();
        let err = driver.drive(LifecyclePhase::OnCreate).await.unwrap_err();
        assert!(matches!(err, DenliteError::LifecycleHandlerFailed(_)));

        // The orchestrator stops driving further phases but must still
        // close the queue so the handler loop can terminate.
        driver.close().await;
        handler_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (driver, handler) = channel();
        let handler_task = tokio::spawn(handler.run(|_| async { Ok(()) }));

        driver.close().await;
        driver.close().await;
        handler_task.await.unwrap();

        let err = driver.drive(LifecyclePhase::Initialize).await.unwrap_err();
        assert!(matches!(err, DenliteError::Internal(_)));
    }

    #[tokio::test]
    async fn test_cloned_driver_re_enters_protocol() {
        let (driver, handler) = channel();
        let seen: Arc<StdMutex<Vec<LifecyclePhase>>> = Arc::new(StdMutex::new(Vec::new()));

        let recorder = seen.clone();
        let handler_task = tokio::spawn(handler.run(move |phase| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(phase);
                Ok(())
            }
        }));

        driver.drive(LifecyclePhase::PostStart).await.unwrap();

        // A background task drives postAttach through its own clone, the
        // way the terminal-attach task re-enters the protocol.
        let attach_driver = driver.clone();
        let attach_task =
            tokio::spawn(async move { attach_driver.drive(LifecyclePhase::PostAttach).await });
        attach_task.await.unwrap().unwrap();

        driver.close().await;
        handler_task.await.unwrap();

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[LifecyclePhase::PostStart, LifecyclePhase::PostAttach]
        );
    }
}
