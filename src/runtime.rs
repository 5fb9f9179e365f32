//! Single-worker runtime.
//!
//! Inbound messages and teach commands share one worker thread fed by a
//! bounded channel, so the engine sees them strictly one at a time. Each
//! request carries its own reply channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TrySendError};
use tracing::{info, warn};

use crate::dialogue::DialogueId;
use crate::edit::TeachArgs;
use crate::engine::Teach;
use crate::error::{ExecutionError, TeachError, TeachResult};
use crate::session::{BufferedResponder, Message, User};

const PATH: &str = "teach";

/// Work accepted by the runtime.
#[derive(Debug, Clone)]
pub enum Request {
    /// An inbound chat message.
    Receive(Message),
    /// A parsed teach command.
    Execute { operator: User, args: TeachArgs },
}

/// What a receive produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub dialogue: Option<DialogueId>,
    pub sent: Vec<String>,
    /// `(command, executor)` pairs the answer asked the host to run.
    pub executed: Vec<(String, String)>,
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Delivered(Delivery),
    Executed(String),
}

enum Job {
    Run {
        request: Request,
        reply: Sender<TeachResult<Reply>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

fn disconnected() -> TeachError {
    ExecutionError::Disconnected {
        path: PATH.to_string(),
    }
    .into()
}

fn run(teach: &Teach, self_id: &str, request: Request) -> TeachResult<Reply> {
    match request {
        Request::Receive(message) => {
            let mut responder = BufferedResponder::new(self_id);
            let dialogue = teach.receive(&message, &mut responder)?;
            Ok(Reply::Delivered(Delivery {
                dialogue,
                sent: responder.sent,
                executed: responder.executed,
            }))
        }
        Request::Execute { operator, args } => teach.execute(&operator, &args).map(Reply::Executed),
    }
}

/// Handle to a submitted request.
#[derive(Debug)]
pub struct Pending {
    rx: Receiver<TeachResult<Reply>>,
}

impl Pending {
    /// Waits for the reply.
    pub fn join(self) -> TeachResult<Reply> {
        self.rx.recv().map_err(|_| disconnected())?
    }

    /// Waits for the reply with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> TeachResult<Reply> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into(),
            RecvTimeoutError::Disconnected => disconnected(),
        })?
    }
}

/// The engine running on its own worker thread.
pub struct TeachRuntime {
    engine: Arc<Teach>,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    queue_capacity: usize,
    dropped: AtomicU64,
}

impl TeachRuntime {
    /// Start the worker.
    ///
    /// `self_id` is the bot's own user id, used for self mentions in
    /// rendered answers. The queue size comes from the engine's
    /// `runtime.queue_capacity`.
    pub fn start(teach: Teach, self_id: impl Into<String>) -> TeachResult<Self> {
        let queue_capacity = teach.config().runtime.queue_capacity.max(1);
        let engine = Arc::new(teach);
        let self_id = self_id.into();
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let worker_engine = Arc::clone(&engine);
        let worker = thread::Builder::new()
            .name("teach-worker".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Run { request, reply } => {
                            let _ = reply.send(run(&worker_engine, &self_id, request));
                        }

                        #[cfg(test)]
                        Job::Sleep { duration, reply } => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                }
            })
            .map_err(|e| TeachError::internal(format!("failed to spawn teach worker: {e}")))?;
        info!(queue_capacity, "teach runtime started");

        Ok(Self {
            engine,
            tx: Some(tx),
            worker: Some(worker),
            queue_capacity,
            dropped: AtomicU64::new(0),
        })
    }

    fn sender(&self) -> TeachResult<&Sender<Job>> {
        self.tx.as_ref().ok_or_else(disconnected)
    }

    /// Queue a request, waiting for room.
    pub fn submit(&self, request: Request) -> TeachResult<Pending> {
        let (reply, rx) = bounded(1);
        self.sender()?
            .send(Job::Run { request, reply })
            .map_err(|SendError(_)| disconnected())?;
        Ok(Pending { rx })
    }

    /// Queue a request without blocking.
    ///
    /// A full queue rejects the request and counts it as dropped.
    pub fn try_submit(&self, request: Request) -> TeachResult<Pending> {
        let (reply, rx) = bounded(1);
        self.try_send(Job::Run { request, reply })?;
        Ok(Pending { rx })
    }

    fn try_send(&self, job: Job) -> TeachResult<()> {
        match self.sender()?.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, capacity = self.queue_capacity, "teach queue full, request dropped");
                Err(ExecutionError::QueueFull {
                    path: PATH.to_string(),
                    capacity: self.queue_capacity,
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    /// Answer a message on the worker and wait for the delivery.
    pub fn receive(&self, message: Message) -> TeachResult<Delivery> {
        match self.submit(Request::Receive(message))?.join()? {
            Reply::Delivered(delivery) => Ok(delivery),
            Reply::Executed(_) => Err(TeachError::internal("receive answered with a command reply")),
        }
    }

    /// Run a teach command on the worker and wait for its reply.
    pub fn execute(&self, operator: User, args: TeachArgs) -> TeachResult<String> {
        match self.submit(Request::Execute { operator, args })?.join()? {
            Reply::Executed(text) => Ok(text),
            Reply::Delivered(_) => Err(TeachError::internal("command answered with a delivery")),
        }
    }

    /// Requests rejected by [`TeachRuntime::try_submit`] so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The engine the worker runs.
    #[must_use]
    pub fn engine(&self) -> &Teach {
        &self.engine
    }

    /// Stop accepting work, drain the queue and join the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel lets the worker drain queued jobs, then exit.
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("teach worker panicked");
            } else {
                info!("teach runtime stopped");
            }
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> TeachResult<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.try_send(Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for TeachRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TeachRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeachRuntime")
            .field("queue_capacity", &self.queue_capacity)
            .field("dropped", &self.dropped())
            .field("running", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}
