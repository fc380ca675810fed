//! Single-threaded task loops for hardware and transport ownership
//!
//! Each [`ActorLoop`] owns a dedicated OS thread running a current-thread
//! tokio runtime. Work is submitted as futures and executed one after
//! another on that thread, so everything scheduled onto the same loop is
//! serialized without locks. Stopping the loop drains already-submitted
//! work before the thread exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tracing::warn;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum LoopMsg {
    Task(BoxedTask),
    Stop,
}

/// Handle to a dedicated single-threaded task loop.
///
/// Cloning the handle is cheap; all clones submit to the same thread.
#[derive(Clone)]
pub struct ActorLoop {
    inner: Arc<Inner>,
}

struct Inner {
    name: &'static str,
    tx: mpsc::UnboundedSender<LoopMsg>,
    thread_id: ThreadId,
    stopped: AtomicBool,
    join: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ActorLoop {
    /// Spawn the loop thread. The thread parks until work arrives.
    pub fn spawn(name: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id_tx, id_rx) = std::sync::mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = id_tx.send(thread::current().id());
                run_loop(rx);
            })
            .unwrap_or_else(|e| panic!("failed to spawn {name} loop thread: {e}"));

        let thread_id = id_rx
            .recv()
            .unwrap_or_else(|_| panic!("{name} loop thread died before reporting its id"));

        Self {
            inner: Arc::new(Inner {
                name,
                tx,
                thread_id,
                stopped: AtomicBool::new(false),
                join: parking_lot::Mutex::new(Some(handle)),
            }),
        }
    }

    /// True when called from the loop's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue a future for execution on the loop thread.
    ///
    /// After [`stop`](Self::stop) the task is silently dropped, so late
    /// hardware callbacks racing a shutdown are harmless.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        if self.inner.tx.send(LoopMsg::Task(Box::pin(task))).is_err() {
            warn!(event = "actor_loop_closed", name = self.inner.name);
        }
    }

    /// Stop the loop and block until all previously submitted work has run
    /// and the thread has exited. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.tx.send(LoopMsg::Stop);
        if let Some(handle) = self.inner.join.lock().take() {
            if handle.join().is_err() {
                warn!(event = "actor_loop_panicked", name = self.inner.name);
            }
        }
    }
}

fn run_loop(mut rx: mpsc::UnboundedReceiver<LoopMsg>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .enable_io()
        .build()
        .unwrap_or_else(|e| panic!("failed to build loop runtime: {e}"));
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, async {
        while let Some(msg) = rx.recv().await {
            match msg {
                LoopMsg::Task(task) => {
                    tokio::task::spawn_local(task);
                }
                LoopMsg::Stop => break,
            }
        }
    });
    // Drain tasks spawned before the stop marker.
    rt.block_on(local);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_submitted_tasks_run_in_order() {
        let actor = ActorLoop::spawn("test-order");
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            actor.submit(async move {
                log.lock().push(i);
            });
        }
        actor.stop();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_drains_pending_work() {
        let actor = ActorLoop::spawn("test-drain");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = count.clone();
            actor.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        actor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_submit_after_stop_is_dropped() {
        let actor = ActorLoop::spawn("test-late");
        actor.stop();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        actor.submit(async move {
            ran2.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_is_current() {
        let actor = ActorLoop::spawn("test-current");
        assert!(!actor.is_current());
        let (tx, rx) = std::sync::mpsc::channel();
        let probe = actor.clone();
        actor.submit(async move {
            let _ = tx.send(probe.is_current());
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        actor.stop();
    }

}
