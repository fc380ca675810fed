//! Card reader thread
//!
//! Owns the [`TagReader`] on a dedicated OS thread. Between cards the
//! thread sleeps on the reader IRQ line; once a card is read it polls for
//! removal. Everything the rest of the system needs to know arrives as
//! [`ReaderEvent`]s through the emit callback, which runs on this thread
//! and must not block for long.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::domain::{Card, Result};
use crate::infra::config::KeyType;
use crate::io::rc522::TagReader;

/// Interval between removal probes while a card rests on the reader.
pub const REMOVAL_POLL: Duration = Duration::from_millis(750);

/// MIFARE Classic 1K has blocks 0 to 63.
const LAST_BLOCK: u8 = 63;

/// End-of-text sentinel terminating card content.
const CONTENT_SENTINEL: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// A card was placed on the reader and its content read out.
    CardDetected(Card),
    /// A card was placed but could not be read (bad key, torn read,
    /// missing terminator).
    CardReadFailed,
    /// The previously detected card left the field.
    CardRemoved,
    /// The reader thread died and will produce no further events.
    Fatal(String),
}

type EmitFn = Arc<dyn Fn(ReaderEvent) + Send + Sync>;

/// Interruptible sleep shared between the reader thread and its owner.
#[derive(Clone, Default)]
struct StopFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopFlag {
    fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep up to `timeout`. Returns true when the flag was raised.
    fn sleep(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        if *stopped {
            return true;
        }
        cvar.wait_for(&mut stopped, timeout);
        *stopped
    }
}

pub struct RfidReader {
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl RfidReader {
    /// Start the reader thread. `emit` is invoked for every event; it runs
    /// on the reader thread.
    pub fn spawn<E>(
        tag: Box<dyn TagReader>,
        key: [u8; 6],
        key_type: KeyType,
        removal_poll: Duration,
        emit: E,
    ) -> Self
    where
        E: Fn(ReaderEvent) + Send + Sync + 'static,
    {
        let stop = StopFlag::default();
        let thread_stop = stop.clone();
        let emit: EmitFn = Arc::new(emit);
        let handle = thread::Builder::new()
            .name("rfid-reader".to_string())
            .spawn(move || {
                let emit_panic = emit.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                    run(tag, key, key_type, removal_poll, thread_stop, emit)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(event = "reader_thread_failed", error = %e);
                        emit_panic(ReaderEvent::Fatal(e.to_string()));
                    }
                    Err(_) => {
                        error!(event = "reader_thread_panicked");
                        emit_panic(ReaderEvent::Fatal("reader thread panicked".to_string()));
                    }
                }
            })
            .ok();
        if handle.is_none() {
            error!(event = "reader_thread_spawn_failed");
        }
        Self { stop, handle }
    }

    /// Raise the stop flag and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RfidReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut tag: Box<dyn TagReader>,
    key: [u8; 6],
    key_type: KeyType,
    removal_poll: Duration,
    stop: StopFlag,
    emit: EmitFn,
) -> Result<()> {
    tag.init()?;
    info!(event = "reader_started");

    while !stop.is_stopped() {
        let cancel_stop = stop.clone();
        if !tag.wait_for_tag(&mut || cancel_stop.is_stopped())? {
            continue;
        }
        if !tag.request_idle()? {
            continue;
        }
        let Some(uid) = tag.anticollision()? else {
            continue;
        };
        if !tag.select(&uid)? {
            continue;
        }

        info!(event = "card_detected", uid = %hex::encode_upper(&uid[..4]));
        match read_content(tag.as_mut(), &uid, &key, key_type)? {
            Some(content) => {
                emit(ReaderEvent::CardDetected(Card::new(uid[..4].to_vec(), content)));
            }
            None => {
                warn!(event = "card_read_failed", uid = %hex::encode_upper(&uid[..4]));
                emit(ReaderEvent::CardReadFailed);
            }
        }
        tag.stop_crypto()?;
        tag.halt()?;

        // card stays on the reader until request_all goes quiet
        loop {
            if stop.sleep(removal_poll) {
                return Ok(());
            }
            if !tag.request_all()? {
                debug!(event = "card_removed");
                emit(ReaderEvent::CardRemoved);
                break;
            }
            // keep the tag halted so it does not retrigger the wait probe
            if let Some(uid) = tag.anticollision()? {
                tag.select(&uid)?;
            }
            tag.halt()?;
        }
    }
    info!(event = "reader_stopped");
    Ok(())
}

/// Read the card text: data blocks from block 1 up to the 0x04 terminator,
/// re-authenticating at each sector boundary and skipping trailer blocks.
fn read_content(
    tag: &mut dyn TagReader,
    uid: &[u8; 5],
    key: &[u8; 6],
    key_type: KeyType,
) -> Result<Option<String>> {
    let mut data = Vec::new();
    let mut block: u8 = 1;
    loop {
        if block > LAST_BLOCK {
            // ran off the card without seeing the terminator
            return Ok(None);
        }
        if block % 4 == 3 {
            block += 1;
            continue;
        }
        if block == 1 || block % 4 == 0 {
            if !tag.authenticate(block, key, key_type, uid)? {
                return Ok(None);
            }
        }
        let Some(chunk) = tag.read_block(block)? else {
            return Ok(None);
        };
        if let Some(end) = chunk.iter().position(|&b| b == CONTENT_SENTINEL) {
            data.extend_from_slice(&chunk[..end]);
            return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
        }
        data.extend_from_slice(&chunk);
        block += 1;
    }
}
