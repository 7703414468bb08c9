//! Simulated interrupt controller.
//!
//! Devices assert and deassert numbered lines; a delivery thread plays the
//! part of the CPU and runs every handler registered on a line when it is
//! asserted. Lines are shared. While a line's handlers run the line is in
//! service and further deliveries are held back; an assertion that arrives in
//! that window is delivered again once the handlers return, the way an
//! in-service register defers a second request on a PIC.

use crossbeam_channel::{Receiver, Sender, unbounded};
use edu_core::{EduError, IrqHandlerFn, IrqRegistration, IrqReturn, Result};
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Number of lines a controller provides unless configured otherwise.
pub const DEFAULT_LINES: u32 = 32;

/// Counters describing what the controller has delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntcStats {
    /// Deliveries, counting each pass over a line's handlers once.
    pub delivered: u64,
    /// Deliveries no handler claimed.
    pub unhandled: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LineState {
    asserted: bool,
    in_service: bool,
    repending: bool,
}

enum Event {
    Deliver(u32),
    Shutdown,
}

struct Shared {
    lines: u32,
    handlers: RwLock<HashMap<u32, Vec<(u64, IrqHandlerFn)>>>,
    state: Mutex<HashMap<u32, LineState>>,
    next_token: AtomicU64,
    delivered: AtomicU64,
    unhandled: AtomicU64,
}

/// Interrupt lines with shared handler lists, delivered on a dedicated
/// thread.
pub struct InterruptController {
    shared: Arc<Shared>,
    events: Sender<Event>,
    worker: Option<JoinHandle<()>>,
}

impl InterruptController {
    /// Creates a controller with `lines` lines and starts its delivery
    /// thread.
    pub fn new(lines: u32) -> Self {
        let shared = Arc::new(Shared {
            lines,
            handlers: RwLock::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            unhandled: AtomicU64::new(0),
        });
        let (events, rx) = unbounded();
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("edu-intc".into())
                .spawn(move || deliver_loop(&shared, &rx))
                .ok()
        };
        if worker.is_none() {
            warn!("intc: cannot start delivery thread, interrupts will not be delivered");
        }
        Self {
            shared,
            events,
            worker,
        }
    }

    /// Adds `handler` to `line`.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` if the controller has no such line.
    pub fn register(&self, line: u32, handler: IrqHandlerFn) -> Result<IrqRegistration> {
        if line >= self.shared.lines {
            return Err(EduError::ResourceUnavailable(format!(
                "irq {line}: no such line"
            )));
        }
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers
            .write()
            .entry(line)
            .or_default()
            .push((token, handler));
        debug!("intc: irq {line}: handler {token} registered");
        Ok(IrqRegistration { line, token })
    }

    /// Removes a handler. Waits for a delivery in progress to finish first,
    /// so the handler is never running once this returns.
    pub fn unregister(&self, registration: IrqRegistration) {
        let mut handlers = self.shared.handlers.write();
        if let Some(list) = handlers.get_mut(&registration.line) {
            list.retain(|(token, _)| *token != registration.token);
            if list.is_empty() {
                handlers.remove(&registration.line);
            }
        }
        debug!(
            "intc: irq {}: handler {} removed",
            registration.line, registration.token
        );
    }

    /// Raises `line`. Delivery happens on the controller's thread.
    pub fn assert_line(&self, line: u32) {
        let deliver = {
            let mut state = self.shared.state.lock();
            let st = state.entry(line).or_default();
            st.asserted = true;
            if st.in_service {
                st.repending = true;
                false
            } else {
                st.in_service = true;
                true
            }
        };
        trace!("intc: irq {line}: asserted");
        if deliver && self.events.send(Event::Deliver(line)).is_err() {
            warn!("intc: irq {line}: delivery thread gone");
        }
    }

    /// Lowers `line`. A deassertion does not cancel a delivery already queued.
    pub fn deassert_line(&self, line: u32) {
        if let Some(st) = self.shared.state.lock().get_mut(&line) {
            st.asserted = false;
        }
        trace!("intc: irq {line}: deasserted");
    }

    pub fn is_asserted(&self, line: u32) -> bool {
        self.shared
            .state
            .lock()
            .get(&line)
            .is_some_and(|st| st.asserted)
    }

    /// Number of handlers installed on `line`.
    pub fn handler_count(&self, line: u32) -> usize {
        self.shared.handlers.read().get(&line).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> IntcStats {
        IntcStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            unhandled: self.shared.unhandled.load(Ordering::Relaxed),
        }
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new(DEFAULT_LINES)
    }
}

impl Drop for InterruptController {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn deliver_loop(shared: &Shared, rx: &Receiver<Event>) {
    while let Ok(Event::Deliver(line)) = rx.recv() {
        loop {
            run_handlers(shared, line);

            let mut state = shared.state.lock();
            let st = state.entry(line).or_default();
            if st.repending && st.asserted {
                st.repending = false;
                continue;
            }
            st.repending = false;
            st.in_service = false;
            break;
        }
    }
}

fn run_handlers(shared: &Shared, line: u32) {
    // Held across the calls so unregister waits for us.
    let handlers = shared.handlers.read();
    let mut claimed = false;
    if let Some(list) = handlers.get(&line) {
        for (_, handler) in list {
            if handler(line) == IrqReturn::Handled {
                claimed = true;
            }
        }
    }
    shared.delivered.fetch_add(1, Ordering::Relaxed);
    if !claimed {
        shared.unhandled.fetch_add(1, Ordering::Relaxed);
        warn!("intc: irq {line}: nobody cared");
    }
}
