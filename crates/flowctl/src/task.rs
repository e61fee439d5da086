//! Flow-control scheduler threads
//!
//! Two persistent OS threads, one per direction, drain the class queues on
//! demand. [`FlowControlModule::schedule`] posts a drain request; the thread
//! wakes, walks the role-dependent priority ordering, and hands each
//! non-empty class backlog to the vendor callbacks. Producers on other
//! classes are never blocked by a drain in progress.

use crate::error::{FlowControlError, Result};
use crate::ether::queue_id_for_frame;
use crate::netbuf::NetBuf;
use crate::ops::FlowControlOps;
use crate::queues::{
    AP_TX_DRAIN_ORDER, DIRECTION_COUNT, Direction, FlowControlQueue, QUEUE_ID_COUNT, QueueId,
    QueueSet, RX_DRAIN_ORDER, STA_TX_DRAIN_ORDER,
};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Lifecycle phase of one drain thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Starting,
    Waiting,
    Running,
    Stopping,
    Stopped,
}

/// How many times shutdown polls for the stopped phase
const STOP_POLL_RETRIES: u32 = 100;
/// Delay between shutdown polls
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait/wake state of one drain thread
#[derive(Debug)]
struct TaskState {
    phase: TaskPhase,
    pending: u32,
    shutdown: bool,
}

/// Drain signal shared between the module handle and one thread
#[derive(Debug)]
struct TaskControl {
    state: Mutex<TaskState>,
    wake: Condvar,
}

impl TaskControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                phase: TaskPhase::Starting,
                pending: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Request one drain pass
    fn post(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending += 1;
        self.wake.notify_one();
    }

    /// Ask the thread to stop and wake it
    fn request_stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        state.phase = TaskPhase::Stopping;
        self.wake.notify_all();
    }

    /// Block until a pass is requested; `false` means stop instead
    fn await_work(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return false;
            }
            if state.pending > 0 {
                state.pending -= 1;
                state.phase = TaskPhase::Running;
                return true;
            }
            state.phase = TaskPhase::Waiting;
            state = self.wake.wait(state).unwrap();
        }
    }

    fn set_phase(&self, phase: TaskPhase) {
        self.state.lock().unwrap().phase = phase;
    }

    fn phase(&self) -> TaskPhase {
        self.state.lock().unwrap().phase
    }
}

/// State shared between the module handle and its drain threads
struct FlowControlCore {
    queues: [QueueSet; DIRECTION_COUNT],
    controls: [TaskControl; DIRECTION_COUNT],
    ops: Arc<dyn FlowControlOps>,
}

impl FlowControlCore {
    fn queue_set(&self, dir: Direction) -> &QueueSet {
        &self.queues[dir.index()]
    }

    fn control(&self, dir: Direction) -> &TaskControl {
        &self.controls[dir.index()]
    }

    /// Hand every non-empty class to the vendor once, in priority order
    fn drain_pass(&self, dir: Direction) {
        let order: &[QueueId; QUEUE_ID_COUNT] = match dir {
            Direction::Tx => {
                if self.ops.is_device_sta_or_p2p_client() {
                    &STA_TX_DRAIN_ORDER
                } else {
                    &AP_TX_DRAIN_ORDER
                }
            }
            Direction::Rx => &RX_DRAIN_ORDER,
        };

        for &id in order {
            let queue = self.queue_set(dir).queue(id);
            if queue.is_empty() {
                continue;
            }
            trace!("{} drain pass handing off {:?} backlog", dir, id);
            queue.drain_with(|backlog| {
                // Wrap in catch_unwind so a panicking vendor callback
                // cannot take the drain thread down.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match dir {
                    Direction::Tx => {
                        self.ops.tx_data_packet(backlog, self.ops.tx_priority_id(id));
                    }
                    Direction::Rx => {
                        self.ops.rx_data_packet(backlog, self.ops.rx_priority_id(id));
                    }
                }));
                if let Err(e) = result {
                    error!("Panic in {} vendor callback for {:?}: {:?}", dir, id, e);
                }
            });
        }
    }
}

/// Body of one drain thread
fn run_drain_loop(core: Arc<FlowControlCore>, dir: Direction) {
    info!("{} drain thread started", dir);
    let control = core.control(dir);

    while control.await_work() {
        core.drain_pass(dir);
    }

    control.set_phase(TaskPhase::Stopped);
    info!("{} drain thread stopped", dir);
}

/// Spawn the drain thread for one direction
fn spawn_drain_thread(core: Arc<FlowControlCore>, dir: Direction) -> JoinHandle<()> {
    let name = match dir {
        Direction::Tx => "flowctl-tx",
        Direction::Rx => "flowctl-rx",
    };
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run_drain_loop(core, dir))
        .expect("Failed to spawn flow-control drain thread")
}

/// WLAN flow-control module
///
/// Owns the per-direction queue sets and the two drain threads. Frames are
/// classified into a traffic class, buffered with bounded drop-oldest
/// depth, and handed to the registered vendor operations in priority order
/// whenever a pass is scheduled.
pub struct FlowControlModule {
    core: Arc<FlowControlCore>,
    handles: [Option<JoinHandle<()>>; DIRECTION_COUNT],
}

impl FlowControlModule {
    /// Build the queue sets and start both drain threads
    ///
    /// `thresholds` applies per traffic class to both directions; a zero
    /// entry leaves that class unbounded.
    pub fn new(ops: Arc<dyn FlowControlOps>, thresholds: [usize; QUEUE_ID_COUNT]) -> Self {
        let core = Arc::new(FlowControlCore {
            queues: [QueueSet::new(thresholds), QueueSet::new(thresholds)],
            controls: [TaskControl::new(), TaskControl::new()],
            ops,
        });
        let handles = Direction::ALL.map(|dir| Some(spawn_drain_thread(core.clone(), dir)));
        Self { core, handles }
    }

    /// Classify a buffer by its frame bytes and enqueue it
    ///
    /// Returns the class the buffer landed in. A buffer too short to
    /// classify is refused and dropped.
    pub fn enqueue_frame(&self, dir: Direction, nb: NetBuf) -> Result<QueueId> {
        let id = queue_id_for_frame(nb.data())?;
        self.enqueue(dir, id, nb);
        Ok(id)
    }

    /// Enqueue an already classified buffer
    pub fn enqueue(&self, dir: Direction, id: QueueId, nb: NetBuf) {
        self.core.queue_set(dir).queue(id).enqueue(nb);
    }

    /// Request one drain pass in `dir`
    pub fn schedule(&self, dir: Direction) {
        self.core.control(dir).post();
    }

    /// One class queue, for inspection and direct dequeue
    pub fn queue(&self, dir: Direction, id: QueueId) -> &FlowControlQueue {
        self.core.queue_set(dir).queue(id)
    }

    /// Current phase of `dir`'s drain thread
    pub fn phase(&self, dir: Direction) -> TaskPhase {
        self.core.control(dir).phase()
    }

    /// Stop both drain threads
    ///
    /// Each direction is asked to stop, polled until its thread reports the
    /// stopped phase, then joined. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut result = Ok(());
        for dir in Direction::ALL {
            result = result.and(self.shutdown_direction(dir));
        }
        result
    }

    fn shutdown_direction(&mut self, dir: Direction) -> Result<()> {
        let Some(handle) = self.handles[dir.index()].take() else {
            return Ok(());
        };
        let control = self.core.control(dir);
        control.request_stop();

        let mut stopped = false;
        for _ in 0..STOP_POLL_RETRIES {
            if control.phase() == TaskPhase::Stopped {
                stopped = true;
                break;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        if !stopped {
            // Likely a stuck vendor callback; detach rather than hang the caller.
            error!("{} drain thread did not reach stopped phase, detaching", dir);
            return Err(FlowControlError::ShutdownTimeout { direction: dir });
        }

        debug!("{} drain thread reached stopped phase", dir);
        handle
            .join()
            .map_err(|_| FlowControlError::ThreadPanicked { direction: dir })
    }
}

impl Drop for FlowControlModule {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Flow-control shutdown during drop failed: {}", e);
        }
    }
}
