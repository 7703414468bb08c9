//! Behavioural model of the EDU card's register file.
//!
//! The model follows the card QEMU emulates: a factorial unit fed through
//! the value register, a liveness register that echoes the complement of
//! what was written, and an interrupt status word that drives one line.
//! Computations run on a worker thread after a configurable latency, so a
//! consumer really does have to wait for the completion interrupt.

use crate::intc::InterruptController;
use crossbeam_channel::{Receiver, Sender, unbounded};
use edu_common::mmio::{self, irq, status};
use edu_core::IoMemory;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Static properties of a simulated card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Time the factorial unit takes per job.
    pub latency: Duration,
    /// Value of the identification register.
    pub card_id: u32,
    /// Size of the register BAR in bytes.
    pub bar_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_micros(100),
            card_id: mmio::CARD_ID_VALUE,
            bar_size: mmio::EDU_BAR_SIZE as usize,
        }
    }
}

#[derive(Debug, Default)]
struct CardState {
    liveness: u32,
    value: u32,
    status: u32,
    irq_status: u32,
}

enum Job {
    Factorial(u32),
    Shutdown,
}

struct Card {
    config: ModelConfig,
    state: Mutex<CardState>,
    intc: Arc<InterruptController>,
    line: u32,
}

impl Card {
    /// ORs `bits` into the interrupt status and raises the line if anything
    /// is latched.
    fn raise(&self, bits: u32) {
        let assert = {
            let mut st = self.state.lock();
            st.irq_status |= bits;
            st.irq_status != 0
        };
        if assert {
            self.intc.assert_line(self.line);
        }
    }

    fn finish(&self, n: u32) {
        let value = factorial(n);
        // Result, idle and status bit become visible together.
        let interrupt = {
            let mut st = self.state.lock();
            st.value = value;
            st.status &= !status::BUSY;
            let armed = st.status & status::IRQ_ENABLE != 0;
            if armed {
                st.irq_status |= irq::FACTORIAL;
            }
            armed
        };
        debug!("edu model: {n}! = {value:#x}");
        if interrupt {
            self.intc.assert_line(self.line);
        }
    }
}

/// Wrapping 32-bit factorial, as the card computes it.
pub fn factorial(n: u32) -> u32 {
    (1..=n).fold(1u32, |acc, i| acc.wrapping_mul(i))
}

/// A simulated EDU card wired to one interrupt line.
pub struct EduModel {
    card: Arc<Card>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl EduModel {
    /// Builds a card that signals on `line` of `intc`, and starts its
    /// factorial unit.
    pub fn new(config: ModelConfig, intc: Arc<InterruptController>, line: u32) -> Self {
        let card = Arc::new(Card {
            config,
            state: Mutex::new(CardState::default()),
            intc,
            line,
        });
        let (jobs, rx) = unbounded();
        let worker = {
            let card = card.clone();
            thread::Builder::new()
                .name("edu-fact".into())
                .spawn(move || factorial_unit(&card, &rx))
                .ok()
        };
        if worker.is_none() {
            warn!("edu model: cannot start factorial unit, jobs will never complete");
        }
        Self { card, jobs, worker }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.card.config
    }

    pub fn line(&self) -> u32 {
        self.card.line
    }

    /// Returns true while the factorial unit is working.
    pub fn is_busy(&self) -> bool {
        self.card.state.lock().status & status::BUSY != 0
    }

    fn read_register(&self, offset: usize) -> u32 {
        let st = self.card.state.lock();
        match offset {
            mmio::CARD_ID => self.card.config.card_id,
            mmio::CARD_LIVENESS => st.liveness,
            mmio::VALUE => st.value,
            mmio::STATUS => st.status,
            mmio::IRQ_STATUS => st.irq_status,
            _ => u32::MAX,
        }
    }

    fn write_register(&self, offset: usize, value: u32) {
        match offset {
            mmio::CARD_LIVENESS => self.card.state.lock().liveness = !value,
            mmio::VALUE => {
                {
                    let mut st = self.card.state.lock();
                    if st.status & status::BUSY != 0 {
                        trace!("edu model: value write {value:#x} while busy, ignored");
                        return;
                    }
                    st.value = value;
                    st.status |= status::BUSY;
                }
                if self.jobs.send(Job::Factorial(value)).is_err() {
                    warn!("edu model: factorial unit gone, job {value} dropped");
                }
            }
            mmio::STATUS => {
                let mut st = self.card.state.lock();
                if value & status::IRQ_ENABLE != 0 {
                    st.status |= status::IRQ_ENABLE;
                } else {
                    st.status &= !status::IRQ_ENABLE;
                }
            }
            mmio::IRQ_RAISE => self.card.raise(value),
            mmio::IRQ_ACK => {
                let clear = {
                    let mut st = self.card.state.lock();
                    st.irq_status &= !value;
                    st.irq_status == 0
                };
                if clear {
                    self.card.intc.deassert_line(self.card.line);
                }
            }
            _ => trace!("edu model: write {value:#x} to {offset:#x} ignored"),
        }
    }
}

impl IoMemory for EduModel {
    fn size(&self) -> usize {
        self.card.config.bar_size
    }

    fn read_u8(&self, offset: usize) -> u8 {
        let word = self.read_register(offset & !3);
        (word >> ((offset & 3) * 8)) as u8
    }

    fn write_u8(&self, offset: usize, value: u8) {
        trace!("edu model: byte write {value:#x} to {offset:#x} ignored");
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.read_register(offset)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.write_register(offset, value);
    }
}

impl Drop for EduModel {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn factorial_unit(card: &Card, rx: &Receiver<Job>) {
    while let Ok(Job::Factorial(n)) = rx.recv() {
        if !card.config.latency.is_zero() {
            thread::sleep(card.config.latency);
        }
        card.finish(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edu_core::IrqReturn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const LINE: u32 = 9;

    fn card() -> (EduModel, Arc<InterruptController>) {
        let intc = Arc::new(InterruptController::default());
        let model = EduModel::new(ModelConfig::default(), intc.clone(), LINE);
        (model, intc)
    }

    fn wait_idle(model: &EduModel) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.is_busy() {
            assert!(Instant::now() < deadline, "factorial unit stuck");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn factorial_wraps_at_32_bits() {
        assert_eq!(factorial(0), 1);
        assert_eq!(factorial(5), 120);
        assert_eq!(factorial(12), 479_001_600);
        assert_eq!(factorial(13), 6_227_020_800u64 as u32);
    }

    #[test]
    fn identity_and_liveness() {
        let (model, _) = card();
        assert_eq!(model.read_u32(mmio::CARD_ID), mmio::CARD_ID_VALUE);
        model.write_u32(mmio::CARD_LIVENESS, 0x2);
        assert_eq!(model.read_u32(mmio::CARD_LIVENESS), !0x2);
    }

    #[test]
    fn unknown_offsets_read_all_ones() {
        let (model, _) = card();
        assert_eq!(model.read_u32(0x40), u32::MAX);
        assert_eq!(model.read_u32(mmio::IRQ_ACK), u32::MAX);
        assert_eq!(model.read_u8(0x41), 0xff);
    }

    #[test]
    fn byte_reads_come_from_the_containing_word() {
        let (model, _) = card();
        assert_eq!(model.read_u8(mmio::CARD_ID), 0xed);
        assert_eq!(model.read_u8(mmio::CARD_ID + 3), 0x01);
        model.write_u8(mmio::CARD_LIVENESS, 0x55);
        assert_eq!(model.read_u32(mmio::CARD_LIVENESS), 0);
    }

    #[test]
    fn computation_completes_without_interrupt_when_disarmed() {
        let (model, intc) = card();
        model.write_u32(mmio::VALUE, 5);
        wait_idle(&model);
        assert_eq!(model.read_u32(mmio::VALUE), 120);
        assert_eq!(model.read_u32(mmio::IRQ_STATUS), 0);
        assert!(!intc.is_asserted(LINE));
    }

    #[test]
    fn armed_computation_raises_the_line() {
        let (model, intc) = card();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            intc.register(
                LINE,
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    IrqReturn::Handled
                }),
            )
            .unwrap();
        }

        model.write_u32(mmio::STATUS, status::IRQ_ENABLE);
        model.write_u32(mmio::VALUE, 4);
        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "interrupt never delivered");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(model.read_u32(mmio::VALUE), 24);
        assert_eq!(model.read_u32(mmio::IRQ_STATUS), irq::FACTORIAL);
        assert!(intc.is_asserted(LINE));

        model.write_u32(mmio::IRQ_ACK, irq::FACTORIAL);
        assert_eq!(model.read_u32(mmio::IRQ_STATUS), 0);
        assert!(!intc.is_asserted(LINE));
    }

    #[test]
    fn value_writes_while_busy_are_ignored() {
        let intc = Arc::new(InterruptController::default());
        let model = EduModel::new(
            ModelConfig {
                latency: Duration::from_millis(50),
                ..ModelConfig::default()
            },
            intc,
            LINE,
        );
        model.write_u32(mmio::VALUE, 3);
        assert!(model.is_busy());
        model.write_u32(mmio::VALUE, 10);
        wait_idle(&model);
        assert_eq!(model.read_u32(mmio::VALUE), 6);
    }

    #[test]
    fn status_writes_only_touch_the_enable_bit() {
        let (model, _) = card();
        model.write_u32(mmio::STATUS, u32::MAX);
        assert_eq!(model.read_u32(mmio::STATUS), status::IRQ_ENABLE);
        model.write_u32(mmio::STATUS, 0);
        assert_eq!(model.read_u32(mmio::STATUS), 0);
    }

    #[test]
    fn raise_and_ack_drive_the_line() {
        let (model, intc) = card();
        model.write_u32(mmio::IRQ_RAISE, irq::DMA | irq::FACTORIAL);
        assert_eq!(model.read_u32(mmio::IRQ_STATUS), irq::DMA | irq::FACTORIAL);
        assert!(intc.is_asserted(LINE));
        model.write_u32(mmio::IRQ_ACK, irq::FACTORIAL);
        assert!(intc.is_asserted(LINE));
        model.write_u32(mmio::IRQ_ACK, irq::DMA);
        assert!(!intc.is_asserted(LINE));
    }
}
