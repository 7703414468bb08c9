//! Simulated hardware for exercising the EDU driver.
//!
//! Provides a behavioural model of the EDU card, an interrupt controller
//! that delivers on its own thread the way a CPU takes interrupts
//! asynchronously to the code that triggered them, a physical address map,
//! and [`SimPlatform`], which ties them together behind the driver's
//! `Platform` trait.

/// Physical address map of RAM and device regions.
pub mod bus;

/// Interrupt lines with shared handlers and in-service masking.
pub mod intc;

/// Register-level model of the card and its factorial unit.
pub mod model;

/// One simulated card on one line, ready to attach.
pub mod platform;

pub use bus::PhysicalBus;
pub use intc::{InterruptController, IntcStats};
pub use model::{EduModel, ModelConfig, factorial};
pub use platform::{SimConfig, SimPlatform};
