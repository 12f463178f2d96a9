// Licensed under the Apache-2.0 license

//! Queued, interrupt-driven I2C master.
//!
//! Foreground code composes whole transactions into a per-bus encoded queue
//! ([`bus`], [`codec`]) and returns immediately. The bus interrupt runs a
//! state machine ([`isr`]) that drains the queue one bus primitive at a time
//! through the [`traits::ByteLevelMaster`] adapter, fans received bytes out to
//! their destinations and records each outcome in a bounded status cache
//! ([`status`]) that foreground code polls.

pub mod ascii;
pub mod board;
pub mod bus;
pub mod codec;
pub mod common;
pub mod i2c_controller;
pub mod isr;
pub mod listener;
pub mod queue;
pub mod shared;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod status;
pub mod traits;

pub use ascii::AsciiTokens;
pub use board::{BoardProfile, BusArray, BusProfile};
pub use bus::{BusState, I2cBus};
pub use common::{BusConfig, BusConfigBuilder, Error, I2cSpeed, TxionStatus};
pub use i2c_controller::I2cController;
pub use listener::{ListenerId, ListenerSet, ListenerTable};
pub use queue::{ByteRing, ReadBuffer, SharedQueue};
pub use shared::SharedBus;
pub use traits::{BusHardwareCore, ByteLevelMaster, ByteSink, TickSource};
