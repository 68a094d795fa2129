//! Hardware independent core of the bindicator firmware: A/B partition
//! bookkeeping, the OTA transfer protocol and server, and the health
//! supervisor that decides when the watchdog may bite.
//!
//! Hardware is reached through the [`flash::FlashController`],
//! [`boot::BootController`] and [`health::WatchdogTimer`] traits.
#![cfg_attr(not(test), no_std)]

pub mod access;
pub mod boot;
pub mod console;
pub mod flash;
pub mod health;
pub mod partition;
pub mod pause;
pub mod protocol;
pub mod server;

pub use access::{AccessWindow, SharedAccessWindow};
pub use boot::{BootController, BootOracle};
pub use flash::FlashController;
pub use health::{HealthPolicy, HealthState, HealthSupervisor, WatchdogTimer};
pub use partition::{Partition, PartitionTable};
pub use pause::{BackgroundActivity, PauseGate};
pub use server::{OtaServer, OtaServerConfig, ServerState, SessionError};
