//! spi-arbiter-core - Shared SPI bus arbitration
//!
//! This crate hands out SPI resources to independent clients and keeps them
//! from stepping on each other:
//!
//! - [`Bus`] - exclusive ownership of a whole bus, raw word transfers
//! - [`Controller`] - one chip select on a possibly shared bus
//! - [`Peripheral`] - a bus acting as a peripheral for an external controller
//!
//! All three are claimed from a [`Registry`], which owns one
//! [`SpiBackend`] per bus label and consults an [`AccessPolicy`] before
//! granting anything. Controllers and buses also run multi-step
//! [`Operation`] sequences as transactions with one result per step.
//!
//! # Example
//!
//! ```ignore
//! use spi_arbiter_core::{Controller, Mode, Operation, Registry, SpiConfig};
//!
//! let registry = Registry::permissive();
//! registry.attach_bus("spi0", my_backend)?;
//!
//! let config = SpiConfig::new("spi0").with_cs("cs0").with_mode(Mode::Mode3);
//! let mut flash = Controller::get(&registry, config)?;
//!
//! let results = flash.transaction(&[
//!     Operation::Write(vec![0x9F]),
//!     Operation::Read(3),
//! ]);
//! if let Ok(Some(id)) = &results[1] {
//!     println!("JEDEC ID: {:02X?}", id);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod mode;
pub mod policy;
pub mod registry;
pub mod resource;
pub mod transaction;

pub use backend::{BackendFeatures, SpiBackend};
pub use codec::Word;
pub use config::{SpiConfig, WireFormat};
pub use error::{Result, SpiError};
pub use mode::{ClockEdge, Mode, Timing};
pub use policy::{AccessPolicy, AllowAll, BusRule, PolicyError, PolicyTable};
pub use registry::{ClaimId, ClaimInfo, ClaimKey, ClaimMode, ClaimToken, Registry};
pub use resource::{Bus, Controller, Peripheral};
pub use transaction::{Operation, OperationResult, TransactionResults};
