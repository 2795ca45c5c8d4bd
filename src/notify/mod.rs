//! Interrupt registry and delivery.
//!
//! This module bridges raw interrupt sources to the [`ScanToken`] that an
//! external scanning subsystem waits on.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  RegDevice   │ Asks for the token of its interrupt via `scan_token()`
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ InterruptManager     │ One IntrRegistration per IntrIdentity,
//! │  - registrations     │ created lazily under the connect lock
//! │  - connect lock      │
//! └──────┬───────────────┘
//!        │ connect
//!        ▼
//! ┌──────────────────────┐    ┌──────────────────────┐
//! │ vector: bus callback │    │ uio: Iuio<N> thread   │
//! └──────┬───────────────┘    └──────┬───────────────┘
//!        └───────────┬───────────────┘
//!                    ▼ deliver()
//!        count → AckHandler → ScanToken::raise()
//! ```
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use axregmap::{DeviceConfig, IntrSource, RegDevice};
//!
//! let config = DeviceConfig::parse("adc", 0x2000, 0x100, "24")?
//!     .with_interrupt(IntrSource::Vector(0x40), 3);
//! let device = RegDevice::create(host, config)?;
//!
//! let token = device.scan_token(None)?;
//! token.subscribe(|| scan_records());
//! ```

mod ack;
mod identity;
mod manager;
mod token;
mod uio;
mod vector;

pub use ack::{AckHandler, AckOutcome, ClearBits16, SetBits16};
pub use identity::{IntrIdentity, IntrLevel};
pub use manager::{InterruptManager, IntrRegistration, RegistrationState};
pub use token::{ScanListener, ScanToken};
