//! Limelight - a control plane for interactive installations
//!
//! Limelight sits between show inputs (OSC pads, clocks, sensors) and lighting
//! outputs (DMX over serial, Art-Net, sACN), moving events from producers to
//! consumers with strict priority. The pieces:
//!
//! - [`scheduler`] - a priority worker pool on dedicated OS threads, with a
//!   monitor that grows the pool under sustained backlog and per-task fault
//!   isolation.
//! - [`router`] - the weak-edged connection graph and two-speed dispatch:
//!   critical events bypass batching, everything else rides a sub-millisecond
//!   flush loop.
//! - [`module`] - the producer/consumer contract and the explicit registry
//!   the daemon builds instances through.
//! - [`modes`] - sticky trigger-vs-streaming auto-detection, so one actuator
//!   implementation adapts to whatever feeds it.
//! - [`inputs`] / [`outputs`] - the built-in adapters: clock and OSC
//!   producers, the adaptive DMX actuator and its transports.
//! - [`chase`] - single-pass channel-table playback with cooperative
//!   cancellation.
//!
//! Wire formats live in `limeproto`, configuration in `limeconf`.

pub mod chase;
pub mod event;
pub mod inputs;
pub mod modes;
pub mod module;
pub mod outputs;
pub mod router;
pub mod scheduler;

pub use chase::{ChasePlayer, DmxTransport};
pub use event::{Event, Payload, Priority, PriorityPolicy, SourceId};
pub use modes::{compatible, Classification, ModeDetector};
pub use module::{Consumer, EventSink, Module, ModuleFactory, ModuleRegistry};
pub use router::{EventRouter, RouterStats};
pub use scheduler::{Scheduler, SchedulerStats, TaskHandle, TaskStatus};
