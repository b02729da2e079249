//! limeproto - Wire formats for the Limelight control plane
//!
//! This crate defines the byte-exact lighting wire formats Limelight speaks
//! and the shared network listener infrastructure producers register against.
//! It has no knowledge of the routing runtime; the `limelight` daemon builds
//! on top of it.
//!
//! ## Wire formats
//!
//! - [`dmx`] - the 512-channel DMX frame, channel tables, and the 16-bit
//!   frame-number encoding carried over DMX channels 1-2.
//! - [`serial`] - Enttec-style serial framing for a DMX frame (518 bytes on
//!   the wire).
//! - [`artnet`] - ArtDmx packet construction for Art-Net nodes (530 bytes).
//! - [`sacn`] - validated hand-off of frames to a platform sACN (E1.31)
//!   multicast sender. The E1.31 packet layout itself lives in the sender.
//! - [`osc`] - a minimal OSC 1.0 codec (messages only, `i`/`f`/`s`/`b`
//!   arguments, exact-match addressing).
//!
//! ## Shared listeners
//!
//! The [`listener`] module provides [`listener::OscListenerHub`]: one UDP
//! socket and reader thread per port, with per-address callback lists so
//! multiple logical producers can share a port. Listener sockets are
//! reference-counted and torn down when the last callback is removed.

pub mod artnet;
pub mod dmx;
pub mod listener;
pub mod osc;
pub mod sacn;
pub mod serial;

pub use artnet::{encode_art_dmx, ARTNET_PORT};
pub use dmx::{
    decode_frame_number, encode_frame_number, ChannelRows, ChannelTable, DmxFrame, DMX_CHANNELS,
};
pub use listener::{CallbackId, ListenerError, OscCallback, OscListenerHub};
pub use osc::{OscArg, OscError, OscMessage};
pub use sacn::{MulticastDmxSender, SacnError, SacnOutput};
pub use serial::encode_serial_dmx;
