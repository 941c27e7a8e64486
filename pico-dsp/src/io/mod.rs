//! Sample transport between the I²S sequencers and the real-time loop.
//!
//! ## Components
//!
//! | Item | Side | Description |
//! |------|------|-------------|
//! | [`TransportChannel`] | foreground | Blocking / non-blocking word and frame I/O |
//! | [`TransferService`] | DMA interrupt | Moves one completed transfer unit to or from the ring |
//! | [`ChannelStorage`] | shared | Ring buffer + completion handoff, `static`-friendly |
//!
//! ## Utilities
//!
//! - [`ring`] - Atomic load/store SPSC word ring (no CAS required)
//! - [`handoff`] - Single-slot interrupt → foreground mailbox
//! - [`frame`] - Stereo frames, wire alignment and FIFO slot packing
//! - [`dma`] - Transfer engine trait and double-buffer halves
//!
//! ## Transfer layout
//!
//! Each channel streams through a buffer of two halves of `unit_words`
//! FIFO words. Slots wider than 16 bits take one word each (`L R L R ...`);
//! narrower slots pack a whole frame per word (see [`SlotLayout`]). The
//! engine alternates halves; the interrupt services the half that just
//! finished while the other is in flight.

pub mod dma;
pub mod frame;
pub mod handoff;
pub mod ring;
pub mod transport;

pub use dma::{DmaHalf, TransferEngine, TransferRequest};
pub use frame::{Frame, SlotLayout, WireFormat, FRAME_WORDS};
pub use handoff::Handoff;
pub use ring::AudioRingBuffer;
pub use transport::{
    ChannelConfig, ChannelStorage, CompletionCallback, Direction, TransferEvent, TransferService,
    TransferStats, TransportChannel,
};

#[cfg(test)]
mod integration_tests;
