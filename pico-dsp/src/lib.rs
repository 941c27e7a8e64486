//! # pico-dsp
//!
//! A `no_std`, allocation-free stereo filter pipeline for the
//! [RP2040](https://www.raspberrypi.com/documentation/microcontrollers/rp2040.html)
//! (dual Cortex-M0+, two PIO blocks). Samples arrive over I²S, run through a
//! fixed cascade of fixed-point biquads per channel and leave over I²S, one
//! frame per sample period, forever.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | DSP | [`dsp`] | Biquad design, Q4.28 stages with remainder feedback, chains |
//! | Sequencers | [`sequencer`] | PIO unit claims, program loading, hardware seam |
//! | I/O | [`io`] | Rings, DMA servicing, I²S transport channels |
//! | Start | [`sync`] | Master clock and gated synchronized start |
//! | Loop | [`pipeline`] | Read, filter, write |
//! | Setup | [`config`] / [`error`] | Board defaults, startup errors |
//! | Logs | [`logging`] | `log` records forwarded to defmt on the device |
//!
//! Hardware is reached only through small traits
//! ([`sequencer::InstructionMemory`], [`sequencer::SequencerControl`],
//! [`sequencer::CoreLock`], [`io::TransferEngine`]), so everything here runs
//! and is tested on the host. The `firmware` crate implements them for the
//! RP2040 registers.
//!
//! ## Bring-up
//!
//! ```ignore
//! static IN: ChannelStorage<RING_WORDS> = ChannelStorage::new();
//! static OUT: ChannelStorage<RING_WORDS> = ChannelStorage::new();
//!
//! let config = PipelineConfig::DEFAULT;
//! config.validate()?;
//! let sequencer = registry.handle(CoreId(0));
//! let mut clocks = ClockSynchronizer::new(control);
//!
//! clocks.start_master_clock(&sequencer, config.mclk_pin, config.system_clock_hz,
//!                           config.sample_rate, config.mclk_factor)?;
//! let (tx, tx_service) = TransportChannel::begin(&OUT, &config.output_channel(),
//!                                                &sequencer, &mut clocks, &mut dma, None)?;
//! let (rx, rx_service) = TransportChannel::begin(&IN, &config.input_channel(),
//!                                                &sequencer, &mut clocks, &mut dma, None)?;
//! // hand the services to the DMA interrupt, then:
//! clocks.release()?;
//! RealTimeLoop::new(rx, tx, config.wire_format(),
//!                   config.left_chain()?, config.right_chain()?)?.run()
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `defmt` | no | `defmt::Format` on public types, [`logging::install`] |
//!
//! ## Audio parameters
//!
//! - **Sample rate:** 44 100 Hz
//! - **Wire format:** 32-bit slots carrying 24-bit samples, MSB first
//! - **Working format:** `i32`, coefficients Q4.28, accumulator `i64`
//! - **Ring:** 512 words per direction, serviced 32 words at a time

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod dsp;
pub mod error;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod sequencer;
pub mod sync;

pub use config::PipelineConfig;
pub use error::PipelineError;
