//! Stereo filter pipeline on a Raspberry Pi Pico.
//!
//! ```text
//!   I2S ADC (GP3 BCLK, GP4 LRCK, GP5 DATA)
//!         │  PIO0 unit, DMA ch 2/3
//!   capture ring ──► real-time loop (idle) ──► playback ring
//!                    L: LP 880 Hz ×2, +6 dB @ 80 Hz
//!                    R: HP 880 Hz ×2
//!         │  PIO0 unit, DMA ch 0/1
//!   I2S DAC (GP6 BCLK, GP7 LRCK, GP8 DATA)
//!
//!   MCLK 11.2896 MHz on GP15
//! ```
//!
//! All sequencer units are released by one write to the IRQ 7 start gate
//! at the top of `idle`. `DMA_IRQ_0` services both rings, one half-buffer
//! at a time. The LED is lit from reset until the pipeline is running.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

mod board;

#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

#[rtic::app(device = rp2040_hal::pac, peripherals = true)]
mod app {
    use core::ptr::addr_of_mut;

    use embedded_hal::digital::OutputPin;
    use rp2040_hal as hal;

    use hal::clocks::{init_clocks_and_plls, Clock};
    use hal::gpio::bank0::Gpio25;
    use hal::gpio::{FunctionSioOutput, Pin, PullDown};

    use pico_dsp::config::{LeftChain, RightChain, RING_WORDS, UNIT_WORDS};
    use pico_dsp::io::{ChannelStorage, TransferService, TransportChannel};
    use pico_dsp::pipeline::RealTimeLoop;
    use pico_dsp::sequencer::SequencerRegistry;
    use pico_dsp::sync::ClockSynchronizer;
    use pico_dsp::{PipelineConfig, PipelineError};

    use crate::board::{self, PingPongDma, PioControl, PioMemory, SioCoreLock};

    const XTAL_FREQ_HZ: u32 = 12_000_000;

    type Led = Pin<Gpio25, FunctionSioOutput, PullDown>;
    type Pipeline = RealTimeLoop<'static, LeftChain, RightChain, RING_WORDS>;
    type Service = TransferService<'static, RING_WORDS>;

    static SEQUENCERS: SequencerRegistry<SioCoreLock, PioMemory> =
        SequencerRegistry::new(SioCoreLock::new(), PioMemory);
    static CAPTURE: ChannelStorage<RING_WORDS> = ChannelStorage::new();
    static PLAYBACK: ChannelStorage<RING_WORDS> = ChannelStorage::new();

    static mut PLAYBACK_HALVES: [[u32; UNIT_WORDS]; 2] = [[0; UNIT_WORDS]; 2];
    static mut CAPTURE_HALVES: [[u32; UNIT_WORDS]; 2] = [[0; UNIT_WORDS]; 2];

    // ── RTIC resources ───────────────────────────────────────────────

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Led,
        clocks: ClockSynchronizer<PioControl>,
        pipeline: Pipeline,
        dma: PingPongDma<UNIT_WORDS>,
        playback: Service,
        capture: Service,
    }

    /// Everything `init` builds before the gate opens.
    struct Started {
        clocks: ClockSynchronizer<PioControl>,
        pipeline: Pipeline,
        dma: PingPongDma<UNIT_WORDS>,
        playback: Service,
        capture: Service,
    }

    // ── Init ─────────────────────────────────────────────────────────

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        // SAFETY: first thing in `init`, interrupts masked, single core.
        if unsafe { pico_dsp::logging::install(log::LevelFilter::Info) }.is_err() {
            defmt::warn!("log bridge already installed");
        }

        let mut pac = cx.device;
        let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
        let Ok(clocks) = init_clocks_and_plls(
            XTAL_FREQ_HZ,
            pac.XOSC,
            pac.CLOCKS,
            pac.PLL_SYS,
            pac.PLL_USB,
            &mut pac.RESETS,
            &mut watchdog,
        ) else {
            defmt::panic!("clock init failed");
        };

        let sio = hal::Sio::new(pac.SIO);
        let pins = hal::gpio::Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );
        let mut led = pins.gpio25.into_push_pull_output();
        let _ = led.set_high();

        // PIO0, PIO1 and DMA are driven through raw registers from here on.
        board::reset_audio_peripherals();

        let config = PipelineConfig {
            system_clock_hz: clocks.system_clock.freq().to_Hz(),
            ..PipelineConfig::DEFAULT
        };
        let started = match bring_up(&config) {
            Ok(started) => started,
            Err(error) => halt(error),
        };
        defmt::info!(
            "pipeline ready: {} Hz, {}-bit slots, sys {} Hz",
            config.sample_rate,
            config.bits_per_sample,
            config.system_clock_hz
        );

        (
            Shared {},
            Local {
                led,
                clocks: started.clocks,
                pipeline: started.pipeline,
                dma: started.dma,
                playback: started.playback,
                capture: started.capture,
            },
        )
    }

    /// Claim and configure every sequencer unit and start both DMA pairs.
    /// The units stay parked on the start gate.
    fn bring_up(config: &PipelineConfig) -> Result<Started, PipelineError> {
        config.validate()?;
        let sequencer = SEQUENCERS.handle(board::current_core());
        let mut clocks = ClockSynchronizer::new(PioControl);

        // SAFETY: runs once in `init` with interrupts masked; the halves are
        // owned by the DMA engine from here on.
        let (playback_halves, capture_halves) = unsafe {
            (
                &mut *addr_of_mut!(PLAYBACK_HALVES),
                &mut *addr_of_mut!(CAPTURE_HALVES),
            )
        };
        let mut dma = PingPongDma::new(playback_halves, capture_halves);

        clocks.start_master_clock(
            &sequencer,
            config.mclk_pin,
            config.system_clock_hz,
            config.sample_rate,
            config.mclk_factor,
        )?;
        let (output, playback) = TransportChannel::begin(
            &PLAYBACK,
            &config.output_channel(),
            &sequencer,
            &mut clocks,
            &mut dma,
            None,
        )?;
        let (input, capture) = TransportChannel::begin(
            &CAPTURE,
            &config.input_channel(),
            &sequencer,
            &mut clocks,
            &mut dma,
            None,
        )?;

        let pipeline = RealTimeLoop::new(
            input,
            output,
            config.wire_format(),
            config.left_chain()?,
            config.right_chain()?,
        )?;
        Ok(Started {
            clocks,
            pipeline,
            dma,
            playback,
            capture,
        })
    }

    fn halt(error: PipelineError) -> ! {
        defmt::error!("startup failed: {}", error);
        loop {
            cortex_m::asm::wfe();
        }
    }

    // ── DMA ISR ──────────────────────────────────────────────────────

    #[task(binds = DMA_IRQ_0, local = [dma, playback, capture], priority = 2)]
    fn dma_irq(cx: dma_irq::Context) {
        cx.local.dma.on_interrupt(cx.local.playback, cx.local.capture);
    }

    // ── Idle: open the gate, then run the loop forever ───────────────

    #[idle(local = [led, clocks, pipeline])]
    fn idle(cx: idle::Context) -> ! {
        match cx.local.clocks.release() {
            Ok(report) => defmt::info!("released {} sequencer units", report.roles()),
            Err(error) => halt(error),
        }
        let _ = cx.local.led.set_low();
        cx.local.pipeline.run()
    }
}
