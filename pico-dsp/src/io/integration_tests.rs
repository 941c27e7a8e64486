//! Integration tests exercising the full pipeline in software.
//!
//! The transfer interrupts are played by the test: it hands captured units
//! to the input [`TransferService`] and collects units from the output one.
//!
//! ```text
//! test "DMA" → in service → ring → RealTimeLoop → ring → out service → test
//! ```

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::dsp::{FilterChain, SampleFilter};
    use crate::error::{Exhausted, PipelineError};
    use crate::io::{
        ChannelConfig, ChannelStorage, Direction, Frame, SlotLayout, TransferEngine,
        TransferRequest, TransferService, TransportChannel,
    };
    use crate::pipeline::RealTimeLoop;
    use crate::sequencer::lock::AtomicCoreLock;
    use crate::sequencer::{
        BlockId, CoreId, FifoAddress, SequencerRegistry, TransferTrigger, UnitId, UnitRole,
    };
    use crate::sync::tests::{ControlOp, NullMemory, RecordingControl};
    use crate::sync::ClockSynchronizer;

    const RING: usize = 64;
    const UNIT: usize = 16;

    #[derive(Default)]
    struct RecordingEngine {
        requests: Vec<TransferRequest>,
        stopped: Vec<Direction>,
    }

    impl TransferEngine for RecordingEngine {
        type Error = ();

        fn start(&mut self, request: &TransferRequest) -> Result<(), ()> {
            self.requests.push(*request);
            Ok(())
        }

        fn stop(&mut self, direction: Direction) {
            self.stopped.push(direction);
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            unit_words: UNIT,
            ..PipelineConfig::DEFAULT
        }
    }

    type Channels<'a> = (
        TransportChannel<'a, RING>,
        TransferService<'a, RING>,
        TransportChannel<'a, RING>,
        TransferService<'a, RING>,
    );

    /// Bring up input and output the way the firmware does, and release.
    fn bring_up<'a>(
        input: &'a ChannelStorage<RING>,
        output: &'a ChannelStorage<RING>,
        config: &PipelineConfig,
    ) -> Channels<'a> {
        let registry = SequencerRegistry::new(AtomicCoreLock::new(), NullMemory);
        let sequencer = registry.handle(CoreId(0));
        let mut clocks = ClockSynchronizer::new(RecordingControl::default());
        let mut engine = RecordingEngine::default();

        clocks
            .start_master_clock(
                &sequencer,
                config.mclk_pin,
                config.system_clock_hz,
                config.sample_rate,
                config.mclk_factor,
            )
            .unwrap();
        let (tx, tx_service) = TransportChannel::begin(
            output,
            &config.output_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        let (rx, rx_service) = TransportChannel::begin(
            input,
            &config.input_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        clocks.release().unwrap();
        (rx, rx_service, tx, tx_service)
    }

    // ---------------------------------------------------------------
    // Startup
    // ---------------------------------------------------------------

    #[test]
    fn startup_claims_configures_and_starts_in_order() {
        let config = config();
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let registry = SequencerRegistry::new(AtomicCoreLock::new(), NullMemory);
        let sequencer = registry.handle(CoreId(0));
        let mut clocks = ClockSynchronizer::new(RecordingControl::default());
        let mut engine = RecordingEngine::default();

        let mclk = clocks
            .start_master_clock(&sequencer, 15, 125_000_000, 44_100, 512)
            .unwrap();
        let (tx, _tx_service) = TransportChannel::<RING>::begin(
            &out_storage,
            &config.output_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        let (rx, _rx_service) = TransportChannel::<RING>::begin(
            &in_storage,
            &config.input_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        let report = clocks.release().unwrap();

        let unit = |u| UnitId {
            block: BlockId::Pio0,
            unit: u,
        };
        assert_eq!(mclk, unit(0));
        assert_eq!(tx.claim().id(), unit(1));
        assert_eq!(rx.claim().id(), unit(2));
        assert_eq!(report.masks, [0b0111, 0]);

        assert_eq!(
            clocks.control().ops,
            [
                ControlOp::Hold,
                ControlOp::Configure(unit(0), UnitRole::MasterClock { pin: 15 }),
                ControlOp::Configure(
                    unit(1),
                    UnitRole::Transmit {
                        data_pin: 8,
                        clock_pin: 6,
                        bits: 32
                    }
                ),
                ControlOp::Configure(
                    unit(2),
                    UnitRole::Receive {
                        data_pin: 5,
                        clock_pin: 3,
                        bits: 32
                    }
                ),
                ControlOp::Enable(BlockId::Pio0, 0b0111),
                ControlOp::Release,
            ]
        );

        // mclk, i2s_out and i2s_in each loaded once on the first block.
        assert_eq!(sequencer.load_count(BlockId::Pio0), Ok(3));
        assert_eq!(sequencer.load_count(BlockId::Pio1), Ok(0));

        assert_eq!(engine.requests.len(), 2);
        let (out_req, in_req) = (engine.requests[0], engine.requests[1]);
        assert_eq!(out_req.direction, Direction::Output);
        assert_eq!(out_req.trigger, TransferTrigger(1));
        assert_eq!(out_req.fifo, FifoAddress(0x5020_0014));
        assert_eq!(in_req.direction, Direction::Input);
        assert_eq!(in_req.trigger, TransferTrigger(6));
        assert_eq!(in_req.fifo, FifoAddress(0x5020_0028));
        assert_eq!(in_req.unit_words, UNIT);
    }

    #[test]
    fn ninth_role_exhausts_the_sequencers() {
        let registry = SequencerRegistry::new(AtomicCoreLock::new(), NullMemory);
        let sequencer = registry.handle(CoreId(0));
        let mut clocks = ClockSynchronizer::new(RecordingControl::default());
        let mut engine = RecordingEngine::default();
        let storage: [ChannelStorage<RING>; 8] = core::array::from_fn(|_| ChannelStorage::new());
        let config = config();

        clocks
            .start_master_clock(&sequencer, 15, 125_000_000, 44_100, 512)
            .unwrap();
        let mut channels = Vec::new();
        for s in &storage[..7] {
            channels.push(
                TransportChannel::begin(
                    s,
                    &config.output_channel(),
                    &sequencer,
                    &mut clocks,
                    &mut engine,
                    None,
                )
                .unwrap(),
            );
        }
        let err = TransportChannel::begin(
            &storage[7],
            &config.input_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .err();
        assert_eq!(
            err,
            Some(PipelineError::ResourceExhausted(Exhausted::Units))
        );
        assert_eq!(engine.requests.len(), 7);
        assert_eq!(clocks.release().unwrap().roles(), 8);
    }

    #[test]
    fn invalid_channel_never_claims() {
        let registry = SequencerRegistry::new(AtomicCoreLock::new(), NullMemory);
        let sequencer = registry.handle(CoreId(0));
        let mut clocks = ClockSynchronizer::new(RecordingControl::default());
        let mut engine = RecordingEngine::default();
        let storage: ChannelStorage<RING> = ChannelStorage::new();

        let config = ChannelConfig {
            unit_words: RING * 2,
            ..config().output_channel()
        };
        let err = TransportChannel::begin(
            &storage,
            &config,
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .err();
        assert_eq!(
            err,
            Some(PipelineError::InvalidConfig("transfer unit larger than ring"))
        );
        assert_eq!(sequencer.status(BlockId::Pio0).unwrap().claimed_units, 0);
    }

    // ---------------------------------------------------------------
    // Foreground I/O
    // ---------------------------------------------------------------

    #[test]
    fn channels_refuse_the_wrong_direction() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let (rx, _, tx, _) = bring_up(&in_storage, &out_storage, &config());

        assert!(!rx.write(1, false));
        assert!(!rx.write_frame(Frame::new(1, 2), false));
        assert_eq!(tx.read(false), None);
        assert_eq!(tx.read_frame(false), None);
        assert!(in_storage.ring().is_empty());
        assert!(out_storage.ring().is_empty());
    }

    #[test]
    fn partial_frame_is_held_back_until_complete() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let (_, _, tx, mut tx_service) = bring_up(&in_storage, &out_storage, &config());

        assert!(tx.write(0x1111, false));
        let mut unit = [0u32; UNIT];
        let event = tx_service.service(&mut unit);
        assert_eq!(event.words, 0);
        assert!(unit.iter().all(|&w| w == 0));

        assert!(tx.write(0x2222, false));
        tx_service.service(&mut unit);
        assert_eq!(&unit[..2], &[0x1111, 0x2222]);
        assert_eq!(tx.stats().silence_words, (UNIT + UNIT - 2) as u32);
        assert_eq!(tx.stats().units, 2);
    }

    #[test]
    fn nonblocking_frames_are_all_or_nothing() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let (rx, mut rx_service, tx, _) = bring_up(&in_storage, &out_storage, &config());

        for i in 0..(RING / 2) as i32 {
            assert!(tx.write_frame(Frame::new(i, -i), false));
        }
        assert!(!tx.write_frame(Frame::new(0, 0), false));
        assert_eq!(out_storage.ring().len(), RING);

        assert_eq!(rx.read_frame(false), None);
        let mut unit = [7u32; UNIT];
        rx_service.service(&mut unit);
        assert_eq!(rx.read_frame(false), Some(Frame::new(7, 7)));
        assert_eq!(rx.try_completion().map(|e| e.words), Some(UNIT));
    }

    #[test]
    fn captured_24_bit_samples_read_back_sign_extended() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let config = PipelineConfig {
            bits_per_sample: 24,
            ..config()
        };
        let (rx, mut rx_service, _, _) = bring_up(&in_storage, &out_storage, &config);

        // Autopush at 24 bits leaves each sample right-justified.
        let mut unit = [0u32; UNIT];
        for frame in unit.chunks_exact_mut(2) {
            frame.copy_from_slice(&[0x0080_0000, 0x007F_FFFF]);
        }
        let event = rx_service.service(&mut unit);
        assert_eq!((event.words, event.substituted), (UNIT, 0));

        let frame = rx.read_frame(false).unwrap();
        assert_eq!(frame, Frame::new(i32::MIN, 0x7FFF_FF00));
        let working = config.wire_format().decode(frame);
        assert_eq!(working, Frame::new(-(1 << 23), (1 << 23) - 1));
    }

    #[test]
    fn written_16_bit_frames_leave_one_word_each() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let config = PipelineConfig {
            bits_per_sample: 16,
            ..config()
        };
        let (_, _, tx, mut tx_service) = bring_up(&in_storage, &out_storage, &config);

        assert!(tx.write_frame(Frame::new(0x1234_5678, -0x0001_0000), false));
        assert!(tx.write_frame(Frame::new(i32::MIN, i32::MAX), false));

        let mut unit = [0xDEAD_BEEFu32; UNIT];
        let event = tx_service.service(&mut unit);
        assert_eq!(&unit[..2], &[0x1234_FFFF, 0x8000_7FFF]);
        assert!(unit[2..].iter().all(|&w| w == 0));
        // A 16-word unit of packed frames drains 32 ring words.
        assert_eq!((event.words, event.substituted), (4, 2 * UNIT - 4));
        assert_eq!(tx.stats().silence_words, (2 * UNIT - 4) as u32);
    }

    // ---------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------

    #[test]
    fn ended_channel_frees_its_unit_for_a_new_claim() {
        let config = config();
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let registry = SequencerRegistry::new(AtomicCoreLock::new(), NullMemory);
        let sequencer = registry.handle(CoreId(0));
        let mut clocks = ClockSynchronizer::new(RecordingControl::default());
        let mut engine = RecordingEngine::default();

        clocks
            .start_master_clock(&sequencer, 15, 125_000_000, 44_100, 512)
            .unwrap();
        let (tx, tx_service) = TransportChannel::<RING>::begin(
            &out_storage,
            &config.output_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        let (rx, rx_service) = TransportChannel::<RING>::begin(
            &in_storage,
            &config.input_channel(),
            &sequencer,
            &mut clocks,
            &mut engine,
            None,
        )
        .unwrap();
        clocks.release().unwrap();

        let unit = |u| UnitId {
            block: BlockId::Pio0,
            unit: u,
        };
        assert!(tx.write_frame(Frame::new(1, 2), false));
        tx.end(tx_service, &sequencer, &mut clocks, &mut engine)
            .unwrap();

        assert_eq!(engine.stopped, [Direction::Output]);
        assert_eq!(clocks.control().ops.last(), Some(&ControlOp::Disable(unit(1))));
        assert!(clocks.roles().eq([unit(0), unit(2)]));
        assert!(out_storage.ring().is_empty());
        assert_eq!(sequencer.status(BlockId::Pio0).unwrap().claimed_units, 0b0101);

        // Same storage, same unit, program still resident.
        let mut restarted = ClockSynchronizer::new(RecordingControl::default());
        let (tx, tx_service) = TransportChannel::<RING>::begin(
            &out_storage,
            &config.output_channel(),
            &sequencer,
            &mut restarted,
            &mut engine,
            None,
        )
        .unwrap();
        assert_eq!(tx.claim().id(), unit(1));
        assert_eq!(sequencer.load_count(BlockId::Pio0), Ok(3));

        // A service from another channel is refused and nothing stops.
        let err = rx.end(tx_service, &sequencer, &mut clocks, &mut engine);
        assert_eq!(
            err,
            Err(PipelineError::InvalidConfig("service belongs to another channel"))
        );
        assert_eq!(engine.stopped.len(), 1);
        drop(rx_service);
    }

    // ---------------------------------------------------------------
    // End to end
    // ---------------------------------------------------------------

    #[test]
    fn identity_chain_end_to_end_is_exact() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let config = config();
        let (rx, mut rx_service, tx, mut tx_service) =
            bring_up(&in_storage, &out_storage, &config);

        let mut rt = RealTimeLoop::new(
            rx,
            tx,
            config.wire_format(),
            FilterChain::<1>::identity(),
            FilterChain::<1>::identity(),
        )
        .unwrap();

        let mut unit = [0u32; UNIT];
        for frame in unit.chunks_exact_mut(2) {
            frame.copy_from_slice(&[0x7FFF_FF00, 0x8000_0000]);
        }
        rx_service.service(&mut unit);

        for _ in 0..UNIT / 2 {
            rt.step();
        }
        assert_eq!(rt.frames(), (UNIT / 2) as u64);

        let mut sent = [0u32; UNIT];
        let event = tx_service.service(&mut sent);
        assert_eq!(event.substituted, 0);
        for frame in sent.chunks_exact(2) {
            assert_eq!(frame, &[0x3FFF_FF80, 0xC000_0000]);
        }
    }

    #[test]
    fn loop_rejects_swapped_channels() {
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let (rx, _, tx, _) = bring_up(&in_storage, &out_storage, &config());
        let err = RealTimeLoop::new(
            tx,
            rx,
            config().wire_format(),
            FilterChain::<0>::identity(),
            FilterChain::<0>::identity(),
        )
        .err();
        assert_eq!(
            err,
            Some(PipelineError::InvalidConfig(
                "loop needs an input and an output channel"
            ))
        );
    }

    #[test]
    fn concurrent_loopback_through_default_chains() {
        const FRAMES: usize = 4_096;
        let (in_storage, out_storage) = (ChannelStorage::new(), ChannelStorage::new());
        let config = config();
        let (rx, mut rx_service, tx, mut tx_service) =
            bring_up(&in_storage, &out_storage, &config);

        // 24-bit converter words: sample in the top 24 bits.
        let captured: Vec<u32> = (0..FRAMES * 2)
            .map(|i| {
                let phase = (i / 2) as f64 * 2.0 * core::f64::consts::PI * 440.0 / 44_100.0;
                let sample = (phase.sin() * 4_000_000.0) as i32 * if i % 2 == 0 { 1 } else { -1 };
                (sample << 8) as u32
            })
            .collect();

        let mut rt = RealTimeLoop::new(
            rx,
            tx,
            config.wire_format(),
            config.left_chain().unwrap(),
            config.right_chain().unwrap(),
        )
        .unwrap();

        let sent = std::thread::scope(|s| {
            let hardware = s.spawn(|| {
                let mut sent = Vec::with_capacity(FRAMES * 2);
                let mut next = captured.chunks_exact(UNIT);
                let mut unit = [0u32; UNIT];
                while sent.len() < FRAMES * 2 {
                    if in_storage.ring().free() >= UNIT {
                        if let Some(chunk) = next.next() {
                            unit.copy_from_slice(chunk);
                            let event = rx_service.service(&mut unit);
                            assert_eq!(event.substituted, 0);
                        }
                    }
                    if out_storage.ring().len() >= UNIT {
                        let event = tx_service.service(&mut unit);
                        assert_eq!(event.substituted, 0);
                        sent.extend_from_slice(&unit);
                    }
                    std::thread::yield_now();
                }
                sent
            });
            for _ in 0..FRAMES {
                rt.step();
            }
            hardware.join().unwrap()
        });
        assert_eq!(rt.frames(), FRAMES as u64);

        // Same frames through freshly built chains, single threaded.
        let format = config.wire_format();
        let mut left = config.left_chain().unwrap();
        let mut right = config.right_chain().unwrap();
        for (i, (input, output)) in captured
            .chunks_exact(2)
            .zip(sent.chunks_exact(2))
            .enumerate()
        {
            let frame = format.decode(Frame::from_words([input[0], input[1]]));
            let expected = format.encode(Frame {
                left: left.filter(frame.left),
                right: right.filter(frame.right),
            });
            assert_eq!(
                Frame::from_words([output[0], output[1]]),
                expected,
                "frame {i}"
            );
        }
        assert_eq!(rt.input().stats().dropped_words, 0);
        assert_eq!(rt.output().stats().silence_words, 0);
    }
}
