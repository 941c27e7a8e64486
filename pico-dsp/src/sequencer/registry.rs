//! Sequencer claim broker.
//!
//! One [`SequencerRegistry`] exists per process. Components never touch it
//! directly; they receive a [`SequencerHandle`] that carries the calling
//! core's id. Every claim runs the whole scan / load / record sequence
//! under the registry's [`CoreLock`].

use core::cell::UnsafeCell;

use super::lock::{self, CoreLock};
use super::program::SequencerProgram;
use super::{BlockId, CoreId, SequencerClaim, BLOCK_COUNT, INSTRUCTION_MEMORY_WORDS, UNITS_PER_BLOCK};
use crate::error::{Exhausted, PipelineError};

/// Most distinct programs resident on one block.
pub const MAX_RESIDENT_PROGRAMS: usize = 8;

/// Writes program words into a block's instruction memory.
pub trait InstructionMemory {
    fn write_instruction(&mut self, block: BlockId, address: u8, instruction: u16);
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    name: &'static str,
    offset: u8,
}

/// Load state of one block.
#[derive(Debug, Clone, Copy)]
struct BlockTable {
    /// Bit n set: unit n is claimed.
    claimed_units: u8,
    /// Bit n set: instruction word n is occupied.
    used_instructions: u32,
    resident: [Option<Resident>; MAX_RESIDENT_PROGRAMS],
    loads: u32,
}

impl BlockTable {
    const EMPTY: BlockTable = BlockTable {
        claimed_units: 0,
        used_instructions: 0,
        resident: [None; MAX_RESIDENT_PROGRAMS],
        loads: 0,
    };

    fn free_unit(&self) -> Option<u8> {
        (0..UNITS_PER_BLOCK as u8).find(|&u| self.claimed_units & (1 << u) == 0)
    }

    fn resident_offset(&self, name: &str) -> Option<u8> {
        self.resident
            .iter()
            .flatten()
            .find(|r| r.name == name)
            .map(|r| r.offset)
    }

    /// Highest offset the program fits at, or its fixed origin.
    fn find_space(&self, program: &SequencerProgram) -> Option<u8> {
        let len = program.len();
        if len == 0 || len > INSTRUCTION_MEMORY_WORDS {
            return None;
        }
        let mask = if len == INSTRUCTION_MEMORY_WORDS {
            u32::MAX
        } else {
            (1u32 << len) - 1
        };
        let fits = |offset: usize| self.used_instructions & (mask << offset) == 0;

        match program.origin {
            Some(origin) => {
                let origin = origin as usize;
                (origin + len <= INSTRUCTION_MEMORY_WORDS && fits(origin)).then_some(origin as u8)
            }
            None => (0..=INSTRUCTION_MEMORY_WORDS - len)
                .rev()
                .find(|&offset| fits(offset))
                .map(|offset| offset as u8),
        }
    }
}

/// Snapshot of one block's load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockStatus {
    pub claimed_units: u8,
    pub used_instructions: u32,
    /// Programs loaded so far (a shared program counts once).
    pub loads: u32,
}

struct Table<M> {
    blocks: [BlockTable; BLOCK_COUNT],
    memory: M,
}

impl<M: InstructionMemory> Table<M> {
    fn claim(&mut self, program: &SequencerProgram) -> Result<SequencerClaim, PipelineError> {
        let Some((block, unit)) = BlockId::ALL
            .iter()
            .find_map(|&b| self.blocks[b.index()].free_unit().map(|u| (b, u)))
        else {
            log::warn!("no free sequencer unit for {}", program.name);
            return Err(PipelineError::ResourceExhausted(Exhausted::Units));
        };

        let offset = match self.blocks[block.index()].resident_offset(program.name) {
            Some(offset) => offset,
            None => self.load(block, program)?,
        };

        // Committed only after the program is resident.
        self.blocks[block.index()].claimed_units |= 1 << unit;
        log::debug!(
            "claimed {:?} unit {} for {} at offset {}",
            block,
            unit,
            program.name,
            offset
        );
        Ok(SequencerClaim::new(block, unit, offset))
    }

    fn release(&mut self, claim: SequencerClaim) -> Result<(), PipelineError> {
        let table = &mut self.blocks[claim.block().index()];
        let bit = 1 << claim.unit();
        if table.claimed_units & bit == 0 {
            return Err(PipelineError::InvalidConfig("released a unit that was not claimed"));
        }
        table.claimed_units &= !bit;
        log::debug!("released {:?} unit {}", claim.block(), claim.unit());
        Ok(())
    }

    fn load(&mut self, block: BlockId, program: &SequencerProgram) -> Result<u8, PipelineError> {
        let Table { blocks, memory } = self;
        let table = &mut blocks[block.index()];
        let exhausted = PipelineError::ResourceExhausted(Exhausted::InstructionMemory { block });

        let Some(offset) = table.find_space(program) else {
            log::warn!(
                "{:?} has no room for {} ({} words)",
                block,
                program.name,
                program.len()
            );
            return Err(exhausted);
        };
        let slot = table
            .resident
            .iter_mut()
            .find(|r| r.is_none())
            .ok_or(exhausted)?;

        for (i, &word) in program.instructions.iter().enumerate() {
            let address = offset + i as u8;
            memory.write_instruction(block, address, SequencerProgram::relocate(word, offset));
            table.used_instructions |= 1 << address;
        }
        *slot = Some(Resident {
            name: program.name,
            offset,
        });
        table.loads += 1;
        log::debug!("loaded {} onto {:?} at {}", program.name, block, offset);
        Ok(offset)
    }
}

/// The process-wide sequencer load-state table and its lock.
pub struct SequencerRegistry<L, M> {
    lock: L,
    table: UnsafeCell<Table<M>>,
}

// SAFETY: the table is only reached through `with_table`, which holds the
// cross-core lock for the whole access.
unsafe impl<L: CoreLock + Sync, M: Send> Sync for SequencerRegistry<L, M> {}

impl<L: CoreLock, M: InstructionMemory> SequencerRegistry<L, M> {
    pub const fn new(lock: L, memory: M) -> Self {
        SequencerRegistry {
            lock,
            table: UnsafeCell::new(Table {
                blocks: [BlockTable::EMPTY; BLOCK_COUNT],
                memory,
            }),
        }
    }

    /// A handle through which `core` requests claims.
    pub fn handle(&self, core: CoreId) -> SequencerHandle<'_, L, M> {
        SequencerHandle {
            registry: self,
            core,
        }
    }

    fn with_table<R>(
        &self,
        core: CoreId,
        f: impl FnOnce(&mut Table<M>) -> R,
    ) -> Result<R, PipelineError> {
        let _guard = lock::acquire(&self.lock, core)?;
        // SAFETY: the guard gives this core exclusive access until dropped.
        let table = unsafe { &mut *self.table.get() };
        Ok(f(table))
    }

    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Give back the instruction memory writer.
    pub fn into_memory(self) -> M {
        self.table.into_inner().memory
    }
}

/// A core's view of the registry.
pub struct SequencerHandle<'r, L, M> {
    registry: &'r SequencerRegistry<L, M>,
    core: CoreId,
}

impl<L, M> Clone for SequencerHandle<'_, L, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L, M> Copy for SequencerHandle<'_, L, M> {}

impl<L: CoreLock, M: InstructionMemory> SequencerHandle<'_, L, M> {
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Claim a free unit and make `program` resident on its block.
    ///
    /// Blocks are scanned in [`BlockId::ALL`] order and the lowest free unit
    /// is taken. If that block cannot hold the program the claim fails; it
    /// does not fall through to the next block.
    pub fn claim(&self, program: &SequencerProgram) -> Result<SequencerClaim, PipelineError> {
        self.registry.with_table(self.core, |t| t.claim(program))?
    }

    /// Give a unit back. Its program stays resident, so the next claim for
    /// the same program on that block reuses it without a reload.
    pub fn release(&self, claim: SequencerClaim) -> Result<(), PipelineError> {
        self.registry.with_table(self.core, |t| t.release(claim))?
    }

    /// How many programs have been loaded onto `block`.
    pub fn load_count(&self, block: BlockId) -> Result<u32, PipelineError> {
        self.registry
            .with_table(self.core, |t| t.blocks[block.index()].loads)
    }

    /// Where `program` sits on `block`, if it is resident.
    pub fn resident_offset(
        &self,
        block: BlockId,
        program: &SequencerProgram,
    ) -> Result<Option<u8>, PipelineError> {
        self.registry.with_table(self.core, |t| {
            t.blocks[block.index()].resident_offset(program.name)
        })
    }

    pub fn status(&self, block: BlockId) -> Result<BlockStatus, PipelineError> {
        self.registry.with_table(self.core, |t| {
            let b = &t.blocks[block.index()];
            BlockStatus {
                claimed_units: b.claimed_units,
                used_instructions: b.used_instructions,
                loads: b.loads,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::lock::AtomicCoreLock;
    use crate::sequencer::program::{I2S_IN, I2S_OUT, MCLK};

    /// Instruction memory backed by plain arrays.
    struct RecordingMemory {
        words: [[Option<u16>; INSTRUCTION_MEMORY_WORDS]; BLOCK_COUNT],
        writes: usize,
    }

    impl RecordingMemory {
        const fn new() -> Self {
            RecordingMemory {
                words: [[None; INSTRUCTION_MEMORY_WORDS]; BLOCK_COUNT],
                writes: 0,
            }
        }
    }

    impl InstructionMemory for RecordingMemory {
        fn write_instruction(&mut self, block: BlockId, address: u8, instruction: u16) {
            let slot = &mut self.words[block.index()][address as usize];
            assert!(slot.is_none(), "overwrote {block:?}[{address}]");
            *slot = Some(instruction);
            self.writes += 1;
        }
    }

    fn registry() -> SequencerRegistry<AtomicCoreLock, RecordingMemory> {
        SequencerRegistry::new(AtomicCoreLock::new(), RecordingMemory::new())
    }

    static BIG: SequencerProgram = SequencerProgram {
        name: "big",
        instructions: &[0xA042; 30],
        origin: None,
        wrap_target: 0,
        wrap: 29,
        side_set_bits: 0,
    };

    #[test]
    fn ninth_claim_is_exhausted() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        let claims: Vec<_> = (0..8).map(|_| h.claim(&I2S_OUT).unwrap()).collect();

        assert!(claims[..4].iter().all(|c| c.block() == BlockId::Pio0));
        assert!(claims[4..].iter().all(|c| c.block() == BlockId::Pio1));
        let units: Vec<u8> = claims.iter().map(|c| c.unit()).collect();
        assert_eq!(units, [0, 1, 2, 3, 0, 1, 2, 3]);

        assert_eq!(
            h.claim(&I2S_OUT),
            Err(PipelineError::ResourceExhausted(Exhausted::Units))
        );
    }

    #[test]
    fn shared_program_loads_once_per_block() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        let a = h.claim(&I2S_OUT).unwrap();
        let b = h.claim(&I2S_OUT).unwrap();

        assert_eq!(a.offset(), b.offset());
        assert_ne!(a.unit(), b.unit());
        assert_eq!(h.load_count(BlockId::Pio0), Ok(1));
        assert_eq!(h.load_count(BlockId::Pio1), Ok(0));
        assert_eq!(
            h.resident_offset(BlockId::Pio0, &I2S_OUT),
            Ok(Some(a.offset()))
        );
        assert_eq!(reg.into_memory().writes, I2S_OUT.len());
    }

    #[test]
    fn programs_are_packed_top_down_and_relocated() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        let out = h.claim(&I2S_OUT).unwrap();
        let inp = h.claim(&I2S_IN).unwrap();
        let mclk = h.claim(&MCLK).unwrap();

        assert_eq!(out.offset(), 32 - 9);
        assert_eq!(inp.offset(), 32 - 18);
        assert_eq!(mclk.offset(), 32 - 21);
        assert_eq!(h.load_count(BlockId::Pio0), Ok(3));
        assert_eq!(
            h.status(BlockId::Pio0).unwrap().used_instructions,
            0xFFFF_F800
        );

        let memory = reg.into_memory();
        let block = &memory.words[0];
        // `jmp x--, 2` of i2s_out lands at 23 + 3 and targets 23 + 2.
        assert_eq!(block[26], Some(0x0840 | 25));
        // Non-jump words are copied as-is.
        assert_eq!(block[23], Some(0x2047));
        assert_eq!(block[11], Some(0x2047));
        assert!(block[..11].iter().all(Option::is_none));
    }

    #[test]
    fn fixed_origin_is_honoured() {
        static AT_ZERO: SequencerProgram = SequencerProgram {
            name: "at_zero",
            instructions: &[0x0001, 0x0000],
            origin: Some(0),
            wrap_target: 0,
            wrap: 1,
            side_set_bits: 0,
        };
        let reg = registry();
        let h = reg.handle(CoreId(0));
        assert_eq!(h.claim(&AT_ZERO).unwrap().offset(), 0);

        // Origin taken by the first copy's words.
        let clash = SequencerProgram {
            name: "clash",
            ..AT_ZERO
        };
        assert_eq!(
            h.claim(&clash),
            Err(PipelineError::ResourceExhausted(Exhausted::InstructionMemory {
                block: BlockId::Pio0
            }))
        );
    }

    #[test]
    fn failed_load_does_not_leak_a_unit() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        h.claim(&BIG).unwrap();

        let err = h.claim(&I2S_OUT);
        assert_eq!(
            err,
            Err(PipelineError::ResourceExhausted(Exhausted::InstructionMemory {
                block: BlockId::Pio0
            }))
        );
        let status = h.status(BlockId::Pio0).unwrap();
        assert_eq!(status.claimed_units, 0b0001);
        assert_eq!(status.loads, 1);

        // The shared program can still take the remaining units.
        assert_eq!(h.claim(&BIG).unwrap().unit(), 1);
    }

    #[test]
    fn reentrant_claim_is_a_deadlock() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        let _held = lock::acquire(reg.lock(), CoreId(0)).unwrap();
        assert_eq!(
            h.claim(&MCLK),
            Err(PipelineError::Deadlock { core: CoreId(0) })
        );
    }

    #[test]
    fn released_unit_is_claimed_again_without_reload() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        let claims: Vec<_> = (0..4).map(|_| h.claim(&I2S_OUT).unwrap()).collect();
        let offset = claims[0].offset();
        let second = claims.into_iter().nth(1).unwrap();
        h.release(second).unwrap();
        assert_eq!(h.status(BlockId::Pio0).unwrap().claimed_units, 0b1101);

        let again = h.claim(&I2S_OUT).unwrap();
        assert_eq!((again.block(), again.unit(), again.offset()), (BlockId::Pio0, 1, offset));
        assert_eq!(h.load_count(BlockId::Pio0), Ok(1));
        assert_eq!(h.load_count(BlockId::Pio1), Ok(0));
    }

    #[test]
    fn releasing_an_unclaimed_unit_is_refused() {
        let reg = registry();
        let h = reg.handle(CoreId(0));
        assert_eq!(
            h.release(SequencerClaim::new(BlockId::Pio1, 2, 0)),
            Err(PipelineError::InvalidConfig("released a unit that was not claimed"))
        );
    }

    #[test]
    fn concurrent_claims_from_two_cores() {
        let reg = registry();
        let results = std::thread::scope(|s| {
            let workers: Vec<_> = [CoreId(0), CoreId(1)]
                .into_iter()
                .map(|core| {
                    let h = reg.handle(core);
                    s.spawn(move || {
                        (0..5)
                            .map(|i| {
                                let program = if i % 2 == 0 { &I2S_OUT } else { &I2S_IN };
                                (program, h.claim(program))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });

        let granted: Vec<_> = results
            .iter()
            .filter_map(|(p, r)| r.as_ref().ok().map(|c| (*p, c)))
            .collect();
        assert_eq!(granted.len(), 8);
        assert_eq!(
            results.iter().filter(|(_, r)| r.is_err()).count(),
            2,
            "{results:?}"
        );

        let mut ids: Vec<_> = granted
            .iter()
            .map(|(_, c)| (c.block().index(), c.unit()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8, "a unit was granted twice");

        let h = reg.handle(CoreId(0));
        for block in BlockId::ALL {
            assert_eq!(h.status(block).unwrap().claimed_units, 0b1111);

            // Every program granted on this block was loaded exactly once,
            // and every claim for it points at that one copy.
            let mut loaded = 0;
            for program in [&I2S_OUT, &I2S_IN] {
                let offsets: Vec<u8> = granted
                    .iter()
                    .filter(|(p, c)| p.name == program.name && c.block() == block)
                    .map(|(_, c)| c.offset())
                    .collect();
                let resident = h.resident_offset(block, program).unwrap();
                match offsets.first() {
                    Some(&first) => {
                        assert!(offsets.iter().all(|&o| o == first), "{offsets:?}");
                        assert_eq!(resident, Some(first));
                        loaded += 1;
                    }
                    None => assert_eq!(resident, None),
                }
            }
            assert_eq!(h.load_count(block), Ok(loaded));
        }
    }
}
