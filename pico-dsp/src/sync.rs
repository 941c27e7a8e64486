//! Master clock and synchronized start.
//!
//! Every sequencer program begins with `wait 0 irq 7`. The synchronizer
//! raises that flag as soon as it is created, before any program is
//! loaded, so enabled units stall on their first instruction. Once every
//! role is configured and enrolled, [`ClockSynchronizer::release`] enables
//! all of them per block in one write and then drops the flag: every unit
//! leaves the wait on the same clock edge.
//!
//! ```text
//!   new()            hold gate
//!   start_master_clock / configure (per channel)
//!   release()        enable_in_sync(block, mask) ×2, release gate
//! ```

use crate::error::PipelineError;
use crate::sequencer::program::MCLK;
use crate::sequencer::{
    BlockId, ClockDivider, CoreLock, InstructionMemory, SequencerClaim, SequencerControl,
    SequencerHandle, UnitId, UnitRole, UnitSetup, BLOCK_COUNT,
};

/// Most roles one synchronizer starts.
pub const MAX_ROLES: usize = 8;

/// Units started by [`ClockSynchronizer::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartReport {
    /// Unit mask enabled on each block, indexed by [`BlockId::index`].
    pub masks: [u8; BLOCK_COUNT],
}

impl StartReport {
    pub fn roles(&self) -> u32 {
        self.masks.iter().map(|m| m.count_ones()).sum()
    }
}

pub struct ClockSynchronizer<C: SequencerControl> {
    control: C,
    roles: [Option<UnitId>; MAX_ROLES],
    role_count: usize,
    master: Option<SequencerClaim>,
    released: bool,
}

impl<C: SequencerControl> ClockSynchronizer<C> {
    /// Take over sequencer control and hold the start gate.
    pub fn new(mut control: C) -> Self {
        control.hold_start_gate();
        ClockSynchronizer {
            control,
            roles: [None; MAX_ROLES],
            role_count: 0,
            master: None,
            released: false,
        }
    }

    /// Claim a unit for the master clock program, configure it to output
    /// `sample_rate × factor / 2` on `pin` and enroll it.
    pub fn start_master_clock<L: CoreLock, M: InstructionMemory>(
        &mut self,
        sequencer: &SequencerHandle<'_, L, M>,
        pin: u8,
        system_clock_hz: u32,
        sample_rate: u32,
        factor: u32,
    ) -> Result<UnitId, PipelineError> {
        if self.master.is_some() {
            return Err(PipelineError::InvalidConfig("master clock already started"));
        }
        let divider = ClockDivider::for_master_clock(system_clock_hz, sample_rate, factor)
            .ok_or(PipelineError::InvalidConfig("master clock divider out of range"))?;
        let claim = sequencer.claim(&MCLK)?;
        let setup = UnitSetup {
            role: UnitRole::MasterClock { pin },
            program: MCLK,
            divider,
        };
        self.configure(&claim, &setup)?;
        log::info!(
            "master clock on pin {} (divider {}+{}/256)",
            pin,
            divider.integer,
            divider.fraction
        );
        let id = claim.id();
        self.master = Some(claim);
        Ok(id)
    }

    /// Configure a claimed unit (left disabled) and enroll it.
    pub fn configure(
        &mut self,
        claim: &SequencerClaim,
        setup: &UnitSetup,
    ) -> Result<(), PipelineError> {
        self.enroll(claim.id())?;
        self.control.configure(claim, setup);
        Ok(())
    }

    /// Add a unit to the set started together by [`release`](Self::release).
    pub fn enroll(&mut self, unit: UnitId) -> Result<(), PipelineError> {
        if self.released {
            return Err(PipelineError::InvalidConfig("enrolled after start"));
        }
        if self.roles[..self.role_count].contains(&Some(unit)) {
            return Err(PipelineError::InvalidConfig("unit enrolled twice"));
        }
        let slot = self
            .roles
            .get_mut(self.role_count)
            .ok_or(PipelineError::InvalidConfig("too many synchronized roles"))?;
        *slot = Some(unit);
        self.role_count += 1;
        Ok(())
    }

    /// Enable every enrolled unit and open the gate.
    pub fn release(&mut self) -> Result<StartReport, PipelineError> {
        if self.released {
            return Err(PipelineError::InvalidConfig("start gate already released"));
        }
        let mut masks = [0u8; BLOCK_COUNT];
        for unit in self.roles.iter().flatten() {
            masks[unit.block.index()] |= 1 << unit.unit;
        }
        for block in BlockId::ALL {
            let mask = masks[block.index()];
            if mask != 0 {
                self.control.enable_in_sync(block, mask);
            }
        }
        self.control.release_start_gate();
        self.released = true;

        let report = StartReport { masks };
        log::info!("start gate released: {} roles {:?}", report.roles(), masks);
        Ok(report)
    }

    /// Stop a unit and drop it from the synchronized set.
    ///
    /// After [`release`](Self::release) the freed slot cannot be re-enrolled;
    /// a channel restarted then has to wait for a new synchronizer.
    pub fn withdraw(&mut self, claim: &SequencerClaim) {
        self.control.disable(claim);
        let id = Some(claim.id());
        if let Some(i) = self.roles[..self.role_count].iter().position(|r| *r == id) {
            self.roles.copy_within(i + 1..self.role_count, i);
            self.role_count -= 1;
            self.roles[self.role_count] = None;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn roles(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.roles.iter().flatten().copied()
    }

    pub fn control(&self) -> &C {
        &self.control
    }
}
