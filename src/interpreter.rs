//! Interpreter for the lockstep machine.
//!
//! The machine is single-threaded and host-cooperative: nothing runs until the
//! host grants a step budget, and the dispatch loop yields back to the host
//! when the budget runs out or when the guest executes `sync`.  On a sync
//! yield the host's I/O callback is invoked with a mutable reference to the
//! `input` latch and the current `output` word, and the sync flag is cleared
//! before control returns.  All side effects are sequenced in program order;
//! runtime faults are fail-fast and carry the `pc` of the failing record.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::{self, AsmError};
use crate::bytecode::{Instr, Operand, Rom, Word, RAM_WORDS, REGISTER_BANK, REG_SP};

/// Instructions dispatched per `run()` slice before re-checking the flags.
const RUN_SLICE: usize = 4096;

/// Host I/O exchange invoked after a sync yield: `(input, output)`.
pub type SyncHandler = Box<dyn FnMut(&mut Word, Word)>;

/// Counters maintained by the dispatch loop.  Reset together with the
/// machine; the observability surface of the crate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Instruction records retired, padding included.
    pub instructions: u64,
    /// Sync yields delivered to the host.
    pub sync_yields: u64,
}

/// Runtime faults.  There is no recovery: the machine state past the failing
/// instruction is unspecified and the host should discard the instance.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("pc {pc} outside rom of {len} records")]
    PcOutOfRange { pc: Word, len: usize },
    #[error("memory access at {addr} outside ram (pc {pc})")]
    MemoryOutOfRange { addr: Word, pc: Word },
    #[error("stack overflow: sp {sp} (pc {pc})")]
    StackOverflow { sp: Word, pc: Word },
    #[error("stack underflow: sp {sp} (pc {pc})")]
    StackUnderflow { sp: Word, pc: Word },
    #[error("write to an immediate operand (pc {pc})")]
    ImmediateWrite { pc: Word },
}

/// The mutable machine state: register file, RAM, program counter, I/O
/// latches, and the two flags.  Everything the image module snapshots, and
/// nothing else.
///
/// `pc` is signed because branch targets are stored as `label index − 1` and
/// a label at index 0 makes the stored value −1; the unconditional increment
/// after dispatch brings it back in range before the next fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cpu {
    rf: Vec<Word>,
    ram: Vec<Word>,
    pc: Word,
    input: Word,
    output: Word,
    finished: bool,
    sync: bool,
}

impl Cpu {
    fn new() -> Cpu {
        let mut cpu = Cpu {
            rf: vec![0; REGISTER_BANK],
            ram: vec![0; RAM_WORDS],
            pc: 0,
            input: 0,
            output: 0,
            finished: false,
            sync: false,
        };
        cpu.reset();
        cpu
    }

    fn reset(&mut self) {
        self.rf.iter_mut().for_each(|r| *r = 0);
        self.ram.iter_mut().for_each(|w| *w = 0);
        self.rf[REG_SP as usize] = RAM_WORDS as Word - 1;
        self.pc = 0;
        self.input = 0;
        self.output = 0;
        self.finished = false;
        self.sync = false;
    }

    /// Resolve an operand to a value.
    fn get(&self, operand: &Operand) -> Result<Word, VmError> {
        match operand {
            Operand::Imm(value) => Ok(*value),
            Operand::Reg(index) => Ok(self.rf[*index as usize]),
            Operand::Mem(inner) => {
                let addr = self.get(inner)?;
                self.load(addr)
            }
            Operand::Port(_) => Ok(self.input),
        }
    }

    /// Write a value through an operand.
    fn set(&mut self, operand: &Operand, value: Word) -> Result<(), VmError> {
        match operand {
            Operand::Imm(_) => Err(VmError::ImmediateWrite { pc: self.pc }),
            Operand::Reg(index) => {
                self.rf[*index as usize] = value;
                Ok(())
            }
            Operand::Mem(inner) => {
                let addr = self.get(inner)?;
                self.store(addr, value)
            }
            Operand::Port(_) => {
                self.output = value;
                Ok(())
            }
        }
    }

    fn load(&self, addr: Word) -> Result<Word, VmError> {
        if (0..RAM_WORDS as Word).contains(&addr) {
            Ok(self.ram[addr as usize])
        } else {
            Err(VmError::MemoryOutOfRange { addr, pc: self.pc })
        }
    }

    fn store(&mut self, addr: Word, value: Word) -> Result<(), VmError> {
        if (0..RAM_WORDS as Word).contains(&addr) {
            self.ram[addr as usize] = value;
            Ok(())
        } else {
            Err(VmError::MemoryOutOfRange { addr, pc: self.pc })
        }
    }

    fn push_word(&mut self, value: Word) -> Result<(), VmError> {
        let sp = self.rf[REG_SP as usize];
        if !(0..RAM_WORDS as Word).contains(&sp) {
            return Err(VmError::StackOverflow { sp, pc: self.pc });
        }
        self.ram[sp as usize] = value;
        self.rf[REG_SP as usize] = sp - 1;
        Ok(())
    }

    fn pop_word(&mut self) -> Result<Word, VmError> {
        let sp = self.rf[REG_SP as usize] + 1;
        if !(0..RAM_WORDS as Word).contains(&sp) {
            return Err(VmError::StackUnderflow { sp, pc: self.pc });
        }
        self.rf[REG_SP as usize] = sp;
        Ok(self.ram[sp as usize])
    }

    /// Dispatch one record.  `self.pc` still holds the record's own index;
    /// the caller increments it afterwards.
    fn execute(&mut self, instr: &Instr) -> Result<(), VmError> {
        match instr {
            Instr::MovRegImm { dst, imm } => {
                self.rf[*dst as usize] = *imm;
            }
            Instr::AddRegRegImm { dst, src, imm } => {
                self.rf[*dst as usize] = self.rf[*src as usize].wrapping_add(*imm);
            }
            Instr::BranchRegReg {
                cond,
                lhs,
                rhs,
                target,
            } => {
                if cond.holds(self.rf[*lhs as usize], self.rf[*rhs as usize]) {
                    self.pc = *target;
                }
            }
            Instr::BranchRegImm {
                cond,
                lhs,
                imm,
                target,
            } => {
                if cond.holds(self.rf[*lhs as usize], *imm) {
                    self.pc = *target;
                }
            }
            Instr::Alu { op, dst, lhs, rhs } => {
                let value = op.apply(self.get(lhs)?, self.get(rhs)?);
                self.set(dst, value)?;
            }
            Instr::Mov { dst, src } => {
                let value = self.get(src)?;
                self.set(dst, value)?;
            }
            Instr::Branch {
                cond,
                lhs,
                rhs,
                target,
            } => {
                if cond.holds(self.get(lhs)?, self.get(rhs)?) {
                    self.pc = *target;
                }
            }
            Instr::Jump { target } => {
                self.pc = *target;
            }
            Instr::JumpReg { reg } => {
                self.pc = self.rf[*reg as usize].wrapping_sub(1);
            }
            Instr::Apc { dst, offset } => {
                let value = self.pc.wrapping_add(*offset);
                self.set(dst, value)?;
            }
            Instr::Push { sources } => {
                for source in sources {
                    let value = self.get(source)?;
                    self.push_word(value)?;
                }
            }
            Instr::Pop { targets } => {
                for target in targets {
                    let value = self.pop_word()?;
                    self.set(target, value)?;
                }
            }
            Instr::In { dst, shift, .. } => {
                let merged = self.get(dst)? | self.input.wrapping_shl(*shift as u32);
                self.set(dst, merged)?;
            }
            Instr::Out { src, shift, .. } => {
                self.output = self.get(src)?.wrapping_shr(*shift as u32);
            }
            Instr::Sync => {
                self.sync = true;
            }
            Instr::Halt => {
                self.finished = true;
            }
            Instr::Nop => {}
        }
        Ok(())
    }
}

/// One machine instance: the installed ROM, the mutable state, the metrics,
/// and the optional host I/O callback.  Not safe for concurrent entry;
/// `steps` must not be re-entered from the callback.
pub struct Machine {
    rom: Rom,
    cpu: Cpu,
    metrics: RunMetrics,
    on_sync: Option<SyncHandler>,
}

impl Machine {
    /// A machine with no program installed; stepping it finishes immediately.
    pub fn new() -> Machine {
        Machine {
            rom: Rom::empty(),
            cpu: Cpu::new(),
            metrics: RunMetrics::default(),
            on_sync: None,
        }
    }

    /// Rebuild a machine from snapshotted parts.  The sync handler is not
    /// part of a snapshot and starts out unset.
    pub fn with_state(rom: Rom, state: Cpu) -> Machine {
        Machine {
            rom,
            cpu: state,
            metrics: RunMetrics::default(),
            on_sync: None,
        }
    }

    /// Assemble `text` and install it, replacing the ROM wholesale, then
    /// reset the machine state.
    pub fn program(&mut self, text: &str) -> Result<(), AsmError> {
        self.rom = assembler::assemble(text)?;
        self.reset();
        Ok(())
    }

    /// Zero every register and RAM word, point `sp` at the top of RAM, clear
    /// the flags and latches, and reset the metrics.  The ROM is untouched.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.metrics = RunMetrics::default();
    }

    /// Execute up to `budget` instructions.  Returns `true` while the machine
    /// can still make progress.  Exits early on `finished` or on a sync
    /// yield; in the latter case the host callback (if any) runs before this
    /// returns and the sync flag is cleared.
    pub fn steps(&mut self, budget: usize) -> Result<bool, VmError> {
        {
            let Machine {
                rom, cpu, metrics, ..
            } = self;
            if cpu.finished {
                return Ok(false);
            }
            for _ in 0..budget {
                let index = cpu.pc;
                // A negative pc sign-extends to a huge usize, so one lookup
                // covers both directions out of range.
                let instr = rom.get(index as usize).ok_or(VmError::PcOutOfRange {
                    pc: index,
                    len: rom.len(),
                })?;
                cpu.execute(instr)?;
                cpu.pc += 1;
                metrics.instructions += 1;
                if cpu.finished || cpu.sync {
                    break;
                }
            }
        }
        if self.cpu.sync {
            self.metrics.sync_yields += 1;
            if let Some(handler) = self.on_sync.as_mut() {
                handler(&mut self.cpu.input, self.cpu.output);
            }
            self.cpu.sync = false;
        }
        Ok(!self.cpu.finished)
    }

    /// Execute a single instruction.
    pub fn step(&mut self) -> Result<bool, VmError> {
        self.steps(1)
    }

    /// Drive the machine until the terminator executes.  Sync yields are
    /// serviced along the way; a guest that neither finishes nor faults keeps
    /// this running, exactly like a budget loop in the host would.
    pub fn run(&mut self) -> Result<(), VmError> {
        while self.steps(RUN_SLICE)? {}
        Ok(())
    }

    /// Install the host I/O callback invoked after each sync yield.
    pub fn on_sync(&mut self, handler: impl FnMut(&mut Word, Word) + 'static) {
        self.on_sync = Some(Box::new(handler));
    }

    /// Remove the host I/O callback.
    pub fn clear_sync_handler(&mut self) {
        self.on_sync = None;
    }

    /// Read a register.  Panics if `index` is outside the bank.
    pub fn register(&self, index: usize) -> Word {
        self.cpu.rf[index]
    }

    /// Write a register.  Panics if `index` is outside the bank.
    pub fn set_register(&mut self, index: usize, value: Word) {
        self.cpu.rf[index] = value;
    }

    /// The full register bank.
    pub fn registers(&self) -> &[Word] {
        &self.cpu.rf
    }

    /// All of RAM.
    pub fn ram(&self) -> &[Word] {
        &self.cpu.ram
    }

    /// Read one RAM word.  Panics if `addr` is out of range.
    pub fn ram_word(&self, addr: usize) -> Word {
        self.cpu.ram[addr]
    }

    /// Write one RAM word.  Panics if `addr` is out of range.
    pub fn set_ram_word(&mut self, addr: usize, value: Word) {
        self.cpu.ram[addr] = value;
    }

    /// The host→guest latch.
    pub fn input(&self) -> Word {
        self.cpu.input
    }

    pub fn set_input(&mut self, value: Word) {
        self.cpu.input = value;
    }

    /// The guest→host latch.
    pub fn output(&self) -> Word {
        self.cpu.output
    }

    /// True once the terminator has executed.
    pub fn finished(&self) -> bool {
        self.cpu.finished
    }

    /// The installed ROM.
    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    /// Snapshot view of the machine state, for the image module.
    pub fn state(&self) -> &Cpu {
        &self.cpu
    }

    /// Counters for the current run.
    pub fn metrics(&self) -> RunMetrics {
        self.metrics
    }
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::new()
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("rom", &self.rom)
            .field("cpu", &self.cpu)
            .field("metrics", &self.metrics)
            .field("on_sync", &self.on_sync.is_some())
            .finish()
    }
}
