//! CPU execution engine for the Octet.
//!
//! Implements the fetch-decode-execute cycle and all instruction
//! behaviors. All mutable machine state lives in the [`Cpu`]
//! aggregate; handlers run under `&mut self`.

use crate::cpu::{Memory, Registers};
use crate::cpu::alu::{self, AluOp, AluOutput};
use crate::cpu::decode::{self, Instruction, DecodeError};
use crate::cpu::memory::MemoryError;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT).
    Halted,
    /// CPU stopped on an unknown opcode or a bad register index.
    Error,
}

/// How a handler left the program counter.
enum Flow {
    /// Advance the PC by the instruction width.
    Advance,
    /// The handler set the PC itself; automatic advancement is
    /// suppressed for this cycle.
    Transfer,
}

/// The Octet CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers, program counter, and flags.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count (for profiling and run limits).
    pub cycles: u64,
    /// Bytes emitted by PRN, in execution order.
    output: Vec<u8>,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU in the reset state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            output: Vec::new(),
            last_instr: None,
        }
    }

    /// Reset the CPU to initial state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.output.clear();
        self.last_instr = None;
    }

    /// Load a program into memory at address 0.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load_program(0, program)
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or an error. On
    /// error the CPU enters the [`CpuState::Error`] state and stays
    /// there.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch. Both operand bytes are read up front regardless of
        // the instruction's true width; narrower instructions ignore
        // the extras. Reads past the loaded image see residual memory.
        let pc = self.regs.pc;
        let opcode = self.mem.read(pc);
        let a = self.mem.read(pc.wrapping_add(1));
        let b = self.mem.read(pc.wrapping_add(2));

        // Decode
        let instr = match decode::decode(opcode, a, b) {
            Ok(instr) => instr,
            Err(e) => {
                self.state = CpuState::Error;
                return Err(e.into());
            }
        };

        // Execute
        match self.execute(instr) {
            Ok(Flow::Advance) => self.regs.advance_pc(decode::width(opcode)),
            Ok(Flow::Transfer) => {}
            Err(e) => {
                self.state = CpuState::Error;
                return Err(e);
            }
        }

        // Update state
        self.cycles += 1;
        self.last_instr = Some(instr);

        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<Flow, CpuError> {
        match instr {
            Instruction::Ldi { reg, value } => {
                self.reg_write(reg, value)?;
            }

            Instruction::Prn { reg } => {
                let value = self.reg_read(reg)?;
                self.output.push(value);
            }

            Instruction::Add { a, b } => self.alu_binary(AluOp::Add, a, b)?,
            Instruction::Mul { a, b } => self.alu_binary(AluOp::Mul, a, b)?,
            Instruction::Cmp { a, b } => self.alu_binary(AluOp::Cmp, a, b)?,

            Instruction::Push { reg } => {
                let value = self.reg_read(reg)?;
                let sp = self.regs.sp().wrapping_sub(1);
                self.regs.set_sp(sp);
                self.mem.write(sp, value);
            }

            Instruction::Pop { reg } => {
                let sp = self.regs.sp();
                let value = self.mem.read(sp);
                self.reg_write(reg, value)?;
                self.regs.set_sp(sp.wrapping_add(1));
            }

            Instruction::Call { reg } => {
                let target = self.reg_read(reg)?;
                let sp = self.regs.sp().wrapping_sub(1);
                self.regs.set_sp(sp);
                // Return address: the instruction after the CALL.
                self.mem.write(sp, self.regs.pc.wrapping_add(2));
                self.regs.jump(target);
                return Ok(Flow::Transfer);
            }

            Instruction::Ret => {
                let sp = self.regs.sp();
                self.regs.jump(self.mem.read(sp));
                self.regs.set_sp(sp.wrapping_add(1));
                return Ok(Flow::Transfer);
            }

            Instruction::Jmp { reg } => {
                let target = self.reg_read(reg)?;
                self.regs.jump(target);
                return Ok(Flow::Transfer);
            }

            Instruction::Hlt => {
                // Not a control transfer: the PC still advances past
                // the HLT before the loop observes the state.
                self.state = CpuState::Halted;
            }
        }

        Ok(Flow::Advance)
    }

    /// Perform an ALU instruction on two register operands.
    fn alu_binary(&mut self, op: AluOp, a: u8, b: u8) -> Result<(), CpuError> {
        let x = self.reg_read(a)?;
        let y = self.reg_read(b)?;
        match alu::apply(op, x, y) {
            AluOutput::Value(value) => self.reg_write(a, value)?,
            AluOutput::Flags(fl) => self.regs.fl = fl,
        }
        Ok(())
    }

    /// Read a general-purpose register named by an operand byte.
    fn reg_read(&self, reg: u8) -> Result<u8, CpuError> {
        self.regs
            .gp
            .get(reg as usize)
            .copied()
            .ok_or(CpuError::BadRegister(reg))
    }

    /// Write a general-purpose register named by an operand byte.
    fn reg_write(&mut self, reg: u8, value: u8) -> Result<(), CpuError> {
        match self.regs.gp.get_mut(reg as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(CpuError::BadRegister(reg)),
        }
    }

    /// Bytes emitted by PRN so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Drain the PRN output buffer.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Render the classic one-line trace of the machine state: PC,
    /// the three bytes at the PC, and all eight registers, in hex.
    pub fn trace(&self) -> String {
        let pc = self.regs.pc;
        let mut line = format!(
            "TRACE: {:02X} | {:02X} {:02X} {:02X} |",
            pc,
            self.mem.read(pc),
            self.mem.read(pc.wrapping_add(1)),
            self.mem.read(pc.wrapping_add(2)),
        );

        for value in self.regs.gp {
            line.push_str(&format!(" {:02X}", value));
        }

        line
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("register index {0} out of range (0-7)")]
    BadRegister(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::registers::{Flags, SP_INIT};
    use proptest::prelude::*;

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        instructions.iter().flat_map(encode).collect()
    }

    fn run_program(program: &[u8]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(program).unwrap();
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = Cpu::new();
        let program = make_program(&[Instruction::Hlt]);
        cpu.load_program(&program).unwrap();

        let executed = cpu.run().unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_ldi_then_prn() {
        let cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 8 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]));

        assert_eq!(cpu.output(), &[8]);
    }

    #[test]
    fn test_mul_program_prints_72() {
        let cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 8 },
            Instruction::Ldi { reg: 1, value: 9 },
            Instruction::Mul { a: 0, b: 1 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]));

        assert_eq!(cpu.output(), &[72]);
    }

    #[test]
    fn test_add_wraps() {
        let cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 200 },
            Instruction::Ldi { reg: 1, value: 100 },
            Instruction::Add { a: 0, b: 1 },
            Instruction::Hlt,
        ]));

        assert_eq!(cpu.regs.gp[0], 44);
    }

    #[test]
    fn test_cmp_sets_flags() {
        for (x, y, expected) in [
            (5, 5, Flags::Equal),
            (9, 5, Flags::Greater),
            (5, 9, Flags::Less),
        ] {
            let cpu = run_program(&make_program(&[
                Instruction::Ldi { reg: 0, value: x },
                Instruction::Ldi { reg: 1, value: y },
                Instruction::Cmp { a: 0, b: 1 },
                Instruction::Hlt,
            ]));

            assert_eq!(cpu.regs.fl, expected, "CMP {} {}", x, y);
        }
    }

    #[test]
    fn test_push_pop_roundtrip() {
        let cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 42 },
            Instruction::Push { reg: 0 },
            Instruction::Pop { reg: 1 },
            Instruction::Hlt,
        ]));

        assert_eq!(cpu.regs.gp[1], 42);
        // POP undoes PUSH's stack pointer movement.
        assert_eq!(cpu.regs.sp(), SP_INIT);
    }

    #[test]
    fn test_call_pushes_return_address() {
        // 0: LDI R1,42
        // 3: CALL R1
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[
            Instruction::Ldi { reg: 1, value: 42 },
            Instruction::Call { reg: 1 },
        ]))
        .unwrap();

        cpu.step().unwrap();
        cpu.step().unwrap();

        assert_eq!(cpu.regs.pc, 42);
        assert_eq!(cpu.regs.sp(), SP_INIT - 1);
        // Return address is the instruction after the CALL.
        assert_eq!(cpu.mem.read(cpu.regs.sp()), 5);
    }

    #[test]
    fn test_call_ret() {
        // 0: LDI R1,6    load subroutine address
        // 3: CALL R1
        // 5: HLT
        // 6: LDI R0,99   the subroutine
        // 9: RET
        let cpu = run_program(&[
            0x82, 1, 6,
            0x50, 1,
            0x01,
            0x82, 0, 99,
            0x11,
        ]);

        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.gp[0], 99);
        assert_eq!(cpu.regs.sp(), SP_INIT);
    }

    #[test]
    fn test_nested_call_ret() {
        //  0: LDI R1,10   outer subroutine address
        //  3: CALL R1
        //  5: HLT
        //  6: (unused)
        // 10: LDI R2,16   inner subroutine address
        // 13: CALL R2
        // 15: RET
        // 16: LDI R0,7    the inner subroutine
        // 19: RET
        let cpu = run_program(&[
            0x82, 1, 10,
            0x50, 1,
            0x01,
            0, 0, 0, 0,
            0x82, 2, 16,
            0x50, 2,
            0x11,
            0x82, 0, 7,
            0x11,
        ]);

        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.gp[0], 7);
        assert_eq!(cpu.regs.sp(), SP_INIT);
    }

    #[test]
    fn test_jmp_skips_instructions() {
        // 0: LDI R0,7
        // 3: JMP R0
        // 5: PRN R0     skipped
        // 7: HLT
        let cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 7 },
            Instruction::Jmp { reg: 0 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]));

        assert!(cpu.is_halted());
        assert!(cpu.output().is_empty());
    }

    #[test]
    fn test_unknown_opcode() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[0b1111_1111]).unwrap();

        let err = cpu.step().unwrap_err();

        assert!(matches!(
            err,
            CpuError::Decode(DecodeError::UnknownOpcode(0b1111_1111))
        ));
        assert_eq!(cpu.state, CpuState::Error);
    }

    #[test]
    fn test_bad_register_index() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Ldi { reg: 9, value: 1 }]))
            .unwrap();

        let err = cpu.step().unwrap_err();

        assert!(matches!(err, CpuError::BadRegister(9)));
        assert_eq!(cpu.state, CpuState::Error);
    }

    #[test]
    fn test_step_after_halt_errors() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Hlt])).unwrap();
        cpu.run().unwrap();

        let err = cpu.step().unwrap_err();
        assert!(matches!(err, CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_run_limited_stops_infinite_loop() {
        // 0: LDI R0,0
        // 3: JMP R0     loops back to the LDI forever
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 0 },
            Instruction::Jmp { reg: 0 },
        ]))
        .unwrap();

        let executed = cpu.run_limited(10).unwrap();

        assert_eq!(executed, 10);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_operand_fetch_wraps_at_end_of_memory() {
        // A HLT in the last cell: the unconditional two-operand fetch
        // wraps around to addresses 0 and 1 and is ignored.
        let mut cpu = Cpu::new();
        cpu.mem.write(255, 0b0000_0001);
        cpu.regs.pc = 255;

        cpu.step().unwrap();

        assert!(cpu.is_halted());
    }

    #[test]
    fn test_take_output_drains() {
        let mut cpu = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 3 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]));

        assert_eq!(cpu.take_output(), vec![3]);
        assert!(cpu.output().is_empty());
    }

    #[test]
    fn test_trace_format() {
        let cpu = Cpu::new();
        assert_eq!(
            cpu.trace(),
            "TRACE: 00 | 00 00 00 | 00 00 00 00 00 00 00 F4"
        );
    }

    proptest! {
        #[test]
        fn prop_ldi_prn_roundtrip(value: u8) {
            let cpu = run_program(&make_program(&[
                Instruction::Ldi { reg: 0, value },
                Instruction::Prn { reg: 0 },
                Instruction::Hlt,
            ]));

            prop_assert_eq!(cpu.output(), &[value]);
        }
    }
}
