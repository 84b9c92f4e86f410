//! WebAssembly bindings for the Octet emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::Cpu;
use crate::asm::assembler::assemble;
use crate::asm::image::parse_image;
use crate::asm::disasm::disassemble_instruction;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<u8>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
        }
    }

    /// Load a program from assembly source code.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let bytes = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        self.load_bytes(bytes)
    }

    /// Load a program from image text (binary literals, one per line).
    #[wasm_bindgen]
    pub fn load_image(&mut self, source: &str) -> Result<usize, JsError> {
        let image = parse_image(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        self.load_bytes(image.bytes)
    }

    fn load_bytes(&mut self, bytes: Vec<u8>) -> Result<usize, JsError> {
        let len = bytes.len();
        self.program = bytes;
        self.cpu = Cpu::new();
        self.cpu.load_program(&self.program)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(len)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is not running"));
        }

        let pc = self.cpu.regs.pc;
        let opcode = self.cpu.mem.read(pc);
        let a = self.cpu.mem.read(pc.wrapping_add(1));
        let b = self.cpu.mem.read(pc.wrapping_add(2));

        self.cpu.step()
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(disassemble_instruction(opcode, a, b))
    }

    /// Run until halt or max cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        let _ = self.cpu.run_limited(max_cycles as u64);
        self.cpu.cycles
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        if !self.program.is_empty() {
            let _ = self.cpu.load_program(&self.program);
        }
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u8 {
        self.cpu.regs.pc
    }

    /// Get a general-purpose register value (0-7).
    #[wasm_bindgen]
    pub fn register(&self, index: usize) -> u8 {
        if index < 8 {
            self.cpu.regs.gp[index]
        } else {
            0
        }
    }

    /// Get the stack pointer (R7).
    #[wasm_bindgen]
    pub fn sp(&self) -> u8 {
        self.cpu.regs.sp()
    }

    /// Get the flags as an `LGE` bit string.
    #[wasm_bindgen]
    pub fn flags(&self) -> String {
        format!("{}", self.cpu.regs.fl)
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get memory cell value at an address.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u8) -> u8 {
        self.cpu.mem.read(addr)
    }

    /// Get all memory as an array of values.
    #[wasm_bindgen]
    pub fn memory_all(&self) -> Vec<u8> {
        (0..=255).map(|addr| self.cpu.mem.read(addr)).collect()
    }

    /// Get everything PRN has printed, one decimal value per line.
    #[wasm_bindgen]
    pub fn output(&self) -> String {
        self.cpu
            .output()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get registers as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> String {
        let regs = &self.cpu.regs;
        format!(
            r#"{{"gp":[{}],"pc":{},"fl":"{}","cycles":{}}}"#,
            regs.gp.map(|v| v.to_string()).join(","),
            regs.pc,
            regs.fl,
            self.cpu.cycles
        )
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the byte count.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let bytes = assemble(source)
        .map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(bytes.len())
}

/// Disassemble a single instruction from its bytes.
#[wasm_bindgen]
pub fn wasm_disassemble(opcode: u8, a: u8, b: u8) -> String {
    disassemble_instruction(opcode, a, b)
}
