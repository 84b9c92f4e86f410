//! Debugger application state and logic.

use crate::Cpu;
use crate::asm::disasm;
use std::collections::HashSet;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original program for reference.
    pub program: Vec<u8>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<u8>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset.
    pub mem_scroll: usize,
    /// Lines printed by PRN so far.
    pub output: Vec<String>,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<u8>) -> Self {
        let mut cpu = Cpu::new();
        let _ = cpu.load_program(&program);

        Self {
            cpu,
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll: 0,
            output: Vec::new(),
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc;
        let opcode = self.cpu.mem.read(pc);
        let a = self.cpu.mem.read(pc.wrapping_add(1));
        let b = self.cpu.mem.read(pc.wrapping_add(2));

        match self.cpu.step() {
            Ok(_) => {
                self.status = format!(
                    "PC={:03}: {}",
                    pc,
                    disasm::disassemble_instruction(opcode, a, b)
                );
                for value in self.cpu.take_output() {
                    self.output.push(value.to_string());
                }
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles", self.cpu.cycles);
            return;
        }

        // Check for breakpoint
        let pc = self.cpu.regs.pc;
        if self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at PC={}", pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at the current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.contains(&pc) {
            self.breakpoints.remove(&pc);
            self.status = format!("Removed breakpoint at PC={}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={}", pc);
        }
    }

    /// Reset CPU to initial state.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        let _ = self.cpu.load_program(&self.program);
        self.running = false;
        self.output.clear();
        self.status = "Reset. Ready.".into();
    }

    /// Get the disassembly of the loaded program, marking the line
    /// the PC currently points at.
    pub fn get_disassembly(&self) -> Vec<(u8, String, bool)> {
        let pc = self.cpu.regs.pc;

        disasm::walk(&self.program)
            .into_iter()
            .map(|(addr, line)| {
                let addr = addr as u8;
                (addr, line, addr == pc)
            })
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u8>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create app
    let mut app = DebuggerApp::new(program);

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => {
                            if app.mem_scroll > 0 {
                                app.mem_scroll -= 1;
                            }
                        }
                        KeyCode::Down => {
                            if app.mem_scroll < 250 {
                                app.mem_scroll += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
