//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::cpu::registers::SP;
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60),
            Constraint::Percentage(40),
        ])
        .split(frame.area());

    // Left side: code, registers, status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, output, help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_output(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw the program disassembly with the current instruction marked.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly();

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{}{:03}: {}", bp, prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw the register file, PC, flags, and stack pointer.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;

    let gp_line = |range: std::ops::Range<usize>| {
        Line::from(
            range
                .flat_map(|i| {
                    vec![
                        Span::raw(format!("R{}: ", i)),
                        Span::styled(
                            format!("{:02X}  ", regs.gp[i]),
                            Style::default().fg(Color::White),
                        ),
                    ]
                })
                .collect::<Vec<_>>(),
        )
    };

    let content = vec![
        gp_line(0..4),
        gp_line(4..8),
        Line::from(vec![
            Span::raw("PC: "),
            Span::styled(format!("{:02X}", regs.pc), Style::default().fg(Color::Yellow)),
            Span::raw("   FL: "),
            Span::styled(format!("{}", regs.fl), Style::default().fg(Color::Magenta)),
            Span::raw(format!("   SP: {:02X} -> {:02X}", regs.sp(), app.cpu.mem.read(regs.sp()))),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(
                format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                },
            ),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(format!(" Registers (R{} = SP) ", SP))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw the memory view.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.mem_scroll;
    let end = (start + visible_rows).min(256);

    let sp = app.cpu.regs.sp();
    let items: Vec<ListItem> = (start..end)
        .map(|idx| {
            let addr = idx as u8;
            let value = app.cpu.mem.read(addr);
            let is_pc = addr == app.cpu.regs.pc;
            let is_sp = addr == sp;

            let marker = if is_sp { "<sp" } else { "" };
            let text = format!("{:03}: {:08b} = {:3} {}", addr, value, value, marker);

            let style = if is_pc {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if is_sp {
                Style::default().fg(Color::Cyan)
            } else if value != 0 {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw the program output (PRN) pane.
fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start = app.output.len().saturating_sub(visible_rows);

    let lines: Vec<Line> = app.output[start..]
        .iter()
        .map(|line| Line::from(line.as_str()))
        .collect();

    let paragraph = Paragraph::new(lines)
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(paragraph, area);
}

/// Draw the status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw the help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
