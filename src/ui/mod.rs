pub mod screens;
pub mod widgets;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use std::io::Stdout;
use std::time::Duration;

use crate::app::{is_list_step, App};
use crate::wizard::StepKind;

/// Run the wizard until it reaches an exit
pub fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        // Start work queued by the last transition
        app.dispatch_tasks();

        terminal.draw(|frame| render(app, frame))?;

        // Check for background operation results
        app.check_background_results();

        // Poll with timeout so background results show up without input
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(app, key);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

/// Handle keyboard input
fn handle_key(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.interrupt();
        return;
    }

    let kind = app.wizard.kind();

    // Any key leaves a finished wizard
    if app.wizard.step().is_terminal() {
        app.should_quit = true;
        return;
    }

    // Ignore input while loading or provisioning
    if app.wizard.is_loading() || kind == StepKind::Executing {
        return;
    }

    match kind {
        StepKind::Welcome => {
            if key.code == KeyCode::Enter {
                app.submit();
            }
        }
        StepKind::Identity | StepKind::Compute => handle_form_key(app, key),
        k if is_list_step(k) => handle_list_key(app, key),
        _ => {}
    }
}

fn handle_form_key(app: &mut App, key: KeyEvent) {
    match (key.code, key.modifiers) {
        (KeyCode::Enter, _) => app.submit(),
        (KeyCode::Tab, _) | (KeyCode::Down, _) => app.next_field(),
        (KeyCode::BackTab, _) | (KeyCode::Up, _) => app.prev_field(),
        (KeyCode::Backspace, _) => app.backspace(),
        (KeyCode::Char(c), m) if !m.contains(KeyModifiers::CONTROL) => app.type_char(c),
        _ => {}
    }
}

fn handle_list_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.submit(),
        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
        KeyCode::Up | KeyCode::Char('k') => app.select_prev(),
        KeyCode::Esc if app.wizard.kind() == StepKind::Summary => {
            // Esc on the summary is the same as choosing Cancel
            app.form.selected = 1;
            app.submit();
        }
        _ => {}
    }
}

/// Main render function
fn render(app: &App, frame: &mut Frame) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(10),   // Step
            Constraint::Length(3), // Key hints
        ])
        .split(area);

    render_title(app, frame, chunks[0]);
    screens::wizard::render(app, frame, chunks[1]);
    render_hints(app, frame, chunks[2]);
}

fn render_title(app: &App, frame: &mut Frame, area: Rect) {
    let kind = app.wizard.kind();
    let mut title = match kind.number() {
        Some(n) => format!("Create VM ({}/7) - {}", n, kind.title()),
        None => format!("Create VM - {}", kind.title()),
    };
    if let Some(package) = app.wizard.package() {
        title.push_str(&format!("  [package: {}]", package));
    }

    let node = format!("node: {}", app.inventory.node());
    let line = Line::from(vec![
        Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(node, Style::default().fg(Color::DarkGray)),
    ]);

    let para = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    frame.render_widget(para, area);
}

fn render_hints(app: &App, frame: &mut Frame, area: Rect) {
    let kind = app.wizard.kind();
    let hints = if app.wizard.step().is_terminal() {
        "[Any key] Exit"
    } else if kind == StepKind::Executing {
        "Creating VM, please wait"
    } else if app.wizard.is_loading() {
        "[Ctrl+C] Quit"
    } else {
        match kind {
            StepKind::Welcome => "[Enter] Start  [Ctrl+C] Quit",
            StepKind::Identity | StepKind::Compute => {
                "[Enter] Next  [Tab] Switch field  [Ctrl+C] Quit"
            }
            StepKind::Summary => "[j/k] Select  [Enter] Confirm  [Esc] Cancel",
            _ => "[j/k] Select  [Enter] Continue  [Ctrl+C] Quit",
        }
    };

    let para = Paragraph::new(hints)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(para, area);
}

/// Helper to create a centered rectangle
pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}
