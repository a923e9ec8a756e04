//! Wizard step screens

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::app::{App, SUMMARY_ACTIONS};
use crate::ui::centered_rect;
use crate::ui::widgets::MessageDialog;
use crate::vm::spec::{MAX_CORES, MAX_MEMORY_MB, MIN_MEMORY_MB};
use crate::wizard::{Step, StepKind};

const IDENTITY_FIELDS: [(&str, &str); 2] = [("VM ID", ""), ("Name", "1-63 characters")];
const COMPUTE_FIELDS: [&str; 3] = ["CPU cores", "Memory (MB)", "Disk size (GB)"];

/// Render the current wizard step
pub fn render(app: &App, frame: &mut Frame, area: Rect) {
    let dialog_area = centered_rect(72, 22, area);
    frame.render_widget(Clear, dialog_area);

    match app.wizard.step() {
        Step::Success { vmid, name } => {
            let message = format!(
                "VM {} ({}) was created on {}.\n\nStart it with: qm start {}",
                vmid,
                name,
                app.inventory.node(),
                vmid
            );
            MessageDialog::new("VM created", &message, Color::Green).render(dialog_area, frame.buffer_mut());
            return;
        }
        Step::Error { message } => {
            MessageDialog::new("Error", message, Color::Red).render(dialog_area, frame.buffer_mut());
            return;
        }
        Step::Cancelled => {
            MessageDialog::new("Cancelled", "No VM was created.", Color::Yellow)
                .render(dialog_area, frame.buffer_mut());
            return;
        }
        _ => {}
    }

    let block = Block::default()
        .title(format!(" {} ", app.wizard.kind().title()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    let inner = block.inner(dialog_area);
    frame.render_widget(block, dialog_area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Min(5),    // Step body
            Constraint::Length(1), // Validation error
        ])
        .split(inner);

    let kind = app.wizard.kind();
    if app.wizard.is_loading() {
        render_loading(kind.loading_message(), frame, chunks[0]);
    } else {
        match kind {
            StepKind::Welcome => render_welcome(app, frame, chunks[0]),
            StepKind::Identity => render_identity(app, frame, chunks[0]),
            StepKind::Compute => render_compute(app, frame, chunks[0]),
            StepKind::Storage | StepKind::Network | StepKind::ImageSelect => {
                render_choices(app, frame, chunks[0])
            }
            StepKind::Summary => render_summary(app, frame, chunks[0]),
            StepKind::Executing => render_executing(app, frame, chunks[0]),
            _ => {}
        }
    }

    if let Some(error) = app.wizard.validation_error() {
        let para = Paragraph::new(error.to_string()).style(Style::default().fg(Color::Red));
        frame.render_widget(para, chunks[1]);
    }
}

fn render_loading(message: &str, frame: &mut Frame, area: Rect) {
    let para = Paragraph::new(message)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);
    frame.render_widget(para, area);
}

fn render_welcome(app: &App, frame: &mut Frame, area: Rect) {
    let mut lines = vec![
        Line::from(Span::styled(
            "Create a new virtual machine",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("This wizard collects the VM id, name, CPU, memory, disk,"),
        Line::from("storage, network bridge and install ISO, then creates the VM"),
        Line::from(format!("on node {}.", app.inventory.node())),
        Line::from(""),
    ];
    if let Some(package) = app.wizard.package() {
        lines.push(Line::from(vec![
            Span::styled("Package: ", Style::default().fg(Color::Yellow)),
            Span::raw(package.to_string()),
        ]));
    }
    lines.push(Line::from(Span::styled(
        "Press Enter to begin",
        Style::default().fg(Color::DarkGray),
    )));

    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), area);
}

fn render_identity(app: &App, frame: &mut Frame, area: Rect) {
    let chunks = field_rows(area, IDENTITY_FIELDS.len());

    for (i, (label, hint)) in IDENTITY_FIELDS.iter().enumerate() {
        let hint = if i == 0 {
            match app.wizard.suggested_vmid() {
                Some(id) => format!("next free: {}", id),
                None => String::new(),
            }
        } else {
            hint.to_string()
        };
        render_input_field(
            frame,
            chunks[i],
            label,
            app.form.fields.get(i).map(String::as_str).unwrap_or(""),
            app.form.focus == i,
            &hint,
        );
    }
}

fn render_compute(app: &App, frame: &mut Frame, area: Rect) {
    let chunks = field_rows(area, COMPUTE_FIELDS.len());
    let hints = [
        format!("1-{}", MAX_CORES),
        format!("{}-{}", MIN_MEMORY_MB, MAX_MEMORY_MB),
        "at least 1".to_string(),
    ];

    for (i, label) in COMPUTE_FIELDS.iter().enumerate() {
        render_input_field(
            frame,
            chunks[i],
            label,
            app.form.fields.get(i).map(String::as_str).unwrap_or(""),
            app.form.focus == i,
            &hints[i],
        );
    }
}

fn field_rows(area: Rect, count: usize) -> Vec<Rect> {
    let mut constraints = vec![Constraint::Length(3); count];
    constraints.push(Constraint::Min(0));
    Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area)
        .to_vec()
}

fn render_input_field(frame: &mut Frame, area: Rect, label: &str, value: &str, is_focused: bool, hint: &str) {
    let border_style = if is_focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Gray)
    };

    let block = Block::default()
        .title(format!(" {} ", label))
        .borders(Borders::ALL)
        .border_style(border_style);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let text_style = if is_focused {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };

    let mut spans = vec![Span::styled(value.to_string(), text_style)];
    if is_focused {
        spans.push(Span::styled("_", Style::default().fg(Color::Yellow)));
    }
    if !hint.is_empty() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(hint.to_string(), Style::default().fg(Color::DarkGray)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), inner);
}

fn render_choices(app: &App, frame: &mut Frame, area: Rect) {
    let prompt = match app.wizard.kind() {
        StepKind::Storage => "Select storage for the VM disk:",
        StepKind::Network => "Select network bridge:",
        _ => "Select installation ISO:",
    };

    let labels: Vec<&str> = app
        .wizard
        .choices()
        .iter()
        .map(|c| c.label.as_str())
        .collect();

    render_rows(prompt, &labels, app.form.selected, frame, area);
}

fn render_rows(prompt: &str, labels: &[&str], selected: usize, frame: &mut Frame, area: Rect) {
    let mut lines = vec![
        Line::from(Span::styled(prompt.to_string(), Style::default().fg(Color::Yellow))),
        Line::from(""),
    ];

    // Keep the selection visible in long lists
    let visible = (area.height as usize).saturating_sub(lines.len()).max(1);
    let offset = selected.saturating_sub(visible - 1);

    for (i, label) in labels.iter().enumerate().skip(offset).take(visible) {
        let line = if i == selected {
            Line::from(Span::styled(
                format!("> {}", label),
                Style::default().fg(Color::Black).bg(Color::Cyan),
            ))
        } else {
            Line::from(format!("  {}", label))
        };
        lines.push(line);
    }

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_summary(app: &App, frame: &mut Frame, area: Rect) {
    let Step::Summary { spec } = app.wizard.step() else {
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(3)])
        .split(area);

    let row = |label: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{:<12}", label), Style::default().fg(Color::Yellow)),
            Span::raw(value),
        ])
    };

    let lines = vec![
        row("VM ID:", spec.vmid.to_string()),
        row("Name:", spec.name.clone()),
        row("CPU:", format!("{} cores", spec.cores)),
        row("Memory:", format!("{} MB", spec.memory_mb)),
        row("Disk:", format!("{} GB on {}", spec.disk_gb, spec.storage)),
        row("Network:", spec.bridge.clone()),
        row(
            "ISO:",
            spec.iso_volid.clone().unwrap_or_else(|| "(No ISO)".to_string()),
        ),
    ];
    frame.render_widget(Paragraph::new(lines), chunks[0]);

    render_rows("Proceed?", &SUMMARY_ACTIONS, app.form.selected, frame, chunks[1]);
}

fn render_executing(app: &App, frame: &mut Frame, area: Rect) {
    let Step::Executing { vmid, name, stage } = app.wizard.step() else {
        return;
    };

    let lines = vec![
        Line::from(Span::styled(
            format!("Creating VM {} ({})", vmid, name),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("{}...", stage.trim_end_matches("..."))),
    ];

    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), area);
}
