//! Dialog widgets for the TUI

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

/// Closing message shown once the wizard has finished
pub struct MessageDialog<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub color: Color,
    pub footer: &'a str,
}

impl<'a> MessageDialog<'a> {
    pub fn new(title: &'a str, message: &'a str, color: Color) -> Self {
        Self {
            title,
            message,
            color,
            footer: "Press any key to exit",
        }
    }

    pub fn render(self, area: Rect, buf: &mut Buffer) {
        Clear.render(area, buf);

        let block = Block::default()
            .title(format!(" {} ", self.title))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.color))
            .style(Style::default().bg(Color::Black));

        let inner = block.inner(area);
        block.render(area, buf);

        // Split into message and footer
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([Constraint::Min(2), Constraint::Length(1)])
            .split(inner);

        let message = Paragraph::new(self.message)
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: false });
        message.render(chunks[0], buf);

        let footer = Paragraph::new(self.footer)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center);
        footer.render(chunks[1], buf);
    }
}
