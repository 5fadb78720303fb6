use crate::config::GenerationConfig;
use crate::streaming::ResponseState;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};

/// Side panel showing the generation parameters used for the next request
pub struct SettingsPanel<'a> {
    pub settings: &'a GenerationConfig,
    pub model: &'a str,
    pub state: ResponseState,
}

fn status_label(state: ResponseState) -> (&'static str, Color) {
    match state {
        ResponseState::Idle => ("ready", Color::Gray),
        ResponseState::AwaitingFirstToken => ("waiting for model…", Color::Yellow),
        ResponseState::Streaming => ("streaming", Color::Green),
        ResponseState::Completed => ("done", Color::Gray),
        ResponseState::Failed => ("failed", Color::Red),
    }
}

fn field(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<12}"), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

impl Widget for SettingsPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (status, status_color) = status_label(self.state);

        let mut lines = vec![
            Line::from(vec![Span::styled(
                status,
                Style::default().fg(status_color).add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            field("model", self.model.to_string()),
            field("temperature", format!("{:.2}", self.settings.temperature)),
            field("top-p", format!("{:.2}", self.settings.top_p)),
            field("max tokens", self.settings.max_new_tokens.to_string()),
            field("rep. penalty", format!("{:.2}", self.settings.repetition_penalty)),
            Line::from(""),
            Line::from(vec![Span::styled("system prompt", Style::default().fg(Color::DarkGray))]),
        ];
        lines.extend(
            self.settings
                .system_prompt
                .lines()
                .map(|l| Line::from(vec![Span::styled(l.to_string(), Style::default().fg(Color::Cyan))])),
        );

        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("⚙️  Settings"))
            .render(area, buf);
    }
}
