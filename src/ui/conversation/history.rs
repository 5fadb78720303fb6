//! Conversation history display component

use crate::display::DisplayPair;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Conversation history display component
#[derive(Clone, Default)]
pub struct ConversationHistory {
    pairs: Vec<DisplayPair>,
    /// System notices shown below the exchanges (help output, settings changes)
    notices: Vec<String>,
    /// Lines scrolled up from the bottom
    scroll_offset: usize,
    streaming: bool,
    model: String,
}

impl ConversationHistory {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Replace the rendered exchanges with a fresh projection
    pub fn set_pairs(&mut self, pairs: Vec<DisplayPair>) {
        self.pairs = pairs;
        self.scroll_to_bottom();
    }

    pub fn pairs(&self) -> &[DisplayPair] {
        &self.pairs
    }

    pub fn add_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
        self.scroll_to_bottom();
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    /// Clear all exchanges and notices
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.notices.clear();
        self.scroll_offset = 0;
        self.streaming = false;
    }

    fn build_lines(&self, width: u16) -> Vec<Line<'static>> {
        let width = width.saturating_sub(2) as usize;
        let mut lines = Vec::new();
        let last = self.pairs.len().saturating_sub(1);

        for (i, pair) in self.pairs.iter().enumerate() {
            lines.push(Line::from(vec![Span::styled(
                "👤 You",
                Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            )]));
            for text in wrap_text(&pair.user, width) {
                lines.push(Line::from(vec![Span::raw("  "), Span::raw(text)]));
            }

            let in_progress = self.streaming && i == last;
            if pair.assistant.is_empty() && !in_progress {
                lines.push(Line::from(""));
                continue;
            }

            lines.push(Line::from(vec![Span::styled(
                format!("🤖 {}", self.model),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            )]));
            let content = wrap_text(&pair.assistant, width);
            let content_len = content.len();
            for (j, text) in content.into_iter().enumerate() {
                let mut spans = vec![
                    Span::raw("  "),
                    Span::styled(text, Style::default().fg(Color::Green)),
                ];
                if in_progress && j + 1 == content_len {
                    spans.push(Span::styled("▋", Style::default().fg(Color::Yellow)));
                }
                lines.push(Line::from(spans));
            }
            lines.push(Line::from(""));
        }

        for notice in &self.notices {
            for text in notice.lines() {
                lines.push(Line::from(vec![Span::styled(
                    format!("⚙️  {text}"),
                    Style::default().fg(Color::Yellow),
                )]));
            }
        }

        lines
    }
}

impl Widget for ConversationHistory {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("💬 Conversation");

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.pairs.is_empty() && self.notices.is_empty() {
            let welcome_lines = [
                Line::from(vec![Span::styled("Welcome to hfchat!", Style::default().fg(Color::Green))]),
                Line::from(""),
                Line::from(vec![Span::styled(
                    format!("Chatting with {}.", self.model),
                    Style::default().fg(Color::Gray),
                )]),
                Line::from(""),
                Line::from(vec![Span::styled(
                    "Press Enter to send, Shift+Enter for new line, / for commands.",
                    Style::default().fg(Color::DarkGray),
                )]),
            ];

            for (i, line) in welcome_lines.iter().enumerate().take(inner_area.height as usize) {
                buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
            }
            return;
        }

        let all_lines = self.build_lines(inner_area.width);

        // Show the tail, shifted up by the scroll offset.
        let height = inner_area.height as usize;
        let total = all_lines.len();
        let max_offset = total.saturating_sub(height);
        let end = total - self.scroll_offset.min(max_offset);
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

/// Wrap text to fit within the given width, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        let mut current_width = 0;

        for word in paragraph.split_whitespace() {
            let word_width = word.chars().count();
            if current_width > 0 && current_width + word_width + 1 > width {
                lines.push(std::mem::take(&mut current_line));
                current_width = 0;
            }
            if current_width > 0 {
                current_line.push(' ');
                current_width += 1;
            }
            current_line.push_str(word);
            current_width += word_width;
        }

        lines.push(current_line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_breaks_on_word_boundaries() {
        assert_eq!(wrap_text("one two three", 7), vec!["one two", "three"]);
    }

    #[test]
    fn wrap_keeps_paragraphs() {
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn long_word_gets_its_own_line() {
        assert_eq!(wrap_text("hi incomprehensibilities", 5), vec!["hi", "incomprehensibilities"]);
    }

    #[test]
    fn renders_pairs_into_buffer() {
        let mut history = ConversationHistory::new("test-model");
        history.set_pairs(vec![DisplayPair::new("hi", "hello there")]);

        let area = Rect::new(0, 0, 40, 10);
        let mut buf = Buffer::empty(area);
        history.render(area, &mut buf);

        let rendered: String = (0..area.height)
            .map(|y| (0..area.width).map(|x| buf.get(x, y).symbol().to_string()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(rendered.contains("hello there"));
        assert!(rendered.contains("test-model"));
    }
}
