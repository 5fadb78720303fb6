use crate::ui::conversation::commands::{command_entries, parse_slash_command, CommandEntry, ParsedCommand};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};
use std::cell::{Cell, RefCell};

/// Result returned when the user interacts with the conversation composer
#[derive(Debug, PartialEq)]
pub enum ComposerResult {
    Submitted(String),
    Command(ParsedCommand),
    None,
}

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Byte offset, always on a char boundary
    pub cursor_position: usize,
}

/// Conversation composer for user input
#[derive(Clone)]
pub struct ConversationComposer {
    state: RefCell<TextAreaState>,
    placeholder: String,
    command_entries: Vec<CommandEntry>,
    filtered_commands: RefCell<Vec<CommandEntry>>,
    show_command_palette: Cell<bool>,
    selected_command: Cell<Option<usize>>,
}

impl ConversationComposer {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            state: RefCell::new(TextAreaState::default()),
            placeholder: placeholder.into(),
            command_entries: command_entries(),
            filtered_commands: RefCell::new(Vec::new()),
            show_command_palette: Cell::new(false),
            selected_command: Cell::new(None),
        }
    }

    /// Handle key input
    pub fn handle_key(&self, key: KeyEvent) -> ComposerResult {
        if key.kind != KeyEventKind::Press {
            return ComposerResult::None;
        }

        let mut state = self.state.borrow_mut();

        match key.code {
            KeyCode::Enter => {
                if key.modifiers.contains(KeyModifiers::SHIFT) {
                    self.insert_char(&mut state, '\n');
                } else if self.show_command_palette.get()
                    && !self.selection_matches(&state)
                    && self.apply_selected_command(&mut state)
                {
                    return ComposerResult::None;
                } else if !state.content.trim().is_empty() {
                    let content = std::mem::take(&mut state.content);
                    state.cursor_position = 0;
                    self.close_command_palette();
                    drop(state);
                    return match parse_slash_command(content.trim_start()) {
                        Some(command) => ComposerResult::Command(command),
                        None => ComposerResult::Submitted(content),
                    };
                }
            }
            KeyCode::Up if self.show_command_palette.get() => self.move_command_selection(-1),
            KeyCode::Down if self.show_command_palette.get() => self.move_command_selection(1),
            KeyCode::Esc if self.show_command_palette.get() => self.close_command_palette(),
            KeyCode::Tab if self.show_command_palette.get() => {
                self.apply_selected_command(&mut state);
            }
            KeyCode::Char(c) => {
                self.insert_char(&mut state, c);

                if state.content == "/" {
                    self.open_command_palette(&state);
                } else if self.show_command_palette.get() {
                    if state.content.starts_with('/') && !c.is_whitespace() {
                        self.refresh_command_palette(&state);
                    } else {
                        self.close_command_palette();
                    }
                }
            }
            KeyCode::Backspace => {
                if self.backspace(&mut state) {
                    self.sync_palette(&state);
                }
            }
            KeyCode::Delete => {
                if self.delete(&mut state) {
                    self.sync_palette(&state);
                }
            }
            KeyCode::Left => {
                if let Some((idx, _)) = state.content[..state.cursor_position].char_indices().next_back() {
                    state.cursor_position = idx;
                }
            }
            KeyCode::Right => {
                if let Some(c) = state.content[state.cursor_position..].chars().next() {
                    state.cursor_position += c.len_utf8();
                }
            }
            KeyCode::Home => {
                state.cursor_position = 0;
            }
            KeyCode::End => {
                state.cursor_position = state.content.len();
            }
            _ => {}
        }

        ComposerResult::None
    }

    /// Insert a character at the cursor position
    fn insert_char(&self, state: &mut TextAreaState, c: char) {
        state.content.insert(state.cursor_position, c);
        state.cursor_position += c.len_utf8();
    }

    /// Delete character before cursor
    fn backspace(&self, state: &mut TextAreaState) -> bool {
        match state.content[..state.cursor_position].char_indices().next_back() {
            Some((idx, _)) => {
                state.content.remove(idx);
                state.cursor_position = idx;
                true
            }
            None => false,
        }
    }

    /// Delete character at cursor
    fn delete(&self, state: &mut TextAreaState) -> bool {
        if state.cursor_position < state.content.len() {
            state.content.remove(state.cursor_position);
            true
        } else {
            false
        }
    }

    fn sync_palette(&self, state: &TextAreaState) {
        if !self.show_command_palette.get() {
            return;
        }
        if state.content.starts_with('/') {
            self.refresh_command_palette(state);
        } else {
            self.close_command_palette();
        }
    }

    fn open_command_palette(&self, state: &TextAreaState) {
        self.show_command_palette.set(true);
        self.refresh_command_palette(state);
        self.selected_command.set(Some(0));
    }

    fn close_command_palette(&self) {
        self.show_command_palette.set(false);
        self.filtered_commands.borrow_mut().clear();
        self.selected_command.set(None);
    }

    fn refresh_command_palette(&self, state: &TextAreaState) {
        let query = state.content.trim_start_matches('/').to_lowercase();
        let mut filtered = self.filtered_commands.borrow_mut();
        filtered.clear();

        for entry in &self.command_entries {
            if query.is_empty() || entry.keyword.starts_with(&query) {
                filtered.push(*entry);
            }
        }

        if filtered.is_empty() {
            self.selected_command.set(None);
        } else {
            let index = self.selected_command.get().unwrap_or(0);
            self.selected_command.set(Some(index.min(filtered.len() - 1)));
        }
    }

    fn move_command_selection(&self, delta: isize) {
        let filtered = self.filtered_commands.borrow();
        if filtered.is_empty() {
            self.selected_command.set(None);
            return;
        }

        let len = filtered.len() as isize;
        let current = self.selected_command.get().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len);
        self.selected_command.set(Some(next as usize));
    }

    /// The input already spells out the highlighted command
    fn selection_matches(&self, state: &TextAreaState) -> bool {
        let filtered = self.filtered_commands.borrow();
        self.selected_command
            .get()
            .and_then(|index| filtered.get(index))
            .is_some_and(|entry| state.content.trim().trim_start_matches('/') == entry.keyword)
    }

    fn apply_selected_command(&self, state: &mut TextAreaState) -> bool {
        let entry = {
            let filtered = self.filtered_commands.borrow();
            match self.selected_command.get().and_then(|index| filtered.get(index)) {
                Some(entry) => *entry,
                None => return false,
            }
        };

        state.content = format!("/{} ", entry.keyword);
        state.cursor_position = state.content.len();
        self.close_command_palette();
        true
    }

    /// Get current content
    pub fn get_content(&self) -> String {
        self.state.borrow().content.clone()
    }

    /// Replace the input, cursor at the end
    pub fn set_content(&self, content: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        state.content = content.into();
        state.cursor_position = state.content.len();
    }

    /// Clear content
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.content.clear();
        state.cursor_position = 0;
    }

    pub fn is_palette_open(&self) -> bool {
        self.show_command_palette.get()
    }
}

impl Widget for ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let state = self.state.borrow();

        let block = Block::default()
            .borders(Borders::ALL)
            .title("✏️  Message")
            .style(Style::default().fg(Color::Green));

        let inner_area = block.inner(area);
        block.render(area, buf);

        if state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                self.placeholder.as_str(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
        } else {
            let mut content = state.content.clone();
            content.insert(state.cursor_position.min(content.len()), '▌');

            // Keep the cursor line visible when the text outgrows the box.
            let lines: Vec<&str> = content.split('\n').collect();
            let skip = lines.len().saturating_sub(inner_area.height as usize);
            for (i, line_text) in lines.iter().skip(skip).enumerate() {
                let line = Line::from(vec![Span::raw(*line_text)]);
                buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
            }
        }

        if self.show_command_palette.get() {
            let filtered = self.filtered_commands.borrow();
            let palette_height = (filtered.len().min(8) + 2) as u16;
            let palette_area = Rect {
                x: area.x,
                y: area.y.saturating_sub(palette_height),
                width: area.width,
                height: palette_height.min(area.y),
            };
            if palette_area.height < 3 {
                return;
            }

            let block = Block::default()
                .borders(Borders::ALL)
                .title("Commands")
                .style(Style::default().fg(Color::Blue));
            let inner = block.inner(palette_area);
            ratatui::widgets::Clear.render(palette_area, buf);
            block.render(palette_area, buf);

            let selected = self.selected_command.get();
            for (index, entry) in filtered.iter().enumerate().take(inner.height as usize) {
                let style = if selected == Some(index) {
                    Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::White)
                };

                let line = Line::from(vec![
                    Span::styled(format!("/{}", entry.keyword), style),
                    Span::styled(" - ", Style::default().fg(Color::DarkGray)),
                    Span::styled(entry.description, Style::default().fg(Color::Gray)),
                ]);

                buf.set_line(inner.x, inner.y + index as u16, &line, inner.width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::commands::SlashCommand;

    fn press(composer: &ConversationComposer, code: KeyCode) -> ComposerResult {
        composer.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(composer: &ConversationComposer, text: &str) {
        for c in text.chars() {
            press(composer, KeyCode::Char(c));
        }
    }

    #[test]
    fn enter_submits_and_clears() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "hello");

        assert_eq!(press(&composer, KeyCode::Enter), ComposerResult::Submitted("hello".to_string()));
        assert_eq!(composer.get_content(), "");
    }

    #[test]
    fn blank_input_is_not_submitted() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "   ");
        assert_eq!(press(&composer, KeyCode::Enter), ComposerResult::None);
    }

    #[test]
    fn shift_enter_inserts_newline() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "a");
        composer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::SHIFT));
        type_text(&composer, "b");
        assert_eq!(composer.get_content(), "a\nb");
    }

    #[test]
    fn editing_respects_multibyte_characters() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "héé");
        press(&composer, KeyCode::Left);
        press(&composer, KeyCode::Backspace);
        assert_eq!(composer.get_content(), "hé");

        press(&composer, KeyCode::Home);
        press(&composer, KeyCode::Delete);
        assert_eq!(composer.get_content(), "é");
    }

    #[test]
    fn enter_runs_fully_typed_command_with_palette_open() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "/clear");
        assert!(composer.is_palette_open());

        match press(&composer, KeyCode::Enter) {
            ComposerResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::Clear),
            other => panic!("expected command, got {other:?}"),
        }
        assert_eq!(composer.get_content(), "");
    }

    #[test]
    fn enter_completes_partial_command() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "/he");

        assert_eq!(press(&composer, KeyCode::Enter), ComposerResult::None);
        assert_eq!(composer.get_content(), "/help ");
    }

    #[test]
    fn set_content_moves_cursor_to_end() {
        let composer = ConversationComposer::new("");
        composer.set_content("héllo");
        type_text(&composer, "!");
        assert_eq!(composer.get_content(), "héllo!");
    }

    #[test]
    fn slash_opens_palette_and_tab_completes() {
        let composer = ConversationComposer::new("");
        type_text(&composer, "/cl");
        assert!(composer.is_palette_open());

        press(&composer, KeyCode::Tab);
        assert_eq!(composer.get_content(), "/clear ");
        assert!(!composer.is_palette_open());

        match press(&composer, KeyCode::Enter) {
            ComposerResult::Command(parsed) => assert_eq!(parsed.command, SlashCommand::Clear),
            other => panic!("expected command, got {other:?}"),
        }
    }
}
