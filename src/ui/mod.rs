//! Terminal user interface built on ratatui

pub mod conversation;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tracing::info;

use conversation::{ConversationAction, ConversationManager};

const TICK: Duration = Duration::from_millis(40);

/// What the event loop should do after a terminal event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Redraw,
    Idle,
    Exit,
}

/// Initialize terminal
pub fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore terminal
pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the chat until the user quits. The terminal is restored even when
/// the loop fails.
pub async fn run(mut manager: ConversationManager) -> Result<()> {
    let mut terminal = init_terminal()?;
    let result = event_loop(&mut terminal, &mut manager).await;
    restore_terminal(terminal)?;
    result
}

fn handle_event(manager: &mut ConversationManager, event: Event) -> LoopControl {
    match event {
        Event::Key(key) => match manager.handle_key(key) {
            ConversationAction::Exit => LoopControl::Exit,
            ConversationAction::None => LoopControl::Redraw,
        },
        Event::Resize(_, _) => LoopControl::Redraw,
        _ => LoopControl::Idle,
    }
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    manager: &mut ConversationManager,
) -> Result<()> {
    info!(model = manager.model(), "chat session started");
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);
    let mut dirty = true;

    loop {
        if manager.process_stream_events() {
            dirty = true;
        }

        if dirty {
            terminal.draw(|frame| {
                let area = frame.size();
                manager.render_conversation_ui(area, frame.buffer_mut());
            })?;
            dirty = false;
        }

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => match handle_event(manager, event) {
                    LoopControl::Exit => break,
                    LoopControl::Redraw => dirty = true,
                    LoopControl::Idle => {}
                },
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            _ = tick.tick() => {
                // Keep the streaming cursor and status fresh.
                if manager.state().is_in_flight() {
                    dirty = true;
                }
            }
        }
    }

    info!("chat session ended");
    Ok(())
}
