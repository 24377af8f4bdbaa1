use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Presence(presence) => app.apply_presence(presence),
        AppEvent::Reply { user_query, reply } => app.on_reply(&user_query, reply),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global quit
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    if app.panel_open {
        handle_panel_key(app, key);
    } else {
        handle_toggle_key(app, key);
    }
}

/// Keys while the chat panel is closed: the screen only shows the toggle.
fn handle_toggle_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Enter | KeyCode::Char('o') | KeyCode::Char(' ') => app.open_panel(),
        KeyCode::Char('e') => app.export_log(),
        _ => {}
    }
}

fn handle_panel_key(app: &mut App, key: KeyEvent) {
    match app.input_mode {
        InputMode::Editing => handle_editing_key(app, key),
        InputMode::Normal => match key.code {
            KeyCode::Esc => app.close_panel(),
            KeyCode::Char('q') => app.should_quit = true,
            KeyCode::Char('i') | KeyCode::Char('/') => {
                app.input_mode = InputMode::Editing;
            }
            KeyCode::Char('e') => app.export_log(),
            KeyCode::Char('j') | KeyCode::Down => {
                app.chat_scroll = app.chat_scroll.saturating_add(1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                app.chat_scroll = app.chat_scroll.saturating_sub(1);
            }
            KeyCode::Char('g') => app.chat_scroll = 0,
            KeyCode::Char('G') => app.scroll_to_bottom(),
            _ => {}
        },
    }
}

fn handle_editing_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            // First Esc leaves editing, second closes the panel.
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => app.send_message(),
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}
