use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::animator::ToggleEffect;
use crate::app::{App, InputMode};
use crate::chatlog::Role;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    if app.panel_open {
        render_panel(app, frame, body_area);
    } else {
        render_closed(app, frame, body_area);
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let log_indicator = if app.chat_log.count() > 0 {
        format!(" [{} logged]", app.chat_log.count())
    } else {
        String::new()
    };

    let title = Line::from(vec![
        Span::styled(
            " ProTools ER1 Course Assistant ",
            Style::default().fg(Color::Cyan).bold(),
        ),
        Span::styled(log_indicator, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let hints = if !app.panel_open {
        " Enter open chat | e export log | q quit "
    } else {
        match app.input_mode {
            InputMode::Editing => " Enter send | Esc chat keys ",
            InputMode::Normal => " i type | j/k scroll | e export | Esc close | q quit ",
        }
    };

    let mut spans = vec![Span::styled(hints, Style::default().fg(Color::DarkGray))];
    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!(" {status} "),
            Style::default().fg(Color::Green),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Closed state: an idle screen with the chat toggle in the corner. The
/// presence loop animates the toggle and floats a speech bubble over it.
fn render_closed(app: &App, frame: &mut Frame, area: Rect) {
    // Area too small for the toggle - skip, never panic.
    if area.width < 30 || area.height < 6 {
        return;
    }

    let toggle_width = 28u16;
    let toggle_height = 3u16;

    // Bottom-right, nudged by the active effect.
    let (dx, dy) = match app.toggle_effect {
        Some(ToggleEffect::Bounce) => (0, 1),
        Some(ToggleEffect::Wiggle) => (1, 0),
        _ => (0, 0),
    };
    let toggle = Rect {
        x: area.x + (area.width - toggle_width).saturating_sub(2 + dx),
        y: area.y + (area.height - toggle_height).saturating_sub(1 + dy),
        width: toggle_width,
        height: toggle_height,
    };

    let border_color = match app.toggle_effect {
        Some(ToggleEffect::Glow) => Color::Yellow,
        Some(ToggleEffect::Pulse) => Color::Magenta,
        Some(_) => Color::Cyan,
        None => Color::DarkGray,
    };
    let label_style = match app.toggle_effect {
        Some(ToggleEffect::Pulse) => Style::default().fg(Color::Magenta).bold(),
        Some(_) => Style::default().fg(Color::Cyan).bold(),
        None => Style::default().fg(Color::Cyan),
    };

    let toggle_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));
    let toggle_label = Paragraph::new(Line::from(Span::styled(" Ask the assistant ", label_style)))
        .block(toggle_block)
        .centered();
    frame.render_widget(toggle_label, toggle);

    if let Some(bubble) = app.bubble {
        let bubble_width = (bubble.chars().count() as u16 + 4).min(area.width.saturating_sub(4));
        let bubble_area = Rect {
            x: (toggle.x + toggle.width).saturating_sub(bubble_width),
            y: toggle.y.saturating_sub(4).max(area.y),
            width: bubble_width,
            height: 3,
        };
        let bubble_widget = Paragraph::new(bubble)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .centered();
        frame.render_widget(bubble_widget, bubble_area);
    }
}

/// Open state: message history above, input box below.
fn render_panel(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(area);

    // Store chat dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Course chat ");

    let chat_text = if app.messages.is_empty() && !app.loading {
        Text::from(Span::styled(
            "Ask about Python, Stata, R, causal inference, Git...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in &app.messages {
            match msg.role {
                Role::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                }
                Role::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "Assistant:",
                        Style::default()
                            .fg(Color::Yellow)
                            .add_modifier(Modifier::BOLD),
                    )));
                }
            }
            for line in msg.content.lines() {
                lines.push(Line::from(line.to_string()));
            }
            lines.push(Line::default());
        }

        if app.loading {
            lines.push(Line::from(Span::styled(
                "Assistant:",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{dots}"),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    let input_border = if app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border))
        .title(" Your question ");

    // Horizontal scroll keeps the cursor visible in a long input.
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else if app.cursor >= inner_width {
        app.cursor - inner_width + 1
    } else {
        0
    };
    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, input_area);

    if app.input_mode == InputMode::Editing {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}
