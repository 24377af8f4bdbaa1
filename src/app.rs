use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::animator::{PresenceAnimator, PresenceEvent, ToggleEffect};
use crate::chatlog::{ChatLog, LogEntry, Role};
use crate::config::Config;
use crate::dispatcher::{Reply, ResponseDispatcher};
use crate::knowledge::KnowledgeBase;
use crate::remote::FallbackClient;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub panel_open: bool,
    pub input_mode: InputMode,

    // Chat state
    pub input: String,
    pub cursor: usize,
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    pub animation_frame: u8,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub status: Option<String>,

    // Closed-toggle presence state
    pub toggle_effect: Option<ToggleEffect>,
    pub bubble: Option<&'static str>,

    // Collaborators
    pub animator: PresenceAnimator,
    pub dispatcher: Arc<ResponseDispatcher>,
    pub chat_log: ChatLog,

    tx: UnboundedSender<AppEvent>,
    reply_task: Option<JoinHandle<()>>,
}

impl App {
    /// Build the full component graph from config. The chat panel starts
    /// closed, so the presence loops are armed immediately.
    pub fn new(config: &Config, tx: UnboundedSender<AppEvent>) -> Result<Self> {
        let kb = match &config.knowledge_file {
            Some(path) => KnowledgeBase::load_from_file(path)?,
            None => KnowledgeBase::builtin()?,
        };

        let fallback = match (&config.fallback_url, config.fallback_enabled) {
            (Some(url), true) => Some(FallbackClient::new(url, config.fallback_timeout())?),
            _ => None,
        };

        let dispatcher = Arc::new(ResponseDispatcher::new(
            Arc::new(kb),
            fallback,
            config.reply_delay(),
        )?);

        let chat_log = match ChatLog::default_path() {
            Some(path) => ChatLog::open(path, config.log_cap),
            None => {
                tracing::debug!("no data directory, chat log held in memory only");
                ChatLog::in_memory(config.log_cap)
            }
        };

        // Presence events join the main event stream.
        let (presence_tx, mut presence_rx) = mpsc::unbounded_channel();
        let forward = tx.clone();
        tokio::spawn(async move {
            while let Some(event) = presence_rx.recv().await {
                if forward.send(AppEvent::Presence(event)).is_err() {
                    break;
                }
            }
        });

        let mut animator = PresenceAnimator::new(config.presence.timing(), presence_tx);
        animator.close();

        Ok(Self {
            should_quit: false,
            panel_open: false,
            input_mode: InputMode::Normal,

            input: String::new(),
            cursor: 0,
            messages: Vec::new(),
            loading: false,
            animation_frame: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            status: None,

            toggle_effect: None,
            bubble: None,

            animator,
            dispatcher,
            chat_log,

            tx,
            reply_task: None,
        })
    }

    /// Opening the panel suspends the presence loops before anything else
    /// so no effect or bubble can show while the chat is visible.
    pub fn open_panel(&mut self) {
        self.animator.open();
        self.panel_open = true;
        self.toggle_effect = None;
        self.bubble = None;
        self.input_mode = InputMode::Editing;
    }

    pub fn close_panel(&mut self) {
        self.panel_open = false;
        self.input_mode = InputMode::Normal;
        self.animator.close();
    }

    pub fn apply_presence(&mut self, event: PresenceEvent) {
        match event {
            // Clears always apply; displays only while the panel is
            // closed, which drops anything still queued from a timer
            // aborted mid-flight.
            PresenceEvent::EffectEnded => self.toggle_effect = None,
            PresenceEvent::BubbleHidden => self.bubble = None,
            PresenceEvent::EffectStarted(effect) if !self.panel_open => {
                self.toggle_effect = Some(effect);
            }
            PresenceEvent::BubbleShown(message) if !self.panel_open => {
                self.bubble = Some(message);
            }
            _ => {}
        }
    }

    pub fn reply_in_flight(&self) -> bool {
        self.reply_task.is_some()
    }

    /// Send the current input. One reply task at a time; a second Enter
    /// while one is outstanding is ignored.
    pub fn send_message(&mut self) {
        let message = self.input.trim().to_string();
        if message.is_empty() || self.reply_task.is_some() {
            return;
        }

        self.input.clear();
        self.cursor = 0;
        self.status = None;
        self.messages.push(ChatMessage {
            role: Role::User,
            content: message.clone(),
        });
        self.chat_log.record(LogEntry::user(&message));
        self.loading = true;
        self.scroll_to_bottom();

        let dispatcher = self.dispatcher.clone();
        let tx = self.tx.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let reply = dispatcher.respond(&message).await;
            let _ = tx.send(AppEvent::Reply {
                user_query: message,
                reply,
            });
        }));
    }

    pub fn on_reply(&mut self, user_query: &str, reply: Reply) {
        self.loading = false;
        self.reply_task = None;
        self.chat_log
            .record(LogEntry::assistant(&reply.text, user_query, reply.source));
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: reply.text,
        });
        self.scroll_to_bottom();
    }

    pub fn export_log(&mut self) {
        let dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
        self.status = match self.chat_log.export(&dir) {
            Ok(path) => Some(format!("Exported {} entries to {}", self.chat_log.count(), path.display())),
            Err(err) => {
                tracing::debug!(error = %err, "export failed");
                Some("Export failed".to_string())
            }
        };
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Pin the chat view to the newest message, accounting for wrapping.
    pub fn scroll_to_bottom(&mut self) {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in &self.messages {
            total_lines += 1; // Role line
            for line in msg.content.lines() {
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after message
        }
        if self.loading {
            total_lines += 2; // Role line + thinking dots
        }

        let visible = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_scroll = total_lines.saturating_sub(visible);
    }
}
