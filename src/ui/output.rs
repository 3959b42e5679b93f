use crate::chat::ChatView;
use crate::models::{ConnectionState, Message, Role, ToolStatus};
use colored::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Write};

/// Turns successive [`ChatView`]s into append-only terminal output.
///
/// The view is re-sent whole after every change; the renderer remembers what it
/// already printed (by message id) and only writes the difference.
#[derive(Debug, Default)]
pub struct Renderer {
    verbose: bool,
    announced: HashSet<String>,
    tools: HashMap<String, ToolStatus>,
    /// Id and printed text of the assistant message currently streaming.
    streaming: Option<(String, String)>,
    line_open: bool,
    last_status: Option<String>,
    submitted: VecDeque<String>,
    connection: ConnectionState,
    using_fallback: bool,
}

impl Renderer {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    /// Remember text typed here so it is not echoed back.
    pub fn note_submitted(&mut self, text: &str) {
        self.submitted.push_back(text.trim().to_string());
    }

    pub fn render(&mut self, view: &ChatView) {
        self.render_transport(view);

        if let Some((id, _)) = &self.streaming {
            if !view.messages.iter().any(|m| &m.id == id) {
                self.break_stream_line();
                self.streaming = None;
            }
        }

        for message in &view.messages {
            if message.is_tool {
                self.render_tool(message);
            } else if message.is_partial {
                self.render_partial(message, view.is_loading);
            } else if !self.announced.contains(&message.id) {
                self.render_final(message);
                self.announced.insert(message.id.clone());
            }
        }
        let _ = io::stdout().flush();
    }

    fn render_transport(&mut self, view: &ChatView) {
        if view.connection_state != self.connection {
            self.connection = view.connection_state;
            if self.verbose {
                let label = match view.connection_state {
                    ConnectionState::Connected => "connected",
                    ConnectionState::Connecting => "connecting",
                    ConnectionState::Reconnecting => "reconnecting",
                    ConnectionState::Disconnected => "disconnected",
                };
                eprintln!("{}", format!("[chat] Channel {}", label).dimmed());
            }
        }
        if view.using_fallback != self.using_fallback {
            self.using_fallback = view.using_fallback;
            if self.verbose && view.using_fallback {
                eprintln!("{}", "[chat] Using HTTP fallback".dimmed());
            }
        }
    }

    fn render_tool(&mut self, message: &Message) {
        let status = message.tool_status.unwrap_or(ToolStatus::Starting);
        let name = message.tool_name.as_deref().unwrap_or("tool");
        if self.tools.get(&message.id) == Some(&status) {
            return;
        }
        self.break_stream_line();
        match status {
            ToolStatus::Starting => println!("{}", format!("  ⚙ {}...", name).cyan()),
            ToolStatus::Completed => println!("{}", format!("  ✓ {}", name).green()),
        }
        self.tools.insert(message.id.clone(), status);
    }

    fn render_partial(&mut self, message: &Message, is_loading: bool) {
        if is_loading {
            if self.last_status.as_deref() != Some(message.content.as_str()) {
                self.last_status = Some(message.content.clone());
                if self.verbose {
                    eprintln!("{}", format!("  {}", message.content).dimmed());
                }
            }
            return;
        }

        let printed = match &self.streaming {
            Some((id, printed)) if id == &message.id => Some(printed.clone()),
            _ => None,
        };
        let printed = match printed {
            Some(printed) => printed,
            None => {
                self.break_stream_line();
                String::new()
            }
        };
        if !self.line_open {
            print!("{} ", "assistant>".blue().bold());
            self.line_open = true;
        }
        match message.content.strip_prefix(printed.as_str()) {
            Some(suffix) => print!("{}", suffix),
            // Text was rewritten rather than extended
            None => print!("\n{}", message.content),
        }
        self.streaming = Some((message.id.clone(), message.content.clone()));
    }

    fn render_final(&mut self, message: &Message) {
        match message.role {
            Role::User => {
                if self.submitted.front().map(String::as_str) == Some(message.content.trim()) {
                    self.submitted.pop_front();
                } else {
                    self.break_stream_line();
                    println!("{} {}", "you>".bold(), message.content);
                }
            }
            Role::System => {
                self.break_stream_line();
                println!("{}", message.content.yellow());
            }
            Role::Assistant => match self.streaming.take() {
                Some((id, printed)) if id == message.id => {
                    if !self.line_open {
                        print!("{} ", "assistant>".blue().bold());
                    }
                    match message.content.strip_prefix(printed.as_str()) {
                        Some(suffix) => println!("{}", suffix),
                        None => println!("\n{}", message.content),
                    }
                    self.line_open = false;
                }
                _ => {
                    self.break_stream_line();
                    println!("{} {}", "assistant>".blue().bold(), message.content);
                }
            },
        }
        self.last_status = None;
    }

    fn break_stream_line(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }
}

/// Print an error the way the CLI reports failures.
pub fn display_error(context: &str, error: &dyn std::fmt::Display) {
    eprintln!("{} {}: {}", "Error:".red(), context, error);
}
