//! Main chat event loop.
//!
//! One task owns the terminal: it draws, handles key events, and drains
//! streaming updates. Every update carries the stream id it belongs to and
//! the session discards ids it no longer recognizes, so interrupting a reply
//! never lets a stale chunk land in the transcript.

use crate::api::models::fetch_models;
use crate::commands::{process_input, CommandResult};
use crate::core::app::{App, AppCommand};
use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::config::Config;
use crate::core::message::Message;
use crate::core::session::{SessionReaction, StreamRequest, ToolOutcome};
use crate::mcp::ServerStatus;
use crate::ui::renderer::{input_area_height, transcript_lines, ui};
use crate::utils::wrap::wrap_styled_lines;
use ratatui::crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Size, Terminal};
use std::{error::Error, io, sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};

pub async fn run_chat(app: App) -> Result<(), Box<dyn Error>> {
    let (stream_service, mut rx) = ChatStreamService::new();
    let app = Arc::new(Mutex::new(app));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, &app, &stream_service, &mut rx).await;

    // Restore the terminal even when the loop errored out
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &Arc<Mutex<App>>,
    stream_service: &ChatStreamService,
    rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
) -> Result<(), Box<dyn Error>> {
    'main_loop: loop {
        {
            let mut app_guard = app.lock().await;
            if app_guard.exit_requested {
                break 'main_loop Ok(());
            }
            terminal.draw(|f| ui(f, &mut app_guard))?;
        }
        let term_size = terminal.size().unwrap_or_default();
        let mut pending: Vec<AppCommand> = Vec::new();

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    // Ctrl+C always quits, even mid-stream
                    if matches!(key.code, KeyCode::Char('c'))
                        && key.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        break 'main_loop Ok(());
                    }
                    let mut app_guard = app.lock().await;
                    match key.code {
                        KeyCode::Enter
                            if key.modifiers.contains(KeyModifiers::ALT)
                                || key.modifiers.contains(KeyModifiers::SHIFT) =>
                        {
                            app_guard.input.insert_newline();
                        }
                        KeyCode::Enter => {
                            handle_submit(&mut app_guard, &mut pending);
                        }
                        KeyCode::Esc => {
                            app_guard.cancel_streaming();
                        }
                        KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app_guard.new_chat();
                        }
                        KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app_guard.clear_status();
                        }
                        KeyCode::PageUp => {
                            let (_, viewport) = transcript_metrics(&app_guard, term_size);
                            app_guard.scroll.page_up(viewport);
                        }
                        KeyCode::PageDown => {
                            let (total, viewport) = transcript_metrics(&app_guard, term_size);
                            app_guard.scroll.page_down(total, viewport);
                        }
                        KeyCode::Up if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app_guard.scroll.line_up();
                        }
                        KeyCode::Down if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            let (total, viewport) = transcript_metrics(&app_guard, term_size);
                            app_guard.scroll.line_down(total, viewport);
                        }
                        KeyCode::Home if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app_guard.scroll.scroll_to_top();
                        }
                        KeyCode::End if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            app_guard.scroll.scroll_to_bottom();
                        }
                        _ => {
                            app_guard.input.input(key);
                        }
                    }
                }
                Event::Paste(text) => {
                    let mut app_guard = app.lock().await;
                    app_guard.input.insert_str(&text);
                }
                _ => {}
            }
        }

        // Drain streaming updates before the next draw
        let mut received_any = false;
        while let Ok((message, stream_id)) = rx.try_recv() {
            let mut app_guard = app.lock().await;
            match app_guard.session.handle_stream_event(message, stream_id) {
                SessionReaction::DispatchTools { stream_id, calls } => {
                    pending.push(AppCommand::DispatchTools { stream_id, calls });
                }
                SessionReaction::TurnFinished => {
                    app_guard.flush_log();
                }
                SessionReaction::None | SessionReaction::Redraw => {}
            }
            received_any = true;
        }

        for command in pending {
            execute_command(app, stream_service, command).await;
        }
        if received_any {
            continue 'main_loop;
        }
    }
}

/// Route Enter through the command layer. Slash commands run in place;
/// everything else goes to the session as a user message.
fn handle_submit(app: &mut App, pending: &mut Vec<AppCommand>) {
    let input_text = app.input_text();
    match process_input(app, &input_text) {
        CommandResult::Continue => {
            app.clear_input();
        }
        CommandResult::ProcessAsMessage(_) => {
            if let Some(command) = app.submit_input() {
                pending.push(command);
            }
        }
        CommandResult::ReloadServers => {
            app.clear_input();
            pending.push(AppCommand::ReloadServers);
        }
        CommandResult::ShowServers => {
            app.clear_input();
            pending.push(AppCommand::ShowServers);
        }
        CommandResult::ToggleServer(name) => {
            app.clear_input();
            pending.push(AppCommand::ToggleServer(name));
        }
        CommandResult::ListModels => {
            app.clear_input();
            pending.push(AppCommand::ListModels);
        }
    }
}

/// Wrapped-line total and viewport height for the transcript area, mirroring
/// the renderer's layout so scroll keys and drawing agree on the geometry.
fn transcript_metrics(app: &App, term_size: Size) -> (usize, usize) {
    let input_height = input_area_height(&app.input) + 2;
    let transcript_height = term_size
        .height
        .saturating_sub(input_height)
        .saturating_sub(1);
    let viewport = (transcript_height.saturating_sub(1) as usize).max(1);
    let lines = transcript_lines(app.session.transcript());
    let wrapped = wrap_styled_lines(&lines, term_size.width);
    (wrapped.len(), viewport)
}

async fn execute_command(
    app: &Arc<Mutex<App>>,
    stream_service: &ChatStreamService,
    command: AppCommand,
) {
    match command {
        AppCommand::SpawnStream(request) => {
            let params = build_stream_params(app, request).await;
            stream_service.spawn_stream(params);
        }
        AppCommand::DispatchTools { stream_id, calls } => {
            spawn_tool_dispatch(app.clone(), stream_service.clone(), stream_id, calls);
        }
        AppCommand::ReloadServers => reload_servers(app).await,
        AppCommand::ShowServers => show_servers(app).await,
        AppCommand::ToggleServer(name) => toggle_server(app, &name).await,
        AppCommand::ListModels => list_models(app).await,
    }
}

async fn build_stream_params(app: &Arc<Mutex<App>>, request: StreamRequest) -> StreamParams {
    let (client, base_url, api_key, provider_id, model, registry) = {
        let app_guard = app.lock().await;
        (
            app_guard.client.clone(),
            app_guard.provider.base_url.clone(),
            app_guard.provider.api_key.clone(),
            app_guard.provider.provider_id.clone(),
            app_guard.provider.model.clone(),
            app_guard.registry.clone(),
        )
    };
    // Listing tools talks to the servers, so it runs without the app lock
    let tools = registry.tool_definitions().await;
    StreamParams {
        client,
        base_url,
        api_key,
        provider_id,
        model,
        api_messages: request.api_messages,
        tools,
        cancel_token: request.cancel_token,
        stream_id: request.stream_id,
    }
}

/// Run the requested tool calls in order, then hand the results back to the
/// session. When the turn is still live the session answers with a follow-up
/// request carrying a fresh stream id.
fn spawn_tool_dispatch(
    app: Arc<Mutex<App>>,
    stream_service: ChatStreamService,
    stream_id: u64,
    calls: Vec<crate::api::ChatToolCall>,
) {
    tokio::spawn(async move {
        let registry = app.lock().await.registry.clone();
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let result = registry.invoke(&call).await;
            outcomes.push(ToolOutcome { call, result });
        }
        let follow_up = app
            .lock()
            .await
            .session
            .handle_tool_results(stream_id, outcomes);
        if let Some(request) = follow_up {
            let params = build_stream_params(&app, request).await;
            stream_service.spawn_stream(params);
        }
    });
}

async fn reload_servers(app: &Arc<Mutex<App>>) {
    let (config_path, registry) = {
        let app_guard = app.lock().await;
        (app_guard.config_path.clone(), app_guard.registry.clone())
    };
    let config = match Config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(e) => {
            // Keep the previous config when the file no longer parses
            let mut app_guard = app.lock().await;
            app_guard.set_status(format!("Reload error: {e}"));
            return;
        }
    };
    registry.apply(&config.mcp_servers).await;
    let statuses = registry.server_statuses().await;
    let connected = statuses.iter().filter(|s| s.connected).count();

    let mut app_guard = app.lock().await;
    app_guard.config = config;
    app_guard.mcp_health = Some((connected, statuses.len()));
    app_guard
        .session
        .push_notice(Message::app_info(server_report(&statuses)));
    app_guard.set_status(format!(
        "Config reloaded ({connected}/{} servers connected)",
        statuses.len()
    ));
}

/// Flip one server's enabled flag, persist it, and relaunch the registry so
/// the running set matches the config again.
async fn toggle_server(app: &Arc<Mutex<App>>, name: &str) {
    let (servers, registry) = {
        let mut app_guard = app.lock().await;
        let Some(server) = app_guard.config.server_mut(name) else {
            app_guard.set_status(format!("No MCP server named '{name}' in the config."));
            return;
        };
        server.enabled = !server.enabled;
        let enabled = server.enabled;

        let verb = if enabled { "enabled" } else { "disabled" };
        let path = app_guard.config_path.clone();
        match app_guard.config.save_to_path(&path) {
            Ok(()) => {
                app_guard.set_status(format!("Server '{name}' {verb} (saved to config)"));
            }
            Err(e) => {
                app_guard.set_status(format!("Server '{name}' {verb} (config save failed: {e})"));
            }
        }
        (
            app_guard.config.mcp_servers.clone(),
            app_guard.registry.clone(),
        )
    };

    registry.apply(&servers).await;
    let statuses = registry.server_statuses().await;
    let connected = statuses.iter().filter(|s| s.connected).count();
    let mut app_guard = app.lock().await;
    app_guard.mcp_health = Some((connected, statuses.len()));
}

async fn list_models(app: &Arc<Mutex<App>>) {
    let (client, base_url, api_key, provider_id, display_name) = {
        let app_guard = app.lock().await;
        (
            app_guard.client.clone(),
            app_guard.provider.base_url.clone(),
            app_guard.provider.api_key.clone(),
            app_guard.provider.provider_id.clone(),
            app_guard.provider.provider_display_name.clone(),
        )
    };
    let result = fetch_models(&client, &base_url, &api_key, &provider_id).await;

    let mut app_guard = app.lock().await;
    match result {
        Ok(models) => {
            let mut listing = format!("Models on {display_name}:\n");
            for model in &models {
                listing.push_str(&format!("  {}:{}\n", provider_id, model.id));
            }
            listing.push_str("\nSwitch with /model <provider:model>.");
            app_guard.session.push_notice(Message::app_info(listing));
        }
        Err(e) => {
            app_guard.set_status(e);
        }
    }
}

async fn show_servers(app: &Arc<Mutex<App>>) {
    let registry = app.lock().await.registry.clone();
    let statuses = registry.server_statuses().await;
    let mut app_guard = app.lock().await;
    app_guard
        .session
        .push_notice(Message::app_info(server_report(&statuses)));
}

fn server_report(statuses: &[ServerStatus]) -> String {
    if statuses.is_empty() {
        return "No MCP servers are configured. Add one under [[mcp_servers]] in the config file."
            .to_string();
    }
    let mut report = String::from("MCP servers:\n");
    for status in statuses {
        if status.connected {
            let tools = if status.tools.is_empty() {
                "no tools".to_string()
            } else {
                status.tools.join(", ")
            };
            report.push_str(&format!("  {} - connected ({})\n", status.name, tools));
        } else {
            let reason = status.error.as_deref().unwrap_or("not connected");
            report.push_str(&format!("  {} - unavailable: {}\n", status.name, reason));
        }
    }
    report.trim_end().to_string()
}
