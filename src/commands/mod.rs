//! Slash commands. Plain text passes through to the model untouched; an
//! unknown `/word` is reported rather than sent, so a mistyped command never
//! leaks into the conversation.

use crate::core::app::App;
use crate::core::message::Message;
use crate::core::providers::resolve_session;

pub enum CommandResult {
    Continue,
    ProcessAsMessage(String),
    ReloadServers,
    ShowServers,
    ToggleServer(String),
    ListModels,
}

pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a str,
}

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    pub handler: fn(&mut App, CommandInvocation<'_>) -> CommandResult,
}

pub const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "/help",
        description: "Show available commands",
        handler: handle_help,
    },
    Command {
        name: "new",
        usage: "/new",
        description: "Start a new chat (clears the transcript)",
        handler: handle_new,
    },
    Command {
        name: "model",
        usage: "/model [provider:model]",
        description: "List available models, or switch to the given one",
        handler: handle_model,
    },
    Command {
        name: "system",
        usage: "/system [prompt]",
        description: "Show or replace the system prompt",
        handler: handle_system,
    },
    Command {
        name: "servers",
        usage: "/servers [name]",
        description: "List MCP servers, or toggle one on/off by name",
        handler: handle_servers,
    },
    Command {
        name: "reload",
        usage: "/reload",
        description: "Re-read the config file and relaunch MCP servers",
        handler: handle_reload,
    },
    Command {
        name: "log",
        usage: "/log [filename]",
        description: "Enable chat logging, or toggle it when already set",
        handler: handle_log,
    },
    Command {
        name: "quit",
        usage: "/quit",
        description: "Exit",
        handler: handle_quit,
    },
];

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

fn find_command(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn process_input(app: &mut App, input: &str) -> CommandResult {
    let trimmed = input.trim();

    if !trimmed.starts_with('/') {
        return CommandResult::ProcessAsMessage(input.to_string());
    }

    let mut parts = trimmed[1..].splitn(2, ' ');
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return CommandResult::ProcessAsMessage(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    if let Some(command) = find_command(command_name) {
        let invocation = CommandInvocation {
            input: trimmed,
            args,
        };
        (command.handler)(app, invocation)
    } else {
        app.set_status(format!(
            "Unknown command: /{command_name}. Type /help to list commands."
        ));
        CommandResult::Continue
    }
}

fn handle_help(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    let mut help = String::from("Commands:\n");
    for command in all_commands() {
        help.push_str(&format!(
            "  {:<24} {}\n",
            command.usage, command.description
        ));
    }
    help.push_str(
        "\nKeys:\n  \
         Enter sends, Alt+Enter inserts a newline\n  \
         Esc interrupts a streaming reply\n  \
         PageUp/PageDown and Ctrl+Up/Ctrl+Down scroll, Ctrl+Home/Ctrl+End jump\n  \
         Ctrl+N starts a new chat, Ctrl+C quits",
    );
    app.session.push_notice(Message::app_info(help));
    CommandResult::Continue
}

fn handle_new(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    app.new_chat();
    CommandResult::Continue
}

fn handle_model(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        return CommandResult::ListModels;
    }
    if app.session.is_streaming() {
        app.set_status("Cannot switch models while a reply is streaming.");
        return CommandResult::Continue;
    }
    match resolve_session(invocation.args) {
        Ok(session) => {
            app.provider = session;
            app.config.model_identifier = invocation.args.to_string();
            match app.config.save_to_path(&app.config_path) {
                Ok(()) => {
                    app.set_status(format!("Model set: {} (saved to config)", invocation.args));
                }
                Err(e) => {
                    app.set_status(format!(
                        "Model set: {} (config save failed: {e})",
                        invocation.args
                    ));
                }
            }
        }
        Err(e) => {
            app.set_status(format!("Model error: {e}"));
        }
    }
    CommandResult::Continue
}

fn handle_system(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        let prompt = app.session.system_prompt();
        let text = if prompt.is_empty() {
            "System prompt: (empty)".to_string()
        } else {
            format!("System prompt: {prompt}")
        };
        app.session.push_notice(Message::app_info(text));
        return CommandResult::Continue;
    }
    app.session.set_system_prompt(invocation.args);
    app.config.system_prompt = invocation.args.to_string();
    match app.config.save_to_path(&app.config_path) {
        Ok(()) => app.set_status("System prompt updated (saved to config)"),
        Err(e) => app.set_status(format!("System prompt updated (config save failed: {e})")),
    }
    CommandResult::Continue
}

fn handle_servers(_app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        CommandResult::ShowServers
    } else {
        CommandResult::ToggleServer(invocation.args.to_string())
    }
}

fn handle_reload(_app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::ReloadServers
}

fn handle_log(app: &mut App, invocation: CommandInvocation<'_>) -> CommandResult {
    let parts: Vec<&str> = invocation.input.split_whitespace().collect();

    match parts.len() {
        1 => match app.logging.toggle_logging("Logging paused") {
            Ok(message) => {
                app.set_status(message);
                CommandResult::Continue
            }
            Err(e) => {
                app.set_status(format!("Log error: {}", e));
                CommandResult::Continue
            }
        },
        2 => {
            let filename = parts[1];
            match app.logging.set_log_file(filename.to_string()) {
                Ok(message) => {
                    app.set_status(message);
                    CommandResult::Continue
                }
                Err(e) => {
                    app.set_status(format!("Logfile error: {}", e));
                    CommandResult::Continue
                }
            }
        }
        _ => {
            app.set_status("Usage: /log [filename]");
            CommandResult::Continue
        }
    }
}

fn handle_quit(app: &mut App, _invocation: CommandInvocation<'_>) -> CommandResult {
    app.exit_requested = true;
    CommandResult::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::TranscriptRole;
    use crate::utils::test_utils::TestEnvVarGuard;
    use tempfile::TempDir;

    #[test]
    fn plain_text_passes_through_untouched() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "hello world");
        assert!(matches!(result, CommandResult::ProcessAsMessage(text) if text == "hello world"));
    }

    #[test]
    fn unknown_commands_are_reported_not_sent() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/definitely-not-a-command");
        assert!(matches!(result, CommandResult::Continue));
        assert_eq!(
            app.status.as_deref(),
            Some("Unknown command: /definitely-not-a-command. Type /help to list commands.")
        );
    }

    #[test]
    fn a_lone_slash_passes_through() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/");
        assert!(matches!(result, CommandResult::ProcessAsMessage(_)));
    }

    #[test]
    fn commands_dispatch_case_insensitively() {
        let mut app = App::new_for_test();
        app.session.push_notice(Message::app_info("old"));
        let result = process_input(&mut app, "/NEW");
        assert!(matches!(result, CommandResult::Continue));
        // Fresh transcript contains only the new greeting
        assert_eq!(app.session.transcript().len(), 1);
        assert!(app.session.transcript()[0].content.starts_with("Good "));
    }

    #[test]
    fn help_lists_every_command() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/help");
        assert!(matches!(result, CommandResult::Continue));

        let notice = app.session.transcript().last().unwrap();
        assert_eq!(notice.role, TranscriptRole::AppInfo);
        for command in all_commands() {
            assert!(
                notice.content.contains(command.usage),
                "help should mention {}",
                command.usage
            );
        }
    }

    #[test]
    fn model_without_args_asks_for_the_listing() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/model");
        assert!(matches!(result, CommandResult::ListModels));
    }

    #[test]
    fn model_switch_updates_provider_and_config() {
        let mut env = TestEnvVarGuard::new();
        env.set_var("OPENAI_API_KEY", "sk-switch");
        env.remove_var("OPENAI_BASE_URL");

        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/model openai:gpt-4.1");
        assert!(matches!(result, CommandResult::Continue));
        assert_eq!(app.provider.model, "gpt-4.1");
        assert_eq!(app.provider.api_key, "sk-switch");
        assert_eq!(app.config.model_identifier, "openai:gpt-4.1");
        assert_eq!(
            app.status.as_deref(),
            Some("Model set: openai:gpt-4.1 (saved to config)")
        );
    }

    #[test]
    fn model_switch_reports_resolution_errors() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/model not-an-identifier");
        assert!(matches!(result, CommandResult::Continue));
        assert!(app
            .status
            .as_deref()
            .unwrap()
            .starts_with("Model error: Model identifier"));
    }

    #[test]
    fn model_switch_is_refused_while_streaming() {
        let mut app = App::new_for_test();
        app.input.insert_str("question");
        app.submit_input().unwrap();

        process_input(&mut app, "/model openai:gpt-4.1");
        assert_eq!(app.provider.model, "test-model");
        assert_eq!(
            app.status.as_deref(),
            Some("Cannot switch models while a reply is streaming.")
        );
    }

    #[test]
    fn system_prompt_updates_session_and_config() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/system Answer in one sentence.");
        assert!(matches!(result, CommandResult::Continue));
        assert_eq!(app.session.system_prompt(), "Answer in one sentence.");
        assert_eq!(app.config.system_prompt, "Answer in one sentence.");
        assert_eq!(
            app.status.as_deref(),
            Some("System prompt updated (saved to config)")
        );
    }

    #[test]
    fn system_without_args_shows_the_current_prompt() {
        let mut app = App::new_for_test();
        process_input(&mut app, "/system");
        let notice = app.session.transcript().last().unwrap();
        assert_eq!(
            notice.content,
            "System prompt: You are a helpful AI assistant."
        );
    }

    #[test]
    fn servers_and_reload_map_to_loop_commands() {
        let mut app = App::new_for_test();
        assert!(matches!(
            process_input(&mut app, "/servers"),
            CommandResult::ShowServers
        ));
        assert!(matches!(
            process_input(&mut app, "/reload"),
            CommandResult::ReloadServers
        ));
    }

    #[test]
    fn servers_with_a_name_toggles_that_server() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/servers run_python");
        assert!(matches!(
            result,
            CommandResult::ToggleServer(name) if name == "run_python"
        ));
    }

    #[test]
    fn log_command_sets_the_file_then_toggles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat.log").to_string_lossy().into_owned();
        let mut app = App::new_for_test();

        process_input(&mut app, &format!("/log {path}"));
        assert_eq!(
            app.status.as_deref(),
            Some(format!("Logging enabled to: {path}").as_str())
        );
        assert!(app.logging.is_active());

        process_input(&mut app, "/log");
        assert!(!app.logging.is_active());

        process_input(&mut app, "/log");
        assert!(app.logging.is_active());
    }

    #[test]
    fn log_toggle_without_a_file_reports_the_error() {
        let mut app = App::new_for_test();
        process_input(&mut app, "/log");
        assert!(app.status.as_deref().unwrap().starts_with("Log error:"));
    }

    #[test]
    fn quit_sets_the_exit_flag() {
        let mut app = App::new_for_test();
        let result = process_input(&mut app, "/quit");
        assert!(matches!(result, CommandResult::Continue));
        assert!(app.exit_requested);
    }
}
