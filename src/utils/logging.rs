use crate::core::message::{Message, TranscriptRole};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct LoggingState {
    file_path: Option<String>,
    is_active: bool,
}

impl Default for LoggingState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingState {
    pub fn new() -> Self {
        LoggingState {
            file_path: None,
            is_active: false,
        }
    }

    pub fn set_log_file(&mut self, path: String) -> Result<String, Box<dyn std::error::Error>> {
        // Test if we can create/write to the file
        self.test_file_access(&path)?;

        self.file_path = Some(path.clone());
        self.is_active = true;

        Ok(format!("Logging enabled to: {path}"))
    }

    pub fn toggle_logging(
        &mut self,
        pause_message: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        match &self.file_path {
            Some(path) => {
                if self.is_active {
                    // Write pause message to log BEFORE pausing
                    self.log_message(&format!("## {}", pause_message))?;
                    self.is_active = false;
                    Ok(format!("Logging paused (file: {path})"))
                } else {
                    self.is_active = true;
                    Ok(format!("Logging resumed to: {path}"))
                }
            }
            None => {
                Err("No log file specified. Use /log <filename> to enable logging first.".into())
            }
        }
    }

    /// Append one transcript entry to the log, formatted the way it reads on
    /// screen. App notices are skipped.
    pub fn record(&self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let formatted = match message.role {
            TranscriptRole::User => format!("You: {}", message.content),
            TranscriptRole::Assistant => {
                if message.content.is_empty() {
                    return Ok(());
                }
                if message.interrupted {
                    format!("{}\n## (response interrupted)", message.content)
                } else {
                    message.content.clone()
                }
            }
            TranscriptRole::ToolCall => format!("## Tool call: {}", message.content),
            TranscriptRole::ToolResult => format!("## Tool result: {}", message.content),
            TranscriptRole::AppInfo | TranscriptRole::AppWarning | TranscriptRole::AppError => {
                return Ok(());
            }
        };

        self.log_message(&formatted)
    }

    pub fn log_message(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        if !self.is_active || self.file_path.is_none() {
            return Ok(());
        }

        self.write_to_log(content)
    }

    fn write_to_log(&self, content: &str) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };

        // Open file in append mode
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        // Use BufWriter with 64KB buffer for better I/O performance
        // This reduces syscalls and handles partial writes more efficiently
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        // Write each line of content, preserving the exact formatting
        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }

        // Add an empty line after each message for spacing (matching screen display)
        writeln!(writer)?;

        // Ensure all buffered data is written to disk
        writer.flush()?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn get_status_string(&self) -> String {
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!(
                "active ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
            (Some(path), false) => format!(
                "paused ({})",
                Path::new(path)
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
            ),
        }
    }

    fn test_file_access(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        // Try to create/open the file to ensure we have write permissions
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        // Test write access
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_path(dir: &TempDir) -> String {
        dir.path().join("chat.log").to_string_lossy().into_owned()
    }

    #[test]
    fn new_state_is_disabled() {
        let logging = LoggingState::new();
        assert!(!logging.is_active());
        assert_eq!(logging.get_status_string(), "disabled");
    }

    #[test]
    fn set_log_file_activates_and_reports_the_path() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let mut logging = LoggingState::new();

        let status = logging.set_log_file(path.clone()).unwrap();
        assert_eq!(status, format!("Logging enabled to: {path}"));
        assert!(logging.is_active());
        assert_eq!(logging.get_status_string(), "active (chat.log)");
    }

    #[test]
    fn set_log_file_rejects_unwritable_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir
            .path()
            .join("missing")
            .join("chat.log")
            .to_string_lossy()
            .into_owned();
        let mut logging = LoggingState::new();

        assert!(logging.set_log_file(path).is_err());
        assert!(!logging.is_active());
    }

    #[test]
    fn toggle_pauses_and_resumes_with_a_marker() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let mut logging = LoggingState::new();
        logging.set_log_file(path.clone()).unwrap();

        let paused = logging.toggle_logging("Logging paused").unwrap();
        assert_eq!(paused, format!("Logging paused (file: {path})"));
        assert!(!logging.is_active());
        assert_eq!(logging.get_status_string(), "paused (chat.log)");

        let resumed = logging.toggle_logging("Logging paused").unwrap();
        assert_eq!(resumed, format!("Logging resumed to: {path}"));
        assert!(logging.is_active());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("## Logging paused"));
    }

    #[test]
    fn toggle_without_a_file_is_an_error() {
        let mut logging = LoggingState::new();
        let err = logging.toggle_logging("Logging paused").unwrap_err();
        assert_eq!(
            err.to_string(),
            "No log file specified. Use /log <filename> to enable logging first."
        );
    }

    #[test]
    fn record_formats_entries_by_role() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let mut logging = LoggingState::new();
        logging.set_log_file(path.clone()).unwrap();

        logging.record(&Message::user("hello there")).unwrap();
        logging.record(&Message::assistant("Hi! How can I help?")).unwrap();
        logging
            .record(&Message::tool_call("run_python({\"code\":\"1+1\"})"))
            .unwrap();
        logging.record(&Message::tool_result("2")).unwrap();
        logging.record(&Message::app_error("network down")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("You: hello there"));
        assert!(contents.contains("Hi! How can I help?"));
        assert!(contents.contains("## Tool call: run_python"));
        assert!(contents.contains("## Tool result: 2"));
        assert!(!contents.contains("network down"));
    }

    #[test]
    fn record_marks_interrupted_replies() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let mut logging = LoggingState::new();
        logging.set_log_file(path.clone()).unwrap();

        let mut partial = Message::assistant("The answer begins");
        partial.interrupted = true;
        logging.record(&partial).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("The answer begins"));
        assert!(contents.contains("## (response interrupted)"));
    }

    #[test]
    fn inactive_logging_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let mut logging = LoggingState::new();
        logging.set_log_file(path.clone()).unwrap();
        logging.toggle_logging("Logging paused").unwrap();

        logging.record(&Message::user("unlogged")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("unlogged"));
    }
}
