use crate::domain::command::Command;
use tracing::debug;

/// Receives commands on the display side. The implementor owns the cursor.
pub trait ScriptCollaborator: Send {
    /// Returns the section index after applying the command.
    fn apply_command(&mut self, command: &Command) -> usize;
}

/// Scroll position within an ordered list of script sections.
///
/// Clamps at both ends; never wraps.
#[derive(Debug, Clone)]
pub struct SectionCursor {
    sections: Vec<String>,
    index: usize,
}

impl SectionCursor {
    pub fn new(sections: Vec<String>) -> Self {
        Self { sections, index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn current(&self) -> Option<&str> {
        self.sections.get(self.index).map(String::as_str)
    }

    pub fn next(&mut self) {
        if self.index + 1 < self.sections.len() {
            self.index += 1;
        }
    }

    pub fn previous(&mut self) {
        self.index = self.index.saturating_sub(1);
    }
}

impl ScriptCollaborator for SectionCursor {
    fn apply_command(&mut self, command: &Command) -> usize {
        match command {
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::Extension(verb) => debug!("Cursor ignores extension verb {}", verb),
        }
        self.index
    }
}
