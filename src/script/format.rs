//! Script formatting utilities.
//!
//! Indentation management for rendered scripts.

/// Indentation style for rendered scripts.
#[derive(Debug, Clone)]
pub enum Indent {
    Tabs,
    Spaces(usize),
}

impl Default for Indent {
    fn default() -> Self {
        Indent::Spaces(2)
    }
}

impl Indent {
    #[must_use]
    pub fn to_string_owned(&self) -> String {
        match self {
            Indent::Tabs => "\t".to_string(),
            Indent::Spaces(n) => " ".repeat(*n),
        }
    }
}

/// A writer that manages indentation for script output.
pub struct IndentWriter {
    buffer: String,
    indent_str: String,
    current_indent: usize,
}

impl IndentWriter {
    #[must_use]
    pub fn new(indent: Indent) -> Self {
        Self {
            buffer: String::new(),
            indent_str: indent.to_string_owned(),
            current_indent: 0,
        }
    }

    pub fn indent(&mut self) {
        self.current_indent += 1;
    }

    pub fn dedent(&mut self) {
        self.current_indent = self.current_indent.saturating_sub(1);
    }

    /// Write a complete line at the current indentation.
    pub fn write_line(&mut self, s: &str) {
        for _ in 0..self.current_indent {
            self.buffer.push_str(&self.indent_str);
        }
        self.buffer.push_str(s);
        self.buffer.push('\n');
    }

    /// Write each line of a multi-line block at the current indentation.
    pub fn write_block(&mut self, block: &str) {
        for line in block.lines() {
            if line.is_empty() {
                self.blank_line();
            } else {
                self.write_line(line);
            }
        }
    }

    /// Write `open`, indent, run `body`, dedent, write `close`.
    pub fn scope(&mut self, open: &str, close: &str, body: impl FnOnce(&mut Self)) {
        self.write_line(open);
        self.indent();
        body(self);
        self.dedent();
        self.write_line(close);
    }

    pub fn blank_line(&mut self) {
        self.buffer.push('\n');
    }

    /// Write a single-line comment. Line breaks in the text become spaces.
    pub fn write_comment(&mut self, comment: &str) {
        let flat: String = comment
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        self.write_line(&format!("// {}", flat));
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.buffer
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

impl Default for IndentWriter {
    fn default() -> Self {
        Self::new(Indent::default())
    }
}
