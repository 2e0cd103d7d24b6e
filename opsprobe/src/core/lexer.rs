//! Quote-aware splitting of a command line into pipe stages and tokens.
//!
//! The scanner understands just enough shell syntax to find delimiters that
//! the shell would act on: single and double quotes (not nested across
//! types) and `\` escapes. It never unquotes anything; tokens keep their
//! quotes so the validator sees exactly what the shell will see.

/// Classification of a single character by [`QuoteScanner::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// Outside any quote and not escaped; the shell interprets it.
    Live,
    /// Inside `'...'`; always literal.
    SingleQuoted,
    /// Inside `"..."`; literal except for expansions.
    DoubleQuoted,
    /// A quote character that opened or closed a quoted span.
    QuoteMark,
    /// The `\` introducing an escape.
    EscapeMark,
    /// The character following a `\`.
    Escaped,
}

/// Tracks quote and escape state while walking a command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuoteScanner {
    single: bool,
    double: bool,
    escaped: bool,
}

impl QuoteScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance over `c` and classify it.
    pub fn feed(&mut self, c: char) -> CharClass {
        if self.escaped {
            self.escaped = false;
            return CharClass::Escaped;
        }
        match c {
            '\\' => {
                self.escaped = true;
                CharClass::EscapeMark
            }
            '\'' if !self.double => {
                self.single = !self.single;
                CharClass::QuoteMark
            }
            '"' if !self.single => {
                self.double = !self.double;
                CharClass::QuoteMark
            }
            _ if self.single => CharClass::SingleQuoted,
            _ if self.double => CharClass::DoubleQuoted,
            _ => CharClass::Live,
        }
    }

    /// True while a quote opened earlier has not been closed.
    pub fn in_quote(&self) -> bool {
        self.single || self.double
    }
}

/// One pipe-delimited segment of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Segment text with surrounding whitespace trimmed.
    pub raw: String,
    /// Whitespace-delimited words, quotes preserved.
    pub tokens: Vec<String>,
}

impl Stage {
    fn from_raw(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let tokens = split_tokens(&raw);
        Self { raw, tokens }
    }

    pub fn program(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }
}

/// Split `command` into stages on unquoted `|`.
///
/// Every `|` produces a boundary, so `a |` and `a || b` yield empty stages
/// for the validator to reject. An empty input yields no stages.
pub fn split_stages(command: &str) -> Vec<Stage> {
    if command.trim().is_empty() {
        return Vec::new();
    }

    let mut stages = Vec::new();
    let mut current = String::new();
    let mut scanner = QuoteScanner::new();

    for c in command.chars() {
        let class = scanner.feed(c);
        if c == '|' && class == CharClass::Live {
            stages.push(Stage::from_raw(&current));
            current.clear();
            continue;
        }
        current.push(c);
    }
    stages.push(Stage::from_raw(&current));

    stages
}

/// Split one stage into tokens on unquoted whitespace.
pub fn split_tokens(stage: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut scanner = QuoteScanner::new();

    for c in stage.chars() {
        let class = scanner.feed(c);
        if class == CharClass::Live && c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
