//! Script tokens - the atomic units of rendered expressions.

/// Script token.
///
/// Adding a new variant here will cause compile errors everywhere
/// it needs to be handled (exhaustive matching).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Punctuation ===
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // === Operators ===
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    And,
    Or,
    Not,
    Arrow,

    // === Whitespace ===
    Space,

    // === Dynamic Content ===
    /// Identifier, emitted as-is.
    Ident(String),
    /// Number literal
    Number(f64),
    /// String literal, double-quoted and escaped.
    Str(String),

    // === Escape Hatch ===
    /// Script text passed through verbatim.
    ///
    /// Only for trusted fragments such as user-authored value expressions
    /// that are meant to be evaluated as written.
    Raw(String),
}

impl Token {
    pub fn serialize(&self) -> String {
        match self {
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),

            Token::StrictEq => "===".into(),
            Token::StrictNe => "!==".into(),
            Token::LooseEq => "==".into(),
            Token::LooseNe => "!=".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Not => "!".into(),
            Token::Arrow => "=>".into(),

            Token::Space => " ".into(),

            Token::Ident(name) => name.clone(),
            Token::Number(n) => format_number(*n),
            Token::Str(s) => quote_string(s),
            Token::Raw(s) => s.clone(),
        }
    }
}

/// Format a number the way the engine prints it: integral values without a
/// fractional part, non-finite values as their global names.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Escape a string for a double-quoted literal (JSON-compatible).
#[must_use]
pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' => result.push_str("\\u2028"),
            '\u{2029}' => result.push_str("\\u2029"),
            c if (c as u32) < 0x20 => result.push_str(&format!("\\u{:04x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

/// Quote a string literal with double quotes.
#[must_use]
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

/// A stream of tokens that can be serialized to script text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn serialize(&self) -> String {
        self.tokens.iter().map(Token::serialize).collect()
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
}
