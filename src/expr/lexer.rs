//! Tokenizer shared by the condition and wide dialects.
//!
//! Identifiers are lexed as whole dotted paths (`bets.place_6`, `bets.6`), so
//! the `__` check runs once per segment before any parser sees the name.

use super::ExprError;

/// 1-based source position of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    /// Identifier, possibly dotted.
    Ident(String),
    True,
    False,
    NoneLit,
    And,
    Or,
    Not,
    In,
    If,
    Else,
    /// Statement keyword the sandbox never allows (`for`, `import`, ...).
    Reserved(String),
    Op(&'static str),
    Newline,
    Eof,
}

impl Tok {
    /// Short human description used in syntax errors.
    pub fn describe(&self) -> String {
        match self {
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(s) => format!("{s:?}"),
            Tok::Ident(name) => format!("'{name}'"),
            Tok::True => "TRUE".into(),
            Tok::False => "FALSE".into(),
            Tok::NoneLit => "None".into(),
            Tok::And => "AND".into(),
            Tok::Or => "OR".into(),
            Tok::Not => "NOT".into(),
            Tok::In => "'in'".into(),
            Tok::If => "'if'".into(),
            Tok::Else => "'else'".into(),
            Tok::Reserved(kw) => format!("'{kw}'"),
            Tok::Op(op) => format!("'{op}'"),
            Tok::Newline => "end of line".into(),
            Tok::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
}

/// Which dialect is being lexed. Only the wide dialect has statements, so
/// only it sees newlines and `#` comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Condition,
    Script,
}

const RESERVED: &[&str] = &[
    "for", "while", "def", "class", "import", "from", "lambda", "return", "yield", "with", "try",
    "except", "finally", "global", "nonlocal", "del", "async", "await", "pass", "break",
    "continue", "raise", "assert", "is",
];

// Longest first so `//=` wins over `//` and `/`.
const OPERATORS: &[&str] = &[
    "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "<", ">", "=", "+",
    "-", "*", "/", "%", "(", ")", "[", "]", ",", ";", ":",
];

pub fn tokenize(src: &str, mode: Mode) -> Result<Vec<Token>, ExprError> {
    Lexer::new(src, mode).run()
}

struct Lexer {
    chars: Vec<char>,
    idx: usize,
    line: usize,
    col: usize,
    depth: usize,
    mode: Mode,
    out: Vec<Token>,
}

impl Lexer {
    fn new(src: &str, mode: Mode) -> Self {
        Self {
            chars: src.chars().collect(),
            idx: 0,
            line: 1,
            col: 1,
            depth: 0,
            mode,
            out: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.idx).copied()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn push(&mut self, tok: Tok, pos: Pos) {
        self.out.push(Token { tok, pos });
    }

    fn run(mut self) -> Result<Vec<Token>, ExprError> {
        while let Some(c) = self.peek() {
            let pos = self.pos();
            match c {
                '\n' => {
                    self.bump();
                    if self.mode == Mode::Script && self.depth == 0 {
                        self.push(Tok::Newline, pos);
                    }
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' if self.mode == Mode::Script => {
                    while matches!(self.peek(), Some(ch) if ch != '\n') {
                        self.bump();
                    }
                }
                '\'' | '"' => self.string(c, pos)?,
                c if c.is_ascii_digit() => self.number(pos)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(pos)?,
                _ => self.operator(pos)?,
            }
        }
        let pos = self.pos();
        self.push(Tok::Eof, pos);
        Ok(self.out)
    }

    fn string(&mut self, quote: char, pos: Pos) -> Result<(), ExprError> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError::syntax("unterminated string literal", pos)),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some(c @ ('\'' | '"' | '\\')) => s.push(c),
                    Some(other) => {
                        s.push('\\');
                        s.push(other);
                    }
                    None => return Err(ExprError::syntax("unterminated string literal", pos)),
                },
                Some(c) => s.push(c),
            }
        }
        self.push(Tok::Str(s), pos);
        Ok(())
    }

    fn number(&mut self, pos: Pos) -> Result<(), ExprError> {
        let mut text = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                text.push(c);
                self.bump();
            }
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(ExprError::syntax(format!("invalid number literal '{text}...'"), pos));
        }
        let tok = if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ExprError::syntax(format!("invalid number '{text}'"), pos))?
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| ExprError::syntax(format!("integer literal too large: {text}"), pos))?
        };
        self.push(tok, pos);
        Ok(())
    }

    fn ident(&mut self, pos: Pos) -> Result<(), ExprError> {
        let mut name = String::new();
        self.take_segment(&mut name);
        while self.peek() == Some('.')
            && self
                .peek_at(1)
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
            name.push('.');
            self.take_segment(&mut name);
        }

        if let Some(bad) = name.split('.').find(|seg| seg.contains("__")) {
            return Err(ExprError::syntax(
                format!("identifier segment '{bad}' contains forbidden '__'"),
                pos,
            ));
        }

        let tok = if name.contains('.') {
            Tok::Ident(name)
        } else {
            match name.to_ascii_lowercase().as_str() {
                "true" => Tok::True,
                "false" => Tok::False,
                "none" => Tok::NoneLit,
                "and" => Tok::And,
                "or" => Tok::Or,
                "not" => Tok::Not,
                "in" => Tok::In,
                "if" => Tok::If,
                "else" => Tok::Else,
                kw if RESERVED.contains(&kw) => Tok::Reserved(kw.to_string()),
                _ => Tok::Ident(name),
            }
        };
        self.push(tok, pos);
        Ok(())
    }

    fn take_segment(&mut self, into: &mut String) {
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
            into.push(c);
            self.bump();
        }
    }

    fn operator(&mut self, pos: Pos) -> Result<(), ExprError> {
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, oc)| self.peek_at(i) == Some(oc));
            if matches {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                match *op {
                    "(" | "[" => self.depth += 1,
                    ")" | "]" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(*op), pos);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or_default();
        Err(ExprError::syntax(format!("unexpected character '{c}'"), pos))
    }
}
