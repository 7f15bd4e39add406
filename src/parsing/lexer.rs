use std::fmt::{Debug, Formatter};
use phf::phf_map;
use unicode_ident::{is_xid_continue, is_xid_start};
use crate::source::{Pos, Source};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum TokenType {
    Identifier,
    Integer,
    Float,
    Str,
    LeftParenthesis,
    RightParenthesis,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Period,
    Equal,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    Arrow,
    Def,
    Return,
    If,
    Elif,
    Else,
    For,
    In,
    Not,
    And,
    Or,
    Assert,
    From,
    Import,
    True,
    False,
    None,
    Newline,
    Indent,
    Dedent,
    Unrecognized,
    EOF,
}

const BASIC_TOKENS: phf::Map<char, TokenType> = phf_map! {
    '(' => TokenType::LeftParenthesis,
    ')' => TokenType::RightParenthesis,
    '[' => TokenType::LeftBracket,
    ']' => TokenType::RightBracket,
    ',' => TokenType::Comma,
    ':' => TokenType::Colon,
    '.' => TokenType::Period,
    '=' => TokenType::Equal,
    '<' => TokenType::Less,
    '>' => TokenType::Greater,
    '+' => TokenType::Plus,
    '-' => TokenType::Minus,
    '*' => TokenType::Star,
    '/' => TokenType::Slash,
};

const KEYWORDS: phf::Map<&str, TokenType> = phf_map! {
    "def" => TokenType::Def,
    "return" => TokenType::Return,
    "if" => TokenType::If,
    "elif" => TokenType::Elif,
    "else" => TokenType::Else,
    "for" => TokenType::For,
    "in" => TokenType::In,
    "not" => TokenType::Not,
    "and" => TokenType::And,
    "or" => TokenType::Or,
    "assert" => TokenType::Assert,
    "from" => TokenType::From,
    "import" => TokenType::Import,
    "True" => TokenType::True,
    "False" => TokenType::False,
    "None" => TokenType::None,
};

impl TokenType {
    pub fn name(&self) -> &'static str {
        match self {
            TokenType::Identifier => "an identifier",
            TokenType::Integer => "an integer",
            TokenType::Float => "a float",
            TokenType::Str => "a string",
            TokenType::LeftParenthesis => "'('",
            TokenType::RightParenthesis => "')'",
            TokenType::LeftBracket => "'['",
            TokenType::RightBracket => "']'",
            TokenType::Comma => "','",
            TokenType::Colon => "':'",
            TokenType::Period => "'.'",
            TokenType::Equal => "'='",
            TokenType::EqualEqual => "'=='",
            TokenType::NotEqual => "'!='",
            TokenType::Less => "'<'",
            TokenType::LessEqual => "'<='",
            TokenType::Greater => "'>'",
            TokenType::GreaterEqual => "'>='",
            TokenType::Plus => "'+'",
            TokenType::Minus => "'-'",
            TokenType::Star => "'*'",
            TokenType::Slash => "'/'",
            TokenType::PlusEqual => "'+='",
            TokenType::MinusEqual => "'-='",
            TokenType::StarEqual => "'*='",
            TokenType::SlashEqual => "'/='",
            TokenType::Arrow => "'->'",
            TokenType::Def => "'def'",
            TokenType::Return => "'return'",
            TokenType::If => "'if'",
            TokenType::Elif => "'elif'",
            TokenType::Else => "'else'",
            TokenType::For => "'for'",
            TokenType::In => "'in'",
            TokenType::Not => "'not'",
            TokenType::And => "'and'",
            TokenType::Or => "'or'",
            TokenType::Assert => "'assert'",
            TokenType::From => "'from'",
            TokenType::Import => "'import'",
            TokenType::True => "'True'",
            TokenType::False => "'False'",
            TokenType::None => "'None'",
            TokenType::Newline => "the end of the line",
            TokenType::Indent => "an indented block",
            TokenType::Dedent => "the end of a block",
            TokenType::Unrecognized => "unrecognized characters",
            TokenType::EOF => "the end of the file",
        }
    }
}

#[derive(Copy, Clone)]
pub struct Token<'a> {
    pub typ: TokenType,
    pub text: &'a str,
    pub pos: Pos,
}

impl PartialEq<Self> for Token<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ && self.text == other.text
    }
}

impl Eq for Token<'_> {}

impl Debug for Token<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({:?}, {:?})", self.typ, self.text)
    }
}

const TAB_WIDTH: u32 = 8;

pub struct Lexer<'a> {
    source: &'a Source,
    chars: Box<[(usize, char)]>,
    _idx: usize,
    line: u32,
    line_start: usize,
    indents: Vec<u32>,
    paren_depth: u32,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn lex(source: &'a Source) -> Box<[Token<'a>]> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        lexer.run(&mut tokens);
        tokens.into_boxed_slice()
    }

    fn new(source: &'a Source) -> Self {
        let chars = source.text.char_indices().collect();
        Self {
            source,
            chars,
            _idx: 0,
            line: 1,
            line_start: 0,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
        }
    }

    fn curr(&self) -> char {
        self.chars.get(self._idx).map_or('\0', |p| p.1)
    }

    fn peek(&self) -> char {
        self.chars.get(self._idx + 1).map_or('\0', |p| p.1)
    }

    fn idx(&self) -> usize {
        self.chars.get(self._idx).map_or(self.source.text.len(), |p| p.0)
    }

    fn advance(&mut self) {
        self._idx += 1;
    }

    fn is_done(&self) -> bool {
        self._idx >= self.chars.len()
    }

    fn pos_at(&self, idx: usize) -> Pos {
        Pos { line: self.line, col: (idx - self.line_start) as u32 }
    }

    fn token(&self, typ: TokenType, start: usize, end: usize) -> Token<'a> {
        Token { typ, text: &self.source.text[start..end], pos: self.pos_at(start) }
    }

    fn marker(&self, typ: TokenType) -> Token<'a> {
        Token { typ, text: "", pos: self.pos_at(self.idx()) }
    }

    fn newline(&mut self) {
        self.advance();
        self.line += 1;
        self.line_start = self.idx();
    }

    fn run(&mut self, tokens: &mut Vec<Token<'a>>) {
        while !self.is_done() {
            if self.at_line_start && self.paren_depth == 0 {
                if self.handle_line_start(tokens) {
                    continue;
                }
            }
            match self.curr() {
                '\n' => {
                    if self.paren_depth == 0 {
                        tokens.push(self.marker(TokenType::Newline));
                        self.at_line_start = true;
                    }
                    self.newline();
                }
                '#' => {
                    while !self.is_done() && self.curr() != '\n' {
                        self.advance();
                    }
                }
                c if c.is_ascii_whitespace() => self.advance(),
                '!' if self.peek() == '=' => {
                    let start = self.idx();
                    self.advance();
                    self.advance();
                    tokens.push(self.token(TokenType::NotEqual, start, self.idx()));
                }
                c if c.is_ascii_digit() => tokens.push(self.lex_number()),
                '"' | '\'' => tokens.push(self.lex_string()),
                c if is_xid_start(c) => tokens.push(self.lex_word()),
                c if BASIC_TOKENS.contains_key(&c) => tokens.push(self.lex_symbol()),
                _ => {
                    let start = self.idx();
                    while !self.is_done() && Self::is_unrecognized(self.curr()) {
                        self.advance();
                    }
                    tokens.push(self.token(TokenType::Unrecognized, start, self.idx()));
                }
            }
        }
        if tokens.last().map_or(false, |t| !matches!(t.typ, TokenType::Newline)) {
            tokens.push(self.marker(TokenType::Newline));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(self.marker(TokenType::Dedent));
        }
        tokens.push(self.marker(TokenType::EOF));
    }

    /// Measures the indentation of the line about to be lexed and emits
    /// Indent/Dedent markers against the indent stack. Blank and comment-only
    /// lines are consumed whole. Returns true if the caller should re-enter
    /// the loop (the line was blank).
    fn handle_line_start(&mut self, tokens: &mut Vec<Token<'a>>) -> bool {
        let mut width = 0;
        while !self.is_done() {
            match self.curr() {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' => {}
                _ => break,
            }
            self.advance();
        }
        if self.is_done() {
            return false;
        }
        if self.curr() == '\n' {
            self.newline();
            return true;
        }
        if self.curr() == '#' {
            while !self.is_done() && self.curr() != '\n' {
                self.advance();
            }
            if !self.is_done() {
                self.newline();
            }
            return true;
        }
        self.at_line_start = false;
        let top = *self.indents.last().unwrap();
        if width > top {
            self.indents.push(width);
            tokens.push(self.marker(TokenType::Indent));
        } else if width < top {
            while *self.indents.last().unwrap() > width {
                self.indents.pop();
                tokens.push(self.marker(TokenType::Dedent));
            }
            if *self.indents.last().unwrap() != width {
                // dedent to a level never introduced
                tokens.push(self.marker(TokenType::Unrecognized));
            }
        }
        false
    }

    fn is_unrecognized(c: char) -> bool {
        match c {
            c if BASIC_TOKENS.contains_key(&c) => false,
            '"' | '\'' | '#' => false,
            c if c.is_ascii_whitespace() => false,
            c if c.is_ascii_digit() => false,
            c if is_xid_start(c) => false,
            _ => true,
        }
    }

    fn lex_number(&mut self) -> Token<'a> {
        let start = self.idx();
        while self.curr().is_ascii_digit() {
            self.advance();
        }
        let mut typ = TokenType::Integer;
        if self.curr() == '.' && self.peek() != '.' {
            typ = TokenType::Float;
            self.advance();
            while self.curr().is_ascii_digit() {
                self.advance();
            }
        }
        self.token(typ, start, self.idx())
    }

    fn lex_string(&mut self) -> Token<'a> {
        let quote = self.curr();
        let start = self.idx();
        self.advance();
        while !self.is_done() && self.curr() != quote && self.curr() != '\n' {
            if self.curr() == '\\' {
                self.advance();
            }
            if !self.is_done() {
                self.advance();
            }
        }
        if self.curr() == quote {
            self.advance();
            self.token(TokenType::Str, start, self.idx())
        } else {
            self.token(TokenType::Unrecognized, start, self.idx())
        }
    }

    fn lex_word(&mut self) -> Token<'a> {
        let start = self.idx();
        while is_xid_continue(self.curr()) {
            self.advance();
        }
        let end = self.idx();
        let text = &self.source.text[start..end];
        match KEYWORDS.get(text) {
            Some(typ) => self.token(*typ, start, end),
            Option::None => self.token(TokenType::Identifier, start, end),
        }
    }

    fn lex_symbol(&mut self) -> Token<'a> {
        let start = self.idx();
        let c = self.curr();
        let two = match (c, self.peek()) {
            ('=', '=') => Some(TokenType::EqualEqual),
            ('<', '=') => Some(TokenType::LessEqual),
            ('>', '=') => Some(TokenType::GreaterEqual),
            ('+', '=') => Some(TokenType::PlusEqual),
            ('-', '=') => Some(TokenType::MinusEqual),
            ('*', '=') => Some(TokenType::StarEqual),
            ('/', '=') => Some(TokenType::SlashEqual),
            ('-', '>') => Some(TokenType::Arrow),
            _ => Option::None,
        };
        if let Some(typ) = two {
            self.advance();
            self.advance();
            return self.token(typ, start, self.idx());
        }
        let typ = BASIC_TOKENS[&c];
        match typ {
            TokenType::LeftParenthesis | TokenType::LeftBracket => self.paren_depth += 1,
            TokenType::RightParenthesis | TokenType::RightBracket => {
                self.paren_depth = self.paren_depth.saturating_sub(1)
            }
            _ => {}
        }
        self.advance();
        self.token(typ, start, self.idx())
    }
}

#[cfg(test)]
mod test {
    use crate::parsing::lexer::{Lexer, TokenType};
    use crate::source::Source;
    use TokenType::*;

    fn types(text: &str) -> Vec<TokenType> {
        let s = Source::from_text("<test>", text);
        Lexer::lex(&s).iter().map(|t| t.typ).collect()
    }

    #[test]
    fn lex_empty() {
        assert_eq!(types(""), vec![EOF]);
    }

    #[test]
    fn lex_simple_line() {
        assert_eq!(types("x = 1"), vec![Identifier, Equal, Integer, Newline, EOF]);
    }

    #[test]
    fn lex_keyword_vs_identifier() {
        assert_eq!(types("deffy def"), vec![Identifier, Def, Newline, EOF]);
    }

    #[test]
    fn lex_float_and_int() {
        assert_eq!(types("1.5 2"), vec![Float, Integer, Newline, EOF]);
    }

    #[test]
    fn lex_two_char_symbols() {
        assert_eq!(
            types("a += 1 -> == !="),
            vec![Identifier, PlusEqual, Integer, Arrow, EqualEqual, NotEqual, Newline, EOF]
        );
    }

    #[test]
    fn lex_indent_dedent() {
        assert_eq!(
            types("if x:\n    y\nz"),
            vec![
                If, Identifier, Colon, Newline, Indent, Identifier, Newline, Dedent, Identifier,
                Newline, EOF
            ]
        );
    }

    #[test]
    fn lex_blank_lines_ignored() {
        assert_eq!(
            types("x\n\n   \n# comment\ny"),
            vec![Identifier, Newline, Identifier, Newline, EOF]
        );
    }

    #[test]
    fn lex_dedent_at_eof() {
        assert_eq!(
            types("if x:\n    y"),
            vec![If, Identifier, Colon, Newline, Indent, Identifier, Newline, Dedent, EOF]
        );
    }

    #[test]
    fn lex_string() {
        let s = Source::from_text("<test>", "\"he\\\"llo\"");
        let toks = Lexer::lex(&s);
        assert_eq!(toks[0].typ, Str);
        assert_eq!(toks[0].text, "\"he\\\"llo\"");
    }

    #[test]
    fn lex_implicit_line_joining() {
        assert_eq!(
            types("[1,\n 2]"),
            vec![LeftBracket, Integer, Comma, Integer, RightBracket, Newline, EOF]
        );
    }

    #[test]
    fn lex_unterminated_string() {
        assert_eq!(types("\"oops\nx"), vec![Unrecognized, Newline, Identifier, Newline, EOF]);
    }
}
