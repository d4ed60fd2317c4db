//! Lexer (tokenizer) for filter rules.
//!
//! Converts rule text into a stream of [`token::Token`]s for the parser.
//! Whitespace and `/* ... */` comments are discarded.

pub mod token;

use crate::errors::{FilterError, FilterResult};
use token::{SourceLocation, Token, TokenKind};

/// Lexer for the filter rule language
pub struct Lexer<'a> {
    /// Rule text being lexed
    source: &'a str,
    /// Characters with their byte offsets
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    /// Current position in bytes
    position: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start position of current token
    token_start: usize,
    /// Start line of current token
    token_start_line: usize,
    /// Start column of current token
    token_start_column: usize,
    /// Set once `Eof` (or an error) has been yielded by the iterator
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given rule text
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            position: 0,
            line: 1,
            column: 1,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
            finished: false,
        }
    }

    /// Get the rule text
    pub fn source(&self) -> &str {
        self.source
    }

    /// Tokenize the entire source; the last token is always `Eof`
    pub fn tokenize(&mut self) -> FilterResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> FilterResult<Token> {
        self.skip_whitespace_and_comments()?;

        self.token_start = self.position;
        self.token_start_line = self.line;
        self.token_start_column = self.column;

        let Some(ch) = self.peek_char() else {
            return Ok(self.make_token(TokenKind::Eof));
        };

        match ch {
            'a'..='z' | 'A'..='Z' | '_' => self.lex_identifier(),
            '0'..='9' => self.lex_number(),
            '.' if matches!(self.peek_char_at(1), Some('0'..='9')) => self.lex_number(),
            '"' | '\'' => self.lex_string(ch),

            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            '[' => self.single(TokenKind::LeftBracket),
            ']' => self.single(TokenKind::RightBracket),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            '?' => self.single(TokenKind::Question),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '/' => self.single(TokenKind::Slash),
            '%' => self.single(TokenKind::Percent),
            '&' => self.single(TokenKind::And),
            '|' => self.single(TokenKind::Or),
            '^' => self.single(TokenKind::Xor),

            ':' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(self.make_token(TokenKind::Assign))
                } else {
                    Ok(self.make_token(TokenKind::Colon))
                }
            }
            '*' => {
                self.advance();
                if self.peek_char() == Some('*') {
                    self.advance();
                    Ok(self.make_token(TokenKind::StarStar))
                } else {
                    Ok(self.make_token(TokenKind::Star))
                }
            }
            '=' => {
                if self.peek_char_at(1) != Some('=') {
                    return Err(self.error_unexpected_char('='));
                }
                self.advance();
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(self.make_token(TokenKind::EqEqEq))
                } else {
                    Ok(self.make_token(TokenKind::EqEq))
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    if self.peek_char() == Some('=') {
                        self.advance();
                        Ok(self.make_token(TokenKind::NotEqEq))
                    } else {
                        Ok(self.make_token(TokenKind::NotEq))
                    }
                } else {
                    Ok(self.make_token(TokenKind::Not))
                }
            }
            '<' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(self.make_token(TokenKind::LtEq))
                } else {
                    Ok(self.make_token(TokenKind::Lt))
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(self.make_token(TokenKind::GtEq))
                } else {
                    Ok(self.make_token(TokenKind::Gt))
                }
            }

            other => Err(self.error_unexpected_char(other)),
        }
    }

    /// Consume one character and emit `kind`
    fn single(&mut self, kind: TokenKind) -> FilterResult<Token> {
        self.advance();
        Ok(self.make_token(kind))
    }

    /// Peek at the current character without consuming
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    /// Peek at a character at offset from current position
    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.source[self.position..].chars().nth(offset)
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.position = pos + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Skip whitespace and block comments
    fn skip_whitespace_and_comments(&mut self) -> FilterResult<()> {
        loop {
            match self.peek_char() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('/') if self.peek_char_at(1) == Some('*') => {
                    let start = self.current_location();
                    self.advance(); // /
                    self.advance(); // *
                    loop {
                        match self.peek_char() {
                            None => {
                                let location = SourceLocation::new(
                                    start.line,
                                    start.column,
                                    start.offset,
                                    self.position - start.offset,
                                );
                                return Err(FilterError::unterminated_comment(
                                    self.source.to_string(),
                                    &location,
                                ));
                            }
                            Some('*') if self.peek_char_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Lex an identifier or keyword
    fn lex_identifier(&mut self) -> FilterResult<Token> {
        let start = self.position;

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.position];
        let kind =
            TokenKind::keyword_from_str(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));

        Ok(self.make_token(kind))
    }

    /// Consume characters while `pred` holds
    fn take_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(ch) = self.peek_char() {
            if pred(ch) {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Lex a number: decimal integer, float, or 0x / 0o / 0b prefixed integer
    fn lex_number(&mut self) -> FilterResult<Token> {
        let start = self.position;

        if self.peek_char() == Some('0') {
            let radix = match self.peek_char_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance(); // 0
                self.advance(); // x / o / b
                let digits_start = self.position;
                self.take_while(|c| c.is_ascii_alphanumeric());
                let digits = &self.source[digits_start..self.position];
                return match i64::from_str_radix(digits, radix) {
                    Ok(value) => Ok(self.make_token(TokenKind::Integer(value))),
                    Err(_) => Err(self.error_invalid_number(
                        &self.source[start..self.position],
                        format!("expected base-{} digits after the prefix", radix),
                    )),
                };
            }
        }

        let mut is_float = false;

        self.take_while(|c| c.is_ascii_digit());

        // Decimal part
        if self.peek_char() == Some('.') && matches!(self.peek_char_at(1), Some('0'..='9')) {
            is_float = true;
            self.advance(); // .
            self.take_while(|c| c.is_ascii_digit());
        }

        // Exponent part, only when digits follow
        if let Some('e' | 'E') = self.peek_char() {
            let has_exponent = match self.peek_char_at(1) {
                Some('0'..='9') => true,
                Some('+' | '-') => matches!(self.peek_char_at(2), Some('0'..='9')),
                _ => false,
            };
            if has_exponent {
                is_float = true;
                self.advance(); // e
                if let Some('+' | '-') = self.peek_char() {
                    self.advance();
                }
                self.take_while(|c| c.is_ascii_digit());
            }
        }

        let text = &self.source[start..self.position];

        let kind = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_invalid_number(text, "invalid float literal"))?;
            TokenKind::Float(value)
        } else {
            match text.parse::<i64>() {
                Ok(value) => TokenKind::Integer(value),
                // Too large for an integer: keep the magnitude as a float
                Err(_) => {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| self.error_invalid_number(text, "invalid integer literal"))?;
                    TokenKind::Float(value)
                }
            }
        };

        Ok(self.make_token(kind))
    }

    /// Lex a string delimited by `quote`
    fn lex_string(&mut self, quote: char) -> FilterResult<Token> {
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None => {
                    let location = SourceLocation::new(
                        self.token_start_line,
                        self.token_start_column,
                        self.token_start,
                        1,
                    );
                    return Err(FilterError::unterminated_string(
                        self.source.to_string(),
                        &location,
                    ));
                }
                Some(ch) if ch == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    self.lex_escape_sequence(&mut value);
                }
                Some(ch) => {
                    self.advance();
                    value.push(ch);
                }
            }
        }

        Ok(self.make_token(TokenKind::String(value)))
    }

    /// Lex an escape sequence (after the backslash) into `out`.
    /// Unknown escapes keep the backslash.
    fn lex_escape_sequence(&mut self, out: &mut String) {
        match self.peek_char() {
            Some('n') => {
                self.advance();
                out.push('\n');
            }
            Some('r') => {
                self.advance();
                out.push('\r');
            }
            Some('t') => {
                self.advance();
                out.push('\t');
            }
            Some(ch @ ('\\' | '"' | '\'')) => {
                self.advance();
                out.push(ch);
            }
            Some('x') => {
                let hex: String = [self.peek_char_at(1), self.peek_char_at(2)]
                    .iter()
                    .flatten()
                    .collect();
                let decoded = if hex.len() == 2 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    u8::from_str_radix(&hex, 16).ok()
                } else {
                    None
                };
                match decoded {
                    Some(byte) => {
                        self.advance(); // x
                        self.advance();
                        self.advance();
                        out.push(char::from(byte));
                    }
                    None => out.push('\\'),
                }
            }
            // Left for the main loop: the backslash stays, the character is read normally
            Some(_) | None => out.push('\\'),
        }
    }

    /// Create a token with the current token span
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.token_location())
    }

    /// Get the location for the current token
    fn token_location(&self) -> SourceLocation {
        SourceLocation::new(
            self.token_start_line,
            self.token_start_column,
            self.token_start,
            self.position - self.token_start,
        )
    }

    /// Get the current location
    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.position, 1)
    }

    /// Create an unexpected character error
    fn error_unexpected_char(&self, ch: char) -> FilterError {
        let location = SourceLocation::new(self.line, self.column, self.position, ch.len_utf8());
        FilterError::unexpected_character(self.source.to_string(), &location, ch)
    }

    fn error_invalid_number(&self, text: &str, help: impl Into<String>) -> FilterError {
        FilterError::InvalidNumber {
            src: self.source.to_string(),
            span: crate::errors::span_of(&self.token_location()),
            text: text.to_string(),
            help: help.into(),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = FilterResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.kind != TokenKind::Eof => {}
            _ => self.finished = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.to_string())
    }

    fn string(s: &str) -> TokenKind {
        TokenKind::String(s.to_string())
    }

    #[test]
    fn test_empty() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_whitespace() {
        assert_eq!(lex("  \t\r\n  "), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            lex("user_editcount < 5"),
            vec![
                ident("user_editcount"),
                TokenKind::Lt,
                TokenKind::Integer(5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(lex("AND"), vec![TokenKind::And, TokenKind::Eof]);
        assert_eq!(lex("Or"), vec![TokenKind::Or, TokenKind::Eof]);
        assert_eq!(lex("xor"), vec![TokenKind::Xor, TokenKind::Eof]);
        assert_eq!(lex("NOT"), vec![TokenKind::Not, TokenKind::Eof]);
        assert_eq!(lex("In"), vec![TokenKind::In, TokenKind::Eof]);
        assert_eq!(lex("contains"), vec![TokenKind::Contains, TokenKind::Eof]);
        assert_eq!(lex("matches"), vec![TokenKind::Like, TokenKind::Eof]);
        assert_eq!(lex("LIKE"), vec![TokenKind::Like, TokenKind::Eof]);
        assert_eq!(lex("regex"), vec![TokenKind::Rlike, TokenKind::Eof]);
        assert_eq!(lex("irlike"), vec![TokenKind::Irlike, TokenKind::Eof]);
        assert_eq!(lex("TRUE"), vec![TokenKind::True, TokenKind::Eof]);
        assert_eq!(lex("null"), vec![TokenKind::Null, TokenKind::Eof]);
        assert_eq!(lex("End"), vec![TokenKind::End, TokenKind::Eof]);
    }

    #[test]
    fn test_identifier_keeps_case() {
        assert_eq!(lex("Added_Lines"), vec![ident("Added_Lines"), TokenKind::Eof]);
        assert_eq!(lex("_x1"), vec![ident("_x1"), TokenKind::Eof]);
    }

    #[test]
    fn test_symbolic_aliases() {
        assert_eq!(
            lex("a & b | c ^ !d"),
            vec![
                ident("a"),
                TokenKind::And,
                ident("b"),
                TokenKind::Or,
                ident("c"),
                TokenKind::Xor,
                TokenKind::Not,
                ident("d"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("42"), vec![TokenKind::Integer(42), TokenKind::Eof]);
        assert_eq!(lex("3.14"), vec![TokenKind::Float(3.14), TokenKind::Eof]);
        assert_eq!(lex(".5"), vec![TokenKind::Float(0.5), TokenKind::Eof]);
        assert_eq!(lex("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Eof]);
        assert_eq!(lex("2E-2"), vec![TokenKind::Float(0.02), TokenKind::Eof]);
        assert_eq!(lex("0x1F"), vec![TokenKind::Integer(31), TokenKind::Eof]);
        assert_eq!(lex("0o17"), vec![TokenKind::Integer(15), TokenKind::Eof]);
        assert_eq!(lex("0b101"), vec![TokenKind::Integer(5), TokenKind::Eof]);
    }

    #[test]
    fn test_huge_integer_becomes_float() {
        assert_eq!(
            lex("99999999999999999999"),
            vec![TokenKind::Float(1e20), TokenKind::Eof]
        );
    }

    #[test]
    fn test_bad_prefixed_number() {
        let result = Lexer::new("0xZZ").tokenize();
        assert!(matches!(result, Err(FilterError::InvalidNumber { .. })));
    }

    #[test]
    fn test_number_followed_by_identifier() {
        assert_eq!(
            lex("1else"),
            vec![TokenKind::Integer(1), TokenKind::Else, TokenKind::Eof]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(lex("\"hello\""), vec![string("hello"), TokenKind::Eof]);
        assert_eq!(lex("'hello'"), vec![string("hello"), TokenKind::Eof]);
        assert_eq!(lex("'say \"hi\"'"), vec![string("say \"hi\""), TokenKind::Eof]);
        assert_eq!(lex("'multi\nline'"), vec![string("multi\nline"), TokenKind::Eof]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(lex(r#""a\nb""#), vec![string("a\nb"), TokenKind::Eof]);
        assert_eq!(lex(r#""a\tb\rc""#), vec![string("a\tb\rc"), TokenKind::Eof]);
        assert_eq!(lex(r#"'it\'s'"#), vec![string("it's"), TokenKind::Eof]);
        assert_eq!(lex(r#""back\\slash""#), vec![string("back\\slash"), TokenKind::Eof]);
        assert_eq!(lex(r#""\x41\x62""#), vec![string("Ab"), TokenKind::Eof]);
    }

    #[test]
    fn test_unknown_escape_keeps_backslash() {
        assert_eq!(lex(r#""\d+""#), vec![string("\\d+"), TokenKind::Eof]);
        assert_eq!(lex(r#""\xZ""#), vec![string("\\xZ"), TokenKind::Eof]);
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            lex("( ) [ ] , ; : ?"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Colon,
                TokenKind::Question,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex(":= == === != !== < <= > >= + - * ** / %"),
            vec![
                TokenKind::Assign,
                TokenKind::EqEq,
                TokenKind::EqEqEq,
                TokenKind::NotEq,
                TokenKind::NotEqEq,
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::Gt,
                TokenKind::GtEq,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::StarStar,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            lex("/* leading */ a /* mid\nline */ + 1 /**/"),
            vec![ident("a"), TokenKind::Plus, TokenKind::Integer(1), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_comment_error() {
        let result = Lexer::new("a /* never closed").tokenize();
        assert!(matches!(
            result,
            Err(FilterError::UnterminatedComment { .. })
        ));
    }

    #[test]
    fn test_unterminated_string_error() {
        let result = Lexer::new("x := 'abc").tokenize();
        match result {
            Err(err @ FilterError::UnterminatedString { .. }) => {
                assert_eq!(err.span().map(|s| s.start), Some(5));
            }
            other => panic!("Expected UnterminatedString error, got {:?}", other),
        }
    }

    #[test]
    fn test_single_equals_is_rejected() {
        let result = Lexer::new("a = 1").tokenize();
        assert!(matches!(
            result,
            Err(FilterError::UnexpectedCharacter { ch: '=', .. })
        ));
    }

    #[test]
    fn test_unexpected_character() {
        let result = Lexer::new("a # b").tokenize();
        match result {
            Err(FilterError::UnexpectedCharacter { ch, span, .. }) => {
                assert_eq!(ch, '#');
                assert_eq!(span.offset(), 2);
            }
            other => panic!("Expected UnexpectedCharacter, got {:?}", other),
        }
    }

    #[test]
    fn test_source_locations() {
        let tokens = Lexer::new("abc := 42").tokenize().unwrap();

        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[0].location.column, 1);
        assert_eq!(tokens[0].location.length, 3);

        assert_eq!(tokens[1].location.column, 5);
        assert_eq!(tokens[1].location.length, 2);

        assert_eq!(tokens[2].location.column, 8);
        assert_eq!(tokens[2].location.offset, 7);
    }

    #[test]
    fn test_multiline_locations() {
        let tokens = Lexer::new("a\n  b").tokenize().unwrap();
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[1].location.line, 2);
        assert_eq!(tokens[1].location.column, 3);
    }

    #[test]
    fn test_iterator_stops_after_eof() {
        let kinds: Vec<TokenKind> = Lexer::new("a + b")
            .map(|t| t.unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ident("a"), TokenKind::Plus, ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let results: Vec<_> = Lexer::new("a # b").collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
