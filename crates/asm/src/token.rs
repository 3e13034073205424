use std::sync::Arc;

use crate::diag::Diagnostic;
use crate::position::Position;

/// Known token kinds. The begin/end pairs are structural: they delimit the
/// constructs the parser folds into lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    InstructionBegin,
    InstructionEnd,
    MacroBegin,
    MacroEnd,
    ExpressionBegin,
    ExpressionEnd,
    ScopeBegin,
    ScopeEnd,
    IfBegin,
    IfEnd,
    Label,
    Number,
    Ident,
    Str,
    Char,
    Operator,
    AddressMode,
    Breakpoint,
    TypeDescriptor,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
    pub text: String,
}

/// Turns a source buffer into a flat stream of tokens.
///
/// The scanner appends a virtual trailing newline so that constructs at the
/// very end of the buffer terminate the same way as anywhere else.
pub fn tokenize(data: &[u8], file: &Arc<str>) -> Result<Vec<Token>, Diagnostic> {
    let mut scanner = Scanner::new(data, file.clone());
    match scanner.read_document() {
        Err(Stop::Eof) => Ok(scanner.tokens),
        Err(Stop::Fail(diag)) => Err(diag),
        Ok(()) => Ok(scanner.tokens),
    }
}

/// Internal control flow: either clean end of input or a hard error.
enum Stop {
    Eof,
    Fail(Diagnostic),
}

type Scan<T> = Result<T, Stop>;

struct Scanner<'a> {
    data: &'a [u8],
    file: Arc<str>,
    tokens: Vec<Token>,
    line_sizes: Vec<u32>,
    start: Cursor,
    start_depth: usize,
    end: Cursor,
    at_eof: u8,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    line: u32,
    col: u32,
    offset: usize,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8], file: Arc<str>) -> Scanner<'a> {
        let cursor = Cursor {
            line: 1,
            col: 1,
            offset: 0,
        };
        Scanner {
            data,
            file,
            tokens: Vec::new(),
            line_sizes: Vec::new(),
            start: cursor,
            start_depth: 0,
            end: cursor,
            at_eof: 0,
        }
    }

    fn read_document(&mut self) -> Scan<()> {
        loop {
            if !self.read_code()? {
                let r = self.read()? as char;
                return Err(self.fail(format!(
                    "unexpected token: '{r}'; expected comment, label or instruction"
                )));
            }
        }
    }

    /// Reads any valid top-level construct.
    fn read_code(&mut self) -> Scan<bool> {
        Ok(self.read_space()?
            || self.read_comment()?
            || self.read_scope()?
            || self.read_label()?
            || self.read_breakpoint()?
            || self.read_if()?
            || self.read_macro()?
            || self.read_instruction()?)
    }

    fn read_breakpoint(&mut self) -> Scan<bool> {
        if !self.read_keyword("break")? {
            return Ok(false);
        }
        self.emit(TokenKind::Breakpoint);
        Ok(true)
    }

    fn read_if(&mut self) -> Scan<bool> {
        if !self.read_keyword("if")? {
            return Ok(false);
        }

        self.emit(TokenKind::IfBegin);
        let result = self.read_if_body();
        // The closing token is emitted even when input runs out mid-way, so
        // a truncated construct still folds into a well-formed list.
        self.emit(TokenKind::IfEnd);
        result?;
        Ok(true)
    }

    fn read_if_body(&mut self) -> Scan<()> {
        self.read_expression()?;
        if !self.read_instruction()? {
            return Err(self.fail("if statement must be followed by an instruction"));
        }
        Ok(())
    }

    /// Reads a scope block: zero or more constructs encased in `{` and `}`.
    fn read_scope(&mut self) -> Scan<bool> {
        self.read_space()?;
        if !self.read_byte(b'{')? {
            return Ok(false);
        }

        self.emit(TokenKind::ScopeBegin);
        let result = self.read_scope_body();
        self.emit(TokenKind::ScopeEnd);
        result?;
        Ok(true)
    }

    fn read_scope_body(&mut self) -> Scan<()> {
        loop {
            if self.read_byte(b'}')? {
                return Ok(());
            }
            if self.read_code()? {
                continue;
            }
            let r = self.read()? as char;
            return Err(self.fail(format!(
                "unexpected token in scope block: '{r}'; expected comment, label, instruction, scope block or '}}'"
            )));
        }
    }

    fn read_label(&mut self) -> Scan<bool> {
        if !self.read_byte(b':')? {
            return Ok(false);
        }

        self.ignore();

        if !self.read_name()? {
            return Err(self.fail("invalid label definition; expected name"));
        }

        self.emit(TokenKind::Label);
        Ok(true)
    }

    fn read_macro(&mut self) -> Scan<bool> {
        if !self.read_keyword("macro")? {
            return Ok(false);
        }

        self.ignore();
        self.read_space()?;

        if !self.read_name()? {
            let r = self.read()? as char;
            return Err(self.fail(format!("unexpected token {r}; expected macro name")));
        }

        self.emit(TokenKind::MacroBegin);
        let result = self.read_macro_body();
        self.emit(TokenKind::MacroEnd);
        result?;
        Ok(true)
    }

    fn read_macro_body(&mut self) -> Scan<()> {
        while self.read_expression()? {}

        loop {
            if self.read_keyword("endmacro")? {
                self.ignore();
                return Ok(());
            }
            if self.read_code()? {
                continue;
            }
            let r = self.read()? as char;
            return Err(self.fail(format!(
                "unexpected token in macro body: '{r}'; expected comment, label, instruction, scope block or 'endmacro'"
            )));
        }
    }

    fn read_instruction(&mut self) -> Scan<bool> {
        if !self.read_name()? {
            self.unread_all();
            return Ok(false);
        }

        self.emit(TokenKind::InstructionBegin);
        let result = loop {
            match self.read_expression() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(stop) => break Err(stop),
            }
        };
        self.emit(TokenKind::InstructionEnd);
        result?;
        Ok(true)
    }

    /// Reads an expression. Returns true if a comma (or `=`) follows,
    /// meaning more expressions belong to the same instruction.
    fn read_expression(&mut self) -> Scan<bool> {
        let comma = self.read_byte(b',')? || self.read_byte(b'=')?;
        self.ignore();

        if self.read_space()? && !comma {
            return Ok(false);
        }

        self.emit(TokenKind::ExpressionBegin);
        let result = self.read_expression_body();
        self.emit(TokenKind::ExpressionEnd);
        result
    }

    fn read_expression_body(&mut self) -> Scan<bool> {
        let more = loop {
            if self.read_space()? {
                break false;
            }
            if self.read_comment()? {
                break false;
            }
            if self.read_word("$$")? {
                self.emit(TokenKind::Ident);
                continue;
            }
            if self.read_word("$")? {
                self.emit(TokenKind::AddressMode);
                continue;
            }
            if self.read_byte(b',')? || self.read_byte(b'=')? {
                self.unread(1);
                break true;
            }
            if self.read_byte(b'}')? {
                // A closing brace ends the expression; the enclosing scope
                // reader consumes it.
                self.unread(1);
                break false;
            }
            if self.read_type_descriptor()? {
                continue;
            }
            if self.read_operator()? {
                continue;
            }
            if self.read_value()? {
                continue;
            }
            let r = self.read()? as char;
            return Err(self.fail(format!(
                "unexpected token '{r}'; want comma, operator or value"
            )));
        };

        Ok(more)
    }

    /// Reads a type descriptor at the start of an instruction operand.
    fn read_type_descriptor(&mut self) -> Scan<bool> {
        if self.read_unique_word("u8")?
            || self.read_unique_word("i8")?
            || self.read_unique_word("u16")?
            || self.read_unique_word("i16")?
        {
            self.emit(TokenKind::TypeDescriptor);
            return Ok(true);
        }
        Ok(false)
    }

    fn read_value(&mut self) -> Scan<bool> {
        Ok(self.read_number()?
            || self.read_ident()?
            || self.read_charlit()?
            || self.read_string()?)
    }

    fn read_operator(&mut self) -> Scan<bool> {
        let first = self.read()?;
        self.read()?;

        // Two-byte operators take precedence over their one-byte prefixes.
        match self.current() {
            ">>" | "<<" | "!=" | "==" | "<=" | ">=" => {
                self.emit(TokenKind::Operator);
                return Ok(true);
            }
            _ => {}
        }

        self.unread(1);

        if is_operator(first) {
            self.emit(TokenKind::Operator);
            return Ok(true);
        }

        self.unread(1);
        Ok(false)
    }

    /// Reads a character literal, including escape sequences. The token text
    /// keeps the surrounding quotes; the parser unquotes it.
    fn read_charlit(&mut self) -> Scan<bool> {
        if !self.read_byte(b'\'')? {
            return Ok(false);
        }

        let mut escaping = false;
        loop {
            let r = self.read_in_literal("character")?;
            match r {
                b'\\' => escaping = !escaping,
                b'\'' => {
                    if !escaping {
                        break;
                    }
                    escaping = false;
                }
                _ => escaping = false,
            }
        }

        self.emit(TokenKind::Char);
        Ok(true)
    }

    /// Reads a string literal, including escape sequences. The token text
    /// keeps the surrounding quotes; the parser unquotes it.
    fn read_string(&mut self) -> Scan<bool> {
        if !self.read_byte(b'"')? {
            return Ok(false);
        }

        let mut escaping = false;
        loop {
            let r = self.read_in_literal("string")?;
            match r {
                b'\\' => escaping = !escaping,
                b'"' => {
                    if !escaping {
                        break;
                    }
                    escaping = false;
                }
                _ => escaping = false,
            }
        }

        self.emit(TokenKind::Str);
        Ok(true)
    }

    /// Like `read`, but running off the end of the buffer inside a literal
    /// is an unterminated-literal error rather than a clean end of input.
    fn read_in_literal(&mut self, what: &str) -> Scan<u8> {
        match self.read() {
            Ok(r) => Ok(r),
            Err(Stop::Eof) => Err(self.fail(format!("unterminated {what} literal"))),
            Err(stop) => Err(stop),
        }
    }

    /// Reads a numeric literal of the form `BASE#digits`, where the base
    /// prefix is optional and digits may contain `_` separators.
    fn read_number(&mut self) -> Scan<bool> {
        if self.scan_number()? {
            self.emit(TokenKind::Number);
            return Ok(true);
        }
        Ok(false)
    }

    fn scan_number(&mut self) -> Scan<bool> {
        // The underscore can be used to make large numbers easier to read
        // and counts as a valid digit.
        const DIGITS: &[u8] = b"_0123456789abcdefABCDEF";

        let signed = self.read_any(b"-+")?;

        let digits: &[u8] = if self.read_word("2#")? {
            &DIGITS[..3]
        } else if self.read_word("8#")? {
            &DIGITS[..9]
        } else if self.read_word("16#")? {
            &DIGITS[..17]
        } else {
            &DIGITS[..11]
        };

        // A number must begin with a digit proper, not a separator.
        if !self.read_any(&digits[1..])? {
            if signed {
                self.unread_all();
            }
            return Ok(false);
        }

        self.read_set(digits)?;

        if !self.have_word_delim()? {
            let r = self.read()? as char;
            return Err(self.fail(format!(
                "unexpected token '{r}'; expected whitespace or a digit"
            )));
        }

        Ok(true)
    }

    fn read_ident(&mut self) -> Scan<bool> {
        if !self.read_name()? {
            return Ok(false);
        }
        self.emit(TokenKind::Ident);
        Ok(true)
    }

    /// Reads a name: `[A-Za-z_.][A-Za-z0-9_.]*`.
    fn read_name(&mut self) -> Scan<bool> {
        let r = self.read()?;
        if r != b'.' && r != b'_' && !r.is_ascii_alphabetic() {
            self.unread(1);
            return Ok(false);
        }

        loop {
            let r = self.read()?;
            if r == b'_' || r == b'.' || r.is_ascii_alphanumeric() {
                continue;
            }
            self.unread(1);
            break;
        }

        Ok(true)
    }

    /// Matches a keyword case-insensitively, requiring a word delimiter
    /// after it so identifiers with a keyword prefix are left alone.
    fn read_keyword(&mut self, word: &str) -> Scan<bool> {
        for &want in word.as_bytes() {
            let have = self.read()?;
            if !have.eq_ignore_ascii_case(&want) {
                self.unread_all();
                return Ok(false);
            }
        }

        let r = self.read()?;
        self.unread(1);
        if r == b'_' || r == b'.' || r.is_ascii_alphanumeric() {
            self.unread_all();
            return Ok(false);
        }

        Ok(true)
    }

    /// Like `read_word`, but requires that the word is immediately followed
    /// by a word delimiter.
    fn read_unique_word(&mut self, word: &str) -> Scan<bool> {
        if !self.read_word(word)? {
            return Ok(false);
        }

        if !self.have_word_delim()? {
            self.unread_all();
            return Ok(false);
        }

        Ok(true)
    }

    /// Reads bytes equal to the given word. Resets on mismatch.
    fn read_word(&mut self, word: &str) -> Scan<bool> {
        for &want in word.as_bytes() {
            let have = self.read()?;
            if !have.eq_ignore_ascii_case(&want) {
                self.unread_all();
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads and discards a `;` comment up to end of line.
    fn read_comment(&mut self) -> Scan<bool> {
        if self.read()? != b';' {
            self.unread(1);
            return Ok(false);
        }

        self.read_until(b'\n')?;
        self.ignore();
        Ok(true)
    }

    /// Reads and discards whitespace. Returns true if a newline was among it.
    fn read_space(&mut self) -> Scan<bool> {
        let mut newline = false;

        loop {
            let r = self.read()?;
            if !r.is_ascii_whitespace() {
                break;
            }
            if r == b'\n' {
                newline = true;
            }
        }

        if self.at_eof == 0 {
            self.unread(1);
        }

        self.ignore();
        Ok(newline)
    }

    /// Checks whether the next byte is a word delimiter: whitespace, a comma
    /// or an operator.
    fn have_word_delim(&mut self) -> Scan<bool> {
        let r = self.read()?;
        self.unread(1);
        Ok(r == b',' || is_operator(r) || r.is_ascii_whitespace())
    }

    /// Reads bytes as long as they occur in the set.
    fn read_set(&mut self, set: &[u8]) -> Scan<bool> {
        let mut n = 0;
        while set.contains(&self.read()?) {
            n += 1;
        }
        self.unread(1);
        Ok(n > 0)
    }

    /// Reads bytes until the given byte is next.
    fn read_until(&mut self, stop: u8) -> Scan<bool> {
        let mut n = 0;
        while self.read()? != stop {
            n += 1;
        }
        self.unread(1);
        Ok(n > 0)
    }

    /// Reads the next byte if it is in the given set.
    fn read_any(&mut self, set: &[u8]) -> Scan<bool> {
        if set.contains(&self.read()?) {
            return Ok(true);
        }
        self.unread(1);
        Ok(false)
    }

    /// Reads the next byte only if it matches.
    fn read_byte(&mut self, want: u8) -> Scan<bool> {
        if self.read()? == want {
            return Ok(true);
        }
        self.unread(1);
        Ok(false)
    }

    /// Returns the currently read, not yet emitted slice of the buffer.
    fn current(&self) -> &str {
        let start = self.start.offset.min(self.data.len());
        let end = self.end.offset.min(self.data.len());
        std::str::from_utf8(&self.data[start..end]).unwrap_or("")
    }

    fn fail(&self, message: impl Into<String>) -> Stop {
        Stop::Fail(Diagnostic::new(self.position(self.start), message))
    }

    fn position(&self, cursor: Cursor) -> Position {
        Position::new(
            self.file.clone(),
            cursor.line,
            cursor.col,
            cursor.offset.min(self.data.len()) as u32,
        )
    }

    /// Emits a token of the given kind using the currently read buffer.
    fn emit(&mut self, kind: TokenKind) {
        let token = Token {
            kind,
            pos: self.position(self.start),
            text: self.current().to_string(),
        };
        self.tokens.push(token);
        self.ignore();
    }

    /// Skips the currently read buffer.
    fn ignore(&mut self) {
        self.start = self.end;
        self.start_depth = self.line_sizes.len();
    }

    /// Unreads the entire current token.
    fn unread_all(&mut self) {
        self.end = self.start;
        self.line_sizes.truncate(self.start_depth);
    }

    /// Unreads the last n read bytes. This cannot reach back into the
    /// previous token.
    fn unread(&mut self, n: usize) {
        for _ in 0..n {
            self.end.offset -= 1;

            let r = if self.end.offset >= self.data.len() {
                b'\n'
            } else {
                self.data[self.end.offset]
            };

            if r == b'\n' {
                self.end.line -= 1;
                self.end.col = self.line_sizes.pop().unwrap_or(1);
            } else {
                self.end.col -= 1;
            }
        }
    }

    /// Reads the next byte. Past the end of the buffer a few virtual
    /// newlines are produced before the scanner reports end of input.
    fn read(&mut self) -> Scan<u8> {
        let r = if self.end.offset >= self.data.len() {
            if self.at_eof > 3 {
                return Err(Stop::Eof);
            }
            self.at_eof += 1;
            b'\n'
        } else {
            self.data[self.end.offset]
        };

        self.end.offset += 1;

        if r == b'\n' {
            self.line_sizes.push(self.end.col);
            self.end.line += 1;
            self.end.col = 1;
        } else {
            self.end.col += 1;
        }

        Ok(r)
    }
}

fn is_operator(x: u8) -> bool {
    matches!(
        x,
        b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'<' | b'>' | b'(' | b')'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        let file: Arc<str> = Arc::from("test.svm");
        tokenize(source.as_bytes(), &file).expect("tokenize")
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_simple_instruction() {
        let tokens = lex("mov r0, 1");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::InstructionBegin,
                TokenKind::ExpressionBegin,
                TokenKind::Ident,
                TokenKind::ExpressionEnd,
                TokenKind::ExpressionBegin,
                TokenKind::Number,
                TokenKind::ExpressionEnd,
                TokenKind::InstructionEnd,
            ]
        );
        assert_eq!(tokens[0].text, "mov");
        assert_eq!(tokens[2].text, "r0");
        assert_eq!(tokens[5].text, "1");
    }

    #[test]
    fn lexes_label_and_scope() {
        // The trailing `}` closes the open (empty) operand expression; the
        // syntax pass later strips empty operands.
        let tokens = lex(":main { halt }");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Label,
                TokenKind::ScopeBegin,
                TokenKind::InstructionBegin,
                TokenKind::ExpressionBegin,
                TokenKind::ExpressionEnd,
                TokenKind::InstructionEnd,
                TokenKind::ScopeEnd,
            ]
        );
        assert_eq!(tokens[0].text, "main");
    }

    #[test]
    fn lexes_based_numbers() {
        let tokens = lex("d8 2#1010, 8#644, 16#ff_ff, 42");
        let numbers: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(numbers, vec!["2#1010", "8#644", "16#ff_ff", "42"]);
    }

    #[test]
    fn number_requires_word_delimiter() {
        let file: Arc<str> = Arc::from("test.svm");
        let err = tokenize(b"mov r0, 12x", &file).expect_err("expected error");
        assert!(err.message.contains("unexpected token"));
    }

    #[test]
    fn lexes_two_byte_operators_greedily() {
        let tokens = lex("if a <= b \n nop");
        let op = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Operator)
            .expect("operator token");
        assert_eq!(op.text, "<=");
    }

    #[test]
    fn lexes_if_construct() {
        let tokens = lex("if r0 == 1 \n halt");
        assert_eq!(kinds(&tokens)[0], TokenKind::IfBegin);
        assert_eq!(*kinds(&tokens).last().expect("token"), TokenKind::IfEnd);
    }

    #[test]
    fn lexes_strings_and_chars_with_escapes() {
        let tokens = lex(r#"d8 "a\"b", 'x', '\n'"#);
        let strings: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Str)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(strings, vec![r#""a\"b""#]);

        let chars: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Char)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(chars, vec!["'x'", r"'\n'"]);
    }

    #[test]
    fn reports_unterminated_string() {
        let file: Arc<str> = Arc::from("test.svm");
        let err = tokenize(br#"d8 "oops"#, &file).expect_err("expected error");
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn strips_comments() {
        let tokens = lex("halt ; end of the line\nnop");
        let names: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::InstructionBegin)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(names, vec!["halt", "nop"]);
    }

    #[test]
    fn lexes_address_mode_and_current_address() {
        let tokens = lex("jmp $here\nmov r0, $$");
        assert!(
            tokens
                .iter()
                .any(|t| t.kind == TokenKind::AddressMode && t.text == "$")
        );
        assert!(
            tokens
                .iter()
                .any(|t| t.kind == TokenKind::Ident && t.text == "$$")
        );
    }

    #[test]
    fn lexes_type_descriptors_first_in_operand() {
        let tokens = lex("mov u8 r0, i16 5");
        let descs: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::TypeDescriptor)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(descs, vec!["u8", "i16"]);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = lex("MACRO foo\nnop\nENDMACRO\nBREAK\nhalt");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::MacroBegin));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Breakpoint));
    }

    #[test]
    fn keyword_prefix_identifiers_are_instructions() {
        let tokens = lex("breakfast r0");
        assert_eq!(tokens[0].kind, TokenKind::InstructionBegin);
        assert_eq!(tokens[0].text, "breakfast");
    }

    #[test]
    fn macro_with_params() {
        let tokens = lex("macro inc3 x\nadd x, x, 1\nendmacro");
        assert_eq!(tokens[0].kind, TokenKind::MacroBegin);
        assert_eq!(tokens[0].text, "inc3");
        assert_eq!(*kinds(&tokens).last().expect("token"), TokenKind::MacroEnd);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let tokens = lex("nop\n  halt");
        let halt = tokens
            .iter()
            .find(|t| t.text == "halt")
            .expect("halt token");
        assert_eq!(halt.pos.line, 2);
        assert_eq!(halt.pos.col, 3);
        assert_eq!(halt.pos.offset, 6);
    }
}
