// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Rc;

use core::cmp;
use core::fmt::{self, Debug, Formatter};
use core::iter::Peekable;
use core::str::CharIndices;

use anyhow::{anyhow, bail, Result};

/// Position of a term in policy source text.
///
/// Locations are carried by terms for diagnostics only. They never take part
/// in equality, ordering or hashing of terms.
#[derive(Clone, PartialEq, Eq)]
pub struct Location {
    pub file: Rc<str>,
    pub row: u32,
    pub col: u32,
}

impl Location {
    pub fn new(file: &str, row: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            row,
            col,
        }
    }
}

impl Debug for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.col)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.col)
    }
}

struct SourceInternal {
    file: Rc<str>,
    contents: String,
    lines: Vec<(u32, u32)>,
}

#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl cmp::PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.src, &other.src)
    }
}

impl cmp::Eq for Source {}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.src.file.fmt(f)
    }
}

impl Source {
    pub fn new(file: String, contents: String) -> Source {
        let mut lines = vec![];
        let mut start = 0u32;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match contents[..i].ends_with('\r') {
                    true => i as u32 - 1,
                    false => i as u32,
                };
                lines.push((start, end));
                start = i as u32 + 1;
            }
        }
        lines.push((start, contents.len() as u32));

        Self {
            src: Rc::new(SourceInternal {
                file: file.into(),
                contents,
                lines,
            }),
        }
    }

    pub fn file(&self) -> &Rc<str> {
        &self.src.file
    }

    pub fn contents(&self) -> &str {
        &self.src.contents
    }

    pub fn line(&self, idx: u32) -> &str {
        match self.src.lines.get(idx as usize) {
            Some((start, end)) => &self.src.contents[*start as usize..*end as usize],
            None => "",
        }
    }

    pub fn message(&self, line: u32, col: u32, kind: &str, msg: &str) -> String {
        if line == 0 || line as usize > self.src.lines.len() {
            return format!("{}: invalid line {} specified", self.src.file, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = (col as usize).saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n\
             {:<line_num_width$}| {}\n\
             {:<line_num_width$}| {:<col_spaces$}^\n\
             {}: {}",
            self.src.file,
            line,
            col,
            "",
            line,
            self.line(line - 1),
            "",
            "",
            kind,
            msg
        )
    }

    pub fn error(&self, line: u32, col: u32, msg: &str) -> anyhow::Error {
        anyhow!(self.message(line, col, "error", msg))
    }
}

#[derive(Clone)]
pub struct Span {
    pub source: Source,
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn text(&self) -> &str {
        &self.source.contents()[self.start as usize..self.end as usize]
    }

    pub fn location(&self) -> Location {
        Location {
            file: self.source.file().clone(),
            row: self.line,
            col: self.col,
        }
    }

    pub fn error(&self, msg: &str) -> anyhow::Error {
        self.source.error(self.line, self.col, msg)
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let t = self.text().escape_debug().to_string();
        let max = 32;
        let (txt, trailer) = match t.len() > max {
            true => (&t[0..max], "..."),
            false => (t.as_str(), ""),
        };
        write!(f, "{}:{}, \"{}{}\"", self.line, self.col, txt, trailer)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Symbol,
    String,
    RawString,
    Number,
    Ident,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token(pub TokenKind, pub Span);

#[derive(Clone)]
pub struct Lexer<'source> {
    source: Source,
    iter: Peekable<CharIndices<'source>>,
    line: u32,
    col: u32,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source Source) -> Self {
        Self {
            source: source.clone(),
            iter: source.contents().char_indices().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn peek(&mut self) -> (usize, char) {
        match self.iter.peek() {
            Some((index, chr)) => (*index, *chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn peekahead(&self, n: usize) -> (usize, char) {
        match self.iter.clone().nth(n) {
            Some((index, chr)) => (index, chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn make_token(&self, kind: TokenKind, line: u32, col: u32, start: usize, end: usize) -> Token {
        Token(
            kind,
            Span {
                source: self.source.clone(),
                line,
                col,
                start: start as u32,
                end: end as u32,
            },
        )
    }

    fn read_ident(&mut self) -> Token {
        let (start, _) = self.peek();
        let col = self.col;
        while matches!(self.peek().1, c if c.is_ascii_alphanumeric() || c == '_') {
            self.iter.next();
        }
        let end = self.peek().0;
        self.col += (end - start) as u32;
        self.make_token(TokenKind::Ident, self.line, col, start, end)
    }

    fn read_digits(&mut self) {
        while self.peek().1.is_ascii_digit() {
            self.iter.next();
        }
    }

    // Numbers follow the json grammar; the leading '-' is handled by the parser.
    fn read_number(&mut self) -> Result<Token> {
        let (start, chr) = self.peek();
        let col = self.col;
        self.iter.next();

        if chr != '0' {
            self.read_digits();
        }

        if self.peek().1 == '.' && self.peekahead(1).1.is_ascii_digit() {
            self.iter.next();
            self.read_digits();
        }

        if matches!(self.peek().1, 'e' | 'E') {
            self.iter.next();
            if matches!(self.peek().1, '+' | '-') {
                self.iter.next();
            }
            if !self.peek().1.is_ascii_digit() {
                return Err(self.source.error(self.line, col, "invalid number"));
            }
            self.read_digits();
        }

        let end = self.peek().0;
        self.col += (end - start) as u32;

        let ch = self.peek().1;
        if ch == '_' || ch == '.' || ch.is_ascii_alphanumeric() {
            return Err(self.source.error(self.line, self.col, "invalid number"));
        }

        Ok(self.make_token(TokenKind::Number, self.line, col, start, end))
    }

    fn read_raw_string(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        self.iter.next();
        self.col += 1;
        let (start, _) = self.peek();
        loop {
            let (_, ch) = self.peek();
            self.iter.next();
            match ch {
                '`' => {
                    self.col += 1;
                    break;
                }
                '\x00' => return Err(self.source.error(line, col, "unmatched `")),
                '\n' => {
                    self.line += 1;
                    self.col = 1;
                }
                _ => self.col += 1,
            }
        }
        let end = self.peek().0 - 1;
        Ok(self.make_token(TokenKind::RawString, line, col, start, end))
    }

    fn read_string(&mut self) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        self.iter.next();
        let (start, _) = self.peek();
        loop {
            let (offset, ch) = self.peek();
            let ch_col = col + 1 + (offset - start) as u32;
            match ch {
                '"' => break,
                '\x00' | '\n' => return Err(self.source.error(line, col, "unmatched \"")),
                '\\' => {
                    self.iter.next();
                    match self.peek().1 {
                        '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                            self.iter.next();
                        }
                        'u' => {
                            self.iter.next();
                            for _ in 0..4 {
                                if !self.peek().1.is_ascii_hexdigit() {
                                    return Err(self.source.error(
                                        line,
                                        ch_col,
                                        "invalid hex escape sequence",
                                    ));
                                }
                                self.iter.next();
                            }
                        }
                        _ => {
                            return Err(self.source.error(line, ch_col, "invalid escape sequence"))
                        }
                    }
                }
                c if c < '\u{0020}' => {
                    return Err(self.source.error(line, ch_col, "invalid character in string"))
                }
                _ => {
                    self.iter.next();
                }
            }
        }

        let (end, _) = self.peek();
        self.iter.next();
        self.col += self.source.contents()[start - 1..end + 1].chars().count() as u32;
        Ok(self.make_token(TokenKind::String, line, col, start, end))
    }

    fn skip_ws(&mut self) {
        // A tab is considered 4 space characters.
        loop {
            match self.peek().1 {
                ' ' | '\r' => self.col += 1,
                '\t' => self.col += 4,
                '\n' => {
                    self.col = 1;
                    self.line += 1;
                }
                '#' => {
                    while !matches!(self.peek().1, '\n' | '\x00') {
                        self.iter.next();
                    }
                    continue;
                }
                _ => break,
            }
            self.iter.next();
        }
    }

    fn read_symbol(&mut self, len: usize) -> Token {
        let (start, _) = self.peek();
        let col = self.col;
        for _ in 0..len {
            self.iter.next();
        }
        self.col += len as u32;
        self.make_token(TokenKind::Symbol, self.line, col, start, start + len)
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_ws();

        let (start, chr) = self.peek();
        let next = self.peekahead(1).1;

        match chr {
            '{' | '}' | '[' | ']' | '(' | ')' | '+' | '-' | '*' | '/' | '%' | '&' | '|' | ','
            | ';' | '.' => Ok(self.read_symbol(1)),
            ':' | '<' | '>' | '=' if next == '=' => Ok(self.read_symbol(2)),
            ':' | '<' | '>' | '=' => Ok(self.read_symbol(1)),
            '!' if next == '=' => Ok(self.read_symbol(2)),
            '"' => self.read_string(),
            '`' => self.read_raw_string(),
            '\x00' => Ok(self.make_token(TokenKind::Eof, self.line, self.col, start, start)),
            _ if chr.is_ascii_digit() => self.read_number(),
            _ if chr.is_ascii_alphabetic() || chr == '_' => Ok(self.read_ident()),
            _ => bail!(self.source.error(self.line, self.col, "invalid character")),
        }
    }
}
