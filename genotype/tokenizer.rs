// ========================================================================================
//                           Tab/newline tokenizer for VCF text
// ========================================================================================
//
// Fields are pulled out of a buffered stream one at a time, so a row with hundreds of
// thousands of genotype columns never exists as a single line in memory. Only one
// field is ever buffered, and its length is bounded.

use memchr::{memchr, memchr2};
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("field on line {line} is longer than {limit} bytes")]
    TooLong { line: usize, limit: usize },
}

/// One tab- or newline-delimited field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub bytes: &'a [u8],
    /// The field was the last one on its line.
    pub ends_line: bool,
}

pub struct TokenReader<R> {
    reader: R,
    token: Vec<u8>,
    max_len: usize,
    line: usize,
    mid_line: bool,
    line_done: bool,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            token: Vec::with_capacity(256),
            max_len,
            line: 1,
            mid_line: false,
            line_done: false,
        }
    }

    /// 1-based line number of the most recently returned field.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn next_token(&mut self) -> Result<Option<Token<'_>>, TokenizerError> {
        self.start_field();
        self.token.clear();
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                if self.token.is_empty() && !self.mid_line {
                    return Ok(None);
                }
                return Ok(Some(self.finish_token(true)));
            }
            match memchr2(b'\t', b'\n', buf) {
                Some(pos) => {
                    if self.token.len() + pos > self.max_len {
                        return Err(self.too_long());
                    }
                    let ends_line = buf[pos] == b'\n';
                    self.token.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    return Ok(Some(self.finish_token(ends_line)));
                }
                None => {
                    let len = buf.len();
                    if self.token.len() + len > self.max_len {
                        return Err(self.too_long());
                    }
                    self.token.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }

    /// Consumes up to `max` leading `byte`s at the start of a line and returns how many
    /// were taken. Lets `##` meta lines be skipped without buffering them.
    pub fn take_line_prefix(&mut self, byte: u8, max: usize) -> Result<usize, TokenizerError> {
        self.start_field();
        let mut taken = 0usize;
        while taken < max {
            let buf = self.reader.fill_buf()?;
            if buf.first() != Some(&byte) {
                break;
            }
            self.reader.consume(1);
            self.mid_line = true;
            taken += 1;
        }
        Ok(taken)
    }

    /// Skips one field without buffering it. Returns whether it ended the line, or
    /// `None` at end of input.
    pub fn skip_field(&mut self) -> Result<Option<bool>, TokenizerError> {
        self.start_field();
        let mut seen_any = false;
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                if !seen_any && !self.mid_line {
                    return Ok(None);
                }
                self.mid_line = false;
                self.line_done = true;
                return Ok(Some(true));
            }
            seen_any = true;
            match memchr2(b'\t', b'\n', buf) {
                Some(pos) => {
                    let ends_line = buf[pos] == b'\n';
                    self.reader.consume(pos + 1);
                    self.mid_line = !ends_line;
                    self.line_done = ends_line;
                    return Ok(Some(ends_line));
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    /// Skips the remainder of the current line and returns how many fields it held.
    /// Must only be called after a field that did not end its line.
    pub fn skip_rest_of_line(&mut self) -> Result<usize, TokenizerError> {
        let mut fields = 1usize;
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                self.mid_line = false;
                self.line_done = true;
                return Ok(fields);
            }
            let end = memchr(b'\n', buf);
            let scanned = &buf[..end.unwrap_or(buf.len())];
            fields += memchr::memchr_iter(b'\t', scanned).count();
            match end {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    self.mid_line = false;
                    self.line_done = true;
                    return Ok(fields);
                }
                None => {
                    let len = buf.len();
                    self.reader.consume(len);
                }
            }
        }
    }

    fn start_field(&mut self) {
        if self.line_done {
            self.line += 1;
            self.line_done = false;
        }
    }

    fn finish_token(&mut self, ends_line: bool) -> Token<'_> {
        if ends_line && self.token.last() == Some(&b'\r') {
            self.token.pop();
        }
        self.mid_line = !ends_line;
        self.line_done = ends_line;
        Token {
            bytes: &self.token,
            ends_line,
        }
    }

    fn too_long(&self) -> TokenizerError {
        TokenizerError::TooLong {
            line: self.line,
            limit: self.max_len,
        }
    }
}
