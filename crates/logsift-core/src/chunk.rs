//! Overlapping fixed-size windows over raw log text.
//!
//! Text is split into windows of `size` units that advance by
//! `size - overlap`, where a unit is a character, a whitespace-delimited
//! word, or a line (newline kept). The final partial window is always
//! emitted unpadded; a window is never emitted if it would only repeat the
//! overlap of the previous one.
//!
//! # Algorithm
//!
//! 1. Validate `0 < overlap < size`.
//! 2. Emit units `[i, i + size)` starting at `i = 0`.
//! 3. Stop once a window reaches the end of the text, else `i += size - overlap`.
//!
//! [`ChunkStream`] produces the same windows from any [`Read`] with a bounded
//! read buffer. Only one undersized fragment (a partial UTF-8 sequence, a
//! partial word, or a partial line) is carried between reads; lines are
//! assembled from bounded reads rather than read whole.
//!
//! # Example
//!
//! ```rust
//! use logsift_core::chunk::{chunk_text, ChunkUnit};
//!
//! let windows = chunk_text("abcdefghij", ChunkUnit::Chars, 4, 1).unwrap();
//! assert_eq!(windows, vec!["abcd", "defg", "ghij"]);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Default bytes pulled from the reader per fill in streaming mode.
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// What a window counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Chars,
    Words,
    Lines,
}

impl ChunkUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkUnit::Chars => "chars",
            ChunkUnit::Words => "words",
            ChunkUnit::Lines => "lines",
        }
    }
}

impl fmt::Display for ChunkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chars" => Ok(ChunkUnit::Chars),
            "words" => Ok(ChunkUnit::Words),
            "lines" => Ok(ChunkUnit::Lines),
            other => Err(Error::InvalidParameters(format!(
                "unknown chunk unit '{}': use chars, words, or lines",
                other
            ))),
        }
    }
}

/// Check `0 < overlap < size`.
pub fn validate(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidParameters("chunk_size must be > 0".into()));
    }
    if overlap == 0 {
        return Err(Error::InvalidParameters("overlap must be > 0".into()));
    }
    if overlap >= size {
        return Err(Error::InvalidParameters(format!(
            "overlap ({}) must be < chunk_size ({})",
            overlap, size
        )));
    }
    Ok(())
}

/// Split `text` into overlapping windows of the given unit.
///
/// Empty text yields no windows.
pub fn chunk_text(text: &str, unit: ChunkUnit, size: usize, overlap: usize) -> Result<Vec<String>> {
    validate(size, overlap)?;
    let step = size - overlap;

    let out = match unit {
        ChunkUnit::Chars => {
            // Byte offset of every char start, plus the end.
            let bounds: Vec<usize> = text
                .char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(text.len()))
                .collect();
            let n = bounds.len() - 1;
            window_ranges(n, size, step)
                .map(|(start, end)| text[bounds[start]..bounds[end]].to_string())
                .collect()
        }
        ChunkUnit::Words => {
            let words: Vec<&str> = text.split_whitespace().collect();
            window_ranges(words.len(), size, step)
                .map(|(start, end)| words[start..end].join(" "))
                .collect()
        }
        ChunkUnit::Lines => {
            let lines: Vec<&str> = text.split_inclusive('\n').collect();
            window_ranges(lines.len(), size, step)
                .map(|(start, end)| lines[start..end].concat())
                .collect()
        }
    };

    Ok(out)
}

/// Chunk `text` and attach the source identity to every window.
pub fn chunk_source(
    source_path: &str,
    text: &str,
    unit: ChunkUnit,
    size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    Ok(into_chunks(source_path, chunk_text(text, unit, size, overlap)?))
}

/// Number windows from 0 in order.
pub fn into_chunks(source_path: &str, windows: impl IntoIterator<Item = String>) -> Vec<Chunk> {
    windows
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            text,
            source_path: source_path.to_string(),
            sequence_index,
        })
        .collect()
}

fn window_ranges(n: usize, size: usize, step: usize) -> impl Iterator<Item = (usize, usize)> {
    let mut start = 0usize;
    let mut done = n == 0;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = (start + size).min(n);
        let range = (start, end);
        if start + size >= n {
            done = true;
        } else {
            start += step;
        }
        Some(range)
    })
}

/// Sliding window over a stream of units.
struct Window<T> {
    buf: VecDeque<T>,
    size: usize,
    step: usize,
    emitted: bool,
}

impl<T: Clone> Window<T> {
    fn new(size: usize, step: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(size),
            size,
            step,
            emitted: false,
        }
    }

    fn push(&mut self, unit: T) {
        self.buf.push_back(unit);
    }

    fn take_full(&mut self) -> Option<Vec<T>> {
        if self.buf.len() < self.size {
            return None;
        }
        let out: Vec<T> = self.buf.iter().take(self.size).cloned().collect();
        self.buf.drain(..self.step);
        self.emitted = true;
        Some(out)
    }

    /// The trailing window, unless it is only the overlap already emitted.
    fn take_rest(&mut self) -> Option<Vec<T>> {
        let overlap = self.size - self.step;
        if self.buf.is_empty() || (self.emitted && self.buf.len() <= overlap) {
            self.buf.clear();
            return None;
        }
        self.emitted = true;
        Some(self.buf.drain(..).collect())
    }
}

enum StreamState {
    Chars(Window<char>),
    Words { window: Window<String>, carry: String },
    Lines(Window<String>),
}

/// Streaming counterpart of [`chunk_text`].
///
/// Yields exactly the windows `chunk_text` would return for the whole
/// (lossily decoded) input, reading at most `read_size` bytes at a time.
pub struct ChunkStream<R: Read> {
    reader: BufReader<R>,
    state: StreamState,
    pending_bytes: Vec<u8>,
    ready: VecDeque<String>,
    done: bool,
}

impl<R: Read> ChunkStream<R> {
    pub fn new(reader: R, unit: ChunkUnit, size: usize, overlap: usize) -> Result<Self> {
        Self::with_read_size(reader, unit, size, overlap, DEFAULT_READ_SIZE)
    }

    pub fn with_read_size(
        reader: R,
        unit: ChunkUnit,
        size: usize,
        overlap: usize,
        read_size: usize,
    ) -> Result<Self> {
        validate(size, overlap)?;
        if read_size == 0 {
            return Err(Error::InvalidParameters("read_size must be > 0".into()));
        }
        let step = size - overlap;
        let state = match unit {
            ChunkUnit::Chars => StreamState::Chars(Window::new(size, step)),
            ChunkUnit::Words => StreamState::Words {
                window: Window::new(size, step),
                carry: String::new(),
            },
            ChunkUnit::Lines => StreamState::Lines(Window::new(size, step)),
        };
        Ok(Self {
            reader: BufReader::with_capacity(read_size, reader),
            state,
            pending_bytes: Vec::new(),
            ready: VecDeque::new(),
            done: false,
        })
    }

    /// Pull one read's worth of input. Returns `false` at end of input.
    fn fill(&mut self) -> io::Result<bool> {
        let data = self.reader.fill_buf()?;
        if data.is_empty() {
            return Ok(false);
        }
        let consumed = data.len();
        let mut scan_from = self.pending_bytes.len();
        self.pending_bytes.extend_from_slice(data);
        self.reader.consume(consumed);

        if let StreamState::Lines(window) = &mut self.state {
            // Only the unfinished line stays in `pending_bytes`.
            while let Some(offset) = self.pending_bytes[scan_from..].iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending_bytes.drain(..scan_from + offset + 1).collect();
                scan_from = 0;
                window.push(String::from_utf8_lossy(&line).into_owned());
                while let Some(lines) = window.take_full() {
                    self.ready.push_back(lines.concat());
                }
            }
            return Ok(true);
        }

        let text = decode_available(&mut self.pending_bytes);

        match &mut self.state {
            StreamState::Chars(window) => {
                for c in text.chars() {
                    window.push(c);
                    if let Some(chars) = window.take_full() {
                        self.ready.push_back(chars.into_iter().collect());
                    }
                }
            }
            StreamState::Words { window, carry } => {
                let joined = std::mem::take(carry) + &text;
                let mut parts: Vec<&str> = joined.split_whitespace().collect();
                let ends_with_space = joined.ends_with(char::is_whitespace);
                if !ends_with_space {
                    if let Some(last) = parts.pop() {
                        *carry = last.to_string();
                    }
                }
                for part in parts {
                    window.push(part.to_string());
                    while let Some(words) = window.take_full() {
                        self.ready.push_back(words.join(" "));
                    }
                }
            }
            StreamState::Lines(_) => {}
        }
        Ok(true)
    }

    fn finish(&mut self) {
        if let StreamState::Lines(window) = &mut self.state {
            if !self.pending_bytes.is_empty() {
                let line = std::mem::take(&mut self.pending_bytes);
                window.push(String::from_utf8_lossy(&line).into_owned());
                while let Some(lines) = window.take_full() {
                    self.ready.push_back(lines.concat());
                }
            }
        }

        // A truncated UTF-8 sequence at EOF decodes to one replacement char.
        let tail = if self.pending_bytes.is_empty() {
            None
        } else {
            self.pending_bytes.clear();
            Some('\u{FFFD}')
        };

        match &mut self.state {
            StreamState::Chars(window) => {
                if let Some(c) = tail {
                    window.push(c);
                    if let Some(chars) = window.take_full() {
                        self.ready.push_back(chars.into_iter().collect());
                    }
                }
                if let Some(chars) = window.take_rest() {
                    self.ready.push_back(chars.into_iter().collect());
                }
            }
            StreamState::Words { window, carry } => {
                if let Some(c) = tail {
                    carry.push(c);
                }
                if !carry.is_empty() {
                    window.push(std::mem::take(carry));
                    while let Some(words) = window.take_full() {
                        self.ready.push_back(words.join(" "));
                    }
                }
                if let Some(words) = window.take_rest() {
                    self.ready.push_back(words.join(" "));
                }
            }
            StreamState::Lines(window) => {
                if let Some(lines) = window.take_rest() {
                    self.ready.push_back(lines.concat());
                }
            }
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    self.finish();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Decode the complete UTF-8 prefix of `pending`, replacing invalid
/// sequences the way `String::from_utf8_lossy` does. An incomplete
/// trailing sequence stays in `pending` for the next read.
fn decode_available(pending: &mut Vec<u8>) -> String {
    let mut out = String::with_capacity(pending.len());
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(s) => {
                out.push_str(s);
                start = pending.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[start..start + valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push('\u{FFFD}');
                        start += valid + len;
                    }
                    None => {
                        start += valid;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    out
}
