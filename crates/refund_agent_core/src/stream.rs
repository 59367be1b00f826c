//! crates/refund_agent_core/src/stream.rs
//!
//! The structured-block protocol that lets tool results travel inside the
//! assistant's text stream.
//!
//! A tool result is encoded as exactly one `<ORDERS>…</ORDERS>` or
//! `<ORDER>…</ORDER>` span holding a single serialized JSON object, with
//! prose allowed before and after. In memory the stream is a sequence of
//! `Segment` values (a discriminated union); the tag form is only the
//! byte-serialized wire shape. The decoder is incremental: it tolerates
//! delimiters split across arbitrary chunk boundaries, releases prose as
//! soon as it is provably prose, and degrades a malformed span to prose
//! instead of dropping it.

use serde::Serialize;
use serde_json::Value;

/// The known structured-block tags. Unknown tags are not recognized and
/// pass through as prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// A list of order summaries (`<ORDERS>`).
    OrderList,
    /// A single order's detail (`<ORDER>`).
    OrderDetail,
}

impl BlockTag {
    pub const fn open(&self) -> &'static str {
        match self {
            BlockTag::OrderList => "<ORDERS>",
            BlockTag::OrderDetail => "<ORDER>",
        }
    }

    pub const fn close(&self) -> &'static str {
        match self {
            BlockTag::OrderList => "</ORDERS>",
            BlockTag::OrderDetail => "</ORDER>",
        }
    }
}

/// Open tags in match order. `<ORDERS>` must be tried before `<ORDER>`
/// because the latter is a prefix of the former.
const TAGS: [BlockTag; 2] = [BlockTag::OrderList, BlockTag::OrderDetail];

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Plain natural-language text, rendered as-is.
    Prose(String),
    /// A parsed structured block the client renders as a rich card.
    Block { tag: BlockTag, value: Value },
}

/// Serializes `payload` into a single delimited block. Callers embed the
/// result in a tool-result string; one block per tool result, never nested.
pub fn encode_block<T: Serialize>(tag: BlockTag, payload: &T) -> String {
    // Serialization of plain data structs cannot fail.
    let json = serde_json::to_string(payload).expect("structured block serialization");
    format!("{}{}{}", tag.open(), json, tag.close())
}

#[derive(Clone, Copy)]
enum DecodeState {
    /// Scanning prose; `buf` may end with a partial open delimiter.
    Prose,
    /// Between delimiters of `tag`; `buf` holds the raw span payload.
    InBlock(BlockTag),
}

/// Incremental decoder for one logical stream.
///
/// Feed chunks as they arrive; each call returns every segment that became
/// decidable. Call `finish` at end-of-stream to flush whatever remains
/// (an unterminated block is released as prose, open delimiter included).
pub struct StreamDecoder {
    state: DecodeState,
    buf: String,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            state: DecodeState::Prose,
            buf: String::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Segment> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();
        loop {
            let progressed = match self.state {
                DecodeState::Prose => self.scan_prose(&mut out),
                DecodeState::InBlock(tag) => self.scan_block(tag, &mut out),
            };
            if !progressed {
                break;
            }
        }
        out
    }

    /// Flushes the tail of the stream. Everything still buffered is prose:
    /// either a partial delimiter that never completed, or a block whose
    /// close delimiter never arrived.
    pub fn finish(mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        match self.state {
            DecodeState::Prose => push_prose(&mut out, std::mem::take(&mut self.buf)),
            DecodeState::InBlock(tag) => {
                let span = format!("{}{}", tag.open(), self.buf);
                push_prose(&mut out, span);
            }
        }
        out
    }

    /// Emits decidable prose and, on a complete open delimiter, switches to
    /// block collection. Returns whether any progress was made.
    fn scan_prose(&mut self, out: &mut Vec<Segment>) -> bool {
        let bytes = self.buf.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] != b'<' {
                continue;
            }
            let candidate = &self.buf[i..];
            for tag in TAGS {
                if let Some(rest) = candidate.strip_prefix(tag.open()) {
                    // Everything before the delimiter is settled prose.
                    let rest = rest.to_string();
                    let prose = self.buf[..i].to_string();
                    push_prose(out, prose);
                    self.buf = rest;
                    self.state = DecodeState::InBlock(tag);
                    return true;
                }
            }
            if TAGS.iter().any(|t| t.open().starts_with(candidate)) {
                // A delimiter may be forming across the chunk boundary:
                // release the prose ahead of it and wait for more input.
                push_prose(out, self.buf[..i].to_string());
                self.buf.drain(..i);
                return false;
            }
        }
        // No delimiter in sight; the whole buffer is prose.
        push_prose(out, std::mem::take(&mut self.buf));
        false
    }

    /// Looks for the close delimiter; on success parses the span, falling
    /// back to prose when the payload is not well-formed JSON.
    fn scan_block(&mut self, tag: BlockTag, out: &mut Vec<Segment>) -> bool {
        let Some(end) = self.buf.find(tag.close()) else {
            // Both delimiters must be seen before anything is emitted.
            return false;
        };
        let payload = self.buf[..end].to_string();
        self.buf.drain(..end + tag.close().len());
        self.state = DecodeState::Prose;
        match serde_json::from_str::<Value>(&payload) {
            Ok(value) => out.push(Segment::Block { tag, value }),
            // DecodeFailure: recovered locally by degrading the entire span
            // (delimiters included) to prose. Never dropped, never raised.
            Err(_) => push_prose(out, format!("{}{}{}", tag.open(), payload, tag.close())),
        }
        true
    }
}

/// Convenience for non-incremental callers: decodes a complete message.
pub fn decode_message(text: &str) -> Vec<Segment> {
    let mut decoder = StreamDecoder::new();
    let mut segments = decoder.feed(text);
    segments.extend(decoder.finish());
    segments
}

fn push_prose(out: &mut Vec<Segment>, text: String) {
    if text.is_empty() {
        return;
    }
    // Adjacent prose collapses so chunking never changes what a consumer
    // observes, only when it observes it.
    if let Some(Segment::Prose(prev)) = out.last_mut() {
        prev.push_str(&text);
    } else {
        out.push(Segment::Prose(text));
    }
}
