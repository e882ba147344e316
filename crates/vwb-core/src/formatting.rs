//! Telegram HTML helpers and size-bounded message composition.

use chrono::NaiveDate;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render a release date as `2 Jan 2006`, or `-` when unknown.
pub fn format_release_date(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%-d %b %Y").to_string(),
        None => "-".to_string(),
    }
}

/// Link to the product page, shared by notices and the watch list.
pub fn product_title(label: &str, info_url: &str) -> String {
    format!(
        "# <b>{}</b> - <a href=\"{}\">source</a>\n",
        escape_html(label),
        escape_html(info_url)
    )
}

/// Packs blocks of text into messages under Telegram's length limits.
///
/// A block is a list of segments (a title plus one segment per version
/// entry). Blocks are kept whole whenever they fit under `hard_limit`; a
/// block that does not fit on its own is split between segments, then
/// between lines. Lengths are counted in characters.
#[derive(Debug)]
pub struct MessageChunker {
    soft_limit: usize,
    hard_limit: usize,
    buf: String,
    buf_len: usize,
    out: Vec<String>,
}

impl MessageChunker {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Self {
        let hard_limit = hard_limit.max(1);
        Self {
            soft_limit: soft_limit.min(hard_limit),
            hard_limit,
            buf: String::new(),
            buf_len: 0,
            out: Vec::new(),
        }
    }

    pub fn push_block<S: AsRef<str>>(&mut self, segments: &[S]) {
        let block: String = segments.iter().map(|s| s.as_ref()).collect();
        if char_len(&block) <= self.hard_limit {
            self.append(&block);
            return;
        }

        for piece in self.split_oversized(segments) {
            self.append(&piece);
        }
    }

    pub fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }

    fn append(&mut self, block: &str) {
        let len = char_len(block);
        if len == 0 {
            return;
        }
        if !self.buf.is_empty() && self.buf_len + len > self.hard_limit {
            self.flush();
        }
        self.buf.push_str(block);
        self.buf_len += len;
        if self.buf_len >= self.soft_limit {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        self.out.push(std::mem::take(&mut self.buf));
        self.buf_len = 0;
    }

    /// Regroup an oversized block into pieces that each fit the hard limit.
    fn split_oversized<S: AsRef<str>>(&self, segments: &[S]) -> Vec<String> {
        let mut units = Vec::new();
        for seg in segments {
            let seg = seg.as_ref();
            if char_len(seg) <= self.hard_limit {
                units.push(seg.to_string());
                continue;
            }
            for line in seg.split_inclusive('\n') {
                if char_len(line) <= self.hard_limit {
                    units.push(line.to_string());
                } else {
                    units.extend(split_chars(line, self.hard_limit));
                }
            }
        }

        let mut pieces = Vec::new();
        let mut cur = String::new();
        let mut cur_len = 0;
        for unit in units {
            let len = char_len(&unit);
            if !cur.is_empty() && cur_len + len > self.hard_limit {
                pieces.push(std::mem::take(&mut cur));
                cur_len = 0;
            }
            cur.push_str(&unit);
            cur_len += len;
        }
        if !cur.is_empty() {
            pieces.push(cur);
        }
        pieces
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_chars(s: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars.chunks(max).map(|c| c.iter().collect()).collect()
}
