//! HTML rendering sink
//!
//! Turns SGR colors and emphasis into inline HTML so colored console output
//! can be embedded in a web page. Cursor and erase commands have no meaning
//! in a document and are dropped.

use std::io::{self, Write};

use super::command::{sgr, CommandSink, SinkResult};

const COLOR_NAMES: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];
const WHITE: usize = 7;

/// Renders SGR attributes as HTML tags
#[derive(Debug, Default)]
pub struct HtmlSink {
    conceal_on: bool,
    /// Names of open tags, innermost first
    closing_tags: Vec<String>,
}

impl HtmlSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every open tag. Call once after the last write.
    pub fn finish(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.close_tags(out)
    }

    fn open_tag(&mut self, out: &mut dyn Write, tag: &str) -> io::Result<()> {
        write!(out, "<{}>", tag)?;
        let name = tag.split(' ').next().unwrap_or(tag);
        self.closing_tags.insert(0, name.to_string());
        Ok(())
    }

    fn close_tags(&mut self, out: &mut dyn Write) -> io::Result<()> {
        for name in self.closing_tags.drain(..) {
            write!(out, "</{}>", name)?;
        }
        Ok(())
    }
}

fn color_name(index: u8) -> &'static str {
    COLOR_NAMES
        .get(usize::from(index))
        .copied()
        .unwrap_or(COLOR_NAMES[WHITE])
}

impl CommandSink for HtmlSink {
    fn write_text(&mut self, out: &mut dyn Write, text: &[u8]) -> io::Result<()> {
        let mut start = 0;
        for (i, byte) in text.iter().enumerate() {
            let entity: &[u8] = match byte {
                b'"' => b"&quot;",
                b'&' => b"&amp;",
                b'<' => b"&lt;",
                b'>' => b"&gt;",
                _ => continue,
            };
            out.write_all(&text[start..i])?;
            out.write_all(entity)?;
            start = i + 1;
        }
        out.write_all(&text[start..])
    }

    fn set_attribute(&mut self, out: &mut dyn Write, code: u32) -> SinkResult {
        match code {
            sgr::CONCEAL_ON => {
                out.write_all(b"\x1b[8m")?;
                self.conceal_on = true;
            }
            sgr::BOLD => self.open_tag(out, "b")?,
            sgr::UNDERLINE => self.open_tag(out, "u")?,
            sgr::NORMAL | sgr::UNDERLINE_OFF => self.close_tags(out)?,
            _ => {}
        }
        Ok(())
    }

    fn set_foreground(&mut self, out: &mut dyn Write, color: u8) -> SinkResult {
        let tag = format!("span style=\"color: {};\"", color_name(color));
        self.open_tag(out, &tag)?;
        Ok(())
    }

    fn set_background(&mut self, out: &mut dyn Write, color: u8) -> SinkResult {
        let tag = format!("span style=\"background-color: {};\"", color_name(color));
        self.open_tag(out, &tag)?;
        Ok(())
    }

    fn attribute_reset(&mut self, out: &mut dyn Write) -> SinkResult {
        if self.conceal_on {
            out.write_all(b"\x1b[0m")?;
            self.conceal_on = false;
        }
        self.close_tags(out)?;
        Ok(())
    }
}
