//! Section model for patch application.
//!
//! Patches address sections by their exact heading line. Instead of regex
//! scans over the flat string, the text is parsed into an ordered list of
//! segments (free text and heading-led sections), mutated, and serialized
//! back at the boundary. Plain text in, plain text out.

/// A heading-led section. `lines[0]` is the heading line itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub lines: Vec<String>,
}

impl Section {
    /// Overwrite the whole section (heading included) with `content`.
    pub fn replace_with(&mut self, content: &str) {
        self.lines = content.split('\n').map(str::to_string).collect();
    }

    /// Concatenate `content` after the existing body, separated by a blank
    /// line, preserving the original body verbatim.
    pub fn append_body(&mut self, content: &str) {
        while matches!(self.lines.last(), Some(line) if line.trim().is_empty()) {
            self.lines.pop();
        }
        self.lines.push(String::new());
        self.lines
            .extend(content.trim().split('\n').map(str::to_string));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(Vec<String>),
    Section(Section),
}

/// An ordered sequence of free-text and section segments.
#[derive(Debug, Clone)]
pub struct Document {
    segments: Vec<Segment>,
}

/// Longest line still treated as a heading candidate.
const MAX_HEADING_LEN: usize = 100;

/// A heading line is non-indented, non-empty, short, preceded by a blank line
/// (or the start of text), and does not end with sentence punctuation. A line
/// whose trimmed content equals `known_title` is a heading regardless.
fn is_heading(lines: &[String], idx: usize, known_title: Option<&str>) -> bool {
    let line = &lines[idx];
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    if let Some(title) = known_title {
        if trimmed == title {
            return true;
        }
    }
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    if idx > 0 && !lines[idx - 1].trim().is_empty() {
        return false;
    }
    if trimmed.chars().count() > MAX_HEADING_LEN {
        return false;
    }
    !trimmed.ends_with(['.', ',', ';', ':', '!', '?'])
}

impl Document {
    /// Split `text` into segments. `known_title` is additionally recognized
    /// as a heading even when indented (the critic sometimes indents the
    /// headings it targets).
    pub fn parse(text: &str, known_title: Option<&str>) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let mut segments = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        let mut current: Option<Section> = None;

        for idx in 0..lines.len() {
            if is_heading(&lines, idx, known_title) {
                if let Some(section) = current.take() {
                    segments.push(Segment::Section(section));
                } else if !pending.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut pending)));
                }
                current = Some(Section {
                    title: lines[idx].trim().to_string(),
                    lines: vec![lines[idx].clone()],
                });
            } else if let Some(section) = current.as_mut() {
                section.lines.push(lines[idx].clone());
            } else {
                pending.push(lines[idx].clone());
            }
        }

        if let Some(section) = current {
            segments.push(Segment::Section(section));
        } else if !pending.is_empty() {
            segments.push(Segment::Text(pending));
        }

        Self { segments }
    }

    /// First section whose trimmed heading equals `title`.
    pub fn find_section_mut(&mut self, title: &str) -> Option<&mut Section> {
        self.segments.iter_mut().find_map(|segment| match segment {
            Segment::Section(section) if section.title == title.trim() => Some(section),
            _ => None,
        })
    }

    pub fn has_section(&self, title: &str) -> bool {
        self.segments.iter().any(
            |segment| matches!(segment, Segment::Section(section) if section.title == title.trim()),
        )
    }

    /// Append `content` as a new trailing block, separated from the existing
    /// text by one blank line and ending with a newline.
    pub fn append_block(&mut self, content: &str) {
        self.rstrip();
        let mut lines = vec![String::new()];
        lines.extend(content.trim().split('\n').map(str::to_string));
        lines.push(String::new());
        self.segments.push(Segment::Text(lines));
    }

    fn rstrip(&mut self) {
        while let Some(segment) = self.segments.last_mut() {
            let lines = match segment {
                Segment::Text(lines) => lines,
                Segment::Section(section) => &mut section.lines,
            };
            while matches!(lines.last(), Some(line) if line.trim().is_empty()) {
                lines.pop();
            }
            if lines.is_empty() {
                self.segments.pop();
            } else {
                break;
            }
        }
    }

    /// Reassemble the flat text.
    pub fn serialize(&self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        for segment in &self.segments {
            let segment_lines = match segment {
                Segment::Text(text) => text,
                Segment::Section(section) => &section.lines,
            };
            lines.extend(segment_lines.iter().map(String::as_str));
        }
        lines.join("\n")
    }
}
