//! A lossless view of an INI-style file.
//!
//! Every line that is not explicitly modified is re-emitted exactly as it was
//! read, so sections owned by other tools survive a round trip byte-for-byte.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry {
        key: String,
        value: String,
        /// The original text; dropped once the value is changed.
        raw: Option<String>,
    },
    Other(String),
}

impl Line {
    /// `nested` is set while inside the block opened by a `key =` line with
    /// an empty value (`s3 =`); indented lines there belong to that value.
    fn parse(raw: &str, nested: bool) -> Self {
        let trimmed = raw.trim();
        let continuation = nested && raw.starts_with([' ', '\t']);
        if trimmed.is_empty() || trimmed.starts_with(['#', ';']) || continuation {
            return Line::Other(raw.to_string());
        }
        match trimmed.split_once('=') {
            Some((key, value)) => Line::Entry {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
                raw: Some(raw.to_string()),
            },
            None => Line::Other(raw.to_string()),
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Line::Entry {
                raw: Some(raw), ..
            }
            | Line::Other(raw) => out.push_str(raw),
            Line::Entry { key, value, raw: None } => {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
            }
        }
    }

    fn opens_block(&self) -> bool {
        matches!(self, Line::Entry { value, .. } if value.is_empty())
    }

    fn is_blank(&self) -> bool {
        matches!(self, Line::Other(raw) if raw.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    header: String,
    lines: Vec<Line>,
    blank_before: bool,
}

impl Section {
    fn new(name: &str, blank_before: bool) -> Self {
        Self {
            name: name.to_string(),
            header: format!("[{name}]"),
            lines: Vec::new(),
            blank_before,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key` to `value`, returning whether anything changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v, raw } = line {
                if k == key {
                    if v == value {
                        return false;
                    }
                    *v = value.to_string();
                    *raw = None;
                    return true;
                }
            }
        }
        let at = self
            .lines
            .iter()
            .rposition(|line| !line.is_blank())
            .map_or(0, |i| i + 1);
        self.lines.insert(
            at,
            Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
                raw: None,
            },
        );
        true
    }

    fn ends_with_blank(&self) -> bool {
        self.lines.last().is_some_and(Line::is_blank)
    }

    fn render(&self, out: &mut String) {
        if self.blank_before {
            out.push('\n');
        }
        out.push_str(&self.header);
        out.push('\n');
        for line in &self.lines {
            line.render(out);
            out.push('\n');
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    /// Lines before the first section header.
    preamble: Vec<Line>,
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        let mut nested = false;
        for raw in text.lines() {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() >= 2 {
                nested = false;
                doc.sections.push(Section {
                    name: trimmed[1..trimmed.len() - 1].trim().to_string(),
                    header: raw.to_string(),
                    lines: Vec::new(),
                    blank_before: false,
                });
                continue;
            }
            let line = Line::parse(raw, nested);
            if let Line::Entry { .. } = line {
                nested = line.opens_block();
            } else if !raw.starts_with([' ', '\t']) && !trimmed.is_empty() {
                nested = false;
            }
            match doc.sections.last_mut() {
                Some(section) => section.lines.push(line),
                None => doc.preamble.push(line),
            }
        }
        doc
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            line.render(&mut out);
            out.push('\n');
        }
        for section in &self.sections {
            section.render(&mut out);
        }
        out
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// The first section called `name`, appended at the end when missing.
    /// The flag is true when the section was created.
    pub fn section_or_insert(&mut self, name: &str) -> (&mut Section, bool) {
        match self.sections.iter().position(|s| s.name == name) {
            Some(index) => (&mut self.sections[index], false),
            None => {
                let blank_before = match self.sections.last() {
                    Some(last) => !last.ends_with_blank(),
                    None => self.preamble.last().is_some_and(|line| !line.is_blank()),
                };
                self.sections.push(Section::new(name, blank_before));
                let created = self.sections.len() - 1;
                (&mut self.sections[created], true)
            }
        }
    }

    /// Remove every section called `name`. Returns whether any existed.
    pub fn remove_section(&mut self, name: &str) -> bool {
        let before = self.sections.len();
        self.sections.retain(|s| s.name != name);
        self.sections.len() != before
    }
}
