use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead},
    path::Path,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames {
    names: HashMap<usize, String>,
}

impl ClassNames {
    pub fn new(names: HashMap<usize, String>) -> Self {
        Self { names }
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: labels
                .into_iter()
                .enumerate()
                .map(|(index, label)| (index, label.into()))
                .collect(),
        }
    }

    pub fn label(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The line number is the class index, `label,red,green,blue` lines keep only
/// the label.
pub fn load_labels_file(filepath: &Path) -> io::Result<ClassNames> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut names = HashMap::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        names.insert(index, label.to_string());
    }

    Ok(ClassNames::new(names))
}

// Ultralytics writes `names` as a Python dict literal: `{0: 'person', 1: "people's"}`
pub fn parse_names_metadata(raw: &str) -> Result<ClassNames, String> {
    let body = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| format!("names metadata is not a dict literal: {}", raw))?;

    let mut names = HashMap::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
            key.push(c);
        }
        let class_id: usize = key
            .parse()
            .map_err(|_| format!("invalid class index in names metadata: {:?}", key))?;

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some(':') {
            return Err(format!("missing ':' after class index {}", class_id));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let quote = match chars.next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("class {} name is not a quoted string", class_id)),
        };
        let mut name = String::new();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some(escaped) => name.push(escaped),
                    None => return Err("unterminated escape in names metadata".into()),
                },
                Some(c) if c == quote => break,
                Some(c) => name.push(c),
                None => return Err(format!("unterminated name for class {}", class_id)),
            }
        }

        names.insert(class_id, name);
    }

    Ok(ClassNames::new(names))
}
