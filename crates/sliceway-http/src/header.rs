/// One header line of a request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Header lines in wire order.
///
/// A slice sees request headers exactly as they arrived, repeated names
/// included, and its response headers are written back in the order it
/// added them. Names are matched without regard to ASCII case but written
/// with the case they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    lines: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a line after the existing ones. Earlier lines with the same name
    /// stay in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.lines.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Chaining form of [`insert`](Self::insert), handy when building a
    /// response head inline.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Value of the first line called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(|line| line.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Drop every line called `name`.
    pub fn remove(&mut self, name: &str) {
        self.lines.retain(|line| !line.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.lines.iter()
    }

    fn find(&self, name: &str) -> Option<&Header> {
        self.lines.iter().find(|line| line.name.eq_ignore_ascii_case(name))
    }
}

impl IntoIterator for Headers {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        Self {
            lines: pairs
                .into_iter()
                .map(|(name, value)| Header { name, value })
                .collect(),
        }
    }
}
