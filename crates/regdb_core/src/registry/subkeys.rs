//! Subkey lists.

use crate::types::SequenceNumber;

/// The ordered child names of a key, with the sequence number at which
/// they were read.
///
/// Name comparisons ignore case, matching how the database addresses keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubkeyList {
    names: Vec<String>,
    seqnum: SequenceNumber,
}

impl SubkeyList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list from names, keeping their order and duplicates.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            seqnum: SequenceNumber::default(),
        }
    }

    pub(crate) fn with_seqnum(names: Vec<String>, seqnum: SequenceNumber) -> Self {
        Self { names, seqnum }
    }

    /// Returns the names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the sequence number the list was read at, 0 if it was built
    /// locally or the read timed out.
    #[must_use]
    pub const fn seqnum(&self) -> SequenceNumber {
        self.seqnum
    }

    /// Returns the number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the name at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Returns an iterator over the names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns true if a name matches ignoring case.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Appends a name unless it is already present.
    ///
    /// Returns true if the name was added.
    pub fn add_key(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Removes a name.
    ///
    /// Returns true if the name was present.
    pub fn remove_key(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.names.remove(index);
                true
            }
            None => false,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        let wanted = name.to_uppercase();
        self.names.iter().position(|n| n.to_uppercase() == wanted)
    }
}

impl<'a> IntoIterator for &'a SubkeyList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter()
    }
}
