/// Type tag of a bundle entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Raw object bytes, preceded by their id.
    Object,
    /// A manifest record as JSON.
    Manifest,
}

impl EntryKind {
    pub fn type_byte(self) -> u8 {
        match self {
            Self::Object => 1,
            Self::Manifest => 2,
        }
    }

    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Object),
            2 => Some(Self::Manifest),
            _ => None,
        }
    }
}
