//! Closed vocabulary of category icons.
//!
//! Only the kebab-case key is persisted. Rendering is the caller's concern.

use std::fmt;
use std::str::FromStr;

use super::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Icon {
    BookOpen,
    Calculator,
    FlaskConical,
    Globe,
    Languages,
    Music,
    Palette,
    Dumbbell,
    Laptop,
    Microscope,
    Landmark,
    Atom,
    GraduationCap,
    Pencil,
    Brain,
    Leaf,
}

impl Icon {
    pub const ALL: [Icon; 16] = [
        Icon::BookOpen,
        Icon::Calculator,
        Icon::FlaskConical,
        Icon::Globe,
        Icon::Languages,
        Icon::Music,
        Icon::Palette,
        Icon::Dumbbell,
        Icon::Laptop,
        Icon::Microscope,
        Icon::Landmark,
        Icon::Atom,
        Icon::GraduationCap,
        Icon::Pencil,
        Icon::Brain,
        Icon::Leaf,
    ];

    /// Storage key.
    pub fn key(self) -> &'static str {
        match self {
            Icon::BookOpen => "book-open",
            Icon::Calculator => "calculator",
            Icon::FlaskConical => "flask-conical",
            Icon::Globe => "globe",
            Icon::Languages => "languages",
            Icon::Music => "music",
            Icon::Palette => "palette",
            Icon::Dumbbell => "dumbbell",
            Icon::Laptop => "laptop",
            Icon::Microscope => "microscope",
            Icon::Landmark => "landmark",
            Icon::Atom => "atom",
            Icon::GraduationCap => "graduation-cap",
            Icon::Pencil => "pencil",
            Icon::Brain => "brain",
            Icon::Leaf => "leaf",
        }
    }

    /// Lenient lookup used on the read path: unknown keys mean "no icon".
    pub fn from_key(key: &str) -> Option<Icon> {
        Icon::ALL.into_iter().find(|icon| icon.key() == key)
    }

    /// Strict lookup used on the write path.
    pub fn parse_key(key: Option<&str>) -> Result<Option<Icon>, CatalogError> {
        match key.map(str::trim) {
            None | Some("") => Ok(None),
            Some(k) => k.parse().map(Some),
        }
    }
}

impl FromStr for Icon {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Icon::from_key(s).ok_or_else(|| CatalogError::Validation(format!("unknown icon {s:?}")))
    }
}

impl fmt::Display for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
