use serde::Serialize;

/// Memory size with a binary unit.
///
/// ```
/// use phoenix_core::util::Size;
///
/// assert_eq!(Size::GiB(16).bytes(), 16 << 30);
/// assert_eq!(Size::MiB(2048).gib(), 2);
/// ```
#[derive(Clone, Copy, Debug, Serialize)]
pub enum Size {
    /// Size in bytes
    B(usize),
    /// Size in kibibytes
    KiB(usize),
    /// Size in mebibytes
    MiB(usize),
    /// Size in gibibytes
    GiB(usize),
}

impl Size {
    /// Converts this size to bytes.
    pub const fn bytes(&self) -> usize {
        match self {
            Size::B(b) => *b,
            Size::KiB(k) => *k << 10,
            Size::MiB(m) => *m << 20,
            Size::GiB(g) => *g << 30,
        }
    }

    /// Whole gibibytes, rounded down.
    pub const fn gib(&self) -> usize {
        self.bytes() >> 30
    }
}

impl PartialEq for Size {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Size {}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Size::B(b) => write!(f, "{} B", b),
            Size::KiB(k) => write!(f, "{} KiB", k),
            Size::MiB(m) => write!(f, "{} MiB", m),
            Size::GiB(g) => write!(f, "{} GiB", g),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Size;

    #[test]
    fn sizes_compare_by_bytes() {
        assert_eq!(Size::GiB(1), Size::MiB(1024));
        assert_eq!(Size::KiB(4), Size::B(4096));
        assert_ne!(Size::GiB(16), Size::GiB(32));
        assert_eq!(Size::MiB(1536).gib(), 1);
    }
}
