use std::fmt;

/// A CPython `major.minor` release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
}

impl PythonVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        PythonVersion { major, minor }
    }
}

impl From<(u8, u8)> for PythonVersion {
    fn from((major, minor): (u8, u8)) -> Self {
        PythonVersion { major, minor }
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Inclusive magic number ranges, including the alpha/beta numbers of each release.
/// See `Lib/importlib/_bootstrap_external.py` in CPython.
const MAGIC_RANGES: &[(u16, u16, PythonVersion)] = &[
    (3000, 3131, PythonVersion::new(3, 0)),
    (3141, 3151, PythonVersion::new(3, 1)),
    (3160, 3180, PythonVersion::new(3, 2)),
    (3190, 3230, PythonVersion::new(3, 3)),
    (3250, 3310, PythonVersion::new(3, 4)),
    (3320, 3351, PythonVersion::new(3, 5)),
    (3360, 3379, PythonVersion::new(3, 6)),
    (3390, 3399, PythonVersion::new(3, 7)),
    (3400, 3419, PythonVersion::new(3, 8)),
    (3420, 3429, PythonVersion::new(3, 9)),
    (3430, 3449, PythonVersion::new(3, 10)),
    (3450, 3499, PythonVersion::new(3, 11)),
    (3500, 3549, PythonVersion::new(3, 12)),
    (3550, 3599, PythonVersion::new(3, 13)),
];

/// Maps a magic number (the little-endian integer in the first two bytes of a pyc file)
/// to the Python release that writes it.
pub fn python_version(magic: u16) -> Option<PythonVersion> {
    MAGIC_RANGES
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&magic))
        .map(|(_, _, version)| *version)
}
