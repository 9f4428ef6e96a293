// src/guid.rs

//! 128-bit identifiers used for container formats, pixel formats and codec ids.

use crate::error::ImagingError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const NIL: Guid = Guid::from_fields(0, 0, 0, [0; 8]);

    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl FromStr for Guid {
    type Err = ImagingError;

    /// Accepts `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, with or without braces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ImagingError::invalid(format!("malformed GUID '{}'", s));
        let trimmed = s.trim();
        let inner = match (trimmed.strip_prefix('{'), trimmed.strip_suffix('}')) {
            (Some(_), Some(_)) => &trimmed[1..trimmed.len() - 1],
            (None, None) => trimmed,
            _ => return Err(bad()),
        };

        let groups: Vec<&str> = inner.split('-').collect();
        let lengths = [8, 4, 4, 4, 12];
        if groups.len() != lengths.len()
            || groups
                .iter()
                .zip(lengths)
                .any(|(g, len)| g.len() != len || !g.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(bad());
        }

        let data1 = u32::from_str_radix(groups[0], 16).map_err(|_| bad())?;
        let data2 = u16::from_str_radix(groups[1], 16).map_err(|_| bad())?;
        let data3 = u16::from_str_radix(groups[2], 16).map_err(|_| bad())?;
        let tail = format!("{}{}", groups[3], groups[4]);
        let mut data4 = [0u8; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| bad())?;
        }
        Ok(Guid::from_fields(data1, data2, data3, data4))
    }
}
