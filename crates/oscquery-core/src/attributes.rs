//! OSCQuery attribute names, access modes, and OSC type tags.
//!
//! The attribute names are the JSON keys of the wire format and the
//! query-string tokens a client uses to ask for a single facet of a node.

use std::ops::BitOr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Required attributes ───────────────────────────────────────────────────────

pub const CONTENTS: &str = "CONTENTS";
pub const HOST_INFO: &str = "HOST_INFO";
pub const FULL_PATH: &str = "FULL_PATH";
pub const TYPE: &str = "TYPE";

// ── Optional attributes ───────────────────────────────────────────────────────

pub const ACCESS: &str = "ACCESS";
pub const CLIPMODE: &str = "CLIPMODE";
pub const CRITICAL: &str = "CRITICAL";
pub const DESCRIPTION: &str = "DESCRIPTION";
pub const EXTENDED_TYPE: &str = "EXTENDED_TYPE";
pub const HTML: &str = "HTML";
pub const OVERLOADS: &str = "OVERLOADS";
pub const RANGE: &str = "RANGE";
pub const TAGS: &str = "TAGS";
pub const UNIT: &str = "UNIT";
pub const VALUE: &str = "VALUE";

/// Attributes a client can request on their own with `?NAME`.
pub const QUERYABLE: [&str; 5] = [VALUE, TYPE, ACCESS, DESCRIPTION, FULL_PATH];

// ── Service types ─────────────────────────────────────────────────────────────

/// DNS-SD service type for OSCQuery HTTP servers.
pub const SERVICE_OSCJSON_TCP: &str = "_oscjson._tcp";

/// DNS-SD service type for plain OSC receivers.
pub const SERVICE_OSC_UDP: &str = "_osc._udp";

/// Fully qualified name queried on the local link for OSC receivers.
pub const LOCAL_OSC_UDP_SERVICE: &str = "_osc._udp.local";

/// Fully qualified name queried on the local link for OSCQuery servers.
pub const LOCAL_OSCJSON_SERVICE: &str = "_oscjson._tcp.local";

/// Both well-known names. An answer is only considered if it names one of these.
pub const MATCHED_SERVICE_NAMES: [&str; 2] = [LOCAL_OSC_UDP_SERVICE, LOCAL_OSCJSON_SERVICE];

// ── Access ────────────────────────────────────────────────────────────────────

/// Whether a node's value can be read, written, both, or neither.
///
/// On the wire this is the bare integer 0..=3. Modes compose with `|`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Access {
    #[default]
    NoValue = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl Access {
    /// Build from the low two bits of `bits`. Higher bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Access::NoValue,
            1 => Access::Read,
            2 => Access::Write,
            _ => Access::ReadWrite,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: Access) -> bool {
        self.bits() & other.bits() == other.bits()
    }

    pub fn is_readable(self) -> bool {
        self.contains(Access::Read)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Access::Write)
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access::from_bits(self.bits() | rhs.bits())
    }
}

impl TryFrom<u8> for Access {
    type Error = AttributeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 3 {
            return Err(AttributeError::UnknownAccess(value));
        }
        Ok(Access::from_bits(value))
    }
}

impl From<Access> for u8 {
    fn from(a: Access) -> u8 {
        a as u8
    }
}

impl std::str::FromStr for Access {
    type Err = AttributeError;

    /// Parses the names used in config files: `none`, `read`, `write`, `readwrite`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "novalue" => Ok(Access::NoValue),
            "read" | "r" => Ok(Access::Read),
            "write" | "w" => Ok(Access::Write),
            "readwrite" | "rw" => Ok(Access::ReadWrite),
            _ => Err(AttributeError::UnknownAccessName(s.to_string())),
        }
    }
}

impl Serialize for Access {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Access::try_from(raw).map_err(serde::de::Error::custom)
    }
}

// ── OSC type tags ─────────────────────────────────────────────────────────────

/// Rust types with a single-character OSC type tag.
pub trait OscTyped {
    const OSC_TYPE: &'static str;
}

macro_rules! osc_typed {
    ($($ty:ty => $tag:literal),* $(,)?) => {
        $(impl OscTyped for $ty { const OSC_TYPE: &'static str = $tag; })*
    };
}

osc_typed! {
    i32 => "i",
    u32 => "u",
    i64 => "h",
    f32 => "f",
    f64 => "d",
    String => "s",
    &str => "s",
    char => "c",
    Vec<u8> => "b",
    bool => "T",
}

/// Tag for `T`, for call sites that prefer a function over the associated const.
pub fn osc_type_for<T: OscTyped + ?Sized>() -> &'static str {
    T::OSC_TYPE
}

/// Every tag character an endpoint's TYPE may contain, array brackets included.
const KNOWN_TYPE_TAGS: &str = "ifsbhtdScrmTFNIu[]";

/// Whether `tag` is a non-empty string of known OSC type tags, e.g. `"ff"` or `"[ii]s"`.
pub fn is_valid_type_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.chars().all(|c| KNOWN_TYPE_TAGS.contains(c))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    #[error("unknown access value: {0}")]
    UnknownAccess(u8),

    #[error("unknown access mode name: {0:?}")]
    UnknownAccessName(String),
}
