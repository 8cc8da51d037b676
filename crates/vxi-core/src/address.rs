//! Device name grammar
//!
//! VXI-11 clients name the device they want to talk to with strings such as
//! `inst0` or `gpib0,5` / `gpib0,5,2`. Parsing never fails outright: an
//! unparseable name still yields a [`DeviceAddress`] with `valid == false`
//! so the server can decide how strict to be.

use serde::{Deserialize, Serialize};

/// Highest primary or secondary GPIB address
pub const MAX_GPIB_ADDRESS: u8 = 30;

/// Interface family named by the leading letters of a device name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Instrument addressed directly (`inst<N>`)
    Inst,
    /// Instrument behind a GPIB gateway (`gpib<N>,<primary>[,<secondary>]`)
    Gpib,
    /// Anything else
    Other(String),
}

impl DeviceFamily {
    fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "inst" => DeviceFamily::Inst,
            "gpib" => DeviceFamily::Gpib,
            other => DeviceFamily::Other(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            DeviceFamily::Inst => "inst",
            DeviceFamily::Gpib => "gpib",
            DeviceFamily::Other(s) => s,
        }
    }
}

/// Parsed device name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Interface family
    pub family: DeviceFamily,
    /// Interface number (`0` in `inst0`)
    pub number: Option<u32>,
    /// GPIB primary address
    pub primary: Option<u8>,
    /// GPIB secondary address
    pub secondary: Option<u8>,
    /// Whether the whole name conforms to the grammar
    pub valid: bool,
    /// First comma-separated segment, lowercased
    head: String,
}

impl DeviceAddress {
    /// Parse a device name
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase();
        let mut segments = normalized.split(',').map(str::trim);
        let head = segments.next().unwrap_or_default().to_string();

        let prefix_len = head
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(head.len());
        let (prefix, digits) = head.split_at(prefix_len);
        let family = DeviceFamily::from_prefix(prefix);
        let number = if digits.is_empty() {
            None
        } else {
            digits.parse::<u32>().ok()
        };

        let rest: Vec<&str> = segments.collect();
        let mut valid = !prefix.is_empty() && number.is_some();
        let mut primary = None;
        let mut secondary = None;

        match family {
            DeviceFamily::Inst => {
                valid &= rest.is_empty();
            }
            DeviceFamily::Gpib => {
                if rest.len() > 2 {
                    valid = false;
                }
                primary = rest.first().and_then(|s| parse_gpib_address(s));
                secondary = rest.get(1).and_then(|s| parse_gpib_address(s));
                valid &= rest.first().is_none_or(|_| primary.is_some());
                valid &= rest.get(1).is_none_or(|_| secondary.is_some());
            }
            DeviceFamily::Other(_) => {
                valid = false;
            }
        }

        Self {
            family,
            number,
            primary,
            secondary,
            valid,
            head,
        }
    }

    /// Key used to look up the backing instrument
    ///
    /// The key is the family plus interface number (`gpib0` for
    /// `gpib0,5`), so an instrument can be found even when the trailing
    /// address part is malformed.
    pub fn instrument_key(&self) -> String {
        match self.number {
            Some(n) => format!("{}{}", self.family.as_str(), n),
            None => self.head.clone(),
        }
    }
}

fn parse_gpib_address(s: &str) -> Option<u8> {
    s.parse::<u8>().ok().filter(|a| *a <= MAX_GPIB_ADDRESS)
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.instrument_key())?;
        if let Some(p) = self.primary {
            write!(f, ",{}", p)?;
        }
        if let Some(s) = self.secondary {
            write!(f, ",{}", s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_inst() {
        let addr = DeviceAddress::parse("inst0");
        assert_eq!(addr.family, DeviceFamily::Inst);
        assert_eq!(addr.number, Some(0));
        assert!(addr.valid);
        assert_eq!(addr.instrument_key(), "inst0");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let addr = DeviceAddress::parse("  INST3 ");
        assert!(addr.valid);
        assert_eq!(addr.instrument_key(), "inst3");
    }

    #[test]
    fn test_parse_gpib_with_addresses() {
        let addr = DeviceAddress::parse("gpib0,5");
        assert_eq!(addr.family, DeviceFamily::Gpib);
        assert_eq!(addr.primary, Some(5));
        assert_eq!(addr.secondary, None);
        assert!(addr.valid);

        let addr = DeviceAddress::parse("gpib1,12,3");
        assert_eq!(addr.number, Some(1));
        assert_eq!(addr.primary, Some(12));
        assert_eq!(addr.secondary, Some(3));
        assert!(addr.valid);
        assert_eq!(addr.to_string(), "gpib1,12,3");
    }

    #[test]
    fn test_invalid_gpib_keeps_instrument_key() {
        let addr = DeviceAddress::parse("gpib0,abc");
        assert!(!addr.valid);
        assert_eq!(addr.instrument_key(), "gpib0");

        let addr = DeviceAddress::parse("gpib0,31");
        assert!(!addr.valid);

        let addr = DeviceAddress::parse("gpib0,1,2,3");
        assert!(!addr.valid);
    }

    #[test]
    fn test_invalid_names() {
        assert!(!DeviceAddress::parse("inst").valid);
        assert!(!DeviceAddress::parse("inst0,5").valid);
        assert!(!DeviceAddress::parse("scope0").valid);
        assert!(!DeviceAddress::parse("").valid);
        assert!(!DeviceAddress::parse("0inst").valid);
        assert_eq!(DeviceAddress::parse("scope").instrument_key(), "scope");
    }
}
