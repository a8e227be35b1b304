use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::HciError;

/// A 48-bit Bluetooth hardware address.
///
/// BlueZ exposes addresses in two textual forms: colon-separated in the
/// `Address` property and underscore-separated inside device object paths
/// (`dev_FF_FF_FF_FF_FF_FF`), so parsing and formatting both take the
/// separator as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> MacAddress {
        MacAddress(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parses an address of the form `XX<sep>XX<sep>XX<sep>XX<sep>XX<sep>XX`.
    pub fn parse(text: &str, separator: char) -> Result<MacAddress, HciError> {
        let sep = regex::escape(&separator.to_string());
        let pattern = format!("^[[:xdigit:]]{{2}}(?:{sep}[[:xdigit:]]{{2}}){{5}}$");
        let shape = Regex::new(&pattern).expect("address pattern is well formed");
        if !shape.is_match(text) {
            return Err(HciError::Parse(text.to_string()));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(text.split(separator)) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| HciError::Parse(text.to_string()))?;
        }
        Ok(MacAddress(octets))
    }

    /// Formats the address with the given separator, e.g. `'_'` for use in
    /// bus object paths.
    pub fn to_delimited(&self, separator: char) -> String {
        let mut out = String::with_capacity(17);
        for (i, octet) in self.0.iter().enumerate() {
            if i != 0 {
                out.push(separator);
            }
            out.push_str(&format!("{octet:02X}"));
        }
        out
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_delimited(':'))
    }
}

impl FromStr for MacAddress {
    type Err = HciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddress::parse(s, ':')
    }
}
