//! Filename validation and the level-dependent encode/decode rules of
//! Ecma-119 Appendix A plus the version suffix (`;N`).

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use iso_common::{Charset, CharsetD, CharsetFile};

/// The interchange level a volume is mastered at, matching Ecma-119
/// Section 10 (level 1) and its de-facto level-3 relaxation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileInterchange {
    L1 = 1,
    L2 = 2,
    L3 = 3,
    /// Parsed images that do not conform to any level; names are accepted
    /// as-is.
    NonConformant = 255,
}

impl FileInterchange {
    /// Encodes a display name into the on-disk primary-hierarchy form for
    /// this level: upper-cased, d1-restricted, `;1` appended to files.
    pub fn encode_file_name(&self, name: &str, is_dir: bool) -> Result<String, &'static str> {
        let upper = name.to_ascii_uppercase();
        let (stem, ext) = match upper.rsplit_once('.') {
            Some((s, e)) if !is_dir => (s, Some(e)),
            _ => (upper.as_str(), None),
        };
        match self {
            FileInterchange::L1 => {
                if stem.len() > 8 || ext.map_or(false, |e| e.len() > 3) {
                    return Err("name exceeds interchange level 1's 8.3 limit");
                }
            }
            FileInterchange::L2 | FileInterchange::L3 | FileInterchange::NonConformant => {
                let max = if is_dir { 207 } else { 222 };
                if upper.len() > max {
                    return Err("name exceeds interchange level 3's length limit");
                }
            }
        }
        for b in upper.bytes() {
            if b == b'.' || b == b';' {
                continue;
            }
            if !CharsetFile::is_valid(b) {
                return Err("name contains a character outside the d1-character set");
            }
        }
        if stem.is_empty() && ext.map_or(true, |e| e.is_empty()) {
            return Err("name must have a non-empty stem or extension");
        }
        Ok(if is_dir { upper } else { format!("{};1", upper) })
    }

    /// Strips the `;N` version suffix a primary-hierarchy file identifier
    /// carries, returning the name a caller would recognize.
    pub fn original(name: &str) -> String {
        match name.rsplit_once(';') {
            Some((stem, version)) if version.chars().all(|c| c.is_ascii_digit()) => stem.to_string(),
            _ => name.to_string(),
        }
    }
}

/// Validates a volume identifier (d-characters, ≤ 32 bytes).
pub fn validate_volume_identifier(name: &str) -> Result<(), &'static str> {
    if name.len() > 32 {
        return Err("volume identifier longer than 32 characters");
    }
    for b in name.bytes() {
        if !CharsetD::is_valid(b) {
            return Err("volume identifier contains a character outside the d-character set");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level1_appends_version() {
        let encoded = FileInterchange::L1.encode_file_name("foo.txt", false).unwrap();
        assert_eq!(encoded, "FOO.TXT;1");
    }

    #[test]
    fn level1_rejects_long_stem() {
        assert!(FileInterchange::L1.encode_file_name("averylongfilename.txt", false).is_err());
    }

    #[test]
    fn level3_allows_long_stem() {
        let encoded = FileInterchange::L3.encode_file_name("a_rather_long_but_valid_name.bin", false).unwrap();
        assert_eq!(encoded, "A_RATHER_LONG_BUT_VALID_NAME.BIN;1");
    }

    #[test]
    fn strips_version_suffix() {
        assert_eq!(FileInterchange::original("FOO.TXT;1"), "FOO.TXT");
        assert_eq!(FileInterchange::original("NOVERSION"), "NOVERSION");
    }

    #[test]
    fn directory_name_has_no_version() {
        let encoded = FileInterchange::L3.encode_file_name("subdir", true).unwrap();
        assert_eq!(encoded, "SUBDIR");
    }
}
