use std::fs;
use std::io::BufRead;
use std::path::Path;

use log::warn;

use crate::errors::{FuzzError, Result};
use crate::oracle::RoundMutations;

pub const SQL_INJECTION: &[&str] = &[
    r#"' OR '1'='1'--"#,
    r#"" OR ""=""#,
    r#"'; DROP TABLE users--"#,
    r#"' UNION SELECT NULL,NULL,NULL--"#,
    r#"1; WAITFOR DELAY '0:0:5'--"#,
    r#"'/**/OR/**/1=1--"#,
];

pub const SCRIPT_INJECTION: &[&str] = &[
    r#"<script>alert(1)</script>"#,
    r#""><svg/onload=alert(1)>"#,
    r#"javascript:alert(1)//"#,
    r#"{{7*7}}${7*7}<%= 7*7 %>"#,
];

pub const PATH_TRAVERSAL: &[&str] = &[
    "../../../../../../../../etc/passwd",
    "..\\..\\..\\..\\..\\..\\windows\\win.ini",
    "%2e%2e%2f%2e%2e%2f%2e%2e%2fetc%2fpasswd",
    "/dev/zero",
    "file:///etc/passwd",
];

pub const FORMAT_STRINGS: &[&str] = &["%s%s%s%s%s%s%s%s", "%n%n%n%n", "%x%x%x%x", "{0}{1}{2}"];

pub const SPECIAL_CHARACTERS: &[&str] = &[
    "",
    "\x00",
    "\r\n\r\nX-Injected: 1",
    "\u{feff}",
    "\u{202e}evil",
    "\u{fffd}\u{ffff}",
    "'\"`;|&<>$(){}[]\\",
    "\\u0000",
];

pub const NUMERIC_EDGES: &[&str] = &[
    "-1",
    "0",
    "2147483648",
    "-2147483649",
    "18446744073709551616",
    "1e309",
    "NaN",
    "0x7fffffff",
];

/// Overlong values, generated rather than spelled out.
const LONG_STRING_LENGTHS: &[usize] = &[256, 4096, 65536];

/// Hand-authored payloads injected without the mutation oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticCatalog {
    payloads: Vec<Vec<u8>>,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StaticCatalog {
    pub fn builtin() -> Self {
        let mut payloads: Vec<Vec<u8>> = [
            SQL_INJECTION,
            SCRIPT_INJECTION,
            PATH_TRAVERSAL,
            FORMAT_STRINGS,
            SPECIAL_CHARACTERS,
            NUMERIC_EDGES,
        ]
        .iter()
        .flat_map(|list| list.iter().map(|p| p.as_bytes().to_vec()))
        .collect();

        payloads.extend(LONG_STRING_LENGTHS.iter().map(|&n| vec![b'A'; n]));
        // invalid UTF-8
        payloads.push(vec![0xff, 0xfe, 0xc0, 0xaf]);

        Self { payloads }
    }

    pub fn empty() -> Self {
        Self { payloads: Vec::new() }
    }

    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            payloads: payloads.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends the payloads listed in `path`, one per line.
    pub fn extend_from_file(&mut self, path: &str) -> Result<usize> {
        let extra = load_list_from_file(path)?;
        if extra.is_empty() {
            warn!("No static payloads loaded from {}", path);
        }
        let added = extra.len();
        self.payloads.extend(extra.into_iter().map(String::into_bytes));
        Ok(added)
    }

    pub fn payloads(&self) -> &[Vec<u8>] {
        &self.payloads
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// One round per payload, the payload standing in for every field.
    pub fn rounds(&self) -> impl Iterator<Item = RoundMutations> + '_ {
        self.payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| RoundMutations::uniform(i, payload))
    }
}

/// Loads lines from a file, skipping empty lines and comments
pub fn load_list_from_file(path: &str) -> Result<Vec<String>> {
    let unreadable = |e: std::io::Error| FuzzError::Config(format!("Cannot read payload file {}: {}", path, e));
    let file = fs::File::open(Path::new(path)).map_err(unreadable)?;
    let mut lines = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line.map_err(unreadable)?;
        if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
            lines.push(line);
        }
    }
    Ok(lines)
}
