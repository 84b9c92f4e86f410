//! Program image format for Octet programs.
//!
//! An image is a simple text file:
//! - One byte per line, written as a binary literal (up to 8 digits)
//! - Anything after a `#` is a comment
//! - Blank lines and comment-only lines are skipped without
//!   consuming an address
//!
//! Bytes load sequentially starting at address 0.

use std::path::Path;
use thiserror::Error;

/// A loaded program image.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    /// The program bytes, in load order.
    pub bytes: Vec<u8>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ProgramImage {
    /// Create a new empty image.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    /// Add a byte.
    pub fn push(&mut self, byte: u8, source: &str) {
        self.bytes.push(byte);
        self.source_lines.push(source.to_string());
    }

    /// Get the number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for ProgramImage {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse program image text.
pub fn parse_image(source: &str) -> Result<ProgramImage, ImageError> {
    let mut image = ProgramImage::new();

    for (line_num, line) in source.lines().enumerate() {
        // Split off any comment, keep what's left of it
        let literal = line.split('#').next().unwrap_or("").trim();

        // Skip blank lines and comment-only lines
        if literal.is_empty() {
            continue;
        }

        if literal.len() > 8 || !literal.bytes().all(|c| c == b'0' || c == b'1') {
            return Err(ImageError::Parse {
                line: line_num + 1,
                message: format!("expected a binary byte literal, found {:?}", literal),
            });
        }

        let byte = u8::from_str_radix(literal, 2).map_err(|e| ImageError::Parse {
            line: line_num + 1,
            message: e.to_string(),
        })?;

        image.push(byte, line.trim());
    }

    Ok(image)
}

/// Load a program image from disk.
///
/// A missing file is reported as [`ImageError::NotFound`] so the CLI
/// can exit with the documented status code.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImageError::NotFound(path.display().to_string())
        } else {
            ImageError::Io(e.to_string())
        }
    })?;

    parse_image(&source)
}

/// Save a program image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    use std::io::Write;

    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ImageError::Io(e.to_string()))?;

    writeln!(file, "# Octet program image").map_err(|e| ImageError::Io(e.to_string()))?;
    writeln!(file, "# {} bytes", image.len()).map_err(|e| ImageError::Io(e.to_string()))?;
    writeln!(file).map_err(|e| ImageError::Io(e.to_string()))?;

    for (addr, byte) in image.bytes.iter().enumerate() {
        writeln!(file, "{:08b} # {:03}", byte, addr)
            .map_err(|e| ImageError::Io(e.to_string()))?;
    }

    Ok(())
}

/// Save raw bytes directly to an image file.
pub fn save_bytes<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ImageError> {
    let image = ProgramImage {
        bytes: bytes.to_vec(),
        source_lines: bytes.iter().map(|b| format!("{:08b}", b)).collect(),
    };
    save_image(path, &image)
}

/// Errors that can occur during image operations.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("{0}: not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let source = "10000010\n00000000\n00001000\n";
        let image = parse_image(source).unwrap();

        assert_eq!(image.bytes, vec![0b10000010, 0, 8]);
    }

    #[test]
    fn test_parse_skips_blanks_and_comments() {
        let source = r#"
# a multiply program
10000010 # LDI R0,8
00000000
00001000

00000001 # HLT
"#;
        let image = parse_image(source).unwrap();

        // Comment-only and blank lines consume no addresses.
        assert_eq!(image.bytes, vec![0b10000010, 0, 8, 1]);
    }

    #[test]
    fn test_parse_short_literals() {
        // Leading zeros are optional.
        let image = parse_image("1\n101\n").unwrap();
        assert_eq!(image.bytes, vec![1, 5]);
    }

    #[test]
    fn test_parse_rejects_bad_literal() {
        let err = parse_image("10000010\n2\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_too_wide_literal() {
        let err = parse_image("111111111\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_image("/no/such/file.oct").unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[test]
    fn test_parse_and_run_multiply() {
        use crate::Cpu;

        let source = r#"
10000010 # LDI R0,8
00000000
00001000
10000010 # LDI R1,9
00000001
00001001
10100010 # MUL R0,R1
00000000
00000001
01000111 # PRN R0
00000000
00000001 # HLT
"#;
        let image = parse_image(source).unwrap();

        let mut cpu = Cpu::new();
        cpu.load_program(&image.bytes).unwrap();
        cpu.run().unwrap();

        assert_eq!(cpu.output(), &[72]);
    }
}
