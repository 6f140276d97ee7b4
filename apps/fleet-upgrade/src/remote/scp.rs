//! Push side of the scp sink protocol.
//!
//! The remote runs `scp -t <dir>`; we send `C<perm> <size> <name>\n`, the raw bytes and a
//! single NUL, then close stdin. The sink answers each step with a status byte: `0` for
//! ok, `1` (warning) or `2` (fatal) followed by a message line.

use std::io::{self, Read, Write};

use super::shell_quote;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHeader {
    pub permissions: String,
    pub size: u64,
    pub filename: String,
    pub directory: String,
}

impl SinkHeader {
    pub fn new(remote_path: &str, permissions: &str, size: u64) -> Result<Self, String> {
        if permissions.chars().count() != 4 {
            return Err(format!(
                "permissions must be 4 characters, got {permissions:?}"
            ));
        }
        if !permissions.chars().all(|c| ('0'..='7').contains(&c)) {
            return Err(format!("permissions must be octal, got {permissions:?}"));
        }
        let (directory, filename) = split_remote_path(remote_path);
        if filename.is_empty() || filename == "." || filename == ".." {
            return Err(format!("remote filename is empty in {remote_path:?}"));
        }
        Ok(Self {
            permissions: permissions.to_string(),
            size,
            filename: filename.to_string(),
            directory: directory.to_string(),
        })
    }

    pub fn control_line(&self) -> String {
        format!("C{} {} {}\n", self.permissions, self.size, self.filename)
    }

    pub fn sink_command(&self) -> String {
        format!("scp -t {}", shell_quote(&self.directory))
    }
}

fn split_remote_path(remote_path: &str) -> (&str, &str) {
    let trimmed = remote_path.trim();
    let without_trailing = trimmed.trim_end_matches('/');
    if without_trailing.is_empty() {
        return (if trimmed.is_empty() { "." } else { "/" }, "");
    }
    match without_trailing.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", without_trailing),
    }
}

/// Writes the control line, exactly `header.size` bytes of `payload` and the closing NUL.
pub fn write_stream<W, R>(writer: &mut W, header: &SinkHeader, payload: &mut R) -> io::Result<u64>
where
    W: Write + ?Sized,
    R: Read + ?Sized,
{
    writer.write_all(header.control_line().as_bytes())?;
    let mut limited = Read::take(&mut *payload, header.size);
    let sent = io::copy(&mut limited, writer)?;
    if sent != header.size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "local file shrank during transfer ({sent} of {} bytes)",
                header.size
            ),
        ));
    }
    writer.write_all(&[0])?;
    writer.flush()?;
    Ok(sent)
}

/// Checks the status bytes the sink sent back during a transfer.
pub fn check_acks(response: &[u8]) -> Result<(), String> {
    let mut rest = response;
    while let Some((&status, tail)) = rest.split_first() {
        match status {
            0 => rest = tail,
            1 | 2 => {
                let end = tail.iter().position(|b| *b == b'\n').unwrap_or(tail.len());
                let message = String::from_utf8_lossy(&tail[..end]).trim().to_string();
                let level = if status == 1 { "warning" } else { "error" };
                return Err(format!("scp sink {level}: {message}"));
            }
            other => {
                return Err(format!("unexpected scp sink response byte 0x{other:02x}"));
            }
        }
    }
    Ok(())
}
