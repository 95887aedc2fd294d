//! Wire protocol utilities
//!
//! Framing helpers for the line-oriented peer protocol: 4-byte command
//! tokens followed by newline-terminated bodies.

use super::command::TOKEN_LEN;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

/// Longest body line accepted after a command token
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Most bytes `LIST` will discard from its own line
pub const LIST_DISCARD_LEN: usize = 1024;

/// Read the next 4-byte command token
///
/// Bare line terminators between commands are skipped. Returns
/// `UnexpectedEof` when the stream ends before a full token.
pub async fn read_token<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<[u8; TOKEN_LEN]> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let skip = buf.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
        let exhausted = skip == buf.len();
        reader.consume(skip);
        if !exhausted {
            break;
        }
    }

    let mut token = [0u8; TOKEN_LEN];
    reader.read_exact(&mut token).await?;
    Ok(token)
}

/// Read one body line, including its terminator if present
///
/// Returns `UnexpectedEof` if the stream is already at its end and
/// `InvalidData` if no newline shows up within [`MAX_LINE_LEN`] bytes.
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = (&mut *reader).take(MAX_LINE_LEN as u64).read_until(b'\n', &mut line).await?;

    if read == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if line.len() == MAX_LINE_LEN && line.last() != Some(&b'\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }

    trace!("Read body line ({} bytes)", line.len());
    Ok(line)
}

/// Drop the rest of the current line if it is already buffered
///
/// Never waits for more input. Stops after the first newline or
/// [`LIST_DISCARD_LEN`] bytes, whichever comes first, and returns how many
/// bytes were dropped.
pub fn discard_buffered_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> usize {
    let buffered = reader.buffer();
    let limit = buffered.len().min(LIST_DISCARD_LEN);
    let discard = match buffered[..limit].iter().position(|&b| b == b'\n') {
        Some(newline) => newline + 1,
        None => limit,
    };
    reader.consume(discard);
    discard
}

/// Strip line terminators from the end of a line
pub fn strip_line_ending(line: &[u8]) -> &[u8] {
    let end = line.iter().rposition(|b| !matches!(b, b'\r' | b'\n')).map_or(0, |i| i + 1);
    &line[..end]
}

/// Strip surrounding spaces and line terminators
pub fn trim_line(line: &[u8]) -> &[u8] {
    let line = strip_line_ending(line);
    let start = line.iter().position(|&b| b != b' ').unwrap_or(line.len());
    let end = line.iter().rposition(|&b| b != b' ').map_or(start, |i| i + 1);
    &line[start..end]
}

/// Split a `SEND` body into destination and message
///
/// The destination is everything before the first space; the message is the
/// rest of the line without its terminator. A body without a space is all
/// destination and an empty message.
pub fn split_send_body(line: &[u8]) -> (String, String) {
    let line = String::from_utf8_lossy(strip_line_ending(line)).into_owned();
    let line = line.trim_start_matches(' ');
    match line.split_once(' ') {
        Some((dest, message)) => (dest.to_string(), message.to_string()),
        None => (line.to_string(), String::new()),
    }
}
