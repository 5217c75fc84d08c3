//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Largest body accepted from an adapter
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

fn eof_as_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterCrashed
    } else {
        Error::Io(e)
    }
}

/// Read one DAP message from the stream
///
/// Returns the JSON body. End of stream before a complete message means the
/// adapter went away and is reported as [`Error::AdapterCrashed`].
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(eof_as_crash)?;
        if bytes_read == 0 {
            return Err(Error::AdapterCrashed);
        }

        if line == "\r\n" || line == "\n" {
            if content_length.is_some() {
                break;
            }
            // Stray blank line between messages
            continue;
        }

        if let Some(value) = line.trim().strip_prefix("Content-Length:") {
            let parsed = value.trim().parse().map_err(|_| {
                Error::DapProtocol(format!("Invalid Content-Length: {}", value.trim()))
            })?;
            content_length = Some(parsed);
        }
    }

    let len = content_length.unwrap_or_default();
    if len > MAX_MESSAGE_BYTES {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_as_crash)?;

    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one DAP message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    json: &str,
) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
