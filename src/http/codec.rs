//! Body compression.
//!
//! Request bodies are gzip-compressed (buffered or streamed). Response
//! bodies are decoded from `gzip` or `deflate` according to their
//! `Content-Encoding`.

use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream::{self, BoxStream, StreamExt};

pub fn gzip(data: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Compress a byte stream chunk by chunk without buffering it whole.
pub fn gzip_stream(
    inner: BoxStream<'static, io::Result<Bytes>>,
) -> BoxStream<'static, io::Result<Bytes>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    stream::unfold(Some((inner, encoder)), |state| async move {
        let (mut inner, mut encoder) = state?;
        loop {
            match inner.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = encoder.write_all(&chunk) {
                        return Some((Err(e), None));
                    }
                    let ready = std::mem::take(encoder.get_mut());
                    if !ready.is_empty() {
                        return Some((Ok(Bytes::from(ready)), Some((inner, encoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    return match encoder.finish() {
                        Ok(tail) => Some((Ok(Bytes::from(tail)), None)),
                        Err(e) => Some((Err(e), None)),
                    };
                }
            }
        }
    })
    .boxed()
}

/// Decode a response body. Unknown encodings and empty bodies (304, HEAD,
/// 204 echoing `Content-Encoding`) pass through unchanged.
pub fn decode_body(content_encoding: Option<&str>, body: Bytes) -> io::Result<Bytes> {
    if body.is_empty() {
        return Ok(body);
    }
    let encoding = content_encoding.map(|e| e.trim().to_ascii_lowercase());
    let mut out = Vec::new();
    match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            GzDecoder::new(&body[..]).read_to_end(&mut out)?;
        }
        Some("deflate") => {
            // Servers disagree on whether "deflate" means zlib-wrapped or raw.
            if ZlibDecoder::new(&body[..]).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(&body[..]).read_to_end(&mut out)?;
            }
        }
        _ => return Ok(body),
    }
    Ok(Bytes::from(out))
}
