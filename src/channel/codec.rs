// src/channel/codec.rs

//! Newline-delimited JSON framing for tunnel traffic.

use std::io;
use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame. Generation results can be large, but a
/// peer that never sends a newline must not grow the buffer forever.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub struct NdJsonCodec<T> {
    max_frame: usize,
    /// Bytes already scanned for a newline in the current partial frame.
    scanned: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> NdJsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            scanned: 0,
            marker: PhantomData,
        }
    }
}

impl<T> Default for NdJsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for NdJsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl<T: DeserializeOwned> Decoder for NdJsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, Self::Error> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(end) = newline else {
                if src.len() > self.max_frame {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame exceeds {} bytes without a newline", self.max_frame),
                    ));
                }
                self.scanned = src.len();
                return Ok(None);
            };

            self.scanned = 0;
            let frame = src.split_to(end + 1);
            let line = trim_line(&frame[..end]);
            if line.is_empty() {
                continue;
            }

            let item = serde_json::from_slice::<T>(line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            return Ok(Some(item));
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)
        .unwrap_or(start);
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::protocol::{Envelope, RemoteRequest, RemoteResponse};

    #[test]
    fn decodes_frames_split_across_reads() {
        let mut codec = NdJsonCodec::<Envelope<RemoteResponse>>::new();
        let mut buf = BytesMut::from(&b"{\"id\":7,\"body\":{\"ty"[..]);
        assert!(codec.decode(&mut buf).expect("partial").is_none());

        buf.extend_from_slice(b"pe\":\"pong\"}}\r\n");
        let env = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(env.id, 7);
        assert_eq!(env.body, RemoteResponse::Pong);
        assert!(buf.is_empty());
    }

    #[test]
    fn skips_blank_lines_between_frames() {
        let mut encoder = NdJsonCodec::<Envelope<RemoteRequest>>::new();
        let mut buf = BytesMut::from(&b"\n  \n"[..]);
        encoder
            .encode(
                Envelope {
                    id: 1,
                    body: RemoteRequest::Ping,
                },
                &mut buf,
            )
            .expect("encode");

        let mut decoder = NdJsonCodec::<Envelope<RemoteRequest>>::new();
        let env = decoder.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(env.body, RemoteRequest::Ping);
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut codec = NdJsonCodec::<Envelope<RemoteResponse>>::with_max_frame(8);
        let mut buf = BytesMut::from(&b"{\"id\":1,\"body\""[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
