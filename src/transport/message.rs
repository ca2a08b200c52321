//! Transport messages
//!
//! A message carries one logical video segment, split into one or more data
//! chunks when it is larger than the stream's chunk limit. Chunks share the
//! segment's buffer, splitting never copies.

use bytes::{Bytes, BytesMut};

/// One logical segment on a transport stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    chunks: Vec<Bytes>,
}

impl Message {
    /// Message made of explicit chunks
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }

    /// Split a segment into chunks of at most `max_chunk` bytes
    ///
    /// A zero `max_chunk` keeps the segment in a single chunk.
    pub fn from_segment(segment: Bytes, max_chunk: usize) -> Self {
        if segment.is_empty() {
            return Self::default();
        }
        if max_chunk == 0 || segment.len() <= max_chunk {
            return Self {
                chunks: vec![segment],
            };
        }

        let mut rest = segment;
        let mut chunks = Vec::with_capacity(rest.len().div_ceil(max_chunk));
        while !rest.is_empty() {
            let at = max_chunk.min(rest.len());
            chunks.push(rest.split_to(at));
        }
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Total payload size in bytes
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the chunks back into one segment
    pub fn into_segment(self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.into_iter().next().unwrap_or_default(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len());
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}

/// A message read from a stream together with its offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub offset: u64,
    pub message: Message,
}

/// A discovery announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Routing key the announcement was published with
    pub routing_key: String,
    /// Raw payload, the UTF-8 stream name
    pub payload: Bytes,
}

impl Discovery {
    pub fn new(routing_key: impl Into<String>, stream_name: &str) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: Bytes::copy_from_slice(stream_name.as_bytes()),
        }
    }

    /// Announced stream name, `None` if the payload is not UTF-8
    pub fn stream_name(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
