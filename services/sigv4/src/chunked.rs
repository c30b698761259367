//! aws-chunked body signing.
//!
//! A streaming upload is framed as a sequence of signed chunks, each
//! signature chained to the one before it and seeded by the request
//! signature:
//!
//! ```text
//! <hex-length>;chunk-signature=<64 hex chars>\r\n<chunk bytes>\r\n
//! ```
//!
//! The stream ends with a zero-length chunk, optionally followed by
//! trailer headers and their own chained signature.

use std::fmt::{self, Debug};
use std::io;

use awsign_core::hash::{base64_encode, hex_hmac_sha256, hex_sha256};
use awsign_core::time::{format_iso8601, DateTime};
use awsign_core::{Error, Result};
use bytes::{Bytes, BytesMut};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::constants::{EMPTY_STRING_SHA256, HMAC_SHA256_PAYLOAD, HMAC_SHA256_TRAILER};

/// The default chunk size for [`ChunkedStream`], matching the S3
/// documentation examples.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Signs the chunks of an aws-chunked body.
///
/// Chunk N+1's signature depends on chunk N's, so one signer serves one
/// stream, in order. Obtain it from
/// [`SignedOutput::into_chunk_signer`](crate::SignedOutput::into_chunk_signer)
/// so the chain is seeded by the request signature.
pub struct ChunkSigner {
    signing_key: Vec<u8>,
    scope: String,
    timestamp: String,
    previous_signature: String,
}

impl Debug for ChunkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSigner")
            .field("scope", &self.scope)
            .field("timestamp", &self.timestamp)
            .field("previous_signature", &self.previous_signature)
            .finish_non_exhaustive()
    }
}

impl ChunkSigner {
    pub(crate) fn new(
        signing_key: Vec<u8>,
        scope: String,
        time: DateTime,
        seed_signature: String,
    ) -> Self {
        Self {
            signing_key,
            scope,
            timestamp: format_iso8601(time),
            previous_signature: seed_signature,
        }
    }

    /// The signature of the most recently signed chunk (or the seed).
    pub fn previous_signature(&self) -> &str {
        &self.previous_signature
    }

    fn roll_signature(&mut self, string_to_sign: &str) -> String {
        let signature = hex_hmac_sha256(&self.signing_key, string_to_sign.as_bytes());
        self.previous_signature = signature.clone();
        signature
    }

    /// Chunk string-to-sign:
    ///
    /// ```text
    /// AWS4-HMAC-SHA256-PAYLOAD
    /// <timestamp>
    /// <scope>
    /// <previous signature>
    /// <sha256 of empty string>
    /// <sha256 of chunk data>
    /// ```
    fn chunk_signature(&mut self, data_hash: &str) -> String {
        let string_to_sign = format!(
            "{HMAC_SHA256_PAYLOAD}\n{}\n{}\n{}\n{EMPTY_STRING_SHA256}\n{data_hash}",
            self.timestamp, self.scope, self.previous_signature,
        );
        self.roll_signature(&string_to_sign)
    }

    /// Sign one chunk and return it framed for the wire.
    pub fn sign_chunk(&mut self, data: &[u8]) -> Bytes {
        let signature = self.chunk_signature(&hex_sha256(data));

        let mut frame = BytesMut::with_capacity(data.len() + 96);
        frame
            .extend_from_slice(format!("{:x};chunk-signature={signature}\r\n", data.len()).as_bytes());
        frame.extend_from_slice(data);
        frame.extend_from_slice(b"\r\n");
        frame.freeze()
    }

    /// Emit the zero-length final chunk, then the trailer section if any
    /// trailers are given, then the terminating CRLF.
    ///
    /// The trailer signature covers the trailer lines in `name:value\n`
    /// form, chained like any chunk but under the
    /// `AWS4-HMAC-SHA256-TRAILER` string-to-sign.
    pub fn finish(mut self, trailers: &[(String, String)]) -> Bytes {
        let signature = self.chunk_signature(EMPTY_STRING_SHA256);

        let mut frame = BytesMut::new();
        frame.extend_from_slice(format!("0;chunk-signature={signature}\r\n").as_bytes());

        if !trailers.is_empty() {
            let mut block = String::new();
            for (name, value) in trailers {
                block.push_str(name);
                block.push(':');
                block.push_str(value);
                block.push('\n');
            }

            let string_to_sign = format!(
                "{HMAC_SHA256_TRAILER}\n{}\n{}\n{}\n{}",
                self.timestamp,
                self.scope,
                self.previous_signature,
                hex_sha256(block.as_bytes()),
            );
            let trailer_signature = self.roll_signature(&string_to_sign);

            for (name, value) in trailers {
                frame.extend_from_slice(format!("{name}:{value}\r\n").as_bytes());
            }
            frame.extend_from_slice(
                format!("x-amz-trailer-signature:{trailer_signature}\r\n").as_bytes(),
            );
        }

        frame.extend_from_slice(b"\r\n");
        frame.freeze()
    }
}

/// Trailing checksum emitted after the final chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// SHA-1, base64 encoded.
    Sha1,
    /// SHA-256, base64 encoded.
    Sha256,
}

impl ChecksumAlgorithm {
    /// The trailer header carrying this checksum. Callers declare it in
    /// `x-amz-trailer` before signing the request.
    pub fn header_name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha1 => "x-amz-checksum-sha1",
            ChecksumAlgorithm::Sha256 => "x-amz-checksum-sha256",
        }
    }

    /// Length of the base64 checksum value.
    fn encoded_len(&self) -> u64 {
        match self {
            ChecksumAlgorithm::Sha1 => 28,
            ChecksumAlgorithm::Sha256 => 44,
        }
    }
}

#[derive(Debug, Clone)]
enum ChecksumState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ChecksumState {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => ChecksumState::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => ChecksumState::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumState::Sha1(d) => d.update(data),
            ChecksumState::Sha256(d) => d.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            ChecksumState::Sha1(d) => base64_encode(&d.finalize()),
            ChecksumState::Sha256(d) => base64_encode(&d.finalize()),
        }
    }
}

/// An iterator adapter that turns a payload source into a signed
/// aws-chunked body.
///
/// The source is re-chunked to a fixed chunk size, each chunk signed and
/// framed, and the stream terminated with the final zero-length chunk
/// (plus the checksum trailer when configured).
///
/// An I/O error from the source poisons the stream: the error is yielded
/// once and the iterator ends. Partial output must be discarded and the
/// whole body re-signed from the original source.
pub struct ChunkedStream<I> {
    source: I,
    source_done: bool,
    /// Taken when the terminating chunk is emitted.
    signer: Option<ChunkSigner>,
    chunk_size: usize,
    buffer: BytesMut,
    checksum: Option<(ChecksumAlgorithm, ChecksumState)>,
    poisoned: bool,
}

impl<I> ChunkedStream<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    /// Wrap `source`, emitting signed chunks of `chunk_size` bytes.
    pub fn new(source: I, signer: ChunkSigner, chunk_size: usize) -> Self {
        Self {
            source,
            source_done: false,
            signer: Some(signer),
            chunk_size: chunk_size.max(1),
            buffer: BytesMut::new(),
            checksum: None,
            poisoned: false,
        }
    }

    /// Compute a trailing checksum over the decoded payload and emit it
    /// as a signed trailer after the final chunk.
    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = Some((algorithm, ChecksumState::new(algorithm)));
        self
    }

    fn fill_buffer(&mut self) -> Result<()> {
        while !self.source_done && self.buffer.len() < self.chunk_size {
            match self.source.next() {
                Some(Ok(data)) => {
                    if let Some((_, state)) = &mut self.checksum {
                        state.update(&data);
                    }
                    self.buffer.extend_from_slice(&data);
                }
                Some(Err(err)) => {
                    return Err(
                        Error::stream_signing("payload source failed mid-stream").with_source(err)
                    )
                }
                None => self.source_done = true,
            }
        }
        Ok(())
    }
}

impl<I> Iterator for ChunkedStream<I>
where
    I: Iterator<Item = io::Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.signer.is_none() {
            return None;
        }

        if let Err(err) = self.fill_buffer() {
            self.poisoned = true;
            return Some(Err(err));
        }

        if self.buffer.len() >= self.chunk_size {
            let data = self.buffer.split_to(self.chunk_size);
            let signer = self.signer.as_mut().expect("signer present until finished");
            return Some(Ok(signer.sign_chunk(&data)));
        }

        if !self.buffer.is_empty() {
            let data = self.buffer.split();
            let signer = self.signer.as_mut().expect("signer present until finished");
            return Some(Ok(signer.sign_chunk(&data)));
        }

        // Source drained: emit the terminating section exactly once.
        let signer = self.signer.take().expect("signer present until finished");
        let trailers = match self.checksum.take() {
            Some((algorithm, state)) => {
                vec![(algorithm.header_name().to_string(), state.finalize())]
            }
            None => Vec::new(),
        };
        Some(Ok(signer.finish(&trailers)))
    }
}

/// The on-wire length of an aws-chunked body, for the outer
/// `content-length` header.
///
/// `decoded_len` is the payload size before framing (what goes into
/// `x-amz-decoded-content-length`), `chunk_size` the size passed to
/// [`ChunkedStream::new`], and `checksum` the trailing checksum, if any.
pub fn encoded_length(
    decoded_len: u64,
    chunk_size: u64,
    checksum: Option<ChecksumAlgorithm>,
) -> u64 {
    let chunk_size = chunk_size.max(1);

    // <hex-length>;chunk-signature=<64 hex>\r\n<data>\r\n
    let frame = |len: u64| hex_digits(len) + 17 + 64 + 2 + len + 2;

    let mut total = (decoded_len / chunk_size) * frame(chunk_size);
    let remainder = decoded_len % chunk_size;
    if remainder > 0 {
        total += frame(remainder);
    }

    // Terminating zero-length chunk.
    total += 1 + 17 + 64 + 2;
    if let Some(algorithm) = checksum {
        // <name>:<base64>\r\n
        total += algorithm.header_name().len() as u64 + 1 + algorithm.encoded_len() + 2;
        total += "x-amz-trailer-signature:".len() as u64 + 64 + 2;
    }
    total + 2
}

fn hex_digits(mut n: u64) -> u64 {
    let mut digits = 1;
    n >>= 4;
    while n > 0 {
        digits += 1;
        n >>= 4;
    }
    digits
}
