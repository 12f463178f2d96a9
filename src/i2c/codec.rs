// Licensed under the Apache-2.0 license

//! Wire encoding of the transmit queue.
//!
//! Transactions are stored as a byte stream in which `^` (0x5E) introduces a
//! control sequence. Everything else is literal data; a literal `^` is written
//! as `^^`.
//!
//! | Sequence       | Meaning                                                   |
//! |----------------|-----------------------------------------------------------|
//! | `^s` addr      | START (or repeated START) followed by the address byte    |
//! | `^p`           | STOP, ends the transaction                                |
//! | `^r` n         | read `n` bytes into the bus receive queue                 |
//! | `^R` n slot    | read `n` bytes into direct destination `slot`             |
//! | `^L` n mask    | read `n` bytes into every listener whose bit is in `mask` |
//!
//! Parameter bytes are escaped like data. A read count of 255 reads until the
//! destination has no room left, 0 reads nothing.

use heapless::Vec;

use crate::i2c::common::Error;
use crate::i2c::queue::ByteRing;

pub const ESC: u8 = b'^';
pub const START: u8 = b's';
pub const STOP: u8 = b'p';
pub const READ: u8 = b'r';
pub const READ_DIRECT: u8 = b'R';
pub const READ_LISTENERS: u8 = b'L';

/// Read count meaning "until the destination is full".
pub const READ_UNTIL_FULL: u8 = 255;
/// Largest read count that is taken literally.
pub const MAX_READ: u8 = 254;

/// One decoded element of the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Data(u8),
    /// Control letter following an escape. A dangling escape at the end of
    /// the stream decodes as `Control(0)`.
    Control(u8),
}

impl Token {
    /// Wire bytes for this token and how many of them are used.
    #[must_use]
    pub fn encode(self) -> ([u8; 2], usize) {
        match self {
            Token::Data(ESC) => ([ESC, ESC], 2),
            Token::Data(byte) => ([byte, 0], 1),
            Token::Control(letter) => ([ESC, letter], 2),
        }
    }

    #[must_use]
    pub fn encoded_len(self) -> usize {
        self.encode().1
    }
}

/// A control sequence with its parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Control {
    Start(u8),
    Stop,
    Read(u8),
    ReadDirect { count: u8, slot: u8 },
    ReadListeners { count: u8, mask: u8 },
}

impl Control {
    #[must_use]
    pub fn tokens(self) -> Vec<Token, 3> {
        let mut out = Vec::new();
        let seq: &[Token] = match self {
            Control::Start(addr) => &[Token::Control(START), Token::Data(addr)],
            Control::Stop => &[Token::Control(STOP)],
            Control::Read(count) => &[Token::Control(READ), Token::Data(count)],
            Control::ReadDirect { count, slot } => &[
                Token::Control(READ_DIRECT),
                Token::Data(count),
                Token::Data(slot),
            ],
            Control::ReadListeners { count, mask } => &[
                Token::Control(READ_LISTENERS),
                Token::Data(count),
                Token::Data(mask),
            ],
        };
        // At most three tokens, always fits.
        let _ = out.extend_from_slice(seq);
        out
    }
}

/// Encoded length of a literal run.
#[must_use]
pub fn escaped_len(bytes: &[u8]) -> usize {
    bytes.len() + bytes.iter().filter(|&&b| b == ESC).count()
}

/// Stages a run of tokens into `ring`, all or nothing.
///
/// # Errors
///
/// Returns [`Error::NoSpace`] if the encoded run does not fit.
pub fn put_tokens<I>(ring: &mut ByteRing<'_>, tokens: I) -> Result<(), Error>
where
    I: IntoIterator<Item = Token> + Clone,
{
    let len: usize = tokens.clone().into_iter().map(Token::encoded_len).sum();
    ring.stage_iter(
        len,
        tokens.into_iter().flat_map(|token| {
            let (bytes, used) = token.encode();
            bytes.into_iter().take(used)
        }),
    )
}

/// # Errors
///
/// Returns [`Error::NoSpace`] if the byte does not fit.
pub fn put_byte(ring: &mut ByteRing<'_>, byte: u8) -> Result<(), Error> {
    put_tokens(ring, [Token::Data(byte)])
}

/// # Errors
///
/// Returns [`Error::NoSpace`] if the escaped run does not fit; nothing is
/// staged in that case.
pub fn put_array(ring: &mut ByteRing<'_>, bytes: &[u8]) -> Result<(), Error> {
    put_tokens(ring, bytes.iter().copied().map(Token::Data))
}

/// Stages the UTF-8 bytes of `text` as literal data, doubling escapes.
///
/// # Errors
///
/// Returns [`Error::NoSpace`] if the escaped run does not fit.
pub fn put_escaped_string(ring: &mut ByteRing<'_>, text: &str) -> Result<(), Error> {
    put_array(ring, text.as_bytes())
}

/// # Errors
///
/// Returns [`Error::NoSpace`] if the sequence does not fit.
pub fn put_control(ring: &mut ByteRing<'_>, control: Control) -> Result<(), Error> {
    put_tokens(ring, control.tokens())
}

/// Removes the next token from the committed part of `ring`.
pub fn pop_token(ring: &mut ByteRing<'_>) -> Option<Token> {
    let byte = ring.pop()?;
    if byte != ESC {
        return Some(Token::Data(byte));
    }
    match ring.pop() {
        Some(ESC) => Some(Token::Data(ESC)),
        Some(letter) => Some(Token::Control(letter)),
        None => Some(Token::Control(0)),
    }
}

/// Returns the next token without removing it.
#[must_use]
pub fn peek_token(ring: &ByteRing<'_>) -> Option<Token> {
    let byte = ring.peek()?;
    if byte != ESC {
        return Some(Token::Data(byte));
    }
    match ring.peek_at(1) {
        Some(ESC) => Some(Token::Data(ESC)),
        Some(letter) => Some(Token::Control(letter)),
        None => Some(Token::Control(0)),
    }
}

/// Decodes an encoded byte slice.
#[derive(Clone)]
pub struct Tokens<'b> {
    bytes: core::slice::Iter<'b, u8>,
}

impl<'b> Tokens<'b> {
    #[must_use]
    pub fn new(bytes: &'b [u8]) -> Self {
        Self {
            bytes: bytes.iter(),
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let byte = *self.bytes.next()?;
        if byte != ESC {
            return Some(Token::Data(byte));
        }
        match self.bytes.next() {
            Some(&ESC) => Some(Token::Data(ESC)),
            Some(&letter) => Some(Token::Control(letter)),
            None => Some(Token::Control(0)),
        }
    }
}
