// Licensed under the Apache-2.0 license

//! Human-writable form of queued messages.
//!
//! Messages can be authored as text and decoded once into the wire form:
//!
//! * two uppercase hex digits are one data byte (`"D0"` is `0xD0`)
//! * a lowercase letter is a control letter (`s`, `p`, `r`)
//! * `'text'` is a literal run; inside it `''` stands for one quote
//! * `^^` is a literal `^`, and `^X` is control letter `X` (for `R` and `L`)
//! * anything else, such as spaces, is ignored
//!
//! `"s 50 D0 r 02 p"` therefore reads two bytes from register `0xD0` of the
//! device at write address `0x50`.

use crate::i2c::codec::{self, Token, ESC, START, STOP};
use crate::i2c::common::Error;
use crate::i2c::queue::ByteRing;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Frame {
    Open,
    Body,
    Done,
}

/// Iterator over the tokens of an ASCII message.
#[derive(Clone)]
pub struct AsciiTokens<'t> {
    text: &'t [u8],
    pos: usize,
    quoted: bool,
    framed: bool,
    frame: Frame,
}

impl<'t> AsciiTokens<'t> {
    #[must_use]
    pub fn new(text: &'t str) -> Self {
        Self {
            text: text.as_bytes(),
            pos: 0,
            quoted: false,
            framed: false,
            frame: Frame::Body,
        }
    }

    /// Wraps the decoded message in START and STOP. The text then starts
    /// with the address byte.
    #[must_use]
    pub fn framed(text: &'t str) -> Self {
        Self {
            framed: true,
            frame: Frame::Open,
            ..Self::new(text)
        }
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.text.get(self.pos + offset).copied()
    }

    fn fail(&mut self) -> Option<Result<Token, Error>> {
        self.frame = Frame::Done;
        Some(Err(Error::AsciiFormat))
    }

    fn body(&mut self) -> Option<Result<Token, Error>> {
        loop {
            let Some(c) = self.byte_at(0) else {
                if self.quoted {
                    return self.fail();
                }
                return None;
            };

            if self.quoted {
                if c == b'\'' {
                    if self.byte_at(1) == Some(b'\'') {
                        self.pos += 2;
                        return Some(Ok(Token::Data(b'\'')));
                    }
                    self.pos += 1;
                    self.quoted = false;
                    continue;
                }
                self.pos += 1;
                return Some(Ok(Token::Data(c)));
            }

            match c {
                b'\'' => {
                    self.pos += 1;
                    self.quoted = true;
                }
                b'^' => {
                    let Some(next) = self.byte_at(1) else {
                        return self.fail();
                    };
                    self.pos += 2;
                    if next == ESC {
                        return Some(Ok(Token::Data(ESC)));
                    }
                    return Some(Ok(Token::Control(next)));
                }
                b'a'..=b'z' => {
                    self.pos += 1;
                    return Some(Ok(Token::Control(c)));
                }
                _ => {
                    if let Some(high) = hex_value(c) {
                        let Some(low) = self.byte_at(1).and_then(hex_value) else {
                            return self.fail();
                        };
                        self.pos += 2;
                        return Some(Ok(Token::Data((high << 4) | low)));
                    }
                    self.pos += 1;
                }
            }
        }
    }
}

impl Iterator for AsciiTokens<'_> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.frame {
            Frame::Open => {
                self.frame = Frame::Body;
                Some(Ok(Token::Control(START)))
            }
            Frame::Body => match self.body() {
                Some(item) => Some(item),
                None if self.framed => {
                    self.frame = Frame::Done;
                    Some(Ok(Token::Control(STOP)))
                }
                None => {
                    self.frame = Frame::Done;
                    None
                }
            },
            Frame::Done => None,
        }
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Encoded size of an ASCII message.
///
/// # Errors
///
/// Returns [`Error::AsciiFormat`] on a lone hex digit, a dangling `^` or an
/// unterminated quote.
pub fn encoded_len(tokens: AsciiTokens<'_>) -> Result<usize, Error> {
    tokens.map(|t| t.map(Token::encoded_len)).sum()
}

/// Checks that `tokens` form whole transactions: the message opens with
/// START and every transaction is closed by STOP. A START inside an open
/// transaction is a repeated START.
///
/// # Errors
///
/// Returns [`Error::AsciiFormat`] for anything outside a transaction, a
/// missing final STOP, or malformed text.
pub fn check_transactions(tokens: AsciiTokens<'_>) -> Result<(), Error> {
    let mut open = false;
    for token in tokens {
        match token? {
            Token::Control(START) => open = true,
            Token::Control(STOP) if open => open = false,
            _ if !open => return Err(Error::AsciiFormat),
            _ => {}
        }
    }
    if open {
        return Err(Error::AsciiFormat);
    }
    Ok(())
}

/// Decodes `tokens` and stages them into `ring`, all or nothing.
///
/// # Errors
///
/// Returns [`Error::AsciiFormat`] for malformed input or text that is not a
/// run of whole transactions, and [`Error::NoSpace`] if the decoded message
/// does not fit. The ring is unchanged in all cases.
pub fn put_ascii(ring: &mut ByteRing<'_>, tokens: AsciiTokens<'_>) -> Result<(), Error> {
    check_transactions(tokens.clone())?;
    codec::put_tokens(ring, tokens.filter_map(Result::ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::codec::{READ, READ_LISTENERS};

    fn decode(tokens: AsciiTokens<'_>) -> Result<Vec<Token>, Error> {
        tokens.collect()
    }

    #[test]
    fn test_hex_pairs_and_controls() {
        let tokens = decode(AsciiTokens::new("s 50 D0 r 02 p")).unwrap();
        assert_eq!(
            tokens,
            [
                Token::Control(START),
                Token::Data(0x50),
                Token::Data(0xD0),
                Token::Control(READ),
                Token::Data(0x02),
                Token::Control(STOP),
            ]
        );
    }

    #[test]
    fn test_quoted_run_with_doubled_quote() {
        let tokens = decode(AsciiTokens::new("'it''s'")).unwrap();
        let bytes: Vec<u8> = tokens
            .into_iter()
            .map(|t| match t {
                Token::Data(b) => b,
                Token::Control(_) => panic!("unexpected control"),
            })
            .collect();
        assert_eq!(bytes, b"it's");
    }

    #[test]
    fn test_escapes() {
        let tokens = decode(AsciiTokens::new("^^ ^L 02 06")).unwrap();
        assert_eq!(
            tokens,
            [
                Token::Data(ESC),
                Token::Control(READ_LISTENERS),
                Token::Data(0x02),
                Token::Data(0x06),
            ]
        );
    }

    #[test]
    fn test_framing_adds_start_and_stop() {
        let tokens = decode(AsciiTokens::framed("80 01")).unwrap();
        assert_eq!(
            tokens,
            [
                Token::Control(START),
                Token::Data(0x80),
                Token::Data(0x01),
                Token::Control(STOP),
            ]
        );
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert_eq!(decode(AsciiTokens::new("5")), Err(Error::AsciiFormat));
        assert_eq!(decode(AsciiTokens::new("5G")), Err(Error::AsciiFormat));
        assert_eq!(decode(AsciiTokens::new("'open")), Err(Error::AsciiFormat));
        assert_eq!(decode(AsciiTokens::new("12 ^")), Err(Error::AsciiFormat));
        // Lowercase hex digits are not a byte.
        assert_eq!(decode(AsciiTokens::new("d0")), Err(Error::AsciiFormat));
    }

    #[test]
    fn test_put_ascii_is_atomic() {
        let mut storage = [0u8; 6];
        let mut ring = ByteRing::new(&mut storage);
        assert_eq!(
            put_ascii(&mut ring, AsciiTokens::new("s 50 01 02 03 p")),
            Err(Error::NoSpace)
        );
        assert_eq!(
            put_ascii(&mut ring, AsciiTokens::new("01 0")),
            Err(Error::AsciiFormat)
        );
        assert_eq!(ring.staged_len(), 0);
        put_ascii(&mut ring, AsciiTokens::new("s 50 p")).unwrap();
        assert_eq!(ring.staged_len(), 5);
        assert_eq!(encoded_len(AsciiTokens::new("'^'")), Ok(2));
    }

    #[test]
    fn test_partial_transactions_are_rejected() {
        let mut storage = [0u8; 32];
        let mut ring = ByteRing::new(&mut storage);
        for text in ["s 50 D0", "50 D0 p", "s 50 p 44", "s 50 p p", "p", "s 50 s 51 02"] {
            assert_eq!(
                put_ascii(&mut ring, AsciiTokens::new(text)),
                Err(Error::AsciiFormat),
                "{text}"
            );
        }
        assert_eq!(ring.staged_len(), 0);

        assert_eq!(check_transactions(AsciiTokens::new("")), Ok(()));
        assert_eq!(check_transactions(AsciiTokens::new("s 50 D0 s 51 02 p s 50 p")), Ok(()));
        assert_eq!(check_transactions(AsciiTokens::framed("50 D0")), Ok(()));
        // A quoted `p` is data, not STOP.
        assert_eq!(
            check_transactions(AsciiTokens::new("s 50 'p'")),
            Err(Error::AsciiFormat)
        );
    }
}
