// Licensed under the Apache-2.0 license

//! Host-side helpers for inspecting the queue encoding.

use anyhow::{bail, Context, Result};
use serbus_i2c::i2c::ascii::{self, AsciiTokens};
use serbus_i2c::i2c::codec::{Token, Tokens, READ, READ_DIRECT, READ_LISTENERS, START, STOP};
use serbus_i2c::i2c::queue::ByteRing;

/// Encodes an ASCII message exactly as `write_ascii` would queue it.
pub fn encode(text: &str, framed: bool) -> Result<Vec<u8>> {
    let tokens = if framed {
        AsciiTokens::framed(text)
    } else {
        AsciiTokens::new(text)
    };
    let len = ascii::encoded_len(tokens.clone()).context("Invalid message text")?;

    let mut storage = vec![0u8; len + 1];
    let mut ring = ByteRing::new(&mut storage);
    ascii::put_ascii(&mut ring, tokens).context("Failed to encode message")?;
    ring.commit();

    let mut out = vec![0u8; len];
    let copied = ring.read(&mut out);
    out.truncate(copied);
    Ok(out)
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair: String = pair.iter().collect();
            u8::from_str_radix(&pair, 16).with_context(|| format!("Invalid hex byte '{pair}'"))
        })
        .collect()
}

/// One line per queue element.
pub fn describe(bytes: &[u8]) -> Vec<String> {
    Tokens::new(bytes)
        .map(|token| match token {
            Token::Data(byte) => format!("data  {byte:#04x}"),
            Token::Control(letter) => {
                let name = match letter {
                    START => "start",
                    STOP => "stop",
                    READ => "read",
                    READ_DIRECT => "read-direct",
                    READ_LISTENERS => "read-listeners",
                    _ => "unknown",
                };
                format!("^{}    {name}", char::from(letter))
            }
        })
        .collect()
}
