//! Base45 text encoding as used in QR codes (RFC 9285).
//!
//! Every pair of input bytes is written as three characters, a trailing single
//! byte as two characters. Decoding reverses this group by group.

use num::Integer;

const ALPHABET: &[u8; 45] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ $%*+-./:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Base45Error {
    #[error("invalid Base45 character {character:?} at position {position}")]
    InvalidAlphabet { position: usize, character: char },
    #[error("truncated Base45 input: trailing group has a single character")]
    TruncatedGroup,
    #[error("Base45 group at position {position} encodes {value}, which does not fit its byte width")]
    GroupOverflow { position: usize, value: u32 },
}

fn value_of(position: usize, character: char) -> Result<u32, Base45Error> {
    let value = match character {
        '0'..='9' => u32::from(character) - u32::from('0'),
        'A'..='Z' => u32::from(character) - u32::from('A') + 10,
        ' ' => 36,
        '$' => 37,
        '%' => 38,
        '*' => 39,
        '+' => 40,
        '-' => 41,
        '.' => 42,
        '/' => 43,
        ':' => 44,
        _ => return Err(Base45Error::InvalidAlphabet { position, character }),
    };
    Ok(value)
}

/// Decodes a Base45 string into bytes.
///
/// The whole input is checked against the alphabet before any group is
/// evaluated, so the reported error always points at the first offending
/// character.
pub fn decode(text: &str) -> Result<Vec<u8>, Base45Error> {
    let values = text
        .chars()
        .enumerate()
        .map(|(position, character)| value_of(position, character))
        .collect::<Result<Vec<u32>, _>>()?;

    let mut out = Vec::with_capacity(Integer::div_ceil(&(values.len() * 2), &3));
    for (index, group) in values.chunks(3).enumerate() {
        let position = index * 3;
        match *group {
            [c, d, e] => {
                let value = c + d * 45 + e * 45 * 45;
                let pair = u16::try_from(value)
                    .map_err(|_| Base45Error::GroupOverflow { position, value })?;
                out.extend_from_slice(&pair.to_be_bytes());
            }
            [c, d] => {
                let value = c + d * 45;
                let byte = u8::try_from(value)
                    .map_err(|_| Base45Error::GroupOverflow { position, value })?;
                out.push(byte);
            }
            _ => return Err(Base45Error::TruncatedGroup),
        }
    }
    Ok(out)
}

/// Encodes bytes as Base45 text.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(Integer::div_ceil(&(bytes.len() * 3), &2));
    let mut push = |value: u16| out.push(char::from(ALPHABET[usize::from(value)]));
    for chunk in bytes.chunks(2) {
        match *chunk {
            [a, b] => {
                let n = u16::from_be_bytes([a, b]);
                let (rest, c) = n.div_rem(&45);
                let (e, d) = rest.div_rem(&45);
                push(c);
                push(d);
                push(e);
            }
            [a] => {
                let (d, c) = u16::from(a).div_rem(&45);
                push(c);
                push(d);
            }
            _ => unreachable!("chunks(2) yields one or two bytes"),
        }
    }
    out
}
