//! Script tokenizer.

use std::fmt;

use crate::opcodes::{OP_DATA_75, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptError {
    TruncatedPush { offset: usize },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::TruncatedPush { offset } => {
                write!(f, "push at offset {offset} runs past end of script")
            }
        }
    }
}

impl std::error::Error for ScriptError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction<'a> {
    /// Data push, including the empty push of `OP_0`.
    Push(&'a [u8]),
    Op(u8),
}

impl<'a> Instruction<'a> {
    pub fn push_data(&self) -> Option<&'a [u8]> {
        match self {
            Instruction::Push(data) => Some(data),
            Instruction::Op(_) => None,
        }
    }
}

pub fn instructions(script: &[u8]) -> Result<Vec<Instruction<'_>>, ScriptError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < script.len() {
        let offset = pos;
        let op = script[pos];
        pos += 1;
        let len = match op {
            0x00..=OP_DATA_75 => op as usize,
            OP_PUSHDATA1 => read_len(script, &mut pos, 1, offset)?,
            OP_PUSHDATA2 => read_len(script, &mut pos, 2, offset)?,
            OP_PUSHDATA4 => read_len(script, &mut pos, 4, offset)?,
            _ => {
                out.push(Instruction::Op(op));
                continue;
            }
        };
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= script.len())
            .ok_or(ScriptError::TruncatedPush { offset })?;
        out.push(Instruction::Push(&script[pos..end]));
        pos = end;
    }
    Ok(out)
}

fn read_len(
    script: &[u8],
    pos: &mut usize,
    width: usize,
    offset: usize,
) -> Result<usize, ScriptError> {
    let bytes = script
        .get(*pos..*pos + width)
        .ok_or(ScriptError::TruncatedPush { offset })?;
    *pos += width;
    Ok(bytes
        .iter()
        .rev()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize))
}

/// Decodes a minimally-encoded script number of at most `max_len` bytes.
pub fn script_num(data: &[u8], max_len: usize) -> Option<i64> {
    if data.len() > max_len || data.len() > 8 {
        return None;
    }
    if data.is_empty() {
        return Some(0);
    }
    let mut value: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        value |= i64::from(*byte) << (8 * i);
    }
    let last = data[data.len() - 1];
    if last & 0x80 != 0 {
        value &= !(0x80i64 << (8 * (data.len() - 1)));
        value = -value;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_pushes_and_ops() {
        let script = [0x02, 0xaa, 0xbb, 0x00, 0x51, OP_PUSHDATA1, 0x01, 0xcc, 0xac];
        let ins = instructions(&script).expect("tokenize");
        assert_eq!(
            ins,
            vec![
                Instruction::Push(&[0xaa, 0xbb]),
                Instruction::Push(&[]),
                Instruction::Op(0x51),
                Instruction::Push(&[0xcc]),
                Instruction::Op(0xac),
            ]
        );
    }

    #[test]
    fn truncated_push_is_an_error() {
        assert_eq!(
            instructions(&[0x01, 0x02, 0x05, 0x00]),
            Err(ScriptError::TruncatedPush { offset: 2 })
        );
        assert!(instructions(&[OP_PUSHDATA2, 0x01]).is_err());
    }

    #[test]
    fn script_numbers() {
        assert_eq!(script_num(&[], 5), Some(0));
        assert_eq!(script_num(&[0x10, 0x27], 5), Some(10_000));
        assert_eq!(script_num(&[0x81], 5), Some(-1));
        assert_eq!(script_num(&[0, 0, 0, 0, 0, 1], 5), None);
    }
}
