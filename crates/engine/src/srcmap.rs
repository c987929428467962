// Forkscope - EVM Transaction Debugger
// Copyright (C) 2025 The Forkscope contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Source-map decompression and program-counter translation.
//!
//! A compressed source-map is a `;`-separated list with one entry per
//! opcode of the deployed bytecode; each entry holds up to five
//! `:`-separated fields `offset:length:file_id:jump_type:modifier_depth`,
//! and both missing and empty fields inherit from the previous entry.

use forkscope_common::SourceMapEntry;
use thiserror::Error;

/// Errors from source-map and bytecode walking.
#[derive(Debug, Error)]
pub enum SourceMapError {
    /// The program counter does not land on any instruction of the bytecode.
    #[error("program counter {0} not found in bytecode")]
    PcNotFound(u64),

    /// The bytecode contains a non-hex byte pair.
    #[error("invalid bytecode byte {0:?}")]
    InvalidByte(String),

    /// A source-map offset was not a decimal integer.
    #[error("invalid source-map offset {0:?}")]
    InvalidOffset(String),
}

/// Decompresses a source-map into one entry per opcode, in emission order.
pub fn decompress_source_map(srcmap: &str) -> Vec<SourceMapEntry> {
    let mut prev = SourceMapEntry::default();
    let mut entries = Vec::new();

    for compressed in srcmap.split(';') {
        let mut fields = compressed.split(':');
        let mut entry = prev.clone();

        inherit(&mut entry.offset, fields.next());
        inherit(&mut entry.length, fields.next());
        inherit(&mut entry.file_id, fields.next());
        inherit(&mut entry.jump_type, fields.next());
        inherit(&mut entry.modifier_depth, fields.next());

        entries.push(entry.clone());
        prev = entry;
    }

    entries
}

fn inherit(slot: &mut String, field: Option<&str>) {
    if let Some(value) = field {
        if !value.is_empty() {
            *slot = value.to_string();
        }
    }
}

/// Translates a program counter into an opcode-sequence index by walking
/// the deployed bytecode.
///
/// `PUSH1..PUSH32` carry 1..32 immediate bytes; a target PC landing inside
/// an immediate resolves to the index of the carrying `PUSH` instruction.
pub fn pc_to_opcode_index(bytecode: &str, target_pc: u64) -> Result<usize, SourceMapError> {
    let body = bytecode.strip_prefix("0x").unwrap_or(bytecode);

    let mut pc: u64 = 0;
    let mut index: usize = 0;
    let mut at = 0;

    while at + 1 < body.len() {
        if pc == target_pc {
            return Ok(index);
        }

        let byte = u8::from_str_radix(&body[at..at + 2], 16)
            .map_err(|_| SourceMapError::InvalidByte(body[at..at + 2].to_string()))?;

        if (0x60..=0x7f).contains(&byte) {
            // PUSHn with n immediate bytes following.
            let n = u64::from(byte - 0x5f);
            let next_pc = pc + n + 1;
            if target_pc > pc && target_pc < next_pc {
                return Ok(index);
            }
            pc = next_pc;
            at += (n as usize) * 2;
        } else {
            pc += 1;
        }

        index += 1;
        at += 2;
    }

    Err(SourceMapError::PcNotFound(target_pc))
}

/// Resolves the 1-based line number of a byte offset (decimal string) into
/// `source`. Offset 0 is line 1.
pub fn line_number(source: &str, byte_offset: &str) -> Result<i64, SourceMapError> {
    let offset: usize = byte_offset
        .parse()
        .map_err(|_| SourceMapError::InvalidOffset(byte_offset.to_string()))?;

    let prefix = &source.as_bytes()[..offset.min(source.len())];
    let newlines = prefix.iter().filter(|&&b| b == b'\n').count();
    Ok(newlines as i64 + 1)
}
