//! Export and import of the token buffer.
//!
//! Binary format: little-endian `u32` count followed by `count` 32-bit
//! signed token ids — no header, no checksum. JSON format:
//! `{"tokens":[..]}` with no whitespace.

use serde::Serialize;

use crate::error::{EditorError, EditorResult};
use crate::types::{SeqId, TokenFlags, TokenId};

use super::history::HistoryMode;
use super::TokenEditor;

#[derive(Serialize)]
struct TokensExport<'a> {
    tokens: &'a [TokenId],
}

impl TokenEditor {
    /// Compact JSON rendering of the buffer.
    pub fn export_json(&self) -> String {
        serde_json::to_string(&TokensExport {
            tokens: &self.tokens,
        })
        .unwrap_or_else(|_| r#"{"tokens":[]}"#.to_string())
    }

    /// Little-endian binary rendering of the buffer.
    pub fn export_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.tokens.len() * 4);
        out.extend_from_slice(&(self.tokens.len() as u32).to_le_bytes());
        for &token in &self.tokens {
            out.extend_from_slice(&token.to_le_bytes());
        }
        out
    }

    /// Replace the buffer with the contents of a binary export. Undersized
    /// buffers are rejected before any state changes; the load itself is
    /// recorded as a clear plus an insert, so it stays undoable.
    pub fn import_binary(&mut self, seq_id: SeqId, buf: &[u8]) -> EditorResult<()> {
        self.check_writable()?;
        if buf.len() < 4 {
            return Err(EditorError::BufferTooSmall(format!(
                "need at least 4 bytes for the count, have {}",
                buf.len()
            )));
        }

        let mut count_bytes = [0u8; 4];
        count_bytes.copy_from_slice(&buf[0..4]);
        let count = u32::from_le_bytes(count_bytes) as usize;

        let needed = 4 + count * 4;
        if buf.len() < needed {
            return Err(EditorError::BufferTooSmall(format!(
                "need {needed} bytes for {count} tokens, have {}",
                buf.len()
            )));
        }

        let tokens: Vec<TokenId> = buf[4..needed]
            .chunks_exact(4)
            .map(|c| TokenId::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.check_token_ids(&tokens)?;

        self.clear(seq_id)?;
        if !tokens.is_empty() {
            // Imported tokens carry vocabulary flags only, no provenance.
            self.splice(0, 0, &tokens, TokenFlags::empty(), seq_id, HistoryMode::Record)?;
        }
        Ok(())
    }
}
