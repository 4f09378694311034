// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader: inspect a PDF print stream (page count, document info) using
// the `lopdf` crate.

use lopdf::{Dictionary, Document, Object};
use tracing::{debug, instrument};
use virtprint_core::error::VirtprintError;

/// Read-only view of a PDF held in memory.
pub struct PdfReader {
    /// The underlying lopdf document.
    document: Document,
}

impl PdfReader {
    /// Create a reader from raw PDF bytes already in memory.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self, VirtprintError> {
        let document = Document::load_mem(data).map_err(|err| {
            VirtprintError::PdfError(format!("failed to load PDF from memory: {}", err))
        })?;

        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");

        Ok(Self { document })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// `/Title` from the document information dictionary.
    pub fn title(&self) -> Option<String> {
        self.info_string(b"Title")
    }

    /// `/Author` from the document information dictionary.
    pub fn author(&self) -> Option<String> {
        self.info_string(b"Author")
    }

    fn info_dictionary(&self) -> Option<&Dictionary> {
        let info = self.document.trailer.get(b"Info").ok()?;
        let (_, resolved) = self.document.dereference(info).ok()?;
        resolved.as_dict().ok()
    }

    fn info_string(&self, key: &[u8]) -> Option<String> {
        match self.info_dictionary()?.get(key).ok()? {
            Object::String(bytes, _) => {
                let text = decode_text_string(bytes);
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            _ => None,
        }
    }
}

/// Decode a PDF text string: UTF-16BE when it carries a BOM, bytes otherwise.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xfe, 0xff]) {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}
