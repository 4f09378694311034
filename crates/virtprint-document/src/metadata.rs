// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Best-effort job metadata: document name, user name, and page count.
//
// Sources, per format:
//   PostScript  DSC comments (%%Title, %%For, %%Pages) and the PJL job header
//               that drivers put in front of the stream
//   PDF         the page tree and the /Info dictionary
//   XPS         number of `.fpage` parts listed in the ZIP central directory
//
// Nothing here fails: missing or unreadable metadata is simply `None`.

use tracing::debug;
use virtprint_core::types::InputFormat;

use crate::pdf::PdfReader;

/// Bytes of the stream head searched for DSC and PJL header lines, and of
/// the tail searched for `(atend)` values.
const HEADER_WINDOW: usize = 64 * 1024;

/// Bytes of the stream tail searched for the ZIP central directory.
const TRAILER_WINDOW: usize = 4 * 1024 * 1024;

/// ZIP central directory file header signature.
const CENTRAL_DIRECTORY_SIG: &[u8] = b"PK\x01\x02";

/// Fixed part of a central directory file header, before the file name.
const CENTRAL_DIRECTORY_HEADER_LEN: usize = 46;

/// What could be learned about a job from its own bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub user: Option<String>,
    pub page_count: Option<u32>,
}

/// Inspect `data` according to its sniffed format.
pub fn inspect(data: &[u8], format: InputFormat) -> DocumentMetadata {
    let metadata = match format {
        InputFormat::PostScript => inspect_postscript(data),
        InputFormat::Pdf => inspect_pdf(data),
        InputFormat::Xps => DocumentMetadata {
            page_count: count_xps_pages(data),
            ..DocumentMetadata::default()
        },
        InputFormat::Unknown => DocumentMetadata::default(),
    };
    debug!(
        format = %format,
        title = ?metadata.title,
        user = ?metadata.user,
        pages = ?metadata.page_count,
        "job metadata"
    );
    metadata
}

fn inspect_postscript(data: &[u8]) -> DocumentMetadata {
    let head = &data[..data.len().min(HEADER_WINDOW)];
    let mut metadata = DocumentMetadata::default();
    let mut pages_at_end = false;

    for line in head.split(|&b| b == b'\n') {
        let line = trim_line(line);

        if let Some(value) = line.strip_prefix(b"%%Title:") {
            metadata.title = metadata.title.or_else(|| dsc_text(value));
        } else if let Some(value) = line.strip_prefix(b"%%For:") {
            metadata.user = metadata.user.or_else(|| dsc_text(value));
        } else if let Some(value) = line.strip_prefix(b"%%Pages:") {
            if metadata.page_count.is_none() {
                match dsc_pages(value) {
                    Some(pages) => metadata.page_count = Some(pages),
                    None => pages_at_end = true,
                }
            }
        } else if line.starts_with(b"@PJL") {
            let (job_name, user_name) = pjl_names(line);
            metadata.title = metadata.title.or(job_name);
            metadata.user = metadata.user.or(user_name);
        } else if line.starts_with(b"%%EndComments") {
            break;
        }
    }

    if pages_at_end {
        let tail_start = data.len().saturating_sub(HEADER_WINDOW);
        metadata.page_count = data[tail_start..]
            .split(|&b| b == b'\n')
            .filter_map(|line| trim_line(line).strip_prefix(b"%%Pages:"))
            .filter_map(dsc_pages)
            .last();
    }

    metadata
}

fn inspect_pdf(data: &[u8]) -> DocumentMetadata {
    match PdfReader::from_bytes(data) {
        Ok(reader) => DocumentMetadata {
            title: reader.title(),
            user: reader.author(),
            page_count: u32::try_from(reader.page_count()).ok().filter(|&n| n > 0),
        },
        Err(e) => {
            debug!(error = %e, "PDF metadata unavailable");
            DocumentMetadata::default()
        }
    }
}

/// Count `.fpage` parts in the ZIP central directory of an XPS package.
fn count_xps_pages(data: &[u8]) -> Option<u32> {
    let tail_start = data.len().saturating_sub(TRAILER_WINDOW);
    let tail = &data[tail_start..];

    let mut pages = 0u32;
    let mut offset = 0;
    while let Some(found) = find_subsequence(&tail[offset..], CENTRAL_DIRECTORY_SIG) {
        let header = offset + found;
        offset = header + CENTRAL_DIRECTORY_SIG.len();

        let Some(name_len) = tail
            .get(header + 28..header + 30)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        else {
            break;
        };
        let name_start = header + CENTRAL_DIRECTORY_HEADER_LEN;
        let Some(name) = tail.get(name_start..name_start + name_len) else {
            break;
        };
        if name.to_ascii_lowercase().ends_with(b".fpage") {
            pages += 1;
        }
    }

    (pages > 0).then_some(pages)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    // Drivers may put a PJL line right after the UEL marker.
    line.strip_prefix(b"\x1b%-12345X").unwrap_or(line)
}

/// Parse a DSC text value: `(Quarterly \(draft\))` or a bare word list.
fn dsc_text(value: &[u8]) -> Option<String> {
    let value = value.trim_ascii();
    let text = match value.strip_prefix(b"(").and_then(|v| v.strip_suffix(b")")) {
        Some(inner) => unescape_ps_string(inner),
        None => String::from_utf8_lossy(value).into_owned(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn unescape_ps_string(inner: &[u8]) -> String {
    let mut out = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter();
    while let Some(&b) = bytes.next() {
        if b == b'\\' {
            if let Some(&escaped) = bytes.next() {
                out.push(escaped);
            }
        } else {
            out.push(b);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `%%Pages: 3` → `Some(3)`; `(atend)` and garbage → `None`.
fn dsc_pages(value: &[u8]) -> Option<u32> {
    let value = value.trim_ascii();
    let digits = value.split(|b| b.is_ascii_whitespace()).next()?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Extract `JOB NAME="..."` and `USERNAME="..."` from one PJL line.
fn pjl_names(line: &[u8]) -> (Option<String>, Option<String>) {
    let text = String::from_utf8_lossy(line);
    let upper = text.to_ascii_uppercase();
    let job_name = if upper.starts_with("@PJL JOB") {
        pjl_value(&text, &upper, "NAME")
    } else if upper.starts_with("@PJL SET JOBNAME") {
        pjl_value(&text, &upper, "JOBNAME")
    } else {
        None
    };
    let user_name = if upper.starts_with("@PJL SET USERNAME") {
        pjl_value(&text, &upper, "USERNAME")
    } else {
        None
    };
    (job_name, user_name)
}

fn pjl_value(text: &str, upper: &str, key: &str) -> Option<String> {
    let key_at = upper.find(key)?;
    let after_key = &text[key_at + key.len()..];
    let after_eq = after_key.trim_start().strip_prefix('=')?.trim_start();
    let value = match after_eq.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => after_eq.split_whitespace().next()?,
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
