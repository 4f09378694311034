// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Format sniffing: classify a print stream by its leading magic bytes.
//
// Only a bounded prefix is inspected, so the cost is independent of job size.
// `Unknown` means "no match yet": callers re-sniff as more bytes arrive, and
// only an `Unknown` at seal time is final.
//
// Signatures:
//   PostScript  "%!"            (DSC streams continue with "PS-Adobe-x.y")
//   PDF         "%PDF"
//   XPS         "PK\x03\x04"    (ZIP local file header; XPS is an OPC package)
//
// Print drivers often prefix PostScript with a PJL job header wrapped in the
// Universal Exit Language marker, e.g.
//
//   ESC%-12345X@PJL JOB NAME="report"\r\n@PJL ENTER LANGUAGE=POSTSCRIPT\r\n%!PS-Adobe-3.0
//
// so the UEL marker, `@PJL` lines, a UTF-8 BOM, whitespace and Ctrl-D are
// skipped before matching.

use virtprint_core::types::InputFormat;

/// Number of leading bytes the sniffer looks at.
pub const SNIFF_WINDOW: usize = 1024;

/// Shortest signature; fewer payload bytes than this is always `Unknown`.
pub const MIN_SIGNATURE_LEN: usize = 2;

const POSTSCRIPT_MAGIC: &[u8] = b"%!";
const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// PJL Universal Exit Language.
const UEL: &[u8] = b"\x1b%-12345X";
const PJL_PREFIX: &[u8] = b"@PJL";
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Classify `prefix` (any leading slice of the job, possibly the whole job).
pub fn sniff(prefix: &[u8]) -> InputFormat {
    let window = &prefix[..prefix.len().min(SNIFF_WINDOW)];
    let payload = skip_preamble(window);

    if payload.len() < MIN_SIGNATURE_LEN {
        return InputFormat::Unknown;
    }

    if payload.starts_with(PDF_MAGIC) {
        InputFormat::Pdf
    } else if payload.starts_with(POSTSCRIPT_MAGIC) {
        InputFormat::PostScript
    } else if payload.starts_with(ZIP_MAGIC) {
        InputFormat::Xps
    } else {
        InputFormat::Unknown
    }
}

/// Whether more bytes could still change an `Unknown` verdict for a buffer
/// of `buffered` bytes.
pub fn verdict_may_change(buffered: usize) -> bool {
    buffered < SNIFF_WINDOW
}

/// Strip a leading PJL job header and insignificant bytes.
///
/// Returns an empty slice when the window ends inside the preamble (for
/// example an unterminated `@PJL` line), which reads as "incomplete".
fn skip_preamble(window: &[u8]) -> &[u8] {
    let mut rest = window.strip_prefix(UTF8_BOM).unwrap_or(window);

    loop {
        let before = rest.len();

        rest = trim_insignificant(rest);
        if let Some(after) = rest.strip_prefix(UEL) {
            rest = after;
        }
        if rest.starts_with(PJL_PREFIX) {
            match rest.iter().position(|&b| b == b'\n') {
                Some(eol) => rest = &rest[eol + 1..],
                None => return &[],
            }
        }

        if rest.len() == before {
            return rest;
        }
    }
}

fn trim_insignificant(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0c | 0x04))
        .unwrap_or(data.len());
    &data[start..]
}
