//! Text extraction for the supported document formats.
//!
//! The loader supplies bytes plus a content type; this module returns plain
//! UTF-8 text, split into pages for paginated formats. Extraction never
//! panics on malformed input: every failure is an [`ExtractError`] and the
//! loader skips the file. The PDF parser can panic on some malformed files,
//! so its panics are caught and reported as [`ExtractError::Pdf`].

use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("Word 97-2003 extraction failed: {0}")]
    Doc(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Text of one page (or of a whole unpaginated file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// 1-based page number, `None` for unpaginated formats.
    pub page: Option<u32>,
    pub text: String,
}

/// Map a file extension to the content type it is extracted as.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "doc" => Some(MIME_DOC),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Extract text from `bytes` of the given content type.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<ExtractedPage>, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => whole(extract_docx(bytes)?),
        // Many ".doc" files in the wild are OOXML documents with the old extension.
        MIME_DOC if bytes.starts_with(ZIP_MAGIC) => whole(extract_docx(bytes)?),
        MIME_DOC => whole(extract_legacy_doc(bytes)?),
        MIME_TEXT | MIME_MARKDOWN => whole(decode_text(bytes)?),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn whole(text: String) -> Result<Vec<ExtractedPage>, ExtractError> {
    Ok(vec![ExtractedPage { page: None, text }])
}

fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<ExtractedPage>, ExtractError> {
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|payload| ExtractError::Pdf(format!("parser panicked: {}", panic_message(&*payload))))?
    .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| ExtractedPage {
            page: Some(i as u32 + 1),
            text,
        })
        .collect())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a line break.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Maximum bytes read from one stream of a Word 97-2003 compound file.
const MAX_DOC_STREAM_BYTES: u64 = 50 * 1024 * 1024;

const FIB_IDENT: u16 = 0xA5EC;
const FIB_ENCRYPTED: u16 = 0x0100;
const FIB_WHICH_TABLE: u16 = 0x0200;
/// Offset of `fcClx` inside the FibRgFcLcb97 blob; `lcbClx` follows it.
const FC_CLX_OFFSET: usize = 0x108;
const PIECE_COMPRESSED: u32 = 0x4000_0000;

/// Windows-1252 code points for bytes 0x80..=0x9F; the rest match Latin-1.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}', '\u{17D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}', '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
];

/// One entry of the piece table: a run of characters stored contiguously
/// in the `WordDocument` stream.
struct Piece {
    chars: usize,
    offset: usize,
    compressed: bool,
}

/// Read the main story of a Word 97-2003 binary document.
///
/// Text is reassembled from the piece table (`Clx`) in the table stream.
/// Each piece is either 8-bit Windows-1252 or UTF-16LE. Only the first
/// `ccpText` characters are returned, so headers, footnotes, and comments
/// are left out.
fn extract_legacy_doc(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut file = cfb::CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| ExtractError::Doc(e.to_string()))?;
    let word = read_stream(&mut file, "/WordDocument")?;

    if le_u16(&word, 0)? != FIB_IDENT {
        return Err(ExtractError::Doc("WordDocument stream has no Word header".to_string()));
    }
    let flags = le_u16(&word, 0x0A)?;
    if flags & FIB_ENCRYPTED != 0 {
        return Err(ExtractError::Doc("document is encrypted".to_string()));
    }
    let csw = le_u16(&word, 32)? as usize;
    let cslw_at = 34 + csw * 2;
    let cslw = le_u16(&word, cslw_at)? as usize;
    let ccp_text = le_u32(&word, cslw_at + 2 + 12)? as usize;
    let blob = cslw_at + 2 + cslw * 4 + 2;
    let fc_clx = le_u32(&word, blob + FC_CLX_OFFSET)? as usize;
    let lcb_clx = le_u32(&word, blob + FC_CLX_OFFSET + 4)? as usize;

    let table_name = if flags & FIB_WHICH_TABLE != 0 { "/1Table" } else { "/0Table" };
    let table = read_stream(&mut file, table_name)?;
    let clx = table
        .get(fc_clx..fc_clx.saturating_add(lcb_clx))
        .ok_or_else(|| truncated("Clx"))?;

    let mut text = String::new();
    let mut remaining = ccp_text;
    for piece in piece_table(clx)? {
        if remaining == 0 {
            break;
        }
        let count = piece.chars.min(remaining);
        remaining -= count;
        decode_piece(&word, &piece, count, &mut text)?;
    }
    Ok(text.trim_end().to_string())
}

fn read_stream(
    file: &mut cfb::CompoundFile<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let label = name.trim_start_matches('/');
    let stream = file
        .open_stream(name)
        .map_err(|e| ExtractError::Doc(format!("{} stream: {}", label, e)))?;
    let mut buf = Vec::new();
    stream
        .take(MAX_DOC_STREAM_BYTES)
        .read_to_end(&mut buf)
        .map_err(|e| ExtractError::Doc(format!("{} stream: {}", label, e)))?;
    Ok(buf)
}

/// Parse the `Clx`: any number of `Prc` entries, then one `Pcdt`.
fn piece_table(clx: &[u8]) -> Result<Vec<Piece>, ExtractError> {
    let mut pos = 0;
    while clx.get(pos) == Some(&0x01) {
        let size = le_u16(clx, pos + 1)? as i16;
        pos += 3 + size.max(0) as usize;
    }
    if clx.get(pos) != Some(&0x02) {
        return Err(ExtractError::Doc("piece table not found".to_string()));
    }
    let lcb = le_u32(clx, pos + 1)? as usize;
    let plc = clx
        .get(pos + 5..)
        .and_then(|rest| rest.get(..lcb))
        .ok_or_else(|| truncated("piece table"))?;
    if lcb < 4 || (lcb - 4) % 12 != 0 {
        return Err(ExtractError::Doc(format!("piece table has invalid size {}", lcb)));
    }
    let n = (lcb - 4) / 12;
    let descriptors = (n + 1) * 4;
    (0..n)
        .map(|i| {
            let cp_start = le_u32(plc, i * 4)? as usize;
            let cp_end = le_u32(plc, (i + 1) * 4)? as usize;
            let fc = le_u32(plc, descriptors + i * 8 + 2)?;
            let compressed = fc & PIECE_COMPRESSED != 0;
            let fc = (fc & 0x3FFF_FFFF) as usize;
            Ok(Piece {
                chars: cp_end.saturating_sub(cp_start),
                offset: if compressed { fc / 2 } else { fc },
                compressed,
            })
        })
        .collect()
}

fn decode_piece(
    word: &[u8],
    piece: &Piece,
    count: usize,
    out: &mut String,
) -> Result<(), ExtractError> {
    let width = if piece.compressed { 1 } else { 2 };
    let raw = word
        .get(piece.offset..piece.offset.saturating_add(count.saturating_mul(width)))
        .ok_or_else(|| truncated("text piece"))?;
    if piece.compressed {
        for &b in raw {
            push_doc_char(out, cp1252(b));
        }
    } else {
        let units = raw.chunks_exact(2).map(|u| u16::from_le_bytes([u[0], u[1]]));
        for c in char::decode_utf16(units) {
            push_doc_char(out, c.unwrap_or(char::REPLACEMENT_CHARACTER));
        }
    }
    Ok(())
}

fn cp1252(b: u8) -> char {
    match b {
        0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

/// Paragraph, line, and page marks become newlines; cell marks become tabs.
/// Field delimiters and other control characters are dropped.
fn push_doc_char(out: &mut String, c: char) {
    match c {
        '\r' | '\n' | '\u{0B}' | '\u{0C}' => out.push('\n'),
        '\u{07}' | '\t' => out.push('\t'),
        c if c.is_control() => {}
        c => out.push(c),
    }
}

fn le_u16(buf: &[u8], at: usize) -> Result<u16, ExtractError> {
    buf.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated("file information block"))
}

fn le_u32(buf: &[u8], at: usize) -> Result<u32, ExtractError> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated("file information block"))
}

fn truncated(what: &str) -> ExtractError {
    ExtractError::Doc(format!("{} is truncated", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for(Path::new("a/b.PDF")), Some(MIME_PDF));
        assert_eq!(content_type_for(Path::new("x.docx")), Some(MIME_DOCX));
        assert_eq!(content_type_for(Path::new("x.doc")), Some(MIME_DOC));
        assert_eq!(content_type_for(Path::new("notes.txt")), Some(MIME_TEXT));
        assert_eq!(content_type_for(Path::new("image.png")), None);
        assert_eq!(content_type_for(Path::new("Makefile")), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let pages = extract_pages(&bytes, MIME_DOCX).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, None);
        assert_eq!(pages[0].text, "First paragraph.\nSecond & last.");
    }

    #[test]
    fn doc_extension_with_ooxml_content_is_read() {
        let bytes = docx_with_paragraphs(&["renamed document"]);
        let pages = extract_pages(&bytes, MIME_DOC).unwrap();
        assert_eq!(pages[0].text, "renamed document");
    }

    fn put_u16(buf: &mut [u8], at: usize, v: u16) {
        buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn compound_file(streams: &[(&str, &[u8])]) -> Vec<u8> {
        let mut file = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        for (name, data) in streams {
            let mut stream = file.create_stream(name).unwrap();
            stream.write_all(data).unwrap();
        }
        file.flush().unwrap();
        file.into_inner().into_inner()
    }

    /// A Word 97 file whose text is one 8-bit piece followed by one UTF-16 piece.
    fn word97(narrow: &[u8], wide: &str) -> Vec<u8> {
        let wide: Vec<u8> = wide.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let (narrow_at, wide_at) = (512usize, 768usize);
        let narrow_chars = narrow.len() as u32;
        let total_chars = narrow_chars + (wide.len() / 2) as u32;

        let mut word = vec![0u8; 1024];
        put_u16(&mut word, 0, 0xA5EC);
        put_u16(&mut word, 0x0A, 0x0200);
        put_u16(&mut word, 32, 14);
        put_u16(&mut word, 62, 22);
        put_u32(&mut word, 76, total_chars);
        word[narrow_at..narrow_at + narrow.len()].copy_from_slice(narrow);
        word[wide_at..wide_at + wide.len()].copy_from_slice(&wide);

        // One property entry, then the piece table.
        let mut clx = vec![0x01, 0x02, 0x00, 0xAA, 0xBB, 0x02];
        clx.extend_from_slice(&28u32.to_le_bytes());
        for cp in [0, narrow_chars, total_chars] {
            clx.extend_from_slice(&cp.to_le_bytes());
        }
        for fc in [(narrow_at as u32 * 2) | 0x4000_0000, wide_at as u32] {
            clx.extend_from_slice(&[0, 0]);
            clx.extend_from_slice(&fc.to_le_bytes());
            clx.extend_from_slice(&[0, 0]);
        }
        put_u32(&mut word, 154 + 0x108, 0);
        put_u32(&mut word, 154 + 0x10C, clx.len() as u32);

        compound_file(&[("/WordDocument", word.as_slice()), ("/1Table", clx.as_slice())])
    }

    #[test]
    fn legacy_doc_text_comes_from_piece_table() {
        let bytes = word97(b"Hello \x93world\x94\r\x13 PAGE \x14\x15", "你好\r");
        let pages = extract_pages(&bytes, MIME_DOC).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, None);
        assert_eq!(pages[0].text, "Hello \u{201C}world\u{201D}\n PAGE 你好");
    }

    #[test]
    fn legacy_doc_without_word_stream_is_an_error() {
        let other = compound_file(&[("/Contents", &b"not a word file"[..])]);
        assert!(matches!(extract_pages(&other, MIME_DOC), Err(ExtractError::Doc(_))));

        let ole_header_only = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0];
        assert!(matches!(
            extract_pages(&ole_header_only, MIME_DOC),
            Err(ExtractError::Doc(_))
        ));
    }

    #[test]
    fn text_strips_bom_and_rejects_invalid_utf8() {
        let pages = extract_pages(b"\xEF\xBB\xBFhello", MIME_TEXT).unwrap();
        assert_eq!(pages[0].text, "hello");
        assert!(matches!(
            extract_pages(&[0xff, 0xfe, 0x00], MIME_TEXT),
            Err(ExtractError::Encoding(_))
        ));
    }

    #[test]
    fn corrupt_inputs_are_errors_not_panics() {
        assert!(extract_pages(b"not a pdf", MIME_PDF).is_err());
        assert!(extract_pages(b"not a zip", MIME_DOCX).is_err());
        assert!(matches!(
            extract_pages(b"", "image/png"),
            Err(ExtractError::UnsupportedContentType(_))
        ));
    }
}
