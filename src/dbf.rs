//! dBase attribute tables that sit next to a `.shp`.
//!
//! Text is decoded here instead of inside the shapefile reader so that a
//! strict UTF-8 attempt can fail and the whole table can be decoded again in
//! the regional encoding. Municipal exports are often Shift_JIS without a
//! `.cpg` saying so.

use anyhow::{bail, ensure, Context, Result};
use encoding_rs::Encoding;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;

#[derive(Debug, Clone)]
pub struct AttributeTable {
    /// Column names as decoded, in file order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Encoding the table was finally decoded with.
    pub encoding: &'static Encoding,
}

struct Descriptor<'a> {
    name: &'a [u8],
    length: usize,
}

struct RawTable<'a> {
    fields: Vec<Descriptor<'a>>,
    records: Vec<&'a [u8]>,
}

type Decoded = (Vec<String>, Vec<Vec<Option<String>>>);

pub fn read_attribute_table(
    path: &Path,
    primary: &'static Encoding,
    fallback: &'static Encoding,
) -> Result<AttributeTable> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read attribute table: {:?}", path))?;
    let raw = parse(&bytes).with_context(|| format!("Malformed attribute table: {:?}", path))?;

    if let Some((columns, rows)) = decode_with(&raw, |b| {
        primary
            .decode_without_bom_handling_and_without_replacement(b)
            .map(|s| s.into_owned())
    }) {
        debug!("Decoded {:?} as {}", path, primary.name());
        return Ok(AttributeTable { columns, rows, encoding: primary });
    }

    warn!(
        "{:?} is not valid {}, retrying as {}",
        path,
        primary.name(),
        fallback.name()
    );
    let mut lossy = false;
    let (columns, rows) = decode_with(&raw, |b| {
        let (text, had_errors) = fallback.decode_without_bom_handling(b);
        lossy |= had_errors;
        Some(text.into_owned())
    })
    .context("fallback decoding produced no table")?;
    if lossy {
        warn!("{:?} contains bytes invalid in {} as well; replaced", path, fallback.name());
    }
    Ok(AttributeTable { columns, rows, encoding: fallback })
}

fn parse(bytes: &[u8]) -> Result<RawTable<'_>> {
    ensure!(bytes.len() >= HEADER_LEN, "header is truncated");
    let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    ensure!(header_len <= bytes.len(), "header length {} exceeds file size", header_len);

    let mut fields = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + DESCRIPTOR_LEN <= header_len && bytes[offset] != HEADER_TERMINATOR {
        let desc = &bytes[offset..offset + DESCRIPTOR_LEN];
        let name = &desc[..11];
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        fields.push(Descriptor {
            name: &name[..end],
            length: desc[16] as usize,
        });
        offset += DESCRIPTOR_LEN;
    }

    let data_len = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    ensure!(
        data_len <= record_len,
        "fields need {} bytes but records are {} bytes",
        data_len,
        record_len
    );

    // The header's record count is not trusted until the bytes are there
    let available = (bytes.len() - header_len) / record_len;
    if record_count > available {
        bail!(
            "header claims {} records but only {} fit in the file",
            record_count,
            available
        );
    }

    let records = (0..record_count)
        .map(|i| {
            let start = header_len + i * record_len;
            &bytes[start..start + record_len]
        })
        .collect();

    Ok(RawTable { fields, records })
}

fn decode_with<F>(raw: &RawTable<'_>, mut decode: F) -> Option<Decoded>
where
    F: FnMut(&[u8]) -> Option<String>,
{
    let mut columns = Vec::with_capacity(raw.fields.len());
    for field in &raw.fields {
        columns.push(decode(field.name)?.trim().to_string());
    }

    let mut rows = Vec::with_capacity(raw.records.len());
    for record in &raw.records {
        // Byte 0 is the deletion flag
        let mut offset = 1;
        let mut row = Vec::with_capacity(raw.fields.len());
        for field in &raw.fields {
            let cell = &record[offset..offset + field.length];
            offset += field.length;
            let text = decode(cell)?;
            let value = text.trim_matches(|c: char| c == ' ' || c == '\0');
            row.push((!value.is_empty()).then(|| value.to_string()));
        }
        rows.push(row);
    }

    Some((columns, rows))
}

/// Encoding named by a `.cpg` sidecar. ESRI writes either a label or a
/// Windows code page number.
pub fn encoding_from_cpg(content: &str) -> Option<&'static Encoding> {
    let label = content.trim();
    match label {
        "932" | "cp932" | "CP932" => Some(encoding_rs::SHIFT_JIS),
        "65001" => Some(encoding_rs::UTF_8),
        _ => Encoding::for_label(label.as_bytes()),
    }
}

/// Builds a dBase file in memory. Only used by tests.
#[cfg(test)]
pub(crate) fn build_dbf(columns: &[(&[u8], usize)], rows: &[Vec<&[u8]>]) -> Vec<u8> {
    let header_len = HEADER_LEN + columns.len() * DESCRIPTOR_LEN + 1;
    let record_len = 1 + columns.iter().map(|(_, len)| len).sum::<usize>();

    let mut out = vec![0u8; HEADER_LEN];
    out[0] = 0x03;
    out[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    for (name, len) in columns {
        let mut desc = [0u8; DESCRIPTOR_LEN];
        desc[..name.len()].copy_from_slice(name);
        desc[11] = b'C';
        desc[16] = *len as u8;
        out.extend_from_slice(&desc);
    }
    out.push(HEADER_TERMINATOR);
    for row in rows {
        out.push(b' ');
        for ((_, len), cell) in columns.iter().zip(row) {
            let mut padded = cell.to_vec();
            padded.resize(*len, b' ');
            out.extend_from_slice(&padded);
        }
    }
    out.push(0x1A);
    out
}
