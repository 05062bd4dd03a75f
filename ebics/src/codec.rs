//! Byte codecs used around the encryption envelope: base64 for XML
//! placement, zlib for order data, ZIP for containers some downloads return.

use std::io::{Cursor, Read};

use base64::{engine::general_purpose, Engine as _};
use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib;
use thiserror::Error;

const COMPRESSION_LEVEL: u8 = 6;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("zlib decompression failed: {0}")]
    Decompress(String),
    #[error("invalid zip container: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn encode_base64(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

/// Decodes base64 text as found in XML, ignoring embedded whitespace and
/// line breaks.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(general_purpose::STANDARD.decode(compact)?)
}

pub fn compress(data: &[u8]) -> Vec<u8> {
    compress_to_vec_zlib(data, COMPRESSION_LEVEL)
}

/// Inflates a zlib stream. Bytes after the end of the stream (left over
/// from block padding) are ignored.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    decompress_to_vec_zlib(data).map_err(|e| CodecError::Decompress(format!("{:?}", e.status)))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub content: Vec<u8>,
}

/// Unpacks every file of a ZIP container, in archive order.
pub fn unzip(data: &[u8]) -> Result<Vec<ZipEntry>, CodecError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        entries.push(ZipEntry {
            name: file.name().to_string(),
            content,
        });
    }
    Ok(entries)
}

/// Whether `data` starts with a local file header.
pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(b"PK\x03\x04")
}
