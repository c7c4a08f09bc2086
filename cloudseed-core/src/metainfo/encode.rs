//! Canonical bencode encoding of torrent descriptors.
//!
//! Dictionary keys are emitted in bytewise sorted order, so equal values
//! always produce equal bytes.

use super::{FileLayout, InfoDict, Metainfo};

/// Append-only bencode writer.
#[derive(Default)]
struct BencodeWriter {
    buf: Vec<u8>,
}

impl BencodeWriter {
    fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value.len().to_string().as_bytes());
        self.buf.push(b':');
        self.buf.extend_from_slice(value);
    }

    fn str(&mut self, value: &str) {
        self.bytes(value.as_bytes());
    }

    fn int(&mut self, value: u64) {
        self.buf.push(b'i');
        self.buf.extend_from_slice(value.to_string().as_bytes());
        self.buf.push(b'e');
    }

    fn begin_dict(&mut self) {
        self.buf.push(b'd');
    }

    fn begin_list(&mut self) {
        self.buf.push(b'l');
    }

    fn end(&mut self) {
        self.buf.push(b'e');
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn write_info(writer: &mut BencodeWriter, info: &InfoDict) {
    // Sorted keys: files < length < name < piece length < pieces
    writer.begin_dict();
    match &info.layout {
        FileLayout::Multi { files } => {
            writer.str("files");
            writer.begin_list();
            for file in files {
                writer.begin_dict();
                writer.str("length");
                writer.int(file.length);
                writer.str("path");
                writer.begin_list();
                for component in &file.path {
                    writer.str(component);
                }
                writer.end();
                writer.end();
            }
            writer.end();
        }
        FileLayout::Single { length } => {
            writer.str("length");
            writer.int(*length);
        }
    }
    writer.str("name");
    writer.str(&info.name);
    writer.str("piece length");
    writer.int(u64::from(info.piece_length));
    writer.str("pieces");
    writer.bytes(&info.piece_hashes.concat());
    writer.end();
}

/// Encodes only the info dictionary. Input of the content hasher.
pub fn encode_info(info: &InfoDict) -> Vec<u8> {
    let mut writer = BencodeWriter::default();
    write_info(&mut writer, info);
    writer.finish()
}

/// Encodes a complete descriptor, trackers included.
///
/// The first announce URL becomes `announce`; when there is more than one,
/// every URL is also listed as its own tier in `announce-list`.
pub fn encode_metainfo(metainfo: &Metainfo) -> Vec<u8> {
    let mut writer = BencodeWriter::default();
    writer.begin_dict();
    if let Some(primary) = metainfo.announce_urls.first() {
        writer.str("announce");
        writer.str(primary);
    }
    if metainfo.announce_urls.len() > 1 {
        writer.str("announce-list");
        writer.begin_list();
        for url in &metainfo.announce_urls {
            writer.begin_list();
            writer.str(url);
            writer.end();
        }
        writer.end();
    }
    writer.str("info");
    write_info(&mut writer, &metainfo.info);
    writer.end();
    writer.finish()
}
