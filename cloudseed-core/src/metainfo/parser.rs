//! Bencode descriptor parsing.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::{FileEntry, FileLayout, InfoDict, Metainfo, MetainfoError};

// Type aliases for complex bencode types
type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, MetainfoError>;

fn invalid(reason: impl Into<String>) -> MetainfoError {
    MetainfoError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

/// Parses a complete torrent descriptor from raw bencode bytes.
///
/// # Errors
/// - `MetainfoError::InvalidTorrentFile` - Malformed bencode or missing fields
pub fn parse_metainfo(torrent_bytes: &[u8]) -> ParseResult<Metainfo> {
    let parsed = bencode_rs::Value::parse(torrent_bytes)
        .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

    let Some(root) = parsed.first() else {
        return Err(invalid("Empty bencode data"));
    };

    let bencode_rs::Value::Dictionary(dict) = root else {
        return Err(invalid("Root element must be dictionary"));
    };

    let info_value = dict
        .get(b"info".as_slice())
        .ok_or_else(|| invalid("Missing 'info' field"))?;
    let bencode_rs::Value::Dictionary(info_dict) = info_value else {
        return Err(invalid("Info field must be dictionary"));
    };

    Ok(Metainfo {
        info: extract_info(info_dict)?,
        announce_urls: extract_announce_urls(dict),
    })
}

/// Reads a stream to its end and parses it as a torrent descriptor.
///
/// # Errors
/// - `MetainfoError::Io` - Reading the stream failed
/// - `MetainfoError::InvalidTorrentFile` - The bytes are not a descriptor
pub async fn read_metainfo<R>(mut reader: R) -> ParseResult<Metainfo>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    parse_metainfo(&buf)
}

fn extract_info(info: &BencodeDict<'_>) -> ParseResult<InfoDict> {
    let name = extract_bytes_as_string(info, b"name")?;
    if !is_safe_component(&name) {
        return Err(invalid(format!("Unsafe torrent name: {name:?}")));
    }
    let piece_length = u32::try_from(extract_integer(info, b"piece length")?)
        .map_err(|_| invalid("Piece length out of range"))?;

    let pieces_bytes = extract_bytes(info, b"pieces")?;
    if pieces_bytes.len() % 20 != 0 {
        return Err(invalid("Invalid pieces length"));
    }
    let piece_hashes = pieces_bytes
        .chunks(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let layout = if let Ok(length) = extract_integer(info, b"length") {
        FileLayout::Single {
            length: to_length(length)?,
        }
    } else if let Some(bencode_rs::Value::List(files)) = info.get(b"files".as_slice()) {
        FileLayout::Multi {
            files: extract_files(files)?,
        }
    } else {
        return Err(invalid("Missing 'files' or 'length' field"));
    };

    let lengths: Vec<u64> = match &layout {
        FileLayout::Single { length } => vec![*length],
        FileLayout::Multi { files } => files.iter().map(|file| file.length).collect(),
    };
    lengths
        .into_iter()
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| invalid("Total length overflows"))?;

    Ok(InfoDict {
        name,
        piece_length,
        piece_hashes,
        layout,
    })
}

fn extract_files(files_list: &[bencode_rs::Value<'_>]) -> ParseResult<Vec<FileEntry>> {
    let mut files = Vec::with_capacity(files_list.len());

    for file_value in files_list {
        let bencode_rs::Value::Dictionary(file_dict) = file_value else {
            return Err(invalid("Invalid file entry type"));
        };
        let length = to_length(extract_integer(file_dict, b"length")?)?;

        let Some(bencode_rs::Value::List(path_list)) = file_dict.get(b"path".as_slice()) else {
            return Err(invalid("Missing or invalid path in file"));
        };

        let mut path = Vec::with_capacity(path_list.len());
        for component in path_list {
            let bencode_rs::Value::Bytes(component) = component else {
                return Err(invalid("Invalid path component type"));
            };
            let component = String::from_utf8(component.to_vec())
                .map_err(|_| invalid("Invalid UTF-8 in file path"))?;
            if !is_safe_component(&component) {
                return Err(invalid(format!("Unsafe path component: {component:?}")));
            }
            path.push(component);
        }
        if path.is_empty() {
            return Err(invalid("Empty file path"));
        }

        files.push(FileEntry { path, length });
    }

    Ok(files)
}

/// A single path segment that stays inside the directory it is joined to.
fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\', '\0'])
        && !std::path::Path::new(component).has_root()
}

/// Primary `announce` first, then every tier of `announce-list`, deduplicated.
fn extract_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
    let mut announce_urls = Vec::new();

    if let Ok(announce) = extract_bytes_as_string(dict, b"announce") {
        announce_urls.push(announce);
    }

    if let Some(bencode_rs::Value::List(announce_list)) = dict.get(b"announce-list".as_slice()) {
        for tier in announce_list {
            let bencode_rs::Value::List(tier_urls) = tier else {
                continue;
            };
            for url_value in tier_urls {
                if let bencode_rs::Value::Bytes(url_bytes) = url_value
                    && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                    && !announce_urls.contains(&url)
                {
                    announce_urls.push(url);
                }
            }
        }
    }

    announce_urls
}

fn extract_bytes_as_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        invalid(format!(
            "Invalid UTF-8 in field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(invalid(format!(
            "Missing or invalid field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) => Ok(*value),
        _ => Err(invalid(format!(
            "Missing or invalid integer field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn to_length(value: i64) -> ParseResult<u64> {
    u64::try_from(value).map_err(|_| invalid(format!("Negative length: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::encode::encode_metainfo;

    const SINGLE_FILE: &[u8] = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890ee";

    #[test]
    fn test_parse_single_file() {
        let metainfo = parse_metainfo(SINGLE_FILE).unwrap();
        assert_eq!(metainfo.info.name, "test.txt");
        assert_eq!(metainfo.info.piece_length, 32768);
        assert_eq!(metainfo.info.total_length(), 1000);
        assert_eq!(metainfo.info.piece_hashes.len(), 1);
        assert_eq!(metainfo.announce_urls, vec!["test:8080"]);
    }

    #[test]
    fn test_parse_multi_file() {
        let torrent_data = b"d8:announce9:test:80804:infod5:filesl\
                            d6:lengthi500e4:pathl5:file1ee\
                            d6:lengthi300e4:pathl3:sub5:file2eee\
                            4:name8:test.dir12:piece lengthi32768e6:pieces20:12345678901234567890ee";
        let metainfo = parse_metainfo(torrent_data).unwrap();
        assert_eq!(metainfo.info.total_length(), 800);
        let files = metainfo.info.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].path, vec!["test.dir", "sub", "file2"]);
    }

    #[test]
    fn test_missing_info_field() {
        let err = parse_metainfo(b"d8:announce9:test:8080e").unwrap_err();
        assert!(err.to_string().contains("Missing 'info' field"));
    }

    #[test]
    fn test_invalid_pieces_length() {
        let torrent_data = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces19:1234567890123456789ee";
        let err = parse_metainfo(torrent_data).unwrap_err();
        assert!(err.to_string().contains("Invalid pieces length"));
    }

    #[test]
    fn test_rejects_non_dictionary_roots() {
        assert!(parse_metainfo(b"invalid torrent data").is_err());
        assert!(parse_metainfo(b"l4:teste").is_err());
        assert!(parse_metainfo(b"").is_err());
    }

    #[test]
    fn test_rejects_parent_directory_components() {
        let torrent_data = b"d4:infod5:filesld6:lengthi1e4:pathl2:..6:escapeee\
                            4:name3:dir12:piece lengthi16e6:pieces0:ee";
        let err = parse_metainfo(torrent_data).unwrap_err();
        assert!(err.to_string().contains("Unsafe path component"));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let parent = b"d4:infod6:lengthi1e4:name2:..12:piece lengthi1e6:pieces0:ee";
        let nested = b"d4:infod6:lengthi1e4:name5:a/b/c12:piece lengthi1e6:pieces0:ee";
        for torrent_data in [&parent[..], &nested[..]] {
            let err = parse_metainfo(torrent_data).unwrap_err();
            assert!(err.to_string().contains("Unsafe torrent name"));
        }
    }

    #[test]
    fn test_rejects_absolute_and_nested_components() {
        let absolute = b"d4:infod5:filesld6:lengthi1e4:pathl9:/tmp/evileee\
                         4:name3:dir12:piece lengthi16e6:pieces0:ee";
        let nested = b"d4:infod5:filesld6:lengthi1e4:pathl7:../../xeee\
                       4:name3:dir12:piece lengthi16e6:pieces0:ee";
        let current = b"d4:infod5:filesld6:lengthi1e4:pathl1:.1:xeee\
                        4:name3:dir12:piece lengthi16e6:pieces0:ee";
        let backslash = b"d4:infod5:filesld6:lengthi1e4:pathl4:a\\bceee\
                          4:name3:dir12:piece lengthi16e6:pieces0:ee";
        for torrent_data in [&absolute[..], &nested[..], &current[..], &backslash[..]] {
            let err = parse_metainfo(torrent_data).unwrap_err();
            assert!(err.to_string().contains("Unsafe path component"));
        }

        let dot_name = b"d4:infod6:lengthi1e4:name1:.12:piece lengthi1e6:pieces0:ee";
        let err = parse_metainfo(dot_name).unwrap_err();
        assert!(err.to_string().contains("Unsafe torrent name"));
    }

    #[test]
    fn test_rejects_overflowing_total_length() {
        let torrent_data = b"d4:infod5:filesl\
                            d6:lengthi9223372036854775807e4:pathl1:aee\
                            d6:lengthi9223372036854775807e4:pathl1:bee\
                            d6:lengthi9223372036854775807e4:pathl1:cee\
                            e4:name3:dir12:piece lengthi16e6:pieces0:ee";
        let err = parse_metainfo(torrent_data).unwrap_err();
        assert!(err.to_string().contains("Total length overflows"));
    }

    #[test]
    fn test_trackerless_descriptor_is_accepted() {
        let torrent_data = b"d4:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890ee";
        let metainfo = parse_metainfo(torrent_data).unwrap();
        assert!(metainfo.announce_urls.is_empty());
    }

    #[test]
    fn test_announce_list_is_merged_without_duplicates() {
        let torrent_data = b"d8:announce8:http://a13:announce-listll8:http://ael8:http://bee\
                            4:infod6:lengthi1e4:name1:x12:piece lengthi1e6:pieces0:ee";
        let metainfo = parse_metainfo(torrent_data).unwrap();
        assert_eq!(metainfo.announce_urls, vec!["http://a", "http://b"]);
    }

    #[test]
    fn test_encoded_descriptor_parses_back() {
        let metainfo = parse_metainfo(SINGLE_FILE).unwrap();
        assert_eq!(parse_metainfo(&encode_metainfo(&metainfo)).unwrap(), metainfo);
    }

    #[tokio::test]
    async fn test_read_metainfo_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.torrent");
        tokio::fs::write(&file_path, SINGLE_FILE).await.unwrap();

        let file = tokio::fs::File::open(&file_path).await.unwrap();
        let metainfo = read_metainfo(file).await.unwrap();
        assert_eq!(metainfo.info.name, "test.txt");
    }

    #[tokio::test]
    async fn test_read_metainfo_from_bytes() {
        let metainfo = read_metainfo(SINGLE_FILE).await.unwrap();
        assert_eq!(metainfo.info.total_length(), 1000);
    }
}
