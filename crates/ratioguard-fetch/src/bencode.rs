//! Minimal bencode traversal used only to locate the byte span of a
//! top-level `info` value, so it can be hashed byte-for-byte without
//! re-encoding it (re-encoding risks producing a different hash than the
//! tracker's own if key order or integer representation differs).

use sha1::{Digest, Sha1};

use crate::error::{FetchError, FetchResult};

/// SHA-1 of the raw bytes making up the torrent's top-level `info` value.
///
/// # Errors
///
/// Returns [`FetchError::MalformedTorrent`] if `data` is not a bencoded
/// dict, or has no top-level `info` key.
pub fn info_hash(data: &[u8]) -> FetchResult<[u8; 20]> {
    if data.first() != Some(&b'd') {
        return Err(FetchError::MalformedTorrent {
            reason: "torrent root is not a bencoded dict",
        });
    }

    let mut pos = 1;
    loop {
        match data.get(pos) {
            Some(b'e') => break,
            Some(_) => {}
            None => {
                return Err(FetchError::MalformedTorrent {
                    reason: "unterminated top-level dict",
                });
            }
        }

        let (key, value_start) = parse_bstring(data, pos)?;
        let value_end = skip_value(data, value_start)?;

        if key == b"info" {
            let mut hasher = Sha1::new();
            hasher.update(&data[value_start..value_end]);
            let digest = hasher.finalize();
            let mut out = [0_u8; 20];
            out.copy_from_slice(&digest);
            return Ok(out);
        }

        pos = value_end;
    }

    Err(FetchError::MalformedTorrent {
        reason: "no top-level info key",
    })
}

/// Parse a bencoded byte string `<len>:<bytes>` at `pos`, returning the
/// string's bytes and the offset immediately after it.
fn parse_bstring(data: &[u8], pos: usize) -> FetchResult<(&[u8], usize)> {
    let colon = data[pos..]
        .iter()
        .position(|&b| b == b':')
        .ok_or(FetchError::MalformedTorrent {
            reason: "bencode string missing length delimiter",
        })?
        + pos;

    let len: usize = std::str::from_utf8(&data[pos..colon])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FetchError::MalformedTorrent {
            reason: "bencode string length is not a valid integer",
        })?;

    let start = colon + 1;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or(FetchError::MalformedTorrent {
            reason: "bencode string length exceeds remaining data",
        })?;

    Ok((&data[start..end], end))
}

/// Skip one bencoded value (integer, string, list or dict) starting at
/// `pos`, returning the offset immediately after it.
fn skip_value(data: &[u8], pos: usize) -> FetchResult<usize> {
    match data.get(pos) {
        Some(b'i') => {
            let end = data[pos..]
                .iter()
                .position(|&b| b == b'e')
                .ok_or(FetchError::MalformedTorrent {
                    reason: "unterminated bencode integer",
                })?
                + pos;
            Ok(end + 1)
        }
        Some(b'l') => {
            let mut cursor = pos + 1;
            while data.get(cursor) != Some(&b'e') {
                if data.get(cursor).is_none() {
                    return Err(FetchError::MalformedTorrent {
                        reason: "unterminated bencode list",
                    });
                }
                cursor = skip_value(data, cursor)?;
            }
            Ok(cursor + 1)
        }
        Some(b'd') => {
            let mut cursor = pos + 1;
            while data.get(cursor) != Some(&b'e') {
                if data.get(cursor).is_none() {
                    return Err(FetchError::MalformedTorrent {
                        reason: "unterminated bencode dict",
                    });
                }
                let (_, value_start) = parse_bstring(data, cursor)?;
                cursor = skip_value(data, value_start)?;
            }
            Ok(cursor + 1)
        }
        Some(b'0'..=b'9') => {
            let (_, end) = parse_bstring(data, pos)?;
            Ok(end)
        }
        _ => Err(FetchError::MalformedTorrent {
            reason: "unrecognised bencode value tag",
        }),
    }
}
