//! H.264 NAL unit extraction from encoder access units
//!
//! Hardware encoders hand out access units in one of two wire encodings:
//! 4-byte big-endian length prefixes (AVCC) or Annex-B start codes. Parsing
//! tries the length-prefixed layout first and falls back to start-code
//! scanning when no unit parses before the buffer ends.

use std::sync::{Arc, RwLock};

/// One NAL unit sliced out of an access-unit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    pub data: &'a [u8],
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    pub keyframe: bool,
}

/// Cached SPS/PPS, published whenever the encoder reports a format change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

/// Shared cell holding the current codec config.
///
/// The encoder thread replaces the whole `Arc` while RTSP session tasks read
/// concurrently; readers never observe a partially updated config.
#[derive(Debug, Default, Clone)]
pub struct CodecConfigCell {
    inner: Arc<RwLock<Option<Arc<CodecConfig>>>>,
}

impl CodecConfigCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, config: CodecConfig) {
        *self.inner.write().expect("codec config lock") = Some(Arc::new(config));
    }

    pub fn get(&self) -> Option<Arc<CodecConfig>> {
        self.inner.read().expect("codec config lock").clone()
    }
}

/// Splits encoder access units into NAL units and tracks codec config.
#[derive(Debug, Default)]
pub struct NaluExtractor {
    config: CodecConfigCell,
}

impl NaluExtractor {
    pub fn new(config: CodecConfigCell) -> Self {
        Self { config }
    }

    pub fn codec_config(&self) -> &CodecConfigCell {
        &self.config
    }

    /// Captures SPS/PPS from a format-change event. Start codes are stripped
    /// so the cached payloads are bare NAL units, ready for SDP base64.
    pub fn set_codec_config(&self, sps: &[u8], pps: &[u8]) {
        let sps = strip_start_code(sps).to_vec();
        let pps = strip_start_code(pps).to_vec();
        if sps.is_empty() || pps.is_empty() {
            return;
        }
        self.config.publish(CodecConfig { sps, pps });
    }

    /// Parses one access unit, emitting zero or more NAL units in stream
    /// order, each tagged with the unit's timestamp and keyframe flag.
    ///
    /// Length-prefixed parsing is accepted only when the prefixes account
    /// for the whole buffer; an Annex-B stream whose first start code reads
    /// as a tiny length would otherwise parse as garbage. When neither
    /// layout covers the buffer, any leading length-prefixed units are
    /// salvaged (truncated encoder output).
    pub fn push_access_unit<F>(&self, buf: &[u8], pts_us: i64, keyframe: bool, mut emit: F)
    where
        F: FnMut(NalUnit<'_>),
    {
        let (ranges, consumed_all) = length_prefixed_ranges(buf);
        if consumed_all && !ranges.is_empty() {
            for (start, end) in ranges {
                emit(NalUnit {
                    data: &buf[start..end],
                    pts_us,
                    keyframe,
                });
            }
            return;
        }

        if parse_annex_b(buf, pts_us, keyframe, &mut emit) {
            return;
        }

        for (start, end) in ranges {
            emit(NalUnit {
                data: &buf[start..end],
                pts_us,
                keyframe,
            });
        }
    }
}

/// Scans 4-byte big-endian length prefixes, returning the payload ranges
/// and whether they cover the buffer exactly.
fn length_prefixed_ranges(buf: &[u8]) -> (Vec<(usize, usize)>, bool) {
    let mut ranges = Vec::new();
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        let len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        if len == 0 {
            return (ranges, false);
        }
        let start = pos + 4;
        let Some(end) = start.checked_add(len).filter(|&e| e <= buf.len()) else {
            return (ranges, false);
        };
        ranges.push((start, end));
        pos = end;
    }
    let consumed_all = pos == buf.len();
    (ranges, consumed_all)
}

/// Annex-B fallback: slices between consecutive start codes, the final unit
/// running to the end of the buffer. Returns true if any unit was emitted.
fn parse_annex_b<F>(buf: &[u8], pts_us: i64, keyframe: bool, emit: &mut F) -> bool
where
    F: FnMut(NalUnit<'_>),
{
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else if i + 4 <= buf.len()
            && buf[i] == 0
            && buf[i + 1] == 0
            && buf[i + 2] == 0
            && buf[i + 3] == 1
        {
            starts.push((i, i + 4));
            i += 4;
        } else {
            i += 1;
        }
    }

    let mut emitted = false;
    for (idx, &(_, payload_start)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map_or(buf.len(), |&(next, _)| next);
        if payload_start < end {
            emit(NalUnit {
                data: &buf[payload_start..end],
                pts_us,
                keyframe,
            });
            emitted = true;
        }
    }
    emitted
}

/// Drops a leading Annex-B start code if present.
fn strip_start_code(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0, 0, 0, 1]) {
        &data[4..]
    } else if data.starts_with(&[0, 0, 1]) {
        &data[3..]
    } else {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_prefixed(units: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for unit in units {
            buf.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            buf.extend_from_slice(unit);
        }
        buf
    }

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            // Mix both start-code lengths.
            if i % 2 == 0 {
                buf.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                buf.extend_from_slice(&[0, 0, 1]);
            }
            buf.extend_from_slice(unit);
        }
        buf
    }

    fn collect(extractor: &NaluExtractor, buf: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        extractor.push_access_unit(buf, 33_000, true, |nal| {
            assert_eq!(nal.pts_us, 33_000);
            assert!(nal.keyframe);
            out.push(nal.data.to_vec());
        });
        out
    }

    #[test]
    fn three_length_prefixed_units() {
        let units: [&[u8]; 3] = [&[0x65, 1, 2, 3], &[0x41, 9], &[0x41, 7, 7, 7, 7]];
        let buf = length_prefixed(&units);
        let extractor = NaluExtractor::default();

        let got = collect(&extractor, &buf);
        assert_eq!(got.len(), 3);
        for (got, want) in got.iter().zip(units.iter()) {
            assert_eq!(got.as_slice(), *want);
        }
    }

    #[test]
    fn annex_b_fallback_yields_same_units() {
        let units: [&[u8]; 3] = [&[0x65, 1, 2, 3], &[0x41, 9], &[0x41, 7, 7, 7, 7]];
        let buf = annex_b(&units);
        let extractor = NaluExtractor::default();

        let got = collect(&extractor, &buf);
        assert_eq!(got.len(), 3);
        for (got, want) in got.iter().zip(units.iter()) {
            assert_eq!(got.as_slice(), *want);
        }
    }

    #[test]
    fn truncated_length_prefix_stops_cleanly() {
        // Second unit claims more bytes than remain.
        let mut buf = length_prefixed(&[&[0x65, 1, 2][..]]);
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);

        let extractor = NaluExtractor::default();
        let got = collect(&extractor, &buf);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], vec![0x65, 1, 2]);
    }

    #[test]
    fn garbage_emits_nothing() {
        let extractor = NaluExtractor::default();
        let got = collect(&extractor, &[0u8, 0, 0, 0, 0, 0]);
        assert!(got.is_empty());
    }

    #[test]
    fn codec_config_strips_start_codes() {
        let extractor = NaluExtractor::default();
        extractor.set_codec_config(&[0, 0, 0, 1, 0x67, 0x42], &[0, 0, 1, 0x68, 0xCE]);

        let config = extractor.codec_config().get().unwrap();
        assert_eq!(config.sps, vec![0x67, 0x42]);
        assert_eq!(config.pps, vec![0x68, 0xCE]);
    }

    #[test]
    fn codec_config_replaced_as_a_whole() {
        let cell = CodecConfigCell::new();
        let extractor = NaluExtractor::new(cell.clone());

        extractor.set_codec_config(&[0x67, 1], &[0x68, 1]);
        let first = cell.get().unwrap();

        extractor.set_codec_config(&[0x67, 2], &[0x68, 2]);
        let second = cell.get().unwrap();

        // The earlier snapshot is untouched by the replacement.
        assert_eq!(first.sps, vec![0x67, 1]);
        assert_eq!(second.sps, vec![0x67, 2]);
    }
}
