//! Minimal Annex B (start-code delimited) H.264 helpers.

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit payloads (without start codes) in stream order.
pub fn split_nal_units(stream: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= stream.len() {
        if stream[i] == 0 && stream[i + 1] == 0 && stream[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(stream.len(), |next| next - 3);
        // a 4-byte start code leaves one zero behind
        while end > start && stream[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        if end > start {
            units.push(&stream[start..end]);
        }
    }
    units
}

pub fn nal_type(unit: &[u8]) -> Option<u8> {
    unit.first().map(|b| b & 0x1f)
}

pub fn is_parameter_set(unit: &[u8]) -> bool {
    matches!(nal_type(unit), Some(NAL_SPS) | Some(NAL_PPS))
}

pub fn contains_idr(stream: &[u8]) -> bool {
    split_nal_units(stream).iter().any(|u| nal_type(u) == Some(NAL_IDR))
}

pub fn contains_sps(stream: &[u8]) -> bool {
    split_nal_units(stream).iter().any(|u| nal_type(u) == Some(NAL_SPS))
}

/// Splits an access unit into parameter sets and picture data, each
/// re-emitted with 4-byte start codes.
pub fn split_parameter_sets(stream: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut params = Vec::new();
    let mut picture = Vec::new();
    for unit in split_nal_units(stream) {
        let target = if is_parameter_set(unit) { &mut params } else { &mut picture };
        target.extend_from_slice(&START_CODE);
        target.extend_from_slice(unit);
    }
    (params, picture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Vec<u8> {
        let mut s = Vec::new();
        s.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0x0a]);
        s.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xce]);
        s.extend_from_slice(&[0, 0, 1, 0x65, 0x88, 0x84]);
        s
    }

    #[test]
    fn test_split_mixed_start_codes() {
        let s = stream();
        let units = split_nal_units(&s);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0], &[0x67, 0x42, 0x0a]);
        assert_eq!(units[1], &[0x68, 0xce]);
        assert_eq!(units[2], &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_parameter_set_split() {
        let (params, picture) = split_parameter_sets(&stream());
        assert_eq!(params, vec![0, 0, 0, 1, 0x67, 0x42, 0x0a, 0, 0, 0, 1, 0x68, 0xce]);
        assert_eq!(picture, vec![0, 0, 0, 1, 0x65, 0x88, 0x84]);
        assert!(contains_idr(&picture));
        assert!(!contains_sps(&picture));
        assert!(contains_sps(&params));
    }

    #[test]
    fn test_no_start_code() {
        assert!(split_nal_units(&[1, 2, 3]).is_empty());
    }
}
