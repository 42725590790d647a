use picoweb::http::chunked::ChunkedDecoder;

const ENCODED: &[u8] = b"7\r\nMozilla\r\n11\r\nDeveloper Network\r\n0\r\n\r\n";

#[test]
fn test_decode_byte_by_byte() {
    let mut decoder = ChunkedDecoder::new(1024);

    for byte in ENCODED.chunks(1) {
        assert_eq!(decoder.feed(byte).unwrap(), 1);
    }

    assert!(decoder.is_complete());
    assert!(!decoder.truncated());
    assert_eq!(decoder.decoded(), b"MozillaDeveloper Network");
}

#[test]
fn test_split_points_do_not_change_result() {
    for split in 1..ENCODED.len() {
        let mut decoder = ChunkedDecoder::new(1024);
        let (a, b) = ENCODED.split_at(split);

        decoder.feed(a).unwrap();
        decoder.feed(b).unwrap();

        assert!(decoder.is_complete(), "split at {split}");
        assert_eq!(decoder.decoded(), b"MozillaDeveloper Network", "split at {split}");
    }
}

#[test]
fn test_truncates_to_exactly_max() {
    let mut decoder = ChunkedDecoder::new(10);
    let consumed = decoder.feed(ENCODED).unwrap();

    assert_eq!(consumed, ENCODED.len());
    assert!(decoder.is_complete());
    assert!(decoder.truncated());
    assert_eq!(decoder.into_decoded(), b"MozillaDev");
}

#[test]
fn test_body_of_exactly_max_is_not_truncated() {
    let mut decoder = ChunkedDecoder::new(7);
    decoder.feed(b"7\r\nMozilla\r\n0\r\n\r\n").unwrap();

    assert!(!decoder.truncated());
    assert_eq!(decoder.decoded(), b"Mozilla");
}

#[test]
fn test_incomplete_input_is_not_complete() {
    let mut decoder = ChunkedDecoder::new(1024);
    decoder.feed(b"7\r\nMoz").unwrap();

    assert!(!decoder.is_complete());
    assert_eq!(decoder.decoded(), b"Moz");
}
