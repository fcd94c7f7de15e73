//! Tests for the column codec.

use super::*;
use crate::config::CodecConfig;
use crate::error::Error;
use crate::value::{ColumnType, Value};
use proptest::prelude::*;

fn config() -> CodecConfig {
    CodecConfig::default()
}

fn ints(range: std::ops::Range<i64>) -> Vec<Value> {
    range.map(Value::Int).collect()
}

fn round_trip(values: &[Value], ty: ColumnType, encoding: Encoding) -> ColumnBlock {
    let block = encode(values, ty, encoding, &config()).expect("encode");
    let parsed = ColumnBlock::parse(block.as_bytes().clone()).expect("parse");
    assert_eq!(parsed.decode().expect("decode"), values);
    for (pos, expected) in values.iter().enumerate().step_by(97) {
        assert_eq!(&parsed.decode_at(pos).expect("decode_at"), expected);
    }
    let positions: Vec<usize> = (0..values.len()).step_by(89).rev().collect();
    let batched = parsed.decode_positions(&positions).expect("decode_positions");
    let expected: Vec<Value> = positions.iter().map(|&p| values[p].clone()).collect();
    assert_eq!(batched, expected);
    parsed
}

/// Sample column of `ty` with nulls sprinkled in.
fn sample(ty: ColumnType, rows: usize) -> Vec<Value> {
    (0..rows)
        .map(|i| {
            if i % 17 == 0 {
                return Value::Null;
            }
            let n = i64::try_from(i % 40).expect("small");
            match ty {
                ColumnType::Int => Value::Int(n - 20),
                ColumnType::Float => Value::Float(n as f64 * 0.25),
                ColumnType::String => Value::from(format!("item-{n:03}")),
                ColumnType::Bool => Value::Bool(n % 3 == 0),
                ColumnType::Timestamp => Value::Timestamp(1_700_000_000_000 + n * 1_000),
            }
        })
        .collect()
}

// =========================================================================
// Scheme selection
// =========================================================================

#[test]
fn test_select_low_cardinality_picks_bitmap() {
    // Arrange
    let values: Vec<Value> = (0..1000).map(|i| Value::from(["a", "b", "c"][i % 3])).collect();

    // Act
    let scheme = select_scheme(&values, ColumnType::String, &config());

    // Assert
    assert_eq!(scheme, Scheme::Bitmap);
}

#[test]
fn test_select_sorted_strings_picks_trie() {
    let values: Vec<Value> = (0..1000)
        .map(|i| Value::from(format!("user-{i:06}")))
        .collect();

    assert_eq!(
        select_scheme(&values, ColumnType::String, &config()),
        Scheme::Trie
    );
}

#[test]
fn test_select_distinct_ints_picks_generic() {
    let values = ints(0..1000);

    assert_eq!(
        select_scheme(&values, ColumnType::Int, &config()),
        Scheme::Generic
    );
    assert_eq!(select_scheme(&[], ColumnType::Int, &config()), Scheme::Generic);
}

#[test]
fn test_select_is_deterministic() {
    let values: Vec<Value> = (0..500)
        .map(|i| Value::from(format!("{}", (i * 7919) % 503)))
        .collect();

    let first = select_scheme(&values, ColumnType::String, &config());
    for _ in 0..5 {
        assert_eq!(select_scheme(&values, ColumnType::String, &config()), first);
    }
}

// =========================================================================
// Round trips per scheme
// =========================================================================

#[test]
fn test_generic_round_trip_across_frames() {
    // Arrange
    let values: Vec<Value> = (0..(FRAME_ROWS as i64 * 3 + 17))
        .map(|i| if i % 11 == 0 { Value::Null } else { Value::Int(i * 31) })
        .collect();

    // Act
    let block = round_trip(&values, ColumnType::Int, Encoding::Generic);

    // Assert
    assert_eq!(block.scheme(), Scheme::Generic);
    assert_eq!(
        block.decode_at(FRAME_ROWS * 3 + 16).expect("last row"),
        Value::Int((FRAME_ROWS as i64 * 3 + 16) * 31)
    );
}

#[test]
fn test_generic_round_trip_over_hundred_thousand_rows() {
    let values: Vec<Value> = (0..120_000)
        .map(|i| Value::Float(f64::from(i) * 0.5))
        .collect();

    let block = round_trip(&values, ColumnType::Float, Encoding::Auto);

    assert_eq!(block.row_count(), 120_000);
}

#[test]
fn test_bitmap_round_trip_over_hundred_thousand_rows() {
    let values: Vec<Value> = (0..120_000)
        .map(|i| match i % 50 {
            0 => Value::Null,
            k => Value::from(format!("region-{k:02}")),
        })
        .collect();

    let block = round_trip(&values, ColumnType::String, Encoding::Bitmap);

    assert_eq!(block.scheme(), Scheme::Bitmap);
    assert_eq!(block.row_count(), 120_000);
}

#[test]
fn test_trie_round_trip_over_hundred_thousand_rows() {
    let values: Vec<Value> = (0..120_000)
        .map(|i| {
            if i % 1_001 == 0 {
                Value::Null
            } else {
                Value::from(format!("tenant/{:03}/object/{i:08}", i % 300))
            }
        })
        .collect();

    let block = round_trip(&values, ColumnType::String, Encoding::Trie);

    assert_eq!(block.scheme(), Scheme::Trie);
    assert_eq!(block.row_count(), 120_000);
}

#[test]
fn test_every_type_round_trips_under_every_applicable_scheme() {
    let types = [
        ColumnType::Int,
        ColumnType::Float,
        ColumnType::String,
        ColumnType::Bool,
        ColumnType::Timestamp,
    ];
    for ty in types {
        let values = sample(ty, 5_000);
        let mut encodings = vec![Encoding::Auto, Encoding::Generic, Encoding::Bitmap];
        if ty == ColumnType::String {
            encodings.push(Encoding::Trie);
        }
        for encoding in encodings {
            let block = round_trip(&values, ty, encoding);
            assert_eq!(block.column_type(), ty, "{ty} under {encoding:?}");
        }
    }
}

#[test]
fn test_bitmap_round_trip_with_nulls() {
    let values: Vec<Value> = (0..5000)
        .map(|i| match i % 4 {
            0 => Value::Null,
            1 => Value::Bool(true),
            _ => Value::Bool(false),
        })
        .collect();

    let block = round_trip(&values, ColumnType::Bool, Encoding::Auto);

    assert_eq!(block.scheme(), Scheme::Bitmap);
    let dictionary = block.dictionary().expect("dictionary").expect("bitmap block");
    assert_eq!(dictionary.distinct_count(), 3);
}

#[test]
fn test_trie_round_trip_with_suffix_index() {
    let values: Vec<Value> = (0..2000)
        .map(|i| {
            if i % 37 == 0 {
                Value::Null
            } else {
                Value::from(format!("https://example.org/path/{}/{i}", i % 13))
            }
        })
        .collect();

    let block = round_trip(&values, ColumnType::String, Encoding::Trie);

    assert_eq!(block.scheme(), Scheme::Trie);
    assert!(block.header().has_suffix_index());
    assert_eq!(block.decode_at(37).expect("null row"), Value::Null);
}

#[test]
fn test_trie_random_access_without_suffix_index() {
    // Arrange
    let config = CodecConfig {
        trie_suffix_index: false,
        trie_restart_interval: 4,
        ..CodecConfig::default()
    };
    let values: Vec<Value> = ["apple", "applesauce", "apply", "banana", "band", "bandana"]
        .iter()
        .map(|s| Value::from(*s))
        .collect();

    // Act
    let block = encode(&values, ColumnType::String, Encoding::Trie, &config).expect("encode");

    // Assert
    assert!(!block.header().has_suffix_index());
    assert_eq!(block.decode().expect("decode"), values);
    for (pos, expected) in values.iter().enumerate() {
        assert_eq!(&block.decode_at(pos).expect("decode_at"), expected);
    }
}

#[test]
fn test_trie_compresses_shared_prefixes() {
    let values: Vec<Value> = (0..1000)
        .map(|i| Value::from(format!("customer/eu-west/{i:08}")))
        .collect();

    let trie = encode(&values, ColumnType::String, Encoding::Trie, &config()).expect("trie");
    let raw: usize = values.iter().map(Value::estimated_size).sum();

    assert!(trie.len() < raw);
}

// =========================================================================
// Edge cases
// =========================================================================

#[test]
fn test_empty_column_round_trips_for_every_scheme() {
    for encoding in [Encoding::Generic, Encoding::Bitmap, Encoding::Trie] {
        let block = encode(&[], ColumnType::String, encoding, &config()).expect("encode");
        assert_eq!(block.row_count(), 0);
        assert!(block.decode().expect("decode").is_empty());
        assert!(matches!(
            block.decode_at(0),
            Err(Error::PositionOutOfBounds { position: 0, row_count: 0 })
        ));
    }
}

#[test]
fn test_single_value_round_trips() {
    for encoding in [Encoding::Auto, Encoding::Generic, Encoding::Bitmap, Encoding::Trie] {
        round_trip(&[Value::from("only")], ColumnType::String, encoding);
    }
}

#[test]
fn test_all_identical_values_round_trip() {
    let values = vec![Value::Timestamp(1_700_000_000_000); 10_000];

    let block = round_trip(&values, ColumnType::Timestamp, Encoding::Auto);

    assert_eq!(block.scheme(), Scheme::Bitmap);
    assert!(block.len() < values.len() * 2);
}

#[test]
fn test_all_distinct_values_round_trip_with_pinned_bitmap() {
    let values = ints(0..3000);

    let block = round_trip(&values, ColumnType::Int, Encoding::Bitmap);

    assert_eq!(block.scheme(), Scheme::Bitmap);
}

#[test]
fn test_decode_at_past_end_is_out_of_bounds() {
    let block = encode(&ints(0..10), ColumnType::Int, Encoding::Auto, &config()).expect("encode");

    let err = block.decode_at(10).expect_err("out of bounds");

    assert!(matches!(
        err,
        Error::PositionOutOfBounds { position: 10, row_count: 10 }
    ));
}

#[test]
fn test_decode_positions_matches_full_decode_in_request_order() {
    // Arrange
    let strings: Vec<Value> = (0..(FRAME_ROWS * 2 + 300))
        .map(|i| match i % 23 {
            0 => Value::Null,
            _ => Value::from(format!("key/{:05}", i / 3)),
        })
        .collect();
    let positions = vec![FRAME_ROWS * 2 + 299, 0, 23, FRAME_ROWS + 1, 23, 5, FRAME_ROWS - 1];
    let no_suffix = CodecConfig {
        trie_suffix_index: false,
        ..CodecConfig::default()
    };

    for (encoding, codec) in [
        (Encoding::Generic, config()),
        (Encoding::Bitmap, config()),
        (Encoding::Trie, config()),
        (Encoding::Trie, no_suffix),
    ] {
        let block = encode(&strings, ColumnType::String, encoding, &codec).expect("encode");
        let full = block.decode().expect("decode");

        // Act
        let batched = block.decode_positions(&positions).expect("decode_positions");

        // Assert
        let expected: Vec<Value> = positions.iter().map(|&p| full[p].clone()).collect();
        assert_eq!(batched, expected, "{encoding:?}");
    }
}

#[test]
fn test_decode_positions_rejects_out_of_bounds_and_accepts_empty() {
    let block = encode(&ints(0..10), ColumnType::Int, Encoding::Auto, &config()).expect("encode");

    let err = block.decode_positions(&[3, 10]).expect_err("out of bounds");

    assert!(matches!(
        err,
        Error::PositionOutOfBounds { position: 10, row_count: 10 }
    ));
    assert!(block.decode_positions(&[]).expect("empty").is_empty());
}

#[test]
fn test_encode_rejects_mismatched_value_type() {
    let values = vec![Value::Int(1), Value::from("two")];

    let err = encode(&values, ColumnType::Int, Encoding::Auto, &config()).expect_err("type");

    assert!(matches!(err, Error::Internal(_)));
}

#[test]
fn test_trie_encoding_on_int_column_is_rejected() {
    let err = encode(&ints(0..3), ColumnType::Int, Encoding::Trie, &config()).expect_err("trie");

    assert!(matches!(err, Error::InvalidQuery(_)));
}

// =========================================================================
// Corruption
// =========================================================================

#[test]
fn test_flipped_payload_byte_fails_checksum() {
    // Arrange
    let block = encode(&ints(0..500), ColumnType::Int, Encoding::Generic, &config()).expect("encode");
    let mut bytes = block.as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    // Act
    let err = ColumnBlock::parse(bytes).expect_err("corrupt");

    // Assert
    assert!(matches!(err, Error::CorruptBlock(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_truncated_block_is_corrupt() {
    let block = encode(&ints(0..500), ColumnType::Int, Encoding::Auto, &config()).expect("encode");
    let bytes = block.as_bytes().slice(..block.len() - 3);

    assert!(matches!(decode(bytes), Err(Error::CorruptBlock(_))));
    assert!(matches!(decode(vec![0u8; 4]), Err(Error::CorruptBlock(_))));
}

#[test]
fn test_bad_magic_and_version_are_corrupt() {
    let block = encode(&ints(0..5), ColumnType::Int, Encoding::Auto, &config()).expect("encode");

    let mut bad_magic = block.as_bytes().to_vec();
    bad_magic[0] = b'X';
    assert!(matches!(decode(bad_magic), Err(Error::CorruptBlock(_))));

    let mut bad_version = block.as_bytes().to_vec();
    bad_version[4] = BLOCK_VERSION + 1;
    assert!(matches!(decode(bad_version), Err(Error::CorruptBlock(_))));
}

#[test]
fn test_unchecked_corruption_is_still_detected_structurally() {
    // Arrange
    let config = CodecConfig {
        checksums: false,
        ..CodecConfig::default()
    };
    let values: Vec<Value> = (0..50).map(|i| Value::from(format!("k{i}"))).collect();
    let block = encode(&values, ColumnType::String, Encoding::Generic, &config).expect("encode");
    let mut bytes = block.as_bytes().to_vec();
    // Corrupt the frame directory offset of frame 0.
    bytes[HEADER_LEN + 8] = 0xFF;
    bytes[HEADER_LEN + 9] = 0xFF;

    // Act
    let result = decode(bytes);

    // Assert
    assert!(matches!(result, Err(Error::CorruptBlock(_))));
}

// =========================================================================
// Property tests
// =========================================================================

fn string_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        8 => "[a-c]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: decode(encode(v)) == v under every scheme.
    #[test]
    fn prop_string_columns_round_trip(
        values in proptest::collection::vec(string_value(), 0..600),
        pick in 0usize..4,
    ) {
        let encoding = [Encoding::Auto, Encoding::Generic, Encoding::Bitmap, Encoding::Trie][pick];
        let block = encode(&values, ColumnType::String, encoding, &config()).expect("encode");

        prop_assert_eq!(&block.decode().expect("decode"), &values);
        for (pos, expected) in values.iter().enumerate() {
            prop_assert_eq!(&block.decode_at(pos).expect("decode_at"), expected);
        }
    }

    /// Property: a batched decode agrees with the full decode at any positions.
    #[test]
    fn prop_decode_positions_agrees_with_decode(
        values in proptest::collection::vec(string_value(), 1..600),
        picks in proptest::collection::vec(any::<proptest::sample::Index>(), 0..64),
        pick in 0usize..3,
    ) {
        let encoding = [Encoding::Generic, Encoding::Bitmap, Encoding::Trie][pick];
        let block = encode(&values, ColumnType::String, encoding, &config()).expect("encode");
        let positions: Vec<usize> = picks.iter().map(|i| i.index(values.len())).collect();

        let batched = block.decode_positions(&positions).expect("decode_positions");

        let expected: Vec<Value> = positions.iter().map(|&p| values[p].clone()).collect();
        prop_assert_eq!(batched, expected);
    }

    /// Property: integer columns survive the auto-selected scheme.
    #[test]
    fn prop_int_columns_round_trip(
        raw in proptest::collection::vec(proptest::option::of(any::<i64>()), 0..800),
    ) {
        let values: Vec<Value> = raw.into_iter().map(Value::from).collect();
        let bytes = encode(&values, ColumnType::Int, Encoding::Auto, &config())
            .expect("encode")
            .as_bytes()
            .clone();

        prop_assert_eq!(decode(bytes).expect("decode"), values);
    }
}
