//! Property-based tests for error classification and read-back comparison.

use hostflash_errors::prelude::*;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_error_kind_roundtrip(code in 1u8..=10u8) {
        let kind = ErrorKind::from_code(code);
        prop_assert_eq!(kind.map(ErrorKind::code), Some(code));
    }

    #[test]
    fn test_out_of_bounds_message_contains_target(target in "[A-Z]{3}\\[[0-9]\\]", offset in 0usize..0x100000) {
        let err = UpdateError::out_of_bounds(&target, offset, 4, 0x1000);
        let msg = err.to_string();
        prop_assert!(msg.contains(&target));
        prop_assert!(err.is_defect());
    }

    #[test]
    fn test_compare_equal_buffers_is_none(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        prop_assert!(ReadBackMismatch::compare(&data, &data, None).is_none());
    }

    #[test]
    fn test_single_flip_is_located(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        pick in any::<prop::sample::Index>(),
    ) {
        let offset = pick.index(data.len());
        let mut corrupt = data.clone();
        if let Some(b) = corrupt.get_mut(offset) {
            *b ^= 0xff;
        }
        let mismatch = ReadBackMismatch::compare(&data, &corrupt, None);
        prop_assert_eq!(mismatch.as_ref().map(|m| m.mismatch_count), Some(1));
        prop_assert_eq!(mismatch.and_then(|m| m.first_offset()), Some(offset));
    }

    #[test]
    fn test_excluded_flip_is_ignored(
        data in proptest::collection::vec(any::<u8>(), 1..512),
        pick in any::<prop::sample::Index>(),
    ) {
        let offset = pick.index(data.len());
        let mut corrupt = data.clone();
        if let Some(b) = corrupt.get_mut(offset) {
            *b ^= 0x01;
        }
        prop_assert!(ReadBackMismatch::compare(&data, &corrupt, Some(offset..offset + 1)).is_none());
    }

    #[test]
    fn test_samples_never_exceed_cap(
        expected in proptest::collection::vec(any::<u8>(), 0..256),
        actual in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        if let Some(m) = ReadBackMismatch::compare(&expected, &actual, None) {
            prop_assert!(m.samples.len() <= ReadBackMismatch::MAX_SAMPLES);
            prop_assert!(m.samples.len() <= m.mismatch_count);
            prop_assert!(m.mismatch_count <= m.compared);
        }
    }
}
