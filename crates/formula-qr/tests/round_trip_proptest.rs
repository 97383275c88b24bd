use formula_qr::{
    combine, split, Artifact, CancellationToken, NoProgress, PayloadMode, Restored,
    TransportCodec, TransportConfig,
};
use proptest::prelude::*;

/// Reorder `texts` by pairing them with arbitrary sort keys.
fn shuffle(texts: Vec<String>, keys: &[u32]) -> Vec<String> {
    let mut keyed: Vec<(u32, String)> = texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| (keys[i % keys.len()] ^ i as u32, text))
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, text)| text).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn split_then_combine_in_any_order(
        blob in proptest::collection::vec(any::<u8>(), 0..=6000),
        capacity in 60usize..=3000,
        keys in proptest::collection::vec(any::<u32>(), 1..=32),
    ) {
        let fragments = split(&blob, capacity, 8, PayloadMode::Region, &NoProgress, &CancellationToken::new())
            .unwrap();
        prop_assert!(fragments.iter().all(|f| f.text().len() <= capacity));

        let texts: Vec<String> = fragments.into_iter().map(|f| f.into_text()).collect();
        let mut shuffled = shuffle(texts.clone(), &keys);
        // Re-scanning a code must not change the result.
        shuffled.extend(texts.iter().take(2).cloned());

        let combined = combine(&shuffled).unwrap();
        prop_assert_eq!(combined.bytes, blob);
    }

    #[test]
    fn files_survive_the_full_pipeline(
        bytes in proptest::collection::vec(any::<u8>(), 0..=20_000),
        capacity in 1000usize..=2953,
        keys in proptest::collection::vec(any::<u32>(), 1..=8),
    ) {
        let codec = TransportCodec::new(TransportConfig { capacity, ..TransportConfig::default() });
        let artifact = Artifact::File { name: "payload.bin".to_string(), bytes: bytes.clone() };
        let fragments = codec.encode(&artifact, &NoProgress, &CancellationToken::new()).unwrap();
        let texts = shuffle(fragments.into_iter().map(|f| f.into_text()).collect(), &keys);

        match codec.decode(texts, &NoProgress, &CancellationToken::new()) {
            Ok(Restored::File { bytes: restored }) => prop_assert_eq!(restored, bytes),
            Ok(other) => prop_assert!(false, "expected a file, got {:?}", other.mode()),
            Err(failure) => prop_assert!(false, "decode failed: {}", failure),
        }
    }
}
