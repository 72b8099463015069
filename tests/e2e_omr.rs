//! End-to-end retrieval correctness tests.
//!
//! The full homomorphic runs are expensive (the range check evaluates a
//! degree-65536 polynomial per clue batch) and are marked `#[ignore]`; run
//! them with `cargo test --release -- --ignored`. The non-ignored test
//! exercises the full plaintext algebra of the retrieval pipeline: bucket
//! assignment, weighted compression, and the linear solve.

use rand::{thread_rng, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use omr::graph::BipartiteGraph;
use omr::math::modular::{ModT, T};
use omr::math::solver;
use omr::pvw::PvwSecretKey;
use omr::{Detector, OmrParams, Recipient, RetrievalConfig, TransactionStore};

/// Smallest usable degree: the PVW tile (512 slots for n = 450) must divide
/// half the degree.
fn test_params() -> OmrParams {
    OmrParams::with_degree(1024).unwrap()
}

/// A bucket system scaled down to fit 1024 slots.
fn test_config(num_transactions: usize) -> RetrievalConfig {
    RetrievalConfig {
        num_transactions,
        pertinent_bound: 8,
        payload_slots: 32,
        num_buckets: 30,
        repetition: 3,
        graph_seed: 3,
        layers: 3,
        expansion_step: 32,
    }
}

fn synthesize(
    store: &TransactionStore,
    recipient: &Recipient,
    num_transactions: usize,
    pertinent: &[usize],
) -> Vec<Vec<u64>> {
    let mut rng = thread_rng();
    store.generate_database(num_transactions).unwrap();
    let pvw_pk = recipient.pvw_public_key(&mut rng);

    let mut expected = Vec::new();
    for i in 0..num_transactions {
        let clue = if pertinent.contains(&i) {
            expected.push(store.load_payload(i).unwrap());
            pvw_pk.encrypt_zero(&mut rng)
        } else {
            PvwSecretKey::random(&recipient.params().pvw, &mut rng).encrypt_zero(&mut rng)
        };
        store.save_clue(i, &clue).unwrap();
    }
    expected
}

#[test]
fn test_plaintext_pipeline_algebra() {
    // Simulate the detector's compression arithmetic without encryption and
    // check the recipient's solver recovers the exact payloads.
    let config = test_config(512);
    let graph = BipartiteGraph::generate(&config);
    let width = config.payload_slots;

    let pertinent: Vec<usize> = vec![7, 100, 350, 511];
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let payloads: Vec<Vec<u64>> = pertinent
        .iter()
        .map(|_| (0..width).map(|_| rng.gen_range(0..T)).collect())
        .collect();

    // rhs accumulation exactly as the payload compressor lays it out
    let mut rhs_slots = vec![0u64; config.num_buckets * width];
    for (&index, payload) in pertinent.iter().zip(&payloads) {
        for (bucket, &weight) in graph.buckets[index].iter().zip(&graph.weights[index]) {
            for (j, &value) in payload.iter().enumerate() {
                let slot = bucket * width + j;
                rhs_slots[slot] = ModT::add(rhs_slots[slot], ModT::mul(value, weight));
            }
        }
    }

    // recipient-side system assembly
    let rhs: Vec<Vec<u64>> = (0..config.num_buckets)
        .map(|b| rhs_slots[b * width..(b + 1) * width].to_vec())
        .collect();
    let mut lhs = vec![vec![0u64; pertinent.len()]; config.num_buckets];
    for (column, &index) in pertinent.iter().enumerate() {
        for (bucket, &weight) in graph.buckets[index].iter().zip(&graph.weights[index]) {
            lhs[*bucket][column] = weight;
        }
    }

    let solution = solver::solve(lhs, rhs, width).unwrap();
    assert_eq!(solution, payloads);
}

#[test]
#[ignore = "full homomorphic pipeline; run with --release -- --ignored"]
fn test_omd_roundtrip() {
    let mut rng = thread_rng();
    let params = test_params();
    let config = test_config(1024);
    let dir = tempfile::tempdir().unwrap();
    let store =
        TransactionStore::open(dir.path(), params.pvw.clone(), config.payload_slots).unwrap();

    let recipient = Recipient::generate(params.clone(), config.clone(), &mut rng).unwrap();
    synthesize(&store, &recipient, 1024, &[123]);

    let key = recipient.detection_key(&mut rng).unwrap();
    let detector = Detector::new(params, config, key).unwrap();
    let digest = detector.run_omd(&store, 1).unwrap();

    assert_eq!(recipient.decode_omd(&digest).unwrap(), vec![123]);
}

#[test]
#[ignore = "full homomorphic pipeline; run with --release -- --ignored"]
fn test_omr2_roundtrip() {
    let mut rng = thread_rng();
    let params = test_params();
    let config = test_config(1024);
    let dir = tempfile::tempdir().unwrap();
    let store =
        TransactionStore::open(dir.path(), params.pvw.clone(), config.payload_slots).unwrap();

    let recipient = Recipient::generate(params.clone(), config.clone(), &mut rng).unwrap();
    let pertinent = [100usize, 500, 1000];
    let expected = synthesize(&store, &recipient, 1024, &pertinent);

    let key = recipient.detection_key(&mut rng).unwrap();
    let detector = Detector::new(params, config, key).unwrap();
    let digest = detector.run_omr2(&store, 1).unwrap();

    let recovered = recipient.decode_omr2(&digest).unwrap();
    assert_eq!(recovered.len(), pertinent.len());
    for ((message, &index), payload) in recovered.iter().zip(&pertinent).zip(&expected) {
        assert_eq!(message.index, index as u64);
        assert_eq!(&message.payload, payload);
    }
}

#[test]
#[ignore = "full homomorphic pipeline; run with --release -- --ignored"]
fn test_omr3_roundtrip() {
    let mut rng = thread_rng();
    let params = test_params();
    let config = test_config(1024);
    let dir = tempfile::tempdir().unwrap();
    let store =
        TransactionStore::open(dir.path(), params.pvw.clone(), config.payload_slots).unwrap();

    let recipient = Recipient::generate(params.clone(), config.clone(), &mut rng).unwrap();
    let pertinent = [0usize, 512, 1023];
    let expected = synthesize(&store, &recipient, 1024, &pertinent);

    let key = recipient.detection_key(&mut rng).unwrap();
    let detector = Detector::new(params, config, key).unwrap();
    let digest = detector.run_omr3(&store, 1, rng.gen()).unwrap();

    let recovered = recipient.decode_omr3(&digest).unwrap();
    assert_eq!(recovered.len(), pertinent.len());
    for ((message, &index), payload) in recovered.iter().zip(&pertinent).zip(&expected) {
        assert_eq!(message.index, index as u64);
        assert_eq!(&message.payload, payload);
    }
}

#[test]
#[ignore = "generates full-ladder keys; run with --release -- --ignored"]
fn test_detection_key_sizes() {
    let mut rng = thread_rng();
    let params = test_params();
    let config = test_config(1024);
    let recipient = Recipient::generate(params, config, &mut rng).unwrap();
    let key = recipient.detection_key(&mut rng).unwrap();

    let detection_only = key.detection_only_size();
    let full = key.full_size();
    assert!(detection_only > 0);
    // the retrieval key carries the level-specific rotation sets on top
    assert!(full > detection_only);
}
