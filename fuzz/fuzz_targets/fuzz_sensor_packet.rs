#![no_main]

use libfuzzer_sys::fuzz_target;
use lynx_sensor::packet::{read_packet, Packet, HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary serial input must never panic
    if let Ok((packet, consumed)) = Packet::decode(data) {
        assert!(consumed >= HEADER_SIZE && consumed <= data.len());

        // A decoded frame re-encodes to exactly the bytes consumed
        assert_eq!(packet.to_bytes(), &data[..consumed]);

        let mut reader = &data[..consumed];
        let reread = read_packet(&mut reader).expect("valid frame must read back");
        assert_eq!(reread, packet);
    }
});
