#![no_main]

use constellation_core::nonce::NonceRegistry;
use constellation_core::Address;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

// Each input byte is one operation: the top two bits select consume / stale consume /
// invalidate_one / invalidate_all, the low bits pick one of eight requesters.
fuzz_target!(|data: &[u8]| {
    let mut registry = NonceRegistry::new();
    let mut consumed: HashSet<(Address, u64, u64)> = HashSet::new();

    for byte in data.iter().take(4096) {
        let requester = Address([byte & 0x07; 20]);
        let epoch = registry.current_epoch();
        let nonce = registry.current_nonce(&requester);

        match byte >> 6 {
            0 => {
                registry
                    .consume(&requester, epoch, nonce)
                    .expect("current pair must be accepted");
                assert!(consumed.insert((requester, epoch, nonce)), "pair consumed twice");
                assert_eq!(registry.current_nonce(&requester), nonce + 1);
            }
            1 => {
                // Every previously consumed pair stays dead.
                for (r, e, n) in consumed.iter() {
                    assert!(registry.consume(r, *e, *n).is_err());
                }
            }
            2 => {
                registry.invalidate_one(&requester).expect("bump");
                assert_eq!(registry.current_epoch(), epoch);
            }
            _ => {
                registry.invalidate_all().expect("bump");
                assert_eq!(registry.current_nonce(&requester), nonce);
                assert!(registry.check(&requester, epoch, nonce).is_err());
            }
        }
    }
});
