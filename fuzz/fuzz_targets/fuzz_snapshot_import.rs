#![no_main]

//! Fuzz target for session store snapshot import.
//!
//! A rejected snapshot must leave the store untouched, an accepted one must
//! survive export and import unchanged.

use libfuzzer_sys::fuzz_target;

use reprise::{SessionStore, Timestamp};

fuzz_target!(|data: &[u8]| {
    let store = match SessionStore::new(2, 2, true) {
        Ok(s) => s,
        Err(_) => return,
    };

    match store.import(data) {
        Ok(()) => {
            let exported = store.export().expect("export");
            let again = SessionStore::new(2, 2, true).expect("store");
            again.import(&exported).expect("reimport");
            assert_eq!(again.export().expect("export"), exported);
        }
        Err(_) => {
            let stats = store.stats(Timestamp::from_secs(0)).expect("stats");
            assert_eq!(stats.occupied, 0);
        }
    }
});
