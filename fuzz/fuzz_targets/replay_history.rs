#![no_main]

//! Drive a store with an arbitrary sequence of mutations (some stale) and
//! check that every recorded revision reconstructs to the state the model
//! saw when it was written.

use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use palimpsest_core::{Name, Patch, Role, StoreError, User, UserStore};

const NAMES: [&str; 4] = ["Ada", "Alan", "Grace", "Edsger"];

fn patch_from(bytes: [u8; 3]) -> Patch {
    let [mask, a, b] = bytes;
    let mut patch = Patch::new();
    if mask & 1 != 0 {
        if let Ok(name) = Name::parse(NAMES[usize::from(a) % NAMES.len()]) {
            patch = patch.name(name);
        }
    }
    if mask & 2 != 0 {
        if let Some(dob) = NaiveDate::from_ymd_opt(1900 + i32::from(a), 1 + u32::from(b % 12), 1) {
            patch = patch.dob(dob);
        }
    }
    if mask & 4 != 0 {
        patch = patch.role(Role::ALL[usize::from(b) % Role::ALL.len()]);
    }
    patch
}

fuzz_target!(|data: &[u8]| {
    let Ok(mut store) = UserStore::open_in_memory() else {
        return;
    };
    let (Ok(name), Some(dob)) = (Name::parse("Origin"), NaiveDate::from_ymd_opt(1970, 1, 1)) else {
        return;
    };
    let Ok(id) = store.create(name, dob, Role::Guest) else {
        return;
    };
    let Ok((origin, _)) = store.get(&id) else {
        return;
    };

    let mut states: Vec<User> = vec![origin];
    for chunk in data.chunks_exact(4).take(64) {
        let latest = (states.len() - 1) as u64;
        // Low bit of the first byte picks a stale expected revision.
        let expected = if chunk[0] & 1 == 1 {
            u64::from(chunk[0] >> 1) % (latest + 2)
        } else {
            latest
        };
        let patch = patch_from([chunk[1], chunk[2], chunk[3]]);

        match store.mutate(&id, expected, &patch) {
            Ok(next) => {
                assert_eq!(expected, latest);
                assert_eq!(next, latest + 1);
                let mut model = states[states.len() - 1].clone();
                patch.apply_to(&mut model);
                states.push(model);
            }
            Err(StoreError::EmptyPatch { .. }) => assert!(patch.is_empty()),
            Err(StoreError::ConcurrencyConflict { actual, .. }) => {
                assert_ne!(expected, latest);
                assert_eq!(actual, latest);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    for (revision, expected) in states.iter().enumerate() {
        let got = store.get_at(&id, revision as u64).expect("reconstruct");
        assert_eq!(&got, expected);
    }
    let history = store.history(&id, 0).expect("history");
    assert_eq!(history.len(), states.len());
});
