#![no_main]

use chrono::Datelike;
use libfuzzer_sys::fuzz_target;
use palimpsest_core::model::user::parse_date;
use palimpsest_core::{MAX_NAME_LEN, Name, Role, UserId};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(name) = Name::parse(raw) {
        let stored = name.as_str();
        assert!(!stored.is_empty());
        assert_eq!(stored, stored.trim());
        assert!(stored.chars().count() <= MAX_NAME_LEN);
        assert_eq!(Name::parse(stored).ok().as_ref(), Some(&name));
    }

    if let Ok(role) = raw.parse::<Role>() {
        assert_eq!(role.as_str().parse::<Role>().ok(), Some(role));
    }

    if let Ok(date) = parse_date(raw) {
        if (0..=9999).contains(&date.year()) {
            assert_eq!(parse_date(&date.to_string()).ok(), Some(date));
        }
    }

    if let Ok(id) = raw.parse::<UserId>() {
        assert_eq!(id.to_string().parse::<UserId>().ok(), Some(id));
    }
});
