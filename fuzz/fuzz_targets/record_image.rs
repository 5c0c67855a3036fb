#![no_main]

use libfuzzer_sys::fuzz_target;
use ypw_core::{FileHeader, PasswordField, PasswordRecord, Record, SecureBuffer};

fuzz_target!(|data: &[u8]| {
    for field in PasswordField::ALL {
        if let Some(value) = field.read_from(data) {
            assert!(value.len() <= field.width());
        }
    }

    if let Ok(image) = SecureBuffer::from_slice(data) {
        if let Ok(record) = Record::<PasswordRecord>::from_buffer(image.clone()) {
            let decoded = record.value();
            assert!(decoded.name().len() <= PasswordField::Name.width());
        }
        if let Ok(header) = Record::<FileHeader>::from_buffer(image) {
            let _ = header.value().password_set_time();
        }
    }
});
