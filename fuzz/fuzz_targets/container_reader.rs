#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use ypw_core::format::{IDENTIFIER_LEN, check_identifier, open_header};
use ypw_core::{ChunkReader, CryptoError, Key, KeyDerivation, PartDec};

struct Constant;

impl KeyDerivation for Constant {
    fn derive_into(&self, _passphrase: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
        output.fill(0x5A);
        Ok(())
    }
}

fn key() -> &'static Key {
    static KEY: OnceLock<Key> = OnceLock::new();
    KEY.get_or_init(|| Key::derive(b"fuzz", &Constant).expect("constant key"))
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 || check_identifier(data).is_err() {
        return;
    }

    let body = &data[IDENTIFIER_LEN..];
    let mut reader = ChunkReader::new(body, body.len() as u64);
    let Ok(Some(header)) = reader.next_chunk("header") else {
        return;
    };
    let _ = open_header(key(), header.as_slice());

    for _ in 0..512 {
        match reader.next_chunk("record") {
            Ok(Some(chunk)) => {
                let _ = PartDec::from_ciphertext(chunk, key());
            }
            Ok(None) | Err(_) => return,
        }
    }
});
