use std::fmt::Write;

use rand::RngCore;

/// Mint a fresh conversation id: 40 hex digits from 20 random bytes.
///
/// Ids are generated at first save and never derived from content, so a
/// continued conversation keeps its id no matter how its messages change.
pub fn new_conversation_id() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);

    bytes.iter().fold(String::with_capacity(40), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
