use rand::Rng;

use crate::protocol::RejectCode;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;

pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

pub fn generate_unique_room_code<F>(exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    loop {
        let code = generate_room_code();
        if !exists(&code) {
            return code;
        }
    }
}

/// Validate user-supplied room code input. Accepts any case and returns the
/// normalized uppercase form; anything that is not exactly six alphanumeric
/// ASCII characters is rejected before it reaches the registry.
pub fn normalize_room_code(input: &str) -> Result<String, RejectCode> {
    let trimmed = input.trim();
    if trimmed.len() != CODE_LENGTH || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RejectCode::InvalidCodeFormat);
    }
    Ok(trimmed.to_ascii_uppercase())
}
