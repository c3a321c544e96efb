use rand::{distributions::Uniform, thread_rng, Rng};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const AGENT_CODE_PREFIX: &str = "AGENT";

/// `AGENT` followed by six upper-case alphanumerics.
pub fn generate_agent_code() -> String {
    let mut rng = thread_rng();
    let suffix: String = (0..6)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", AGENT_CODE_PREFIX, suffix)
}

pub fn is_agent_code(code: &str) -> bool {
    let Some(suffix) = code.strip_prefix(AGENT_CODE_PREFIX) else {
        return false;
    };
    suffix.len() == 6
        && suffix
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// `T-` followed by seven digits.
pub fn generate_certificate_id() -> String {
    let digits: String = thread_rng()
        .sample_iter(Uniform::new_inclusive(0u8, 9))
        .take(7)
        .map(|d| char::from(b'0' + d))
        .collect();
    format!("T-{}", digits)
}
