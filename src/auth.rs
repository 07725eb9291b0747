use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid matric number")]
    UnknownMatric,
    #[error("Invalid PIN")]
    WrongPin,
    #[error("Invalid email or password")]
    WrongAdminCredentials,
    #[error("New PINs do not match")]
    PinMismatch,
    #[error("PIN must be at least {0} characters")]
    PinTooShort(usize),
    #[error("credential hashing failed: {0}")]
    Hashing(String),
}

/// Argon2id with default parameters, stored as a PHC string.
pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Errors only when `stored` is not a PHC string.
pub fn verify_secret(secret: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| AuthError::Hashing(format!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

pub fn generate_pin() -> String {
    rand::thread_rng()
        .gen_range(100_000..=999_999u32)
        .to_string()
}

pub fn check_new_pin(new_pin: &str, confirm: &str, min_len: usize) -> Result<(), AuthError> {
    if new_pin != confirm {
        return Err(AuthError::PinMismatch);
    }
    if new_pin.chars().count() < min_len {
        return Err(AuthError::PinTooShort(min_len));
    }
    Ok(())
}
