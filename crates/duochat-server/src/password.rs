use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to generate password hash: {0}")]
    Hash(argon2::password_hash::Error),

    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(argon2::password_hash::Error),
}

fn context() -> Argon2<'static> {
    Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::DEFAULT,
    )
}

/// Argon2id PHC string for `password` under a fresh salt.
pub fn hash(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = context()
        .hash_password(password.as_bytes(), &salt)
        .map_err(PasswordError::Hash)?;

    Ok(password_hash.to_string())
}

pub fn verify(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let hash = PasswordHash::new(hash).map_err(PasswordError::MalformedHash)?;

    match context().verify_password(password.as_bytes(), &hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(error) => Err(PasswordError::MalformedHash(error)),
    }
}
