use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, Secret};

/// Hash a plaintext password for storage at rest.
///
/// Argon2id with default parameters; the random salt is embedded in the
/// returned PHC string.
pub fn hash_password(password: &Secret<String>) -> Result<String, anyhow::Error> {
    if password.expose_secret().is_empty() {
        return Err(anyhow::anyhow!("Password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(password_hash)
}
