//! Device-lock key bootstrap.
//!
//! The key that unlocks device-lock protected entries is generated once at
//! first boot and persisted under the data directory with owner-only
//! permissions. Rotating it means re-encrypting every device-lock protected
//! value via the storage plugins' re-encryption entry point.

use std::fs;
use std::io::Write;
use std::path::Path;

use coffer_core::{Error, Result, SecretKey};
use rand::RngCore;

const DEVICE_LOCK_KEY_FILE: &str = "device-lock.key";
const DEVICE_LOCK_KEY_LEN: usize = 32;

/// Load the device-lock key, generating and persisting it on first boot.
pub fn load_or_create_device_lock_key(data_dir: &Path) -> Result<SecretKey> {
    let path = data_dir.join(DEVICE_LOCK_KEY_FILE);
    match fs::read(&path) {
        Ok(bytes) if !bytes.is_empty() => return Ok(SecretKey::from(bytes)),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::Daemon(format!("unable to read device lock key: {err}"))),
    }

    let mut bytes = vec![0u8; DEVICE_LOCK_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);

    fs::create_dir_all(data_dir)
        .map_err(|err| Error::Daemon(format!("unable to create data directory: {err}")))?;
    let mut file = fs::File::create(&path)
        .map_err(|err| Error::Daemon(format!("unable to create device lock key: {err}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(0o600);
        file.set_permissions(permissions)
            .map_err(|err| Error::Daemon(format!("unable to restrict device lock key: {err}")))?;
    }
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|err| Error::Daemon(format!("unable to persist device lock key: {err}")))?;

    Ok(SecretKey::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generated_key_is_stable_across_loads() {
        let dir = tempdir().unwrap();
        let first = load_or_create_device_lock_key(dir.path()).unwrap();
        let second = load_or_create_device_lock_key(dir.path()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), DEVICE_LOCK_KEY_LEN);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        load_or_create_device_lock_key(dir.path()).unwrap();
        let metadata = std::fs::metadata(dir.path().join(DEVICE_LOCK_KEY_FILE)).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
