//! The installation's static key pair on disk.

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::Engine;
use protocol::StaticKeypair;
use serde::{Deserialize, Serialize};

use super::PairingError;

#[derive(Serialize, Deserialize)]
struct KeypairFile {
    private_key: String,
    public_key: String,
}

/// Loads the static key pair from `path`, generating and saving one if the
/// file does not exist.
pub fn load_or_generate(path: &Path) -> Result<StaticKeypair, PairingError> {
    if path.exists() {
        return load(path);
    }

    let keypair = StaticKeypair::generate().map_err(|e| PairingError::Malformed {
        path: path.to_path_buf(),
        reason: format!("key generation failed: {}", e),
    })?;
    save(path, &keypair)?;

    tracing::info!("Generated new static key pair and saved to {:?}", path);
    Ok(keypair)
}

fn load(path: &Path) -> Result<StaticKeypair, PairingError> {
    let malformed = |reason: String| PairingError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let contents = fs::read_to_string(path).map_err(|source| PairingError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })?;
    let file: KeypairFile = serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))?;

    let engine = base64::engine::general_purpose::STANDARD;
    let private = engine
        .decode(&file.private_key)
        .map_err(|e| malformed(e.to_string()))?;
    let public = engine
        .decode(&file.public_key)
        .map_err(|e| malformed(e.to_string()))?;

    StaticKeypair::from_slices(&private, &public).map_err(|e| malformed(e.to_string()))
}

fn save(path: &Path, keypair: &StaticKeypair) -> Result<(), PairingError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PairingError::Io {
            action: "create",
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let file = KeypairFile {
        private_key: engine.encode(keypair.private_key()),
        public_key: engine.encode(keypair.public_key()),
    };
    let contents = serde_json::to_string_pretty(&file).map_err(|e| PairingError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let io_err = |action: &'static str| {
        move |source: std::io::Error| PairingError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    };

    // The key is only ever written to a file created private, then renamed
    let temp_path = path.with_extension("json.tmp");
    match fs::remove_file(&temp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err("remove stale")(e)),
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&temp_path).map_err(io_err("create"))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(io_err("write"))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(io_err("replace"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys").join("noise_static_keypair.json");

        let generated = load_or_generate(&path).unwrap();
        assert!(path.exists());

        let reloaded = load_or_generate(&path).unwrap();
        assert_eq!(generated, reloaded);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noise_static_keypair.json");
        load_or_generate(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_temp_file_does_not_leak_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noise_static_keypair.json");
        let temp_path = temp_dir.path().join("noise_static_keypair.json.tmp");
        fs::write(&temp_path, "leftover").unwrap();
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o644)).unwrap();

        load_or_generate(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_malformed_file_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noise_static_keypair.json");
        fs::write(&path, r#"{"private_key":"AAAA","public_key":"AAAA"}"#).unwrap();

        assert!(matches!(
            load_or_generate(&path),
            Err(PairingError::Malformed { .. })
        ));
        assert!(fs::read_to_string(&path).unwrap().contains("AAAA"));
    }
}
