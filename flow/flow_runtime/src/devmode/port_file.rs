use crate::error::DevModeError;
use std::fs;
use std::io;
use std::path::Path;

/// Reads the port of a previously started dev server. A missing or
/// unreadable file means there is nothing to reuse.
pub fn read_port(path: &Path) -> Result<Option<u16>, DevModeError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(DevModeError::PortFile(err)),
    };

    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(Some(port)),
        _ => {
            log::warn!("ignoring malformed dev server port file {}", path.display());
            Ok(None)
        }
    }
}

pub fn write_port(path: &Path, port: u16) -> Result<(), DevModeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(DevModeError::PortFile)?;
        }
    }
    fs::write(path, port.to_string()).map_err(DevModeError::PortFile)
}

pub fn remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove dev server port file {}: {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("flow-port-file-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = temp_path("missing.port");
        assert_eq!(read_port(&path).expect("read"), None);
    }

    #[test]
    fn written_port_reads_back_and_removal_is_idempotent() {
        let path = temp_path("written.port");
        write_port(&path, 43_210).expect("write");
        assert_eq!(read_port(&path).expect("read"), Some(43_210));

        remove(&path);
        remove(&path);
        assert_eq!(read_port(&path).expect("read"), None);
    }

    #[test]
    fn garbage_is_ignored() {
        let path = temp_path("garbage.port");
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, "not a port").expect("write");
        assert_eq!(read_port(&path).expect("read"), None);
        remove(&path);
    }
}
