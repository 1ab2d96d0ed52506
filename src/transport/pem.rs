//! Utilities for reading PEM files as [`Certificate`]s and [`PrivateKey`]s, as necessary to
//! initialize TLS.

use std::{fs::File, io, io::Read, path::Path};
use tokio_rustls::rustls::{Certificate, PrivateKey};

/// Read the file at `path` into memory as a vector of PEM-encoded `CERTIFICATE`s, silently skipping
/// any entries in the file which are not labeled `CERTIFICATE`.
pub fn read_certificates(path: impl AsRef<Path>) -> Result<Vec<Certificate>, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let mut certificates = Vec::new();
    for pem::Pem { contents, .. } in pem::parse_many(contents)
        .into_iter()
        .filter(|p| p.tag == "CERTIFICATE")
    {
        certificates.push(Certificate(contents));
    }
    Ok(certificates)
}

/// Read the file at `path` as a single PEM-encoded `CERTIFICATE`.
#[cfg(feature = "allow_explicit_certificate_trust")]
pub fn read_single_certificate(path: impl AsRef<Path>) -> Result<Certificate, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let pem = pem::parse(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid PEM encoding in certificate: {}", e),
        )
    })?;
    if pem.tag == "CERTIFICATE" {
        Ok(Certificate(pem.contents))
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not labeled as a certificate: '{}'", pem.tag),
        ))
    }
}

/// Read the file at `path` as a single PEM-encoded `PRIVATE KEY`.
pub fn read_private_key(path: impl AsRef<Path>) -> Result<PrivateKey, io::Error> {
    let mut file = File::open(&path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let pem = pem::parse(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid PEM encoding in private key: {}", e),
        )
    })?;
    if pem.tag == "PRIVATE KEY" {
        Ok(PrivateKey(pem.contents))
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not labeled as a private key: '{}'", pem.tag),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_pem(tag: &str, der: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let encoded = pem::encode(&pem::Pem {
            tag: tag.to_string(),
            contents: der.to_vec(),
        });
        file.write_all(encoded.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_a_bundle_of_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bundle = pem::encode(&pem::Pem {
            tag: "CERTIFICATE".to_string(),
            contents: vec![1, 2, 3],
        }) + &pem::encode(&pem::Pem {
            tag: "CERTIFICATE".to_string(),
            contents: vec![4, 5, 6],
        });
        file.write_all(bundle.as_bytes()).unwrap();

        let certs = read_certificates(file.path()).unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0].0, vec![1, 2, 3]);
        assert_eq!(certs[1].0, vec![4, 5, 6]);
    }

    #[test]
    fn skips_entries_not_labeled_certificate() {
        let file = write_pem("PRIVATE KEY", &[9, 9, 9]);
        let certs = read_certificates(file.path()).unwrap();
        assert!(certs.is_empty());
    }

    #[test]
    fn reads_a_private_key() {
        let file = write_pem("PRIVATE KEY", &[7, 7, 7]);
        let key = read_private_key(file.path()).unwrap();
        assert_eq!(key.0, vec![7, 7, 7]);
    }

    #[test]
    fn rejects_a_private_key_file_with_the_wrong_label() {
        let file = write_pem("CERTIFICATE", &[1]);
        assert!(read_private_key(file.path()).is_err());
    }
}
