//! Local content hashing.
//!
//! Change detection always compares MD5, since that is what a single-part S3
//! ETag carries. The configured algorithm picks the digest recorded in object
//! metadata.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    #[default]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!("unsupported hash algorithm '{}' (expected md5 or sha256)", other)),
        }
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lowercase hex MD5 of a file, streamed.
pub fn file_md5(path: &Path) -> io::Result<String> {
    digest_reader::<Md5, _>(File::open(path)?)
}

/// Lowercase hex digest of a file with the given algorithm.
pub fn file_digest(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let file = File::open(path)?;
    match algorithm {
        HashAlgorithm::Md5 => digest_reader::<Md5, _>(file),
        HashAlgorithm::Sha256 => digest_reader::<Sha256, _>(file),
    }
}

/// Normalize an S3 ETag for comparison: strip quotes and lowercase.
pub fn normalize_content_id(content_id: &str) -> String {
    content_id.trim().trim_matches('"').to_ascii_lowercase()
}

/// True when a local MD5 matches a remote single-part content identifier.
pub fn md5_matches(local_md5: &str, content_id: &str) -> bool {
    normalize_content_id(content_id) == local_md5.to_ascii_lowercase()
}
