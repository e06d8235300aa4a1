use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha1::{Digest, Sha1};
use tokio::fs::{read_to_string, write, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
}
impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 2] = [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha1];

    /// file extension of the sidecar file, also the lower-cased algorithm name
    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 32,
            ChecksumAlgorithm::Sha1 => 40,
        }
    }

    pub fn sidecar_name(&self, file_name: &str) -> String {
        format!("{}.{}", file_name, self.extension())
    }

    pub fn is_checksum_file(file_name: &str) -> bool {
        Self::ALL.iter()
            .any(|alg| file_name.ends_with(&format!(".{}", alg.extension())))
    }
}

/// Hashes data with both supported algorithms in a single pass
#[derive(Clone)]
pub struct Digests {
    sha1: Sha1,
    md5: md5::Context,
}
impl Digests {
    pub fn new() -> Digests {
        Digests {
            sha1: Default::default(),
            md5: md5::Context::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.md5.consume(data);
    }

    pub fn finalize(self) -> ComputedChecksums {
        let sha1: [u8; 20] = self.sha1.finalize().into();
        let md5: [u8; 16] = self.md5.compute().into();
        ComputedChecksums {
            md5: hex::encode(md5),
            sha1: hex::encode(sha1),
        }
    }
}
impl Default for Digests {
    fn default() -> Self {
        Digests::new()
    }
}

/// lower-case hex strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedChecksums {
    pub md5: String,
    pub sha1: String,
}
impl ComputedChecksums {
    pub fn get(&self, algorithm: ChecksumAlgorithm) -> &str {
        match algorithm {
            ChecksumAlgorithm::Md5 => &self.md5,
            ChecksumAlgorithm::Sha1 => &self.sha1,
        }
    }
}

/// Extracts the hash from the contents of a checksum file. Accepts the plain format
///  ("<hex>" or "<hex>  <file name>") as well as the BSD format ("MD5 (<file>) = <hex>").
pub fn parse_checksum_file(contents: &str, algorithm: ChecksumAlgorithm) -> Option<String> {
    let is_hash = |s: &str| s.len() == algorithm.hex_len() && s.chars().all(|c| c.is_ascii_hexdigit());

    let trimmed = contents.trim();
    if let Some((_, hash)) = trimmed.rsplit_once(" = ") {
        let hash = hash.trim();
        return is_hash(hash).then(|| hash.to_ascii_lowercase());
    }
    trimmed.split_whitespace()
        .next()
        .filter(|s| is_hash(s))
        .map(str::to_ascii_lowercase)
}

/// A file in storage together with its checksum sidecar files
pub struct ChecksummedFile {
    path: PathBuf,
}
impl ChecksummedFile {
    pub fn new(path: impl Into<PathBuf>) -> ChecksummedFile {
        ChecksummedFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sidecar_path(&self, algorithm: ChecksumAlgorithm) -> PathBuf {
        let mut result = self.path.clone().into_os_string();
        result.push(".");
        result.push(algorithm.extension());
        result.into()
    }

    pub async fn calculate(&self) -> io::Result<ComputedChecksums> {
        trace!("calculating checksums of {}", self.path.display());
        let mut stream = ReaderStream::new(File::open(&self.path).await?);
        let mut digests = Digests::new();
        while let Some(chunk) = stream.next().await {
            digests.update(&chunk?);
        }
        Ok(digests.finalize())
    }

    /// Ok(None) if there is no sidecar file or it does not contain a well-formed hash
    pub async fn read_sidecar(&self, algorithm: ChecksumAlgorithm) -> io::Result<Option<String>> {
        let sidecar = self.sidecar_path(algorithm);
        match read_to_string(&sidecar).await {
            Ok(contents) => {
                let result = parse_checksum_file(&contents, algorithm);
                if result.is_none() {
                    debug!("ignoring malformed checksum file {}", sidecar.display());
                }
                Ok(result)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write_sidecar(&self, algorithm: ChecksumAlgorithm, checksums: &ComputedChecksums) -> io::Result<()> {
        write(self.sidecar_path(algorithm), checksums.get(algorithm)).await
    }

    /// checksum from the sidecar file if it is present and well-formed, computed otherwise
    pub async fn checksums(&self) -> io::Result<ComputedChecksums> {
        let md5 = self.read_sidecar(ChecksumAlgorithm::Md5).await?;
        let sha1 = self.read_sidecar(ChecksumAlgorithm::Sha1).await?;
        match (md5, sha1) {
            (Some(md5), Some(sha1)) => Ok(ComputedChecksums { md5, sha1 }),
            (md5, sha1) => {
                let computed = self.calculate().await?;
                Ok(ComputedChecksums {
                    md5: md5.unwrap_or(computed.md5),
                    sha1: sha1.unwrap_or(computed.sha1),
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn test_digests() {
        let mut digests = Digests::new();
        digests.update(b"hel");
        digests.update(b"lo");
        assert_eq!(digests.finalize(), ComputedChecksums { md5: HELLO_MD5.to_string(), sha1: HELLO_SHA1.to_string() });
    }

    #[rstest]
    #[case::plain("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d", ChecksumAlgorithm::Sha1, Some(HELLO_SHA1))]
    #[case::upper_case_with_newline("AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D\n", ChecksumAlgorithm::Sha1, Some(HELLO_SHA1))]
    #[case::with_file_name("5d41402abc4b2a76b9719d911017c592  hello.txt", ChecksumAlgorithm::Md5, Some(HELLO_MD5))]
    #[case::bsd("MD5 (hello.txt) = 5d41402abc4b2a76b9719d911017c592", ChecksumAlgorithm::Md5, Some(HELLO_MD5))]
    #[case::wrong_length("5d41402abc4b2a76b9719d911017c592", ChecksumAlgorithm::Sha1, None)]
    #[case::not_hex("<html>not found</html>", ChecksumAlgorithm::Md5, None)]
    #[case::empty("", ChecksumAlgorithm::Md5, None)]
    fn test_parse_checksum_file(#[case] contents: &str, #[case] algorithm: ChecksumAlgorithm, #[case] expected: Option<&str>) {
        assert_eq!(parse_checksum_file(contents, algorithm).as_deref(), expected);
    }

    #[test]
    fn test_is_checksum_file() {
        assert!(ChecksumAlgorithm::is_checksum_file("a-1.0.jar.sha1"));
        assert!(ChecksumAlgorithm::is_checksum_file("a-1.0.jar.md5"));
        assert!(!ChecksumAlgorithm::is_checksum_file("a-1.0.jar"));
    }

    #[tokio::test]
    async fn test_checksummed_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = ChecksummedFile::new(dir.path().join("hello.txt"));
        std::fs::write(file.path(), "hello").unwrap();

        assert_eq!(file.read_sidecar(ChecksumAlgorithm::Sha1).await.unwrap(), None);
        let computed = file.checksums().await.unwrap();
        assert_eq!(computed.sha1, HELLO_SHA1);

        file.write_sidecar(ChecksumAlgorithm::Md5, &computed).await.unwrap();
        assert_eq!(file.sidecar_path(ChecksumAlgorithm::Md5), dir.path().join("hello.txt.md5"));
        assert_eq!(file.read_sidecar(ChecksumAlgorithm::Md5).await.unwrap().as_deref(), Some(HELLO_MD5));

        // sidecars win over content
        std::fs::write(file.sidecar_path(ChecksumAlgorithm::Sha1), "0000000000000000000000000000000000000000").unwrap();
        assert_eq!(file.checksums().await.unwrap().sha1, "0000000000000000000000000000000000000000");
    }
}
