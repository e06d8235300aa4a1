use crate::util::validating_body::{BodyValidator, ByteStream, Md5BodyValidator, Sha1BodyValidator, ValidatingBody};

/// A resource body as retrieved from a remote repository, together with the checksums the remote
///  advertised for it (e.g. in response headers)
pub struct Blob {
    pub data: ByteStream,
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
}
impl Blob {
    pub fn new(data: ByteStream) -> Blob {
        Blob {
            data,
            md5: None,
            sha1: None,
        }
    }

    /// the body, failing at its end if it does not match the advertised checksums
    pub fn into_validated(self) -> ValidatingBody {
        let mut validators: Vec<Box<dyn BodyValidator>> = vec![];
        if let Some(sha1) = self.sha1 {
            validators.push(Box::new(Sha1BodyValidator::new(sha1)));
        }
        if let Some(md5) = self.md5 {
            validators.push(Box::new(Md5BodyValidator::new(md5)));
        }
        ValidatingBody::new(self.data, validators)
    }
}
