use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::anyhow;
use bytes::Bytes;
use futures_core::{ready, Stream};
use pin_project_lite::pin_project;
use sha1::{Digest, Sha1};
use tracing::trace;

pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send + 'static>>;

pin_project! {
    /// This struct wraps a body stream, allowing it to be consumed asynchronously without
    ///  materializing it but at the same time performing validation that requires knowledge of
    ///  the entire body's data (e.g. an SHA1 checksum advertised in a response header).
    ///
    /// The actual contract is to append an (empty) chunk of data to the stream with an error if
    ///  the validation fails. Once a stream chunk with an error was returned, this stream will
    ///  stop polling from upstream and always return an error
    pub struct ValidatingBody {
        #[pin]
        body: ByteStream,
        validators: Vec<Box<dyn BodyValidator>>,
        is_failed: bool,
    }
}
impl ValidatingBody {
    pub fn new(body: ByteStream, validators: Vec<Box<dyn BodyValidator>>) -> ValidatingBody {
        ValidatingBody {
            body,
            validators,
            is_failed: false,
        }
    }
}

impl Stream for ValidatingBody {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_failed {
            return Poll::Ready(Some(Err(anyhow!("polling from failed stream"))));
        }

        let this = self.project();
        let inner = ready!(this.body.poll_next(cx));
        match inner {
            Some(Ok(data)) => {
                // available data from the wrapped body -> pass this on
                for v in this.validators.iter_mut() {
                    v.add_data(&data);
                }
                Poll::Ready(Some(Ok(data)))
            }
            None => {
                // wrapped body is fully drained -> finalize validation
                match this.validators.iter().find(|v| !v.do_validate()) {
                    None => Poll::Ready(None),
                    Some(failed) => {
                        *this.is_failed = true;
                        Poll::Ready(Some(Err(anyhow!("failed {} validation", failed.name()))))
                    }
                }
            }
            Some(Err(e)) => {
                *this.is_failed = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.body.size_hint()
    }
}

pub trait BodyValidator: Send {
    fn name(&self) -> &'static str;
    fn add_data(&mut self, data: &Bytes);
    fn do_validate(&self) -> bool;
}

pub struct Sha1BodyValidator {
    hasher: Sha1,
    expected_hash: [u8; 20],
}
impl Sha1BodyValidator {
    pub fn new(expected_hash: [u8; 20]) -> Sha1BodyValidator {
        Sha1BodyValidator {
            hasher: Default::default(),
            expected_hash,
        }
    }
}
impl BodyValidator for Sha1BodyValidator {
    fn name(&self) -> &'static str {
        "SHA1"
    }

    fn add_data(&mut self, data: &Bytes) {
        self.hasher.update(data);
    }

    fn do_validate(&self) -> bool {
        let hash: [u8; 20] = self.hasher.clone().finalize().into();
        trace!("validating SHA1 hash");
        hash == self.expected_hash
    }
}

pub struct Md5BodyValidator {
    context: md5::Context,
    expected_hash: [u8; 16],
}
impl Md5BodyValidator {
    pub fn new(expected_hash: [u8; 16]) -> Md5BodyValidator {
        Md5BodyValidator {
            context: md5::Context::new(),
            expected_hash,
        }
    }
}
impl BodyValidator for Md5BodyValidator {
    fn name(&self) -> &'static str {
        "MD5"
    }

    fn add_data(&mut self, data: &Bytes) {
        self.context.consume(data);
    }

    fn do_validate(&self) -> bool {
        let hash: [u8; 16] = self.context.clone()
            .compute()
            .into();
        trace!("validating MD5 hash");
        hash == self.expected_hash
    }
}
