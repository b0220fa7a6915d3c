use bytes::Bytes;

use super::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBody {
    pub(crate) inner: Bytes,
}

impl ContentBody {
    pub fn new(inner: impl Into<Bytes>) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn into_frame(self) -> Frame {
        Frame::ContentBody(self)
    }
}
