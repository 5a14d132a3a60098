use std::cmp;
use std::collections::VecDeque;
use std::io;
use std::io::Read;

/// A queue of byte buffers.
///
/// Buffers are kept whole to avoid copies; consumers read across
/// buffer boundaries.  An optional limit bounds how much plaintext a
/// connection will buffer on the caller's behalf.
pub(crate) struct BufferQueue {
    buffers: VecDeque<Vec<u8>>,
    limit: Option<usize>,
}

impl BufferQueue {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            buffers: VecDeque::new(),
            limit,
        }
    }

    /// Sets the upper limit on how many bytes this object can store.
    ///
    /// Setting a lower limit than the currently stored data is not an
    /// error.  `None` means no limit.
    pub(crate) fn set_limit(&mut self, new_limit: Option<usize>) {
        self.limit = new_limit;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.limit
            .map(|limit| self.len() > limit)
            .unwrap_or_default()
    }

    /// How many bytes we're storing
    pub(crate) fn len(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    /// For a proposed append of `len` bytes, how many bytes should we
    /// actually append to adhere to the currently set `limit`?
    pub(crate) fn apply_limit(&self, len: usize) -> usize {
        match self.limit {
            Some(limit) => cmp::min(len, limit.saturating_sub(self.len())),
            None => len,
        }
    }

    /// Append a copy of `bytes`, perhaps a prefix if we're near the limit.
    pub(crate) fn enqueue_limited_copy(&mut self, bytes: &[u8]) -> usize {
        let take = self.apply_limit(bytes.len());
        self.enqueue(bytes[..take].to_vec());
        take
    }

    /// Place the buffer in line if it is not empty.
    pub(crate) fn enqueue(&mut self, buf: Vec<u8>) -> usize {
        let len = buf.len();

        if !buf.is_empty() {
            self.buffers.push_back(buf);
        }

        len
    }

    /// Take the next buffer in line, if any.
    pub(crate) fn dequeue(&mut self) -> Option<Vec<u8>> {
        self.buffers.pop_front()
    }

    /// Read data out of this object, writing it into `buf` and
    /// returning how many bytes were written there.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut offs = 0;

        while offs < buf.len() && !self.is_empty() {
            let used = self.buffers[0]
                .as_slice()
                .read(&mut buf[offs..])?;

            self.consume(used);
            offs += used;
        }

        Ok(offs)
    }

    fn consume(&mut self, mut used: usize) {
        while let Some(mut buf) = self.buffers.pop_front() {
            if used < buf.len() {
                buf.drain(..used);
                self.buffers.push_front(buf);
                break;
            }
            used -= buf.len();
        }
    }

    /// Write as much as `wr` accepts, in one vectored write.
    pub(crate) fn write_to(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut bufs = [io::IoSlice::new(&[]); 64];
        for (iov, buf) in bufs.iter_mut().zip(self.buffers.iter()) {
            *iov = io::IoSlice::new(buf);
        }
        let len = cmp::min(bufs.len(), self.buffers.len());
        let used = wr.write_vectored(&bufs[..len])?;
        self.consume(used);
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::BufferQueue;

    #[test]
    fn short_enqueue_copy_with_limit() {
        let mut q = BufferQueue::new(Some(12));
        assert_eq!(q.enqueue_limited_copy(b"hello"), 5);
        assert_eq!(q.enqueue_limited_copy(b"world"), 5);
        assert_eq!(q.enqueue_limited_copy(b"hello"), 2);
        assert_eq!(q.enqueue_limited_copy(b"world"), 0);
        assert!(!q.is_full());

        let mut buf = [0u8; 12];
        assert_eq!(q.read(&mut buf).unwrap(), 12);
        assert_eq!(buf.to_vec(), b"helloworldhe".to_vec());
        assert!(q.is_empty());
    }

    #[test]
    fn partial_reads_span_buffers() {
        let mut q = BufferQueue::new(None);
        q.enqueue(b"test ".to_vec());
        q.enqueue(b"fixture ".to_vec());
        q.enqueue(b"data".to_vec());
        assert_eq!(q.len(), 17);

        let mut buf = [0u8; 8];
        assert_eq!(q.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"test fix");
        assert_eq!(q.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"ture dat");
        assert_eq!(q.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
    }

    #[test]
    fn write_to_consumes_what_was_written() {
        let mut q = BufferQueue::new(None);
        q.enqueue(b"abc".to_vec());
        q.enqueue(b"def".to_vec());

        let mut out = Vec::new();
        assert_eq!(q.write_to(&mut out).unwrap(), 6);
        assert_eq!(out, b"abcdef");
        assert_eq!(q.write_to(&mut out).unwrap(), 0);
    }

    #[test]
    fn empty_buffers_are_not_queued() {
        let mut q = BufferQueue::new(None);
        assert_eq!(q.enqueue(Vec::new()), 0);
        assert!(q.dequeue().is_none());
    }
}
